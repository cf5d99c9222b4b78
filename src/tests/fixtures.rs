//! Test descriptors and a recording sink.
//!
//! The descriptor graph is built from leaked boxes so cyclic schemas
//! (`Value` → `Struct` → `Value`) can be wired after construction.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::Cell;

use crate::descriptor::{FieldDef, FieldType, MessageDef};
use crate::error::ParseError;
use crate::options::ParserOptions;
use crate::parser::StreamingParser;
use crate::sink::Sink;

pub(crate) struct TestMessage {
    full_name: String,
    fields: Vec<TestField>,
}

pub(crate) struct TestField {
    name: &'static str,
    json_name: Option<&'static str>,
    number: u32,
    ty: FieldType,
    repeated: bool,
    map: bool,
    sub: Cell<Option<&'static TestMessage>>,
    enum_values: &'static [(&'static str, i32)],
}

impl MessageDef for TestMessage {
    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn field_by_json_name(&self, name: &str) -> Option<&dyn FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name || f.json_name == Some(name))
            .map(|f| f as &dyn FieldDef)
    }

    fn field_by_number(&self, number: u32) -> Option<&dyn FieldDef> {
        self.fields
            .iter()
            .find(|f| f.number == number)
            .map(|f| f as &dyn FieldDef)
    }
}

impl FieldDef for TestField {
    fn name(&self) -> &str {
        self.name
    }

    fn field_type(&self) -> FieldType {
        self.ty
    }

    fn is_seq(&self) -> bool {
        self.repeated
    }

    fn is_map(&self) -> bool {
        self.map
    }

    fn subdef(&self) -> Option<&dyn MessageDef> {
        self.sub.get().map(|m| m as &dyn MessageDef)
    }

    fn enum_value_by_name(&self, name: &str) -> Option<i32> {
        self.enum_values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

impl TestMessage {
    /// Late-binds a submessage type, for cyclic schemas.
    pub(crate) fn set_sub(&self, field: &str, m: &'static TestMessage) {
        for f in &self.fields {
            if f.name == field {
                f.sub.set(Some(m));
            }
        }
    }
}

impl TestField {
    pub(crate) fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub(crate) fn with_json_name(mut self, json_name: &'static str) -> Self {
        self.json_name = Some(json_name);
        self
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

pub(crate) fn message(full_name: &str, fields: Vec<TestField>) -> &'static TestMessage {
    leak(TestMessage {
        full_name: full_name.into(),
        fields,
    })
}

pub(crate) fn scalar(name: &'static str, number: u32, ty: FieldType) -> TestField {
    TestField {
        name,
        json_name: None,
        number,
        ty,
        repeated: false,
        map: false,
        sub: Cell::new(None),
        enum_values: &[],
    }
}

pub(crate) fn submsg(name: &'static str, number: u32, sub: &'static TestMessage) -> TestField {
    let mut f = scalar(name, number, FieldType::Message);
    f.sub = Cell::new(Some(sub));
    f
}

/// A message field whose type is wired later with [`TestMessage::set_sub`].
pub(crate) fn submsg_deferred(name: &'static str, number: u32) -> TestField {
    scalar(name, number, FieldType::Message)
}

pub(crate) fn enum_field(
    name: &'static str,
    number: u32,
    values: &'static [(&'static str, i32)],
) -> TestField {
    let mut f = scalar(name, number, FieldType::Enum);
    f.enum_values = values;
    f
}

pub(crate) fn map_field(
    name: &'static str,
    number: u32,
    entry: &'static TestMessage,
) -> TestField {
    let mut f = submsg(name, number, entry);
    f.repeated = true;
    f.map = true;
    f
}

/// Builds a synthetic mapentry message with the given key type and value
/// field (named `value`, number 2).
pub(crate) fn map_entry(
    full_name: &str,
    key_ty: FieldType,
    value_field: TestField,
) -> &'static TestMessage {
    message(full_name, alloc::vec![scalar("key", 1, key_ty), value_field])
}

// ------------------------------------------------------------------------------------------------
// Well-known schemas
// ------------------------------------------------------------------------------------------------

pub(crate) fn wrapper(full_name: &str, ty: FieldType) -> &'static TestMessage {
    message(full_name, alloc::vec![scalar("value", 1, ty)])
}

pub(crate) fn timestamp_msg() -> &'static TestMessage {
    message(
        "google.protobuf.Timestamp",
        alloc::vec![
            scalar("seconds", 1, FieldType::Int64),
            scalar("nanos", 2, FieldType::Int32),
        ],
    )
}

pub(crate) fn duration_msg() -> &'static TestMessage {
    message(
        "google.protobuf.Duration",
        alloc::vec![
            scalar("seconds", 1, FieldType::Int64),
            scalar("nanos", 2, FieldType::Int32),
        ],
    )
}

pub(crate) const NULL_VALUE: &[(&str, i32)] = &[("NULL_VALUE", 0)];

/// Builds the cyclic `Value`/`Struct`/`ListValue` trio.
pub(crate) fn value_schemas() -> (
    &'static TestMessage,
    &'static TestMessage,
    &'static TestMessage,
) {
    let value = message(
        "google.protobuf.Value",
        alloc::vec![
            enum_field("null_value", 1, NULL_VALUE),
            scalar("number_value", 2, FieldType::Double),
            scalar("string_value", 3, FieldType::String),
            scalar("bool_value", 4, FieldType::Bool),
            submsg_deferred("struct_value", 5),
            submsg_deferred("list_value", 6),
        ],
    );
    let entry = map_entry(
        "google.protobuf.Struct.FieldsEntry",
        FieldType::String,
        submsg("value", 2, value),
    );
    let strukt = message("google.protobuf.Struct", alloc::vec![map_field("fields", 1, entry)]);
    let list = message(
        "google.protobuf.ListValue",
        alloc::vec![submsg("values", 1, value).repeated()],
    );
    value.set_sub("struct_value", strukt);
    value.set_sub("list_value", list);
    (value, strukt, list)
}

pub(crate) const COLORS: &[(&str, i32)] = &[("RED", 1), ("GREEN", 2), ("BLUE", 3)];

/// A kitchen-sink schema exercising every field shape the decoder knows.
pub(crate) fn everything() -> &'static TestMessage {
    let (value, strukt, list) = value_schemas();
    let mi = map_entry(
        "test.Everything.MiEntry",
        FieldType::Int32,
        scalar("value", 2, FieldType::String),
    );
    let ms = map_entry(
        "test.Everything.MsEntry",
        FieldType::String,
        scalar("value", 2, FieldType::Int32),
    );
    let mb = map_entry(
        "test.Everything.MbEntry",
        FieldType::Bool,
        scalar("value", 2, FieldType::String),
    );
    let mm = map_entry(
        "test.Everything.MmEntry",
        FieldType::String,
        submsg_deferred("value", 2),
    );
    let msg = message(
        "test.Everything",
        alloc::vec![
            scalar("i", 1, FieldType::Int32),
            scalar("l", 2, FieldType::Int64),
            scalar("u", 3, FieldType::UInt32),
            scalar("ul", 4, FieldType::UInt64),
            scalar("d", 5, FieldType::Double),
            scalar("fl", 6, FieldType::Float),
            scalar("b", 7, FieldType::Bool),
            scalar("s", 8, FieldType::String),
            scalar("by", 9, FieldType::Bytes),
            enum_field("e", 10, COLORS),
            submsg_deferred("sub", 11),
            scalar("ri", 12, FieldType::Int32).repeated(),
            scalar("rs", 13, FieldType::String).repeated(),
            map_field("mi", 14, mi),
            map_field("ms", 15, ms),
            map_field("mb", 16, mb),
            map_field("mm", 17, mm),
            submsg("ts", 18, timestamp_msg()),
            submsg("dur", 19, duration_msg()),
            submsg("w", 20, wrapper("google.protobuf.Int32Value", FieldType::Int32)),
            submsg("sw", 21, wrapper("google.protobuf.StringValue", FieldType::String)),
            submsg("bw", 22, wrapper("google.protobuf.BoolValue", FieldType::Bool)),
            submsg("v", 23, value),
            submsg("st", 24, strukt),
            submsg("lv", 25, list),
            scalar("foo_bar", 26, FieldType::String).with_json_name("fooBar"),
        ],
    );
    msg.set_sub("sub", msg);
    mm.set_sub("value", msg);
    msg
}

// ------------------------------------------------------------------------------------------------
// Recording sink
// ------------------------------------------------------------------------------------------------

/// One recorded sink call; fields are identified by name.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    StartMsg,
    EndMsg,
    StartSubmsg(String),
    EndSubmsg(String),
    StartSeq(String),
    EndSeq(String),
    StartStr(String),
    Chunk(Vec<u8>),
    EndStr(String),
    Bool(String, bool),
    Int32(String, i32),
    Int64(String, i64),
    UInt32(String, u32),
    UInt64(String, u64),
    Float(String, f32),
    Double(String, f64),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub(crate) events: Vec<Event>,
}

impl Sink for RecordingSink {
    fn start_msg(&mut self) {
        self.events.push(Event::StartMsg);
    }

    fn end_msg(&mut self) {
        self.events.push(Event::EndMsg);
    }

    fn start_submsg(&mut self, field: &dyn FieldDef) {
        self.events.push(Event::StartSubmsg(field.name().into()));
    }

    fn end_submsg(&mut self, field: &dyn FieldDef) {
        self.events.push(Event::EndSubmsg(field.name().into()));
    }

    fn start_seq(&mut self, field: &dyn FieldDef) {
        self.events.push(Event::StartSeq(field.name().into()));
    }

    fn end_seq(&mut self, field: &dyn FieldDef) {
        self.events.push(Event::EndSeq(field.name().into()));
    }

    fn start_str(&mut self, field: &dyn FieldDef, _size_hint: usize) {
        self.events.push(Event::StartStr(field.name().into()));
    }

    fn put_string(&mut self, chunk: &[u8]) {
        self.events.push(Event::Chunk(chunk.to_vec()));
    }

    fn end_str(&mut self, field: &dyn FieldDef) {
        self.events.push(Event::EndStr(field.name().into()));
    }

    fn put_bool(&mut self, field: &dyn FieldDef, value: bool) {
        self.events.push(Event::Bool(field.name().into(), value));
    }

    fn put_int32(&mut self, field: &dyn FieldDef, value: i32) {
        self.events.push(Event::Int32(field.name().into(), value));
    }

    fn put_int64(&mut self, field: &dyn FieldDef, value: i64) {
        self.events.push(Event::Int64(field.name().into(), value));
    }

    fn put_uint32(&mut self, field: &dyn FieldDef, value: u32) {
        self.events.push(Event::UInt32(field.name().into(), value));
    }

    fn put_uint64(&mut self, field: &dyn FieldDef, value: u64) {
        self.events.push(Event::UInt64(field.name().into(), value));
    }

    fn put_float(&mut self, field: &dyn FieldDef, value: f32) {
        self.events.push(Event::Float(field.name().into(), value));
    }

    fn put_double(&mut self, field: &dyn FieldDef, value: f64) {
        self.events.push(Event::Double(field.name().into(), value));
    }
}

/// Joins adjacent string runs and drops empty ones, so event streams can
/// be compared across different input chunkings.
pub(crate) fn merge_chunks(events: &[Event]) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::new();
    for ev in events {
        match ev {
            Event::Chunk(bytes) => {
                if bytes.is_empty() {
                    continue;
                }
                if let Some(Event::Chunk(prev)) = out.last_mut() {
                    prev.extend_from_slice(bytes);
                } else {
                    out.push(ev.clone());
                }
            }
            _ => out.push(ev.clone()),
        }
    }
    out
}

// ------------------------------------------------------------------------------------------------
// Decode harnesses
// ------------------------------------------------------------------------------------------------

pub(crate) fn decode_with(
    msg: &'static TestMessage,
    json: &str,
    options: ParserOptions,
) -> Result<Vec<Event>, ParseError> {
    let mut parser = StreamingParser::new(msg, RecordingSink::default(), options);
    parser.feed(json.as_bytes());
    if let Some(err) = parser.status() {
        return Err(err.clone());
    }
    parser.end()?;
    Ok(parser.into_sink().events)
}

pub(crate) fn decode(msg: &'static TestMessage, json: &str) -> Result<Vec<Event>, ParseError> {
    decode_with(msg, json, ParserOptions::default())
}

/// Decodes with the input split at every position in `splits`.
pub(crate) fn decode_split(
    msg: &'static TestMessage,
    json: &str,
    splits: &[usize],
) -> Result<Vec<Event>, ParseError> {
    let mut parser = StreamingParser::new(msg, RecordingSink::default(), ParserOptions::default());
    let bytes = json.as_bytes();
    let mut start = 0;
    for &split in splits {
        parser.feed(&bytes[start..split]);
        start = split;
    }
    parser.feed(&bytes[start..]);
    if let Some(err) = parser.status() {
        return Err(err.clone());
    }
    parser.end()?;
    Ok(parser.into_sink().events)
}
