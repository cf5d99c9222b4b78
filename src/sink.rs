//! The write-only emission collaborator.

use crate::descriptor::FieldDef;

/// Receives structured decode events as parsing progresses.
///
/// Events arrive in strict document order. Framing calls pair exactly:
/// every `start_msg` gets one `end_msg` at the same depth, and likewise
/// `start_seq`/`end_seq`, `start_submsg`/`end_submsg`,
/// `start_str`/`end_str`.
///
/// String values arrive as zero or more `put_string` runs between
/// `start_str` and `end_str`; a run boundary carries no meaning (escape
/// sequences and input-buffer seams both split runs). `bytes` fields are
/// delivered the same way, already base64-decoded. Enum values are
/// delivered through [`put_int32`].
///
/// [`put_int32`]: Sink::put_int32
pub trait Sink {
    /// A message begins at the current depth.
    fn start_msg(&mut self);
    /// The message at the current depth is complete.
    fn end_msg(&mut self);

    /// A submessage value for `field` begins.
    fn start_submsg(&mut self, field: &dyn FieldDef);
    /// The submessage value for `field` is complete.
    fn end_submsg(&mut self, field: &dyn FieldDef);

    /// A repeated sequence for `field` begins. Map fields appear as a
    /// sequence of mapentry submessages.
    fn start_seq(&mut self, field: &dyn FieldDef);
    /// The repeated sequence for `field` is complete.
    fn end_seq(&mut self, field: &dyn FieldDef);

    /// A string or bytes value for `field` begins. `size_hint` is the
    /// number of bytes to come when known up front, otherwise zero.
    fn start_str(&mut self, field: &dyn FieldDef, size_hint: usize);
    /// One run of string data for the innermost open string value.
    fn put_string(&mut self, chunk: &[u8]);
    /// The string value for `field` is complete.
    fn end_str(&mut self, field: &dyn FieldDef);

    fn put_bool(&mut self, field: &dyn FieldDef, value: bool);
    fn put_int32(&mut self, field: &dyn FieldDef, value: i32);
    fn put_int64(&mut self, field: &dyn FieldDef, value: i64);
    fn put_uint32(&mut self, field: &dyn FieldDef, value: u32);
    fn put_uint64(&mut self, field: &dyn FieldDef, value: u64);
    fn put_float(&mut self, field: &dyn FieldDef, value: f32);
    fn put_double(&mut self, field: &dyn FieldDef, value: f64);
}
