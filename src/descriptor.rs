//! Read-only schema views consumed by the parser.
//!
//! The parser never owns schema data; it navigates a caller-supplied
//! descriptor graph through these traits. Implementations are expected to
//! be cheap to query — the parser looks fields up by JSON name once per
//! member and asks for type information on every emission.

/// Value categories of a protobuf field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Double,
    Float,
    Int64,
    UInt64,
    Int32,
    UInt32,
    Bool,
    String,
    Bytes,
    Enum,
    Message,
}

/// Field number of the key field in a synthetic mapentry message.
pub const MAP_ENTRY_KEY: u32 = 1;
/// Field number of the value field in a synthetic mapentry message.
pub const MAP_ENTRY_VALUE: u32 = 2;

/// Message types whose proto3 JSON form is structurally special.
///
/// Identified by full message name, the same way conformant parsers do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnown {
    None,
    DoubleValue,
    FloatValue,
    Int64Value,
    UInt64Value,
    Int32Value,
    UInt32Value,
    BoolValue,
    StringValue,
    BytesValue,
    Value,
    Struct,
    ListValue,
    Duration,
    Timestamp,
}

impl WellKnown {
    /// Classifies a message by its fully qualified name.
    #[must_use]
    pub fn from_full_name(name: &str) -> WellKnown {
        match name {
            "google.protobuf.DoubleValue" => WellKnown::DoubleValue,
            "google.protobuf.FloatValue" => WellKnown::FloatValue,
            "google.protobuf.Int64Value" => WellKnown::Int64Value,
            "google.protobuf.UInt64Value" => WellKnown::UInt64Value,
            "google.protobuf.Int32Value" => WellKnown::Int32Value,
            "google.protobuf.UInt32Value" => WellKnown::UInt32Value,
            "google.protobuf.BoolValue" => WellKnown::BoolValue,
            "google.protobuf.StringValue" => WellKnown::StringValue,
            "google.protobuf.BytesValue" => WellKnown::BytesValue,
            "google.protobuf.Value" => WellKnown::Value,
            "google.protobuf.Struct" => WellKnown::Struct,
            "google.protobuf.ListValue" => WellKnown::ListValue,
            "google.protobuf.Duration" => WellKnown::Duration,
            "google.protobuf.Timestamp" => WellKnown::Timestamp,
            _ => WellKnown::None,
        }
    }

    /// A wrapper whose JSON form is a bare number.
    #[must_use]
    pub fn is_number_wrapper(self) -> bool {
        matches!(
            self,
            WellKnown::DoubleValue
                | WellKnown::FloatValue
                | WellKnown::Int64Value
                | WellKnown::UInt64Value
                | WellKnown::Int32Value
                | WellKnown::UInt32Value
        )
    }

    /// A wrapper whose JSON form is a bare string.
    #[must_use]
    pub fn is_string_wrapper(self) -> bool {
        matches!(self, WellKnown::StringValue | WellKnown::BytesValue)
    }
}

/// A read-only protobuf message descriptor.
pub trait MessageDef {
    /// The fully qualified message name, e.g. `google.protobuf.Timestamp`.
    fn full_name(&self) -> &str;

    /// Resolves a JSON member name to a field.
    ///
    /// Conformant implementations accept both the proto-declared field name
    /// and the `json_name` option when the two differ.
    fn field_by_json_name(&self, name: &str) -> Option<&dyn FieldDef>;

    /// Looks a field up by number. The parser only uses this for the
    /// [`MAP_ENTRY_KEY`]/[`MAP_ENTRY_VALUE`] fields of mapentry messages.
    fn field_by_number(&self, number: u32) -> Option<&dyn FieldDef>;

    /// Well-known-type classification of this message.
    fn well_known(&self) -> WellKnown {
        WellKnown::from_full_name(self.full_name())
    }
}

/// A read-only protobuf field descriptor.
pub trait FieldDef {
    /// The proto-declared field name (used in error messages).
    fn name(&self) -> &str;

    /// The field's value category.
    fn field_type(&self) -> FieldType;

    /// Whether the field is repeated (this includes map fields).
    fn is_seq(&self) -> bool;

    /// Whether the field is a protobuf `map<K,V>`.
    fn is_map(&self) -> bool;

    /// The message type of a [`FieldType::Message`] field; for a map field
    /// this is the synthetic mapentry message.
    fn subdef(&self) -> Option<&dyn MessageDef>;

    /// Resolves a symbolic enum value name for a [`FieldType::Enum`] field.
    fn enum_value_by_name(&self, name: &str) -> Option<i32>;

    /// Whether the field holds a submessage.
    fn is_submsg(&self) -> bool {
        self.field_type() == FieldType::Message
    }

    /// Whether the field holds string-shaped data (`string` or `bytes`).
    fn is_string(&self) -> bool {
        matches!(self.field_type(), FieldType::String | FieldType::Bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::WellKnown;

    #[test]
    fn well_known_classification() {
        assert_eq!(
            WellKnown::from_full_name("google.protobuf.Duration"),
            WellKnown::Duration
        );
        assert_eq!(WellKnown::from_full_name("my.pkg.Duration"), WellKnown::None);
        assert!(WellKnown::Int32Value.is_number_wrapper());
        assert!(!WellKnown::BoolValue.is_number_wrapper());
        assert!(WellKnown::BytesValue.is_string_wrapper());
        assert!(!WellKnown::Value.is_string_wrapper());
    }
}
