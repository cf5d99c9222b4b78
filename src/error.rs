use alloc::string::String;

use thiserror::Error;

/// Errors produced while decoding a JSON document against a schema.
///
/// Any error halts the parser: subsequent [`feed`] calls consume nothing and
/// emit nothing, and the first error is retained as the parser status.
///
/// [`feed`]: crate::StreamingParser::feed
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The lexical machine reached a dead state. The message carries a
    /// short window of the unexpected input.
    #[error("{0}")]
    Syntax(String),

    /// A member name did not resolve to any field of the current message.
    /// Suppressed entirely when `ignore_json_unknown` is set.
    #[error("no such field: {0}")]
    UnknownField(String),

    /// The JSON token shape is incompatible with the bound field's type,
    /// e.g. a string for a bool field or an object for a scalar.
    #[error("{0}")]
    TypeMismatch(String),

    /// A numeric literal was malformed, out of range for the target type,
    /// or a quoted non-integer was given for an integer target.
    #[error("error parsing number: {0}")]
    BadNumber(String),

    /// A symbolic enum value was not found in the enum definition.
    #[error("enum value unknown: '{0}'")]
    UnknownEnumName(String),

    /// Invalid base64 in a `bytes` field: bad character, bad padding, or a
    /// length that is not a multiple of four.
    #[error("{0}")]
    Base64(String),

    /// A `Duration` string was malformed or outside ±315,576,000,000 s.
    #[error("error parsing duration: {0}")]
    Duration(String),

    /// A `Timestamp` string was malformed or before 0001-01-01T00:00:00Z.
    #[error("error parsing timestamp: {0}")]
    Timestamp(String),

    /// The nesting depth limit (64 frames) was exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,

    /// Input ended in the middle of a value, or was empty.
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// Growing the accumulate buffer failed.
    #[error("out of memory allocating buffer")]
    OutOfMemory,
}
