//! A streaming proto3 JSON decoder.
//!
//! `protomodem` converts a JSON byte stream into a sequence of typed,
//! schema-directed callbacks against a previously registered protobuf
//! message descriptor. It is the decoding half of a proto3 JSON ↔ protobuf
//! bridge: input bytes in, field-emission events out.
//!
//! The parser is a push parser: the caller feeds it byte chunks with
//! [`StreamingParser::feed`] and finishes with [`StreamingParser::end`].
//! Input may be split at any byte boundary; the emitted event sequence
//! depends only on the bytes, not on the chunking.
//!
//! The schema is supplied through the read-only [`MessageDef`]/[`FieldDef`]
//! traits, and events are delivered to a caller-supplied [`Sink`]. The
//! well-known types (wrappers, `Value`, `Struct`, `ListValue`, `Duration`,
//! `Timestamp`) and protobuf `map<K,V>` fields receive their special proto3
//! JSON treatment.

#![no_std]
extern crate alloc;

#[cfg(test)]
extern crate std;

mod descriptor;
mod error;
mod options;
mod parser;
mod sink;

pub use descriptor::{FieldDef, FieldType, MessageDef, WellKnown, MAP_ENTRY_KEY, MAP_ENTRY_VALUE};
pub use error::ParseError;
pub use options::ParserOptions;
pub use parser::StreamingParser;
pub use sink::Sink;

#[cfg(test)]
mod tests;
