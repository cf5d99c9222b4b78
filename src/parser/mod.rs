//! The streaming decoder implementation.
//!
//! JSON's nesting is context-free, but only just: the grammar is handled
//! by a deterministic byte-at-a-time state machine plus a small explicit
//! call stack for the embedded sub-machines (number, string, duration,
//! timestamp) and value continuations. Actions attached to transitions
//! drive the semantic layer, which binds JSON members to schema fields,
//! converts lexical tokens to the bound field's type, and rewrites the
//! well-known types and map fields into their protobuf event shape.
//!
//! The parser is driven by successive [`StreamingParser::feed`] calls and
//! keeps all cross-buffer continuation state internally, so input may be
//! split at any byte boundary without changing the emitted events.

mod accum;
mod base64;
mod escape;
mod literal;
mod number;
mod tm;


use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use accum::{Accumulator, Capture, Multipart};
use escape::{EscapeError, UnicodeEscape};
use literal::{ExpectedLiteral, LiteralKind, Step};
use number::Parsed;
use tm::Tm;

use crate::descriptor::{FieldDef, FieldType, MessageDef, WellKnown, MAP_ENTRY_KEY, MAP_ENTRY_VALUE};
use crate::error::ParseError;
use crate::options::ParserOptions;
use crate::sink::Sink;

/// Maximum nesting depth, for both the semantic frame stack and the
/// lexical return stack.
const MAX_DEPTH: usize = 64;

/// Fixed shape of an RFC-3339 date-time base; `d` marks a digit.
const TS_BASE: &[u8; 19] = b"dddd-dd-ddTdd:dd:dd";
/// Fixed shape of a numeric zone offset after its sign.
const TS_OFFSET: &[u8; 5] = b"dd:dd";

fn is_ws(b: u8) -> bool {
    b == b' ' || (0x09..=0x0D).contains(&b)
}

// ------------------------------------------------------------------------------------------------
// Lexical machine
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    // Document machine.
    Start,
    Finish,
    // Value dispatch.
    Value,
    // Objects.
    ObjOpen,
    ObjMember,
    ObjColon,
    ObjComma,
    MemberDone,
    NameEnd,
    // Arrays.
    ArrOpen,
    ArrComma,
    // true / false / null literals.
    Lit,
    // String machine.
    Str,
    StrEscape,
    StrUnicode(u8),
    StrEnd,
    // Number machine.
    NumSign,
    NumZero,
    NumInt,
    NumDot,
    NumFrac,
    NumExp,
    NumExpSign,
    NumExpInt,
    NumLit,
    NumTerm,
    // Duration machine (inside string quotes).
    DurStart,
    DurIntFirst,
    DurInt,
    DurFracFirst,
    DurFrac,
    DurClose,
    // Timestamp machine (inside string quotes).
    TsBase(u8),
    TsAfterBase,
    TsFracFirst,
    TsFrac,
    TsZone,
    TsOffset(u8),
    TsClose,
}

/// Whether a step consumed the current byte or re-dispatches it under the
/// new state.
enum Flow {
    Consume,
    Hold,
}

/// Return states for the active sub-machines.
struct ReturnStack {
    states: [State; MAX_DEPTH],
    len: usize,
}

impl ReturnStack {
    fn new() -> Self {
        Self {
            states: [State::Start; MAX_DEPTH],
            len: 0,
        }
    }

    fn push(&mut self, state: State) -> Result<(), ParseError> {
        if self.len == MAX_DEPTH {
            return Err(ParseError::NestingTooDeep);
        }
        self.states[self.len] = state;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<State, ParseError> {
        if self.len == 0 {
            return Err(ParseError::Internal("return stack underflow"));
        }
        self.len -= 1;
        Ok(self.states[self.len])
    }

    fn depth(&self) -> usize {
        self.len
    }
}

// ------------------------------------------------------------------------------------------------
// Semantic frames
// ------------------------------------------------------------------------------------------------

/// One entry of the semantic stack: the message/field context at one JSON
/// nesting level.
struct Frame<'d> {
    /// Message being populated; `None` for an unknown subtree that is
    /// consumed without emissions.
    m: Option<&'d dyn MessageDef>,
    /// Field whose value comes next; `None` between members.
    f: Option<&'d dyn FieldDef>,
    /// This frame is the repeated-mapentry sequence around a map field.
    /// It alters open-brace handling and suppresses `start_msg`/`end_msg`.
    is_map: bool,
    /// This frame is one mapentry; it ends as soon as its value field has
    /// been parsed. Deliberately set only after the key has been emitted,
    /// since key emission shares the value-emission handlers.
    is_mapentry: bool,
    /// The enclosing map field, when `is_map` or `is_mapentry`.
    map_field: Option<&'d dyn FieldDef>,
    /// The frame's message context was synthesized from a scalar/array
    /// form of a well-known type; the matching end choreography fires when
    /// the value completes. Never set for explicitly spelled objects.
    synthetic: bool,
}

impl<'d> Frame<'d> {
    fn new(m: &'d dyn MessageDef) -> Self {
        Frame {
            m: Some(m),
            f: None,
            is_map: false,
            is_mapentry: false,
            map_field: None,
            synthetic: false,
        }
    }

    fn null() -> Self {
        Frame {
            m: None,
            f: None,
            is_map: false,
            is_mapentry: false,
            map_field: None,
            synthetic: false,
        }
    }
}

/// Member names synthesized for `google.protobuf.Value`.
#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Null,
    Number,
    Str,
    Bool,
    Struct,
    List,
}

impl ValueKind {
    fn member_name(self) -> &'static str {
        match self {
            ValueKind::Null => "null_value",
            ValueKind::Number => "number_value",
            ValueKind::Str => "string_value",
            ValueKind::Bool => "bool_value",
            ValueKind::Struct => "struct_value",
            ValueKind::List => "list_value",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// The parser
// ------------------------------------------------------------------------------------------------

/// The streaming proto3 JSON decoder.
///
/// Feed it byte chunks with [`feed`], then call [`end`] to terminate the
/// document and verify that parsing reached an accepting state. Events are
/// delivered to the [`Sink`] in strict document order; fields are emitted
/// in their order of appearance in the JSON.
///
/// Any error halts the parser permanently: the error becomes the parser
/// [`status`], later `feed` calls consume nothing, and `end` keeps
/// returning the error.
///
/// [`feed`]: StreamingParser::feed
/// [`end`]: StreamingParser::end
/// [`status`]: StreamingParser::status
pub struct StreamingParser<'d, S> {
    sink: S,

    /// Semantic stack; index 0 is the root message frame.
    stack: Vec<Frame<'d>>,

    /// Lexical state and return stack.
    state: State,
    returns: ReturnStack,

    /// Lexer helpers.
    literal: ExpectedLiteral,
    unicode_escape: UnicodeEscape,

    /// Text accumulation.
    accum: Accumulator,
    capture: Capture,
    multipart: Multipart,

    /// Partially parsed Timestamp; base and zone arrive in different
    /// handlers.
    tm: Tm,

    ignore_json_unknown: bool,
    status: Option<ParseError>,
}

impl<'d, S: Sink> StreamingParser<'d, S> {
    /// Creates a parser decoding into `sink` against the schema rooted at
    /// `msg`.
    #[must_use]
    pub fn new(msg: &'d dyn MessageDef, sink: S, options: ParserOptions) -> Self {
        let mut stack = Vec::with_capacity(MAX_DEPTH);
        stack.push(Frame::new(msg));
        Self {
            sink,
            stack,
            state: State::Start,
            returns: ReturnStack::new(),
            literal: ExpectedLiteral::after_n(),
            unicode_escape: UnicodeEscape::new(),
            accum: Accumulator::new(),
            capture: Capture::None,
            multipart: Multipart::Inactive,
            tm: Tm::default(),
            ignore_json_unknown: options.ignore_json_unknown,
            status: None,
        }
    }

    /// Feeds one chunk of the JSON document.
    ///
    /// Returns the number of bytes consumed: the full chunk length on
    /// success, or a short count when an error halted parsing (the error
    /// is then available from [`status`]). A parser that has already
    /// failed consumes nothing.
    ///
    /// The chunk does not need to stay valid after the call returns.
    ///
    /// [`status`]: StreamingParser::status
    pub fn feed(&mut self, input: &[u8]) -> usize {
        if self.status.is_some() {
            return 0;
        }
        self.capture_resume();
        let mut pos = 0;
        while pos < input.len() {
            match self.step(input, pos) {
                Ok(Flow::Consume) => pos += 1,
                Ok(Flow::Hold) => {}
                Err(err) => {
                    self.status = Some(err);
                    return pos;
                }
            }
        }
        // Buffer seam: spill an open capture and detach any aliased
        // accumulator region from the dying input buffer.
        if let Err(err) = self.suspend(input) {
            self.status = Some(err);
        }
        input.len()
    }

    /// Terminates the document.
    ///
    /// Runs the machine over a synthetic terminator so trailing values
    /// complete, then checks that the machine reached its accepting state.
    pub fn end(&mut self) -> Result<(), ParseError> {
        if let Some(err) = &self.status {
            return Err(err.clone());
        }
        let eof: &[u8] = b" ";
        self.capture_resume();
        let mut pos = 0;
        while pos < eof.len() {
            match self.step(eof, pos) {
                Ok(Flow::Consume) => pos += 1,
                Ok(Flow::Hold) => {}
                Err(err) => {
                    // A lexical complaint about the synthetic byte really
                    // means the document stopped short.
                    let err = match err {
                        ParseError::Syntax(_) => ParseError::UnexpectedEndOfInput,
                        other => other,
                    };
                    self.status = Some(err.clone());
                    return Err(err);
                }
            }
        }
        if self.state == State::Finish {
            Ok(())
        } else {
            let err = ParseError::UnexpectedEndOfInput;
            self.status = Some(err.clone());
            Err(err)
        }
    }

    /// The first error encountered, if any.
    pub fn status(&self) -> Option<&ParseError> {
        self.status.as_ref()
    }

    /// Borrows the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrows the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consumes the parser, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    // --------------------------------------------------------------------------------------------
    // Machine stepping
    // --------------------------------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, input: &[u8], i: usize) -> Result<Flow, ParseError> {
        use State::*;
        let b = input[i];
        match self.state {
            Start => {
                if is_ws(b) {
                    Ok(Flow::Consume)
                } else {
                    self.returns.push(Finish)?;
                    self.state = Value;
                    Ok(Flow::Hold)
                }
            }

            Finish => {
                if is_ws(b) {
                    Ok(Flow::Consume)
                } else {
                    Err(self.lexical_error(input, i))
                }
            }

            Value => match b {
                _ if is_ws(b) => Ok(Flow::Consume),
                b'{' => {
                    self.start_subobject_full(input)?;
                    self.start_object();
                    self.state = ObjOpen;
                    Ok(Flow::Consume)
                }
                b'[' => {
                    self.start_array(input)?;
                    self.state = ArrOpen;
                    Ok(Flow::Consume)
                }
                b'"' => {
                    self.start_stringval(input)?;
                    self.returns.push(StrEnd)?;
                    self.state = self.string_machine();
                    Ok(Flow::Consume)
                }
                b't' => {
                    self.literal = ExpectedLiteral::after_t();
                    self.state = Lit;
                    Ok(Flow::Consume)
                }
                b'f' => {
                    self.literal = ExpectedLiteral::after_f();
                    self.state = Lit;
                    Ok(Flow::Consume)
                }
                b'n' => {
                    self.literal = ExpectedLiteral::after_n();
                    self.state = Lit;
                    Ok(Flow::Consume)
                }
                b'-' => {
                    self.start_number(input, i)?;
                    self.state = NumSign;
                    Ok(Flow::Consume)
                }
                b'0' => {
                    self.start_number(input, i)?;
                    self.state = NumZero;
                    Ok(Flow::Consume)
                }
                b'1'..=b'9' => {
                    self.start_number(input, i)?;
                    self.state = NumInt;
                    Ok(Flow::Consume)
                }
                b'I' => {
                    self.start_number(input, i)?;
                    self.literal = ExpectedLiteral::after_i();
                    self.state = NumLit;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            // -------------------------- objects --------------------------
            ObjOpen => match b {
                _ if is_ws(b) => Ok(Flow::Consume),
                b'"' => {
                    self.start_member();
                    self.returns.push(NameEnd)?;
                    self.state = Str;
                    Ok(Flow::Consume)
                }
                b'}' => {
                    self.close_object();
                    self.state = self.returns.pop()?;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            ObjMember => match b {
                _ if is_ws(b) => Ok(Flow::Consume),
                b'"' => {
                    self.start_member();
                    self.returns.push(NameEnd)?;
                    self.state = Str;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            ObjColon => match b {
                _ if is_ws(b) => Ok(Flow::Consume),
                b':' => {
                    self.returns.push(MemberDone)?;
                    self.state = Value;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            MemberDone => {
                self.end_member();
                self.state = ObjComma;
                Ok(Flow::Hold)
            }

            ObjComma => match b {
                _ if is_ws(b) => Ok(Flow::Consume),
                b',' => {
                    self.state = ObjMember;
                    Ok(Flow::Consume)
                }
                b'}' => {
                    self.close_object();
                    self.state = self.returns.pop()?;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            NameEnd => {
                if b == b'"' {
                    self.end_membername(input)?;
                    self.state = ObjColon;
                    Ok(Flow::Consume)
                } else {
                    Err(ParseError::Internal("member name not at closing quote"))
                }
            }

            // -------------------------- arrays ---------------------------
            ArrOpen => match b {
                _ if is_ws(b) => Ok(Flow::Consume),
                b']' => {
                    self.end_array()?;
                    self.state = self.returns.pop()?;
                    Ok(Flow::Consume)
                }
                _ => {
                    self.returns.push(ArrComma)?;
                    self.state = Value;
                    Ok(Flow::Hold)
                }
            },

            ArrComma => match b {
                _ if is_ws(b) => Ok(Flow::Consume),
                b',' => {
                    self.returns.push(ArrComma)?;
                    self.state = Value;
                    Ok(Flow::Consume)
                }
                b']' => {
                    self.end_array()?;
                    self.state = self.returns.pop()?;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            // -------------------------- literals -------------------------
            Lit => match self.literal.step(b) {
                Step::NeedMore => Ok(Flow::Consume),
                Step::Done(kind) => {
                    match kind {
                        LiteralKind::True => self.end_bool(input, true)?,
                        LiteralKind::False => self.end_bool(input, false)?,
                        LiteralKind::Null => self.end_null(input)?,
                        LiteralKind::Infinity => {
                            return Err(ParseError::Internal("literal kind out of place"));
                        }
                    }
                    self.state = self.returns.pop()?;
                    Ok(Flow::Consume)
                }
                Step::Reject => Err(self.lexical_error(input, i)),
            },

            // -------------------------- strings --------------------------
            Str => {
                if self.unicode_escape.has_pending() && b != b'\\' {
                    return Err(ParseError::Syntax(
                        "unpaired high surrogate in \\u escape".into(),
                    ));
                }
                match b {
                    b'"' => {
                        if self.capture.is_active() {
                            self.capture_end(input, i)?;
                        }
                        self.state = self.returns.pop()?;
                        Ok(Flow::Hold)
                    }
                    b'\\' => {
                        if self.capture.is_active() {
                            self.capture_end(input, i)?;
                        }
                        self.state = StrEscape;
                        Ok(Flow::Consume)
                    }
                    0x00..=0x1F => Err(self.lexical_error(input, i)),
                    _ => {
                        if !self.capture.is_active() {
                            self.capture_begin(i);
                        }
                        Ok(Flow::Consume)
                    }
                }
            }

            StrEscape => {
                if self.unicode_escape.has_pending() && b != b'u' {
                    return Err(ParseError::Syntax(
                        "unpaired high surrogate in \\u escape".into(),
                    ));
                }
                match b {
                    b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' => {
                        self.push_escape_byte(input, b)?;
                        self.state = Str;
                        Ok(Flow::Consume)
                    }
                    b'u' => {
                        self.unicode_escape.start_hex();
                        self.state = StrUnicode(0);
                        Ok(Flow::Consume)
                    }
                    _ => Err(self.lexical_error(input, i)),
                }
            }

            StrUnicode(k) => {
                if b.is_ascii_hexdigit() {
                    self.unicode_escape.hexdigit(b);
                    if k == 3 {
                        self.end_hex(input)?;
                        self.state = Str;
                    } else {
                        self.state = StrUnicode(k + 1);
                    }
                    Ok(Flow::Consume)
                } else {
                    Err(self.lexical_error(input, i))
                }
            }

            StrEnd => {
                if b == b'"' {
                    self.end_stringval(input)?;
                    self.state = self.returns.pop()?;
                    Ok(Flow::Consume)
                } else {
                    Err(ParseError::Internal("string value not at closing quote"))
                }
            }

            // -------------------------- numbers --------------------------
            NumSign => match b {
                b'0' => {
                    self.state = NumZero;
                    Ok(Flow::Consume)
                }
                b'1'..=b'9' => {
                    self.state = NumInt;
                    Ok(Flow::Consume)
                }
                b'I' => {
                    self.literal = ExpectedLiteral::after_i();
                    self.state = NumLit;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            NumZero => match b {
                b'.' => {
                    self.state = NumDot;
                    Ok(Flow::Consume)
                }
                b'e' | b'E' => {
                    self.state = NumExp;
                    Ok(Flow::Consume)
                }
                _ => self.finish_number(input, i),
            },

            NumInt => match b {
                b'0'..=b'9' => Ok(Flow::Consume),
                b'.' => {
                    self.state = NumDot;
                    Ok(Flow::Consume)
                }
                b'e' | b'E' => {
                    self.state = NumExp;
                    Ok(Flow::Consume)
                }
                _ => self.finish_number(input, i),
            },

            NumDot => match b {
                b'0'..=b'9' => {
                    self.state = NumFrac;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            NumFrac => match b {
                b'0'..=b'9' => Ok(Flow::Consume),
                b'e' | b'E' => {
                    self.state = NumExp;
                    Ok(Flow::Consume)
                }
                _ => self.finish_number(input, i),
            },

            NumExp => match b {
                b'+' | b'-' => {
                    self.state = NumExpSign;
                    Ok(Flow::Consume)
                }
                b'0'..=b'9' => {
                    self.state = NumExpInt;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            NumExpSign => match b {
                b'0'..=b'9' => {
                    self.state = NumExpInt;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            NumExpInt => match b {
                b'0'..=b'9' => Ok(Flow::Consume),
                _ => self.finish_number(input, i),
            },

            NumLit => match self.literal.step(b) {
                Step::NeedMore => Ok(Flow::Consume),
                Step::Done(LiteralKind::Infinity) => {
                    self.state = NumTerm;
                    Ok(Flow::Consume)
                }
                Step::Done(_) => Err(ParseError::Internal("literal kind out of place")),
                Step::Reject => Err(self.lexical_error(input, i)),
            },

            NumTerm => self.finish_number(input, i),

            // -------------------------- durations ------------------------
            DurStart => match b {
                b'-' => {
                    self.capture_begin(i);
                    self.state = DurIntFirst;
                    Ok(Flow::Consume)
                }
                b'0'..=b'9' => {
                    self.capture_begin(i);
                    self.state = DurInt;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            DurIntFirst => match b {
                b'0'..=b'9' => {
                    self.state = DurInt;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            DurInt => match b {
                b'0'..=b'9' => Ok(Flow::Consume),
                b'.' => {
                    self.state = DurFracFirst;
                    Ok(Flow::Consume)
                }
                b's' => {
                    self.end_duration_base(input, i)?;
                    self.state = DurClose;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            DurFracFirst => match b {
                b'0'..=b'9' => {
                    self.state = DurFrac;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            DurFrac => match b {
                b'0'..=b'9' => Ok(Flow::Consume),
                b's' => {
                    self.end_duration_base(input, i)?;
                    self.state = DurClose;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            DurClose => {
                if b == b'"' {
                    self.state = self.returns.pop()?;
                    Ok(Flow::Hold)
                } else {
                    Err(self.lexical_error(input, i))
                }
            }

            // -------------------------- timestamps -----------------------
            TsBase(idx) => {
                let expected = TS_BASE[idx as usize];
                let matches = if expected == b'd' {
                    b.is_ascii_digit()
                } else {
                    b == expected
                };
                if !matches {
                    return Err(self.lexical_error(input, i));
                }
                if idx == 0 {
                    self.capture_begin(i);
                }
                if usize::from(idx) == TS_BASE.len() - 1 {
                    self.end_timestamp_base(input, i + 1)?;
                    self.state = TsAfterBase;
                } else {
                    self.state = TsBase(idx + 1);
                }
                Ok(Flow::Consume)
            }

            TsAfterBase => match b {
                b'.' => {
                    self.capture_begin(i);
                    self.state = TsFracFirst;
                    Ok(Flow::Consume)
                }
                b'Z' | b'+' | b'-' => {
                    self.state = TsZone;
                    Ok(Flow::Hold)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            TsFracFirst => match b {
                b'0'..=b'9' => {
                    self.state = TsFrac;
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            TsFrac => match b {
                b'0'..=b'9' => Ok(Flow::Consume),
                b'Z' | b'+' | b'-' => {
                    self.end_timestamp_fraction(input, i)?;
                    self.state = TsZone;
                    Ok(Flow::Hold)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            TsZone => match b {
                b'Z' => {
                    self.capture_begin(i);
                    self.end_timestamp_zone(input, i + 1)?;
                    self.state = TsClose;
                    Ok(Flow::Consume)
                }
                b'+' | b'-' => {
                    self.capture_begin(i);
                    self.state = TsOffset(0);
                    Ok(Flow::Consume)
                }
                _ => Err(self.lexical_error(input, i)),
            },

            TsOffset(idx) => {
                let expected = TS_OFFSET[idx as usize];
                let matches = if expected == b'd' {
                    b.is_ascii_digit()
                } else {
                    b == expected
                };
                if !matches {
                    return Err(self.lexical_error(input, i));
                }
                if usize::from(idx) == TS_OFFSET.len() - 1 {
                    self.end_timestamp_zone(input, i + 1)?;
                    self.state = TsClose;
                } else {
                    self.state = TsOffset(idx + 1);
                }
                Ok(Flow::Consume)
            }

            TsClose => {
                if b == b'"' {
                    self.state = self.returns.pop()?;
                    Ok(Flow::Hold)
                } else {
                    Err(self.lexical_error(input, i))
                }
            }
        }
    }

    /// Shared number-termination path: the current byte is not part of the
    /// number, so close it and re-dispatch the byte in the continuation.
    fn finish_number(&mut self, input: &[u8], i: usize) -> Result<Flow, ParseError> {
        self.end_number(input, i)?;
        self.state = self.returns.pop()?;
        Ok(Flow::Hold)
    }

    /// Picks the in-string sub-machine after `start_stringval`: timestamp
    /// and duration content gets its own grammar, everything else is plain
    /// string data.
    fn string_machine(&self) -> State {
        if self.top().f.is_none() {
            match self.top_msg_wk() {
                WellKnown::Timestamp => State::TsBase(0),
                WellKnown::Duration => State::DurStart,
                _ => State::Str,
            }
        } else {
            State::Str
        }
    }

    fn close_object(&mut self) {
        self.end_object();
        self.end_subobject_full();
    }

    fn lexical_error(&self, input: &[u8], pos: usize) -> ParseError {
        let end = input.len().min(pos + 16);
        ParseError::Syntax(format!(
            "parse error at '{}'",
            String::from_utf8_lossy(&input[pos..end])
        ))
    }

    // --------------------------------------------------------------------------------------------
    // Frames and predicates
    // --------------------------------------------------------------------------------------------

    fn top(&self) -> &Frame<'d> {
        match self.stack.last() {
            Some(frame) => frame,
            None => unreachable!("frame stack underflow"),
        }
    }

    fn top_mut(&mut self) -> &mut Frame<'d> {
        match self.stack.last_mut() {
            Some(frame) => frame,
            None => unreachable!("frame stack underflow"),
        }
    }

    fn is_top_level(&self) -> bool {
        self.stack.len() == 1 && self.top().f.is_none()
    }

    /// The value about to be dispatched is the document's root value, as
    /// opposed to a root-message member whose name was skipped (which also
    /// leaves the root frame without a field bound).
    fn at_document_root(&self) -> bool {
        self.returns.depth() <= 1 && self.is_top_level()
    }

    fn check_stack(&self) -> Result<(), ParseError> {
        if self.stack.len() >= MAX_DEPTH {
            Err(ParseError::NestingTooDeep)
        } else {
            Ok(())
        }
    }

    fn top_msg_wk(&self) -> WellKnown {
        self.top().m.map_or(WellKnown::None, MessageDef::well_known)
    }

    /// Well-known classification of the current field's submessage type.
    fn field_subdef_wk(&self) -> WellKnown {
        match self.top().f {
            Some(f) if f.is_submsg() => f
                .subdef()
                .map_or(WellKnown::None, MessageDef::well_known),
            _ => WellKnown::None,
        }
    }

    /// The top frame is a synthesized well-known context of kind `wk`.
    fn in_synthetic(&self, wk: WellKnown) -> bool {
        self.top().synthetic && self.top_msg_wk() == wk
    }

    fn in_synthetic_wrapper(&self) -> bool {
        let wk = self.top_msg_wk();
        self.top().synthetic && (wk.is_number_wrapper() || wk.is_string_wrapper())
    }

    // --------------------------------------------------------------------------------------------
    // Multipart text and capture
    // --------------------------------------------------------------------------------------------

    fn multipart_startaccum(&mut self) {
        debug_assert!(self.accum.is_empty());
        debug_assert_eq!(self.multipart, Multipart::Inactive);
        self.multipart = Multipart::Accumulate;
    }

    fn multipart_start_push(&mut self) {
        debug_assert!(self.accum.is_empty());
        debug_assert_eq!(self.multipart, Multipart::Inactive);
        self.multipart = Multipart::PushEager;
    }

    /// Invalidates the accumulate buffer; call only after reading it.
    fn multipart_end(&mut self) {
        debug_assert_ne!(self.multipart, Multipart::Inactive);
        self.multipart = Multipart::Inactive;
        self.accum.clear();
    }

    fn multipart_input(
        &mut self,
        input: &[u8],
        start: usize,
        end: usize,
        can_alias: bool,
    ) -> Result<(), ParseError> {
        match self.multipart {
            Multipart::Inactive => Err(ParseError::Internal("unexpected inactive multipart state")),
            Multipart::Accumulate => self.accum.append_input(input, start, end, can_alias),
            Multipart::PushEager => {
                self.sink.put_string(&input[start..end]);
                Ok(())
            }
        }
    }

    fn multipart_bytes(&mut self, input: &[u8], bytes: &[u8]) -> Result<(), ParseError> {
        match self.multipart {
            Multipart::Inactive => Err(ParseError::Internal("unexpected inactive multipart state")),
            Multipart::Accumulate => self.accum.append_bytes(input, bytes),
            Multipart::PushEager => {
                self.sink.put_string(bytes);
                Ok(())
            }
        }
    }

    fn capture_begin(&mut self, pos: usize) {
        debug_assert_ne!(self.multipart, Multipart::Inactive);
        debug_assert!(!self.capture.is_active());
        self.capture = Capture::Active(pos);
    }

    fn capture_end(&mut self, input: &[u8], pos: usize) -> Result<(), ParseError> {
        let Capture::Active(start) = self.capture else {
            return Err(ParseError::Internal("capture not active"));
        };
        self.multipart_input(input, start, pos, true)?;
        self.capture = Capture::None;
        Ok(())
    }

    /// End-of-buffer handling: commit the open capture prefix and mark the
    /// capture as continuing at the start of the next buffer, and detach
    /// any aliased accumulator region from the current buffer.
    fn suspend(&mut self, input: &[u8]) -> Result<(), ParseError> {
        if let Capture::Active(start) = self.capture {
            self.multipart_input(input, start, input.len(), false)?;
            self.capture = Capture::Suspended;
        }
        self.accum.make_owned(input)
    }

    fn capture_resume(&mut self) {
        if self.capture == Capture::Suspended {
            self.capture = Capture::Active(0);
        }
    }

    // --------------------------------------------------------------------------------------------
    // Escapes
    // --------------------------------------------------------------------------------------------

    fn push_escape_byte(&mut self, input: &[u8], b: u8) -> Result<(), ParseError> {
        let ch = escape::escape_char(b);
        self.multipart_bytes(input, &[ch])
    }

    fn end_hex(&mut self, input: &[u8]) -> Result<(), ParseError> {
        match self.unicode_escape.end_hex() {
            Ok(Some(seq)) => self.multipart_bytes(input, seq.as_slice()),
            Ok(None) => Ok(()),
            Err(EscapeError::UnpairedHighSurrogate) => Err(ParseError::Syntax(
                "unpaired high surrogate in \\u escape".into(),
            )),
            Err(EscapeError::UnpairedLowSurrogate) => Err(ParseError::Syntax(
                "unpaired low surrogate in \\u escape".into(),
            )),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Members
    // --------------------------------------------------------------------------------------------

    fn start_member(&mut self) {
        debug_assert!(self.top().f.is_none());
        self.multipart_startaccum();
    }

    fn end_membername(&mut self, input: &[u8]) -> Result<(), ParseError> {
        debug_assert!(self.top().f.is_none());
        let Some(m) = self.top().m else {
            // Unknown subtree: the name is irrelevant.
            self.multipart_end();
            return Ok(());
        };
        if self.top().is_map {
            return self.handle_mapentry(input);
        }

        let found = {
            let bytes = self.accum.get(input);
            match core::str::from_utf8(bytes) {
                Ok(name) => match m.field_by_json_name(name) {
                    Some(f) => Ok(Some(f)),
                    None if self.ignore_json_unknown => Ok(None),
                    None => Err(ParseError::UnknownField(name.into())),
                },
                Err(_) => Err(ParseError::Syntax(
                    "invalid UTF-8 in member name".into(),
                )),
            }
        };
        let found = found?;
        self.top_mut().f = found;
        self.multipart_end();
        Ok(())
    }

    fn end_member(&mut self) {
        // If we just parsed a mapentry value, end that frame too.
        if self.top().is_mapentry {
            debug_assert!(self.stack.len() > 1);
            let map_field = self.top().map_field;
            self.sink.end_msg();
            self.stack.pop();
            if let Some(mf) = map_field {
                self.sink.end_submsg(mf);
            }
        }
        self.top_mut().f = None;
    }

    /// Emits one synthesized member: `start_member`, the accumulated name,
    /// `end_membername`. Shared by every well-known-type rewrite.
    fn synthetic_member(&mut self, input: &[u8], name: &str) -> Result<(), ParseError> {
        self.start_member();
        self.multipart_bytes(input, name.as_bytes())?;
        self.end_membername(input)
    }

    fn put_int64_member(&mut self, input: &[u8], name: &str, val: i64) -> Result<(), ParseError> {
        self.synthetic_member(input, name)?;
        if let Some(f) = self.top().f {
            self.sink.put_int64(f, val);
        }
        self.end_member();
        Ok(())
    }

    fn put_int32_member(&mut self, input: &[u8], name: &str, val: i32) -> Result<(), ParseError> {
        self.synthetic_member(input, name)?;
        if let Some(f) = self.top().f {
            self.sink.put_int32(f, val);
        }
        self.end_member();
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Map entries
    // --------------------------------------------------------------------------------------------

    /// Starts one mapentry submessage. Invoked at the end of the entry's
    /// key string, with the key text in the accumulate buffer.
    fn handle_mapentry(&mut self, input: &[u8]) -> Result<(), ParseError> {
        self.check_stack()?;
        let Some(map_field) = self.top().map_field else {
            return Err(ParseError::Internal("map frame without map field"));
        };
        let Some(entry_msg) = map_field.subdef() else {
            return Err(ParseError::Internal("map field has no mapentry message"));
        };

        self.top_mut().f = Some(map_field);
        self.sink.start_submsg(map_field);
        let mut inner = Frame::new(entry_msg);
        inner.map_field = Some(map_field);
        self.stack.push(inner);
        self.sink.start_msg();

        self.parse_mapentry_key(input)?;

        // Arm the value field; the frame pops after the value is parsed.
        let Some(value_f) = entry_msg.field_by_number(MAP_ENTRY_VALUE) else {
            return Err(ParseError::Internal("mapentry message has no value"));
        };
        let top = self.top_mut();
        top.f = Some(value_f);
        top.is_mapentry = true;
        Ok(())
    }

    /// Emits the mapentry key field from the accumulate buffer. The key is
    /// quoted in JSON, so integer and bool keys re-parse the quoted text.
    fn parse_mapentry_key(&mut self, input: &[u8]) -> Result<(), ParseError> {
        let Some(entry_msg) = self.top().m else {
            return Err(ParseError::Internal("mapentry frame without message"));
        };
        let Some(key_f) = entry_msg.field_by_number(MAP_ENTRY_KEY) else {
            return Err(ParseError::Internal("mapentry message has no key"));
        };
        self.top_mut().f = Some(key_f);

        match key_f.field_type() {
            FieldType::Int32 | FieldType::Int64 | FieldType::UInt32 | FieldType::UInt64 => {
                self.parse_number(input, true)?;
            }
            FieldType::Bool => {
                let val = match self.accum.get(input) {
                    b"true" => true,
                    b"false" => false,
                    _ => {
                        return Err(ParseError::TypeMismatch(
                            "map bool key not 'true' or 'false'".into(),
                        ));
                    }
                };
                self.put_bool_checked(val)?;
                self.multipart_end();
            }
            FieldType::String | FieldType::Bytes => {
                let bytes = self.accum.get(input);
                self.sink.start_str(key_f, bytes.len());
                self.sink.put_string(bytes);
                self.sink.end_str(key_f);
                self.multipart_end();
            }
            _ => {
                return Err(ParseError::TypeMismatch(
                    "invalid field type for map key".into(),
                ));
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Objects and arrays
    // --------------------------------------------------------------------------------------------

    fn start_object(&mut self) {
        // Mapentry sequences frame their entries individually, and unknown
        // subtrees emit nothing at all.
        if !self.top().is_map && self.top().m.is_some() {
            self.sink.start_msg();
        }
    }

    fn end_object(&mut self) {
        if !self.top().is_map && self.top().m.is_some() {
            self.sink.end_msg();
        }
    }

    fn start_subobject(&mut self) -> Result<(), ParseError> {
        let Some(f) = self.top().f else {
            // Unknown member: consume the subtree with depth tracking only.
            self.check_stack()?;
            self.stack.push(Frame::null());
            return Ok(());
        };

        if f.is_map() {
            self.check_stack()?;
            let Some(entry_msg) = f.subdef() else {
                return Err(ParseError::Internal("map field has no mapentry message"));
            };
            self.sink.start_seq(f);
            let mut inner = Frame::new(entry_msg);
            inner.is_map = true;
            inner.map_field = Some(f);
            self.stack.push(inner);
            Ok(())
        } else if f.is_submsg() {
            self.check_stack()?;
            let Some(sub) = f.subdef() else {
                return Err(ParseError::Internal("message field has no subdef"));
            };
            self.sink.start_submsg(f);
            self.stack.push(Frame::new(sub));
            Ok(())
        } else {
            Err(ParseError::TypeMismatch(format!(
                "object specified for non-message field: {}",
                f.name()
            )))
        }
    }

    fn start_subobject_full(&mut self, input: &[u8]) -> Result<(), ParseError> {
        if self.at_document_root() {
            if self.top_msg_wk() == WellKnown::Value {
                self.start_value_object(input, ValueKind::Struct)?;
                self.start_subobject()?;
                self.start_structvalue_object(input)?;
            } else if self.top_msg_wk() == WellKnown::Struct {
                self.start_structvalue_object(input)?;
            } else {
                return Ok(());
            }
        } else if self.field_subdef_wk() == WellKnown::Struct {
            self.start_subobject()?;
            self.start_structvalue_object(input)?;
        } else if self.field_subdef_wk() == WellKnown::Value {
            self.start_subobject()?;
            self.start_value_object(input, ValueKind::Struct)?;
            self.start_subobject()?;
            self.start_structvalue_object(input)?;
        }
        self.start_subobject()
    }

    fn end_subobject(&mut self) {
        if self.is_top_level() {
            return;
        }
        let Some(frame) = self.stack.pop() else {
            unreachable!("frame stack underflow");
        };
        if frame.is_map {
            if let Some(mf) = frame.map_field {
                self.sink.end_seq(mf);
            }
        } else if frame.m.is_some() {
            // Unknown subtrees emitted nothing, so they end nothing.
            if let Some(f) = self.top().f {
                self.sink.end_submsg(f);
            }
        }
    }

    fn end_subobject_full(&mut self) {
        self.end_subobject();

        if self.in_synthetic(WellKnown::Struct) {
            self.end_structvalue_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        }
        if self.in_synthetic(WellKnown::Value) {
            self.end_value_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        }
    }

    fn start_array(&mut self, input: &[u8]) -> Result<(), ParseError> {
        if self.at_document_root() {
            if self.top_msg_wk() == WellKnown::Value {
                self.start_value_object(input, ValueKind::List)?;
                self.start_subobject()?;
                self.start_listvalue_object(input)?;
            } else if self.top_msg_wk() == WellKnown::ListValue {
                self.start_listvalue_object(input)?;
            } else {
                return Err(ParseError::TypeMismatch(
                    "unexpected array at top level".into(),
                ));
            }
        } else if self.field_subdef_wk() == WellKnown::ListValue {
            self.start_subobject()?;
            self.start_listvalue_object(input)?;
        } else if self.field_subdef_wk() == WellKnown::Value {
            self.start_subobject()?;
            self.start_value_object(input, ValueKind::List)?;
            self.start_subobject()?;
            self.start_listvalue_object(input)?;
        }

        let Some(f) = self.top().f else {
            // Unknown member with an array value: depth tracking only.
            self.check_stack()?;
            self.stack.push(Frame::null());
            return Ok(());
        };
        if !f.is_seq() {
            return Err(ParseError::TypeMismatch(format!(
                "array specified for non-repeated field: {}",
                f.name()
            )));
        }
        self.check_stack()?;
        self.sink.start_seq(f);
        let inner = Frame {
            m: self.top().m,
            f: Some(f),
            is_map: false,
            is_mapentry: false,
            map_field: None,
            synthetic: false,
        };
        self.stack.push(inner);
        Ok(())
    }

    fn end_array(&mut self) -> Result<(), ParseError> {
        debug_assert!(self.stack.len() > 1);
        let Some(frame) = self.stack.pop() else {
            unreachable!("frame stack underflow");
        };
        if let Some(f) = frame.f {
            self.sink.end_seq(f);
        }

        if self.in_synthetic(WellKnown::ListValue) {
            self.end_listvalue_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        }
        if self.in_synthetic(WellKnown::Value) {
            self.end_value_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Well-known-type choreography
    // --------------------------------------------------------------------------------------------

    fn start_wrapper_object(&mut self, input: &[u8]) -> Result<(), ParseError> {
        self.start_object();
        self.top_mut().synthetic = true;
        self.synthetic_member(input, "value")
    }

    fn end_wrapper_object(&mut self) {
        self.end_member();
        self.end_object();
    }

    fn start_value_object(&mut self, input: &[u8], kind: ValueKind) -> Result<(), ParseError> {
        self.start_object();
        self.top_mut().synthetic = true;
        self.synthetic_member(input, kind.member_name())
    }

    fn end_value_object(&mut self) {
        self.end_member();
        self.end_object();
    }

    fn start_listvalue_object(&mut self, input: &[u8]) -> Result<(), ParseError> {
        self.start_object();
        self.top_mut().synthetic = true;
        self.synthetic_member(input, "values")
    }

    fn end_listvalue_object(&mut self) {
        self.end_member();
        self.end_object();
    }

    fn start_structvalue_object(&mut self, input: &[u8]) -> Result<(), ParseError> {
        self.start_object();
        self.top_mut().synthetic = true;
        self.synthetic_member(input, "fields")
    }

    fn end_structvalue_object(&mut self) {
        self.end_member();
        self.end_object();
    }

    // --------------------------------------------------------------------------------------------
    // Scalars
    // --------------------------------------------------------------------------------------------

    fn start_number(&mut self, input: &[u8], pos: usize) -> Result<(), ParseError> {
        if self.at_document_root() {
            if self.top_msg_wk().is_number_wrapper() {
                self.start_wrapper_object(input)?;
            } else if self.top_msg_wk() == WellKnown::Value {
                self.start_value_object(input, ValueKind::Number)?;
            } else {
                return Err(ParseError::TypeMismatch(
                    "unexpected number at top level".into(),
                ));
            }
        } else if self.field_subdef_wk().is_number_wrapper() {
            self.start_subobject()?;
            self.start_wrapper_object(input)?;
        } else if self.field_subdef_wk() == WellKnown::Value {
            self.start_subobject()?;
            self.start_value_object(input, ValueKind::Number)?;
        }

        self.multipart_startaccum();
        self.capture_begin(pos);
        Ok(())
    }

    fn end_number(&mut self, input: &[u8], pos: usize) -> Result<(), ParseError> {
        self.capture_end(input, pos)?;

        if self.top().f.is_none() {
            // Unknown member: discard the text.
            self.multipart_end();
        } else {
            self.parse_number(input, false)?;
        }

        if self.in_synthetic_wrapper() {
            self.end_wrapper_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        } else if self.in_synthetic(WellKnown::Value) {
            self.end_value_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        }
        Ok(())
    }

    /// Converts the accumulated text by the current field's type and emits
    /// the result. `is_quoted` marks text that appeared inside quotes.
    fn parse_number(&mut self, input: &[u8], is_quoted: bool) -> Result<(), ParseError> {
        let Some(f) = self.top().f else {
            return Err(ParseError::Internal("number conversion without a field"));
        };
        let parsed = {
            let bytes = self.accum.get(input);
            match core::str::from_utf8(bytes) {
                Ok(text) => number::parse(text, f.field_type(), is_quoted)
                    .map_err(|()| ParseError::BadNumber(text.into())),
                Err(_) => Err(ParseError::BadNumber(
                    String::from_utf8_lossy(bytes).into_owned(),
                )),
            }
        };
        self.multipart_end();
        match parsed? {
            Parsed::Int32(v) => self.sink.put_int32(f, v),
            Parsed::Int64(v) => self.sink.put_int64(f, v),
            Parsed::UInt32(v) => self.sink.put_uint32(f, v),
            Parsed::UInt64(v) => self.sink.put_uint64(f, v),
            Parsed::Float(v) => self.sink.put_float(f, v),
            Parsed::Double(v) => self.sink.put_double(f, v),
        }
        Ok(())
    }

    fn put_bool_checked(&mut self, val: bool) -> Result<(), ParseError> {
        let Some(f) = self.top().f else {
            return Ok(());
        };
        if f.field_type() != FieldType::Bool {
            return Err(ParseError::TypeMismatch(format!(
                "boolean value specified for non-bool field: {}",
                f.name()
            )));
        }
        self.sink.put_bool(f, val);
        Ok(())
    }

    fn end_bool(&mut self, input: &[u8], val: bool) -> Result<(), ParseError> {
        if self.at_document_root() {
            if self.top_msg_wk() == WellKnown::BoolValue {
                self.start_wrapper_object(input)?;
            } else if self.top_msg_wk() == WellKnown::Value {
                self.start_value_object(input, ValueKind::Bool)?;
            } else {
                return Err(ParseError::TypeMismatch(
                    "unexpected boolean at top level".into(),
                ));
            }
        } else if self.field_subdef_wk() == WellKnown::BoolValue {
            self.start_subobject()?;
            self.start_wrapper_object(input)?;
        } else if self.field_subdef_wk() == WellKnown::Value {
            self.start_subobject()?;
            self.start_value_object(input, ValueKind::Bool)?;
        }

        self.put_bool_checked(val)?;

        if self.in_synthetic_wrapper() {
            self.end_wrapper_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        } else if self.in_synthetic(WellKnown::Value) {
            self.end_value_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        }
        Ok(())
    }

    /// `null` is ignored for ordinary fields; for `google.protobuf.Value`
    /// it selects the `null_value` member with enum value zero.
    fn end_null(&mut self, input: &[u8]) -> Result<(), ParseError> {
        if self.at_document_root() {
            if self.top_msg_wk() == WellKnown::Value {
                self.start_value_object(input, ValueKind::Null)?;
            } else {
                return Ok(());
            }
        } else if self.field_subdef_wk() == WellKnown::Value {
            self.start_subobject()?;
            self.start_value_object(input, ValueKind::Null)?;
        } else {
            return Ok(());
        }

        self.multipart_startaccum();
        self.multipart_bytes(input, b"0")?;
        if self.top().f.is_none() {
            self.multipart_end();
        } else {
            self.parse_number(input, false)?;
        }

        self.end_value_object();
        if !self.is_top_level() {
            self.end_subobject();
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // String values
    // --------------------------------------------------------------------------------------------

    fn start_stringval(&mut self, input: &[u8]) -> Result<(), ParseError> {
        if self.at_document_root() {
            let wk = self.top_msg_wk();
            if wk.is_string_wrapper() || wk.is_number_wrapper() {
                self.start_wrapper_object(input)?;
            } else if wk == WellKnown::Timestamp || wk == WellKnown::Duration {
                self.start_object();
                self.top_mut().synthetic = true;
            } else if wk == WellKnown::Value {
                self.start_value_object(input, ValueKind::Str)?;
            } else {
                return Err(ParseError::TypeMismatch(
                    "unexpected string at top level".into(),
                ));
            }
        } else {
            let fwk = self.field_subdef_wk();
            if fwk.is_string_wrapper() || fwk.is_number_wrapper() {
                self.start_subobject()?;
                self.start_wrapper_object(input)?;
            } else if fwk == WellKnown::Timestamp || fwk == WellKnown::Duration {
                self.start_subobject()?;
                self.start_object();
                self.top_mut().synthetic = true;
            } else if fwk == WellKnown::Value {
                self.start_subobject()?;
                self.start_value_object(input, ValueKind::Str)?;
            }
        }

        let Some(f) = self.top().f else {
            // Timestamp/Duration content, or an unknown member's value:
            // accumulate for the machine-specific end handler.
            self.multipart_startaccum();
            return Ok(());
        };

        match f.field_type() {
            FieldType::String => {
                // String data streams straight to the handlers as parsed.
                self.check_stack()?;
                let m = self.top().m;
                self.sink.start_str(f, 0);
                let mut inner = Frame::null();
                inner.m = m;
                inner.f = Some(f);
                self.stack.push(inner);
                self.multipart_start_push();
                Ok(())
            }
            FieldType::Bytes => {
                // The base64 decoder is not streaming, so bytes values
                // buffer before decoding.
                self.check_stack()?;
                let m = self.top().m;
                self.sink.start_str(f, 0);
                let mut inner = Frame::null();
                inner.m = m;
                inner.f = Some(f);
                self.stack.push(inner);
                self.multipart_startaccum();
                Ok(())
            }
            FieldType::Bool | FieldType::Message => Err(ParseError::TypeMismatch(format!(
                "string specified for bool or submessage field: {}",
                f.name()
            ))),
            _ => {
                // Quoted numeric or enum values stay in the current frame
                // and accumulate for one-shot conversion.
                self.multipart_startaccum();
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn end_stringval(&mut self, input: &[u8]) -> Result<(), ParseError> {
        if self.in_synthetic(WellKnown::Timestamp)
            || self.in_synthetic(WellKnown::Duration)
            || self.top().f.is_none()
        {
            // Timestamp/Duration members were emitted by their machine
            // handlers; unknown-member values are discarded.
            self.multipart_end();
        } else {
            let Some(f) = self.top().f else {
                unreachable!("checked above");
            };
            match f.field_type() {
                FieldType::Bytes => {
                    let decoded = {
                        let bytes = self.accum.get(input);
                        let sink = &mut self.sink;
                        base64::decode(bytes, |chunk| sink.put_string(chunk))
                    };
                    if let Err(err) = decoded {
                        return Err(self.base64_error(f, err));
                    }
                    self.stack.pop();
                    self.sink.end_str(f);
                    self.multipart_end();
                }
                FieldType::String => {
                    self.stack.pop();
                    self.sink.end_str(f);
                    self.multipart_end();
                }
                FieldType::Enum => {
                    // Resolve the symbolic name to its integer value.
                    let resolved = {
                        let bytes = self.accum.get(input);
                        match core::str::from_utf8(bytes) {
                            Ok(name) => f
                                .enum_value_by_name(name)
                                .ok_or_else(|| ParseError::UnknownEnumName(name.into())),
                            Err(_) => Err(ParseError::UnknownEnumName(
                                String::from_utf8_lossy(bytes).into_owned(),
                            )),
                        }
                    };
                    self.multipart_end();
                    let val = resolved?;
                    self.sink.put_int32(f, val);
                }
                FieldType::Int32
                | FieldType::Int64
                | FieldType::UInt32
                | FieldType::UInt64
                | FieldType::Double
                | FieldType::Float => {
                    self.parse_number(input, true)?;
                }
                FieldType::Bool | FieldType::Message => {
                    return Err(ParseError::Internal("string value for non-string field"));
                }
            }
        }

        if self.in_synthetic_wrapper() {
            self.end_wrapper_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        } else if self.in_synthetic(WellKnown::Value) {
            self.end_value_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        } else if self.in_synthetic(WellKnown::Timestamp) || self.in_synthetic(WellKnown::Duration)
        {
            self.end_object();
            if !self.is_top_level() {
                self.end_subobject();
            }
        }
        Ok(())
    }

    fn base64_error(&self, f: &dyn FieldDef, err: base64::Base64Error) -> ParseError {
        let msg = match err {
            base64::Base64Error::NonBase64 => {
                format!("non-base64 characters in bytes field: {}", f.name())
            }
            base64::Base64Error::BadPadding => {
                format!("incorrect base64 padding for field: {}", f.name())
            }
            base64::Base64Error::BadLength => format!(
                "base64 input for bytes field not a multiple of 4: {}",
                f.name()
            ),
        };
        ParseError::Base64(msg)
    }

    // --------------------------------------------------------------------------------------------
    // Duration and Timestamp machines
    // --------------------------------------------------------------------------------------------

    fn end_duration_base(&mut self, input: &[u8], pos: usize) -> Result<(), ParseError> {
        self.capture_end(input, pos)?;

        let parsed = {
            let buf = self.accum.get(input);
            tm::parse_duration(buf).map_err(|err| match err {
                tm::DurationError::Malformed => {
                    ParseError::Duration(String::from_utf8_lossy(buf).into_owned())
                }
                tm::DurationError::AboveMax => ParseError::Duration(format!(
                    "maximum acceptable value is {}",
                    tm::MAX_DURATION_SECONDS
                )),
                tm::DurationError::BelowMin => ParseError::Duration(format!(
                    "minimum acceptable value is -{}",
                    tm::MAX_DURATION_SECONDS
                )),
            })
        };
        self.multipart_end();
        let (seconds, nanos) = parsed?;

        self.put_int64_member(input, "seconds", seconds)?;
        self.put_int32_member(input, "nanos", nanos)?;

        // Back to accumulating for the remainder of the string value.
        self.multipart_startaccum();
        Ok(())
    }

    fn end_timestamp_base(&mut self, input: &[u8], pos: usize) -> Result<(), ParseError> {
        self.capture_end(input, pos)?;

        let parsed = {
            let buf = self.accum.get(input);
            Tm::from_rfc3339_base(buf)
                .ok_or_else(|| ParseError::Timestamp(String::from_utf8_lossy(buf).into_owned()))
        };
        self.multipart_end();
        self.tm = parsed?;

        self.multipart_startaccum();
        Ok(())
    }

    fn end_timestamp_fraction(&mut self, input: &[u8], pos: usize) -> Result<(), ParseError> {
        self.capture_end(input, pos)?;

        let nanos = {
            let buf = self.accum.get(input);
            // buf includes the leading dot.
            if buf.len() > 10 {
                Err(ParseError::Timestamp("at most 9-digit fraction".into()))
            } else {
                Ok(tm::frac_nanos(&buf[1..]))
            }
        };
        self.multipart_end();
        let nanos = nanos?;

        self.put_int32_member(input, "nanos", nanos)?;

        self.multipart_startaccum();
        Ok(())
    }

    fn end_timestamp_zone(&mut self, input: &[u8], pos: usize) -> Result<(), ParseError> {
        self.capture_end(input, pos)?;

        let hours = {
            let buf = self.accum.get(input);
            if buf.first() == Some(&b'Z') {
                Ok(0)
            } else if buf.len() == 6 && buf[1].is_ascii_digit() && buf[2].is_ascii_digit() {
                let hours = i64::from(buf[1] - b'0') * 10 + i64::from(buf[2] - b'0');
                // Offset minutes are validated by the machine but, like the
                // reference decoders, not applied.
                Ok(if buf[0] == b'+' { -hours } else { hours })
            } else {
                Err(ParseError::Timestamp("invalid timestamp offset".into()))
            }
        };
        self.multipart_end();
        self.tm.hour += hours?;

        let seconds = self.tm.utc_seconds();
        if seconds < tm::MIN_TIMESTAMP_SECONDS {
            return Err(ParseError::Timestamp(
                "minimum acceptable value is 0001-01-01T00:00:00Z".into(),
            ));
        }

        self.put_int64_member(input, "seconds", seconds)?;

        self.multipart_startaccum();
        Ok(())
    }
}
