//! Incremental matcher for the fixed literals `true`, `false`, `null`,
//! and `Infinity` (the latter only inside the number machine).
//!
//! The first character has already been consumed by the dispatching state
//! when a matcher is created; the matcher tracks the remaining bytes so a
//! literal can straddle input-buffer seams.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LiteralKind {
    True,
    False,
    Null,
    Infinity,
}

/// What happened after feeding one more byte into the matcher.
pub(crate) enum Step {
    /// Byte matched, but the literal is not finished yet.
    NeedMore,
    /// Byte matched and it was the last byte of the literal.
    Done(LiteralKind),
    /// Byte did not match the expected one.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExpectedLiteral {
    rest: &'static [u8],
    kind: LiteralKind,
}

impl ExpectedLiteral {
    pub(crate) fn after_t() -> Self {
        Self {
            rest: b"rue",
            kind: LiteralKind::True,
        }
    }

    pub(crate) fn after_f() -> Self {
        Self {
            rest: b"alse",
            kind: LiteralKind::False,
        }
    }

    pub(crate) fn after_n() -> Self {
        Self {
            rest: b"ull",
            kind: LiteralKind::Null,
        }
    }

    pub(crate) fn after_i() -> Self {
        Self {
            rest: b"nfinity",
            kind: LiteralKind::Infinity,
        }
    }

    /// Gives the matcher the next input byte.
    pub(crate) fn step(&mut self, b: u8) -> Step {
        match self.rest.split_first() {
            Some((&expected, rest)) if expected == b => {
                self.rest = rest;
                if rest.is_empty() {
                    Step::Done(self.kind)
                } else {
                    Step::NeedMore
                }
            }
            _ => Step::Reject,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExpectedLiteral, LiteralKind, Step};

    #[test]
    fn matches_true() {
        let mut lit = ExpectedLiteral::after_t();
        assert!(matches!(lit.step(b'r'), Step::NeedMore));
        assert!(matches!(lit.step(b'u'), Step::NeedMore));
        assert!(matches!(lit.step(b'e'), Step::Done(LiteralKind::True)));
    }

    #[test]
    fn rejects_mismatch() {
        let mut lit = ExpectedLiteral::after_n();
        assert!(matches!(lit.step(b'u'), Step::NeedMore));
        assert!(matches!(lit.step(b'x'), Step::Reject));
    }

    #[test]
    fn matches_infinity() {
        let mut lit = ExpectedLiteral::after_i();
        for b in b"nfinit" {
            assert!(matches!(lit.step(*b), Step::NeedMore));
        }
        assert!(matches!(lit.step(b'y'), Step::Done(LiteralKind::Infinity)));
    }
}
