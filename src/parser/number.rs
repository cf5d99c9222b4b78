//! Typed numeric conversion from accumulated literal text.
//!
//! Integer targets are tried with an exact 64-bit integer parse first,
//! which is precise where a double round-trip would not be. The integer
//! parse follows C's base-0 rules (`0x` hex, leading-zero octal, decimal)
//! because quoted literals historically pass through it. Everything else
//! falls back to a full-width double parse, after which integer targets
//! require an integrally valued, in-range result.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use crate::descriptor::FieldType;

/// A successfully converted numeric value, ready for emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Parsed {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
}

// f64 cannot represent i64::MAX / u64::MAX exactly; compare against the
// next power of two and keep the upper bound exclusive.
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;

/// `no_std`-safe equivalent of `f64::fract(val) != 0.0`. Truncation via `as i64`
/// saturates for out-of-range/NaN/infinite inputs, but callers already combine
/// this with an explicit range check, so the saturated comparison still comes
/// out non-zero in every case that matters.
fn has_fraction(val: f64) -> bool {
    val != (val as i64) as f64
}

/// Converts `buf` according to the target field type.
///
/// `is_quoted` marks text that originally appeared inside string quotes:
/// it is accepted for numeric fields, but non-float targets then require
/// an integer literal form.
pub(crate) fn parse(buf: &str, ty: FieldType, is_quoted: bool) -> Result<Parsed, ()> {
    if buf.is_empty() || buf.starts_with(' ') {
        return Err(());
    }

    // Integer-first: exact for magnitudes a double would round.
    match ty {
        FieldType::Enum | FieldType::Int32 => {
            if let Some(val) = parse_i64_c(buf) {
                if val > i64::from(i32::MAX) || val < i64::from(i32::MIN) {
                    return Err(());
                }
                return Ok(Parsed::Int32(val as i32));
            }
        }
        FieldType::UInt32 => {
            if let Some(val) = parse_u64_c(buf) {
                if val > u64::from(u32::MAX) {
                    return Err(());
                }
                return Ok(Parsed::UInt32(val as u32));
            }
        }
        FieldType::Int64 => {
            if let Some(val) = parse_i64_c(buf) {
                return Ok(Parsed::Int64(val));
            }
        }
        FieldType::UInt64 => {
            if let Some(val) = parse_u64_c(buf) {
                return Ok(Parsed::UInt64(val));
            }
        }
        _ => {}
    }

    let is_float_target = matches!(ty, FieldType::Double | FieldType::Float);
    if !is_float_target && is_quoted {
        // Quoted numbers for integer types may not be in double form.
        return Err(());
    }

    let val: f64 = match buf {
        "Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => buf.parse().map_err(|_| ())?,
    };

    match ty {
        FieldType::Enum | FieldType::Int32 => {
            if has_fraction(val) || val > f64::from(i32::MAX) || val < f64::from(i32::MIN) {
                Err(())
            } else {
                Ok(Parsed::Int32(val as i32))
            }
        }
        FieldType::Int64 => {
            if has_fraction(val) || val >= I64_BOUND || val < I64_MIN_F {
                Err(())
            } else {
                Ok(Parsed::Int64(val as i64))
            }
        }
        FieldType::UInt32 => {
            if has_fraction(val) || val > f64::from(u32::MAX) || val < 0.0 {
                Err(())
            } else {
                Ok(Parsed::UInt32(val as u32))
            }
        }
        FieldType::UInt64 => {
            if has_fraction(val) || val >= U64_BOUND || val < 0.0 {
                Err(())
            } else {
                Ok(Parsed::UInt64(val as u64))
            }
        }
        FieldType::Double => Ok(Parsed::Double(val)),
        FieldType::Float => {
            if (val > f64::from(f32::MAX) || val < f64::from(-f32::MAX)) && !val.is_infinite() {
                Err(())
            } else {
                Ok(Parsed::Float(val as f32))
            }
        }
        _ => Err(()),
    }
}

/// `strtol(buf, .., 0)` semantics: optional sign, `0x` hex, leading-zero
/// octal, else decimal. `None` on overflow or trailing garbage.
fn parse_i64_c(buf: &str) -> Option<i64> {
    let bytes = buf.as_bytes();
    let (neg, rest) = match bytes.first()? {
        b'-' => (true, &bytes[1..]),
        b'+' => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    // Accumulate negated so i64::MIN round-trips.
    let val = accumulate(rest, |acc: i64, radix, d| {
        acc.checked_mul(radix)?.checked_sub(d)
    })?;
    if neg {
        Some(val)
    } else {
        val.checked_neg()
    }
}

/// `strtoul(buf, .., 0)` semantics, except negative input is rejected
/// rather than wrapped.
fn parse_u64_c(buf: &str) -> Option<u64> {
    let bytes = buf.as_bytes();
    let rest = match bytes.first()? {
        b'-' => return None,
        b'+' => &bytes[1..],
        _ => bytes,
    };
    accumulate(rest, |acc: u64, radix, d| {
        acc.checked_mul(radix)?.checked_add(d)
    })
}

fn accumulate<T>(digits: &[u8], step: impl Fn(T, T, T) -> Option<T>) -> Option<T>
where
    T: Copy + Default + From<u32>,
{
    let (radix, digits) = if digits.len() > 1 && digits[0] == b'0' && (digits[1] | 0x20) == b'x' {
        (16u32, &digits[2..])
    } else if digits.len() > 1 && digits[0] == b'0' {
        (8u32, &digits[1..])
    } else {
        (10u32, digits)
    };
    if digits.is_empty() {
        return None;
    }
    let mut acc = T::default();
    for &c in digits {
        let d = (c as char).to_digit(radix)?;
        acc = step(acc, T::from(radix), T::from(d))?;
    }
    Some(acc)
}
