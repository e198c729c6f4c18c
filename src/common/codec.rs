// src/common/codec.rs

//! Conversion between wire tokens and typed [`Value`]s.
//!
//! Encoding validates before formatting: bounds are checked on the value as
//! supplied, then the value is rounded to the nearest multiple of the declared
//! resolution using **round-half-away-from-zero**, and finally formatted in
//! fixed decimal notation (never an exponent, never locale dependent) with as
//! many fraction digits as the resolution's shortest decimal form.
//!
//! Rounding never leaves the bounds. When the nearest multiple lies past `min`
//! or `max` (a bound that is not itself a multiple, e.g. max 16.5 with
//! resolution 0.2), the neighbouring multiple on the inside is sent instead
//! (16.4). If no multiple fits between the bounds the write fails with
//! [`AttributeError::ValueOutOfRange`].
//!
//! Decoding is the inverse: `decode(encode(v)) == quantize(v)` for every
//! numeric attribute and every `v` inside the declared bounds. Replies may
//! also carry space-separated packets and IEEE 488.2 definite-length blocks
//! (`#<n><len><data>`), see [`decode_bytes`].

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::error::{AttributeError, ReplyError};
use super::schema::{contains_seq, Attribute, BlockDataType, DeviceSettings, NumericSpec, ValueKind};
use super::value::Value;

/// Wire token for `true`.
pub const TRUE_TOKEN: &str = "1";
/// Wire token for `false`.
pub const FALSE_TOKEN: &str = "0";

// Above 2^53 every f64 is already an integer.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;
// Largest magnitude safely convertible to i64.
const I64_LIMIT: f64 = 9_223_372_036_854_774_784.0;

// --- Encode ---

/// Validates `value` against the attribute and formats it as a wire token.
pub fn encode(
    attribute: &Attribute,
    value: &Value,
    settings: &DeviceSettings,
) -> Result<String, AttributeError> {
    let descriptor = attribute.descriptor();
    match descriptor.kind() {
        ValueKind::Bit { .. } => Err(AttributeError::UnsupportedOperation {
            name: attribute.name().to_string(),
            reason: "bit attributes are read-only views of a register",
        }),
        ValueKind::PacketItem { .. } => Err(AttributeError::UnsupportedOperation {
            name: attribute.name().to_string(),
            reason: "packet items are read-only views of a packet",
        }),
        ValueKind::Block(_) => Err(AttributeError::UnsupportedOperation {
            name: attribute.name().to_string(),
            reason: "block data can only be read",
        }),
        ValueKind::Command => Err(AttributeError::UnsupportedOperation {
            name: attribute.name().to_string(),
            reason: "commands take no value",
        }),
        ValueKind::Float(spec) => {
            let v = coerce_float(attribute, value)?;
            check_bounds(attribute, spec, v)?;
            let token = format_float(v, spec);
            let sent = token.parse::<f64>().map_err(|_| invalid(attribute, "value is not finite"))?;
            if !within(spec, sent) {
                return Err(out_of_range(attribute, spec, v));
            }
            Ok(token)
        }
        ValueKind::Integer(spec) => {
            let v = coerce_integer(attribute, value)?;
            check_bounds(attribute, spec, v as f64)?;
            let rounded = round_integer(v, spec);
            if !within(spec, rounded as f64) {
                return Err(out_of_range(attribute, spec, v as f64));
            }
            Ok(rounded.to_string())
        }
        ValueKind::Boolean => {
            let b = coerce_bool(attribute, value)?;
            Ok(String::from(if b { TRUE_TOKEN } else { FALSE_TOKEN }))
        }
        ValueKind::String => {
            let s = value.as_str().ok_or_else(|| mismatch(attribute, "string", value))?;
            check_framing(attribute, s, settings)?;
            Ok(String::from(s))
        }
    }
}

/// The value a numeric attribute actually takes after resolution rounding.
///
/// This is exactly what [`decode`] returns for the token [`encode`] emits.
pub fn quantize(attribute: &Attribute, value: f64) -> Result<f64, AttributeError> {
    match attribute.descriptor().kind() {
        ValueKind::Float(spec) => {
            let token = format_float(value, spec);
            token.parse::<f64>().map_err(|_| invalid(attribute, "value is not finite"))
        }
        ValueKind::Integer(spec) => {
            let v = coerce_integer(attribute, &Value::Float(value))?;
            Ok(round_integer(v, spec) as f64)
        }
        _ => Err(AttributeError::UnsupportedOperation {
            name: attribute.name().to_string(),
            reason: "only numeric attributes have a resolution",
        }),
    }
}

fn within(spec: &NumericSpec, v: f64) -> bool {
    !spec.min.is_some_and(|min| v < min) && !spec.max.is_some_and(|max| v > max)
}

fn out_of_range(attribute: &Attribute, spec: &NumericSpec, v: f64) -> AttributeError {
    AttributeError::ValueOutOfRange {
        name: attribute.name().to_string(),
        value: v,
        min: spec.min,
        max: spec.max,
    }
}

fn check_bounds(attribute: &Attribute, spec: &NumericSpec, v: f64) -> Result<(), AttributeError> {
    if within(spec, v) {
        Ok(())
    } else {
        Err(out_of_range(attribute, spec, v))
    }
}

fn check_framing(attribute: &Attribute, s: &str, settings: &DeviceSettings) -> Result<(), AttributeError> {
    let bytes = s.as_bytes();
    if contains_seq(bytes, &settings.sentinel) {
        return Err(invalid(attribute, "string contains the sentinel"));
    }
    if contains_seq(bytes, settings.argument_separator.as_bytes())
        || contains_seq(bytes, settings.reply_separator().as_bytes())
    {
        return Err(invalid(attribute, "string contains the argument separator"));
    }
    Ok(())
}

fn coerce_float(attribute: &Attribute, value: &Value) -> Result<f64, AttributeError> {
    let v = match value {
        Value::Float(v) => *v,
        Value::Int(v) => *v as f64,
        other => return Err(mismatch(attribute, "float", other)),
    };
    if !v.is_finite() {
        return Err(invalid(attribute, "value is not finite"));
    }
    Ok(v)
}

fn coerce_integer(attribute: &Attribute, value: &Value) -> Result<i64, AttributeError> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::Float(f) if f.is_finite() && f.abs() < I64_LIMIT && (*f as i64) as f64 == *f => {
            Ok(*f as i64)
        }
        Value::Float(_) => Err(invalid(attribute, "value is not an integer")),
        other => Err(mismatch(attribute, "integer", other)),
    }
}

fn coerce_bool(attribute: &Attribute, value: &Value) -> Result<bool, AttributeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(0) => Ok(false),
        Value::Int(1) => Ok(true),
        other => Err(mismatch(attribute, "boolean", other)),
    }
}

fn mismatch(attribute: &Attribute, expected: &str, got: &Value) -> AttributeError {
    invalid(attribute, format!("expected {}, got {}", expected, got.type_name()))
}

fn invalid(attribute: &Attribute, reason: impl Into<String>) -> AttributeError {
    AttributeError::InvalidValue {
        name: attribute.name().to_string(),
        reason: reason.into(),
    }
}

// --- Rounding and formatting ---

/// Rounds to the nearest integer, halves away from zero.
fn round_half_away(q: f64) -> f64 {
    if !q.is_finite() || q.abs() >= EXACT_INTEGER_LIMIT {
        return q;
    }
    let truncated = q as i64 as f64;
    let frac = q - truncated;
    if frac >= 0.5 {
        truncated + 1.0
    } else if frac <= -0.5 {
        truncated - 1.0
    } else {
        truncated
    }
}

/// Number of fraction digits in the shortest decimal form of `resolution`.
fn fraction_digits(resolution: f64) -> usize {
    let repr = format!("{}", resolution);
    repr.find('.').map_or(0, |dot| repr.len() - dot - 1)
}

/// Number of resolution steps nearest to `v`. If that multiple (as
/// `value_of` renders it) lies past a bound, the neighbouring step on the
/// inside is returned; callers still check the result against the bounds.
fn steps_within(spec: &NumericSpec, v: f64, res: f64, value_of: impl Fn(f64) -> f64) -> f64 {
    let steps = round_half_away(v / res);
    let rounded = value_of(steps);
    if spec.max.is_some_and(|max| rounded > max) {
        steps - 1.0
    } else if spec.min.is_some_and(|min| rounded < min) {
        steps + 1.0
    } else {
        steps
    }
}

fn format_float(v: f64, spec: &NumericSpec) -> String {
    match spec.resolution {
        Some(res) => {
            let digits = fraction_digits(res);
            let render = |steps: f64| format!("{:.*}", digits, steps * res);
            let steps = steps_within(spec, v, res, |steps| {
                render(steps).parse::<f64>().unwrap_or(steps * res)
            });
            render(steps)
        }
        // Display on f64 is the shortest round-trip form and never uses an exponent.
        None => format!("{}", v),
    }
}

fn round_integer(v: i64, spec: &NumericSpec) -> i64 {
    match spec.resolution {
        Some(res) => {
            let steps = steps_within(spec, v as f64, res, |steps| round_half_away(steps * res));
            let rounded = round_half_away(steps * res);
            if rounded.abs() < I64_LIMIT {
                rounded as i64
            } else {
                v
            }
        }
        None => v,
    }
}

// --- Decode ---

/// Converts one raw reply token into a typed value.
///
/// No range validation happens here: the instrument's report is passed through.
pub fn decode(attribute: &Attribute, token: &str) -> Result<Value, AttributeError> {
    let descriptor = attribute.descriptor();
    match descriptor.kind() {
        ValueKind::String => Ok(Value::Str(String::from(token))),
        ValueKind::Float(_) => parse_real(token)
            .map(Value::Float)
            .ok_or_else(|| unparsable(attribute, token, "float")),
        ValueKind::Integer(_) => parse_integer(token.trim())
            .map(Value::Int)
            .ok_or_else(|| unparsable(attribute, token, "integer")),
        ValueKind::Boolean => match token {
            TRUE_TOKEN => Ok(Value::Bool(true)),
            FALSE_TOKEN => Ok(Value::Bool(false)),
            _ => Err(unparsable(attribute, token, "boolean 1/0")),
        },
        ValueKind::Bit { bit_index } => parse_register(token.trim())
            .map(|register| Value::Bool(decode_bit(register, *bit_index)))
            .ok_or_else(|| unparsable(attribute, token, "integer register")),
        ValueKind::PacketItem { index } => decode_packet_item(attribute, token, *index),
        ValueKind::Block(data_type) => decode_block(attribute, token.as_bytes(), *data_type),
        ValueKind::Command => Err(AttributeError::UnsupportedOperation {
            name: attribute.name().to_string(),
            reason: "commands cannot be read",
        }),
    }
}

/// Decodes a raw reply token. Block attributes take the bytes as they are;
/// every other type must be UTF-8 text.
pub fn decode_bytes(attribute: &Attribute, token: &[u8]) -> Result<Value, AttributeError> {
    if let ValueKind::Block(data_type) = attribute.descriptor().kind() {
        return decode_block(attribute, token, *data_type);
    }
    let text = core::str::from_utf8(token).map_err(|_| ReplyError::InvalidUtf8)?;
    decode(attribute, text)
}

/// Parses a real number; `NaN` and infinities are not numeric tokens.
fn parse_real(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn decode_packet_item(attribute: &Attribute, token: &str, index: usize) -> Result<Value, AttributeError> {
    let packet = token.trim();
    match packet.split(' ').nth(index) {
        Some(item) => parse_real(item)
            .map(Value::Float)
            .ok_or_else(|| unparsable(attribute, token, "packet of floats")),
        None => Err(ReplyError::PacketTooShort {
            attribute: attribute.name().to_string(),
            index,
            items: packet.split(' ').count(),
        }
        .into()),
    }
}

/// Parses the IEEE 488.2 block header at the start of `bytes`.
///
/// Returns the header length and the declared data length; the indefinite
/// form `#0` declares none. `None` unless `bytes` starts with a complete header.
pub(crate) fn block_header(bytes: &[u8]) -> Option<(usize, Option<usize>)> {
    let [b'#', count, rest @ ..] = bytes else {
        return None;
    };
    if !count.is_ascii_digit() {
        return None;
    }
    let digits = usize::from(count - b'0');
    if digits == 0 {
        return Some((2, None));
    }
    let declared = parse_decimal(rest.get(..digits)?)?;
    Some((2 + digits, Some(declared)))
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    digits
        .iter()
        .try_fold(0usize, |acc, d| acc.checked_mul(10)?.checked_add(usize::from(d - b'0')))
}

fn decode_block(attribute: &Attribute, token: &[u8], data_type: BlockDataType) -> Result<Value, AttributeError> {
    let lossy = || String::from_utf8_lossy(token).into_owned();
    let (header_len, declared) =
        block_header(token).ok_or_else(|| unparsable(attribute, &lossy(), "block data"))?;
    let data = &token[header_len..];
    if let Some(declared) = declared {
        if data.len() != declared {
            return Err(ReplyError::BlockLength {
                declared,
                actual: data.len(),
            }
            .into());
        }
    }
    if data.len() % data_type.size() != 0 {
        return Err(unparsable(attribute, &lossy(), "whole block elements"));
    }
    data.chunks_exact(data_type.size())
        .map(|chunk| block_element(attribute, chunk, data_type))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}

fn block_element(attribute: &Attribute, chunk: &[u8], data_type: BlockDataType) -> Result<Value, AttributeError> {
    let mut raw = [0u8; 8];
    raw[..chunk.len()].copy_from_slice(chunk);
    let pair = [raw[0], raw[1]];
    let quad = [raw[0], raw[1], raw[2], raw[3]];
    let value = match data_type {
        BlockDataType::Int8 => Value::Int(i64::from(raw[0] as i8)),
        BlockDataType::Uint8 => Value::Int(i64::from(raw[0])),
        BlockDataType::Int16 => Value::Int(i64::from(i16::from_le_bytes(pair))),
        BlockDataType::Uint16 => Value::Int(i64::from(u16::from_le_bytes(pair))),
        BlockDataType::Int32 => Value::Int(i64::from(i32::from_le_bytes(quad))),
        BlockDataType::Uint32 => Value::Int(i64::from(u32::from_le_bytes(quad))),
        BlockDataType::Int64 => Value::Int(i64::from_le_bytes(raw)),
        BlockDataType::Uint64 => {
            let v = u64::from_le_bytes(raw);
            let v = i64::try_from(v).map_err(|_| unparsable(attribute, &v.to_string(), "uint64 within i64 range"))?;
            Value::Int(v)
        }
        BlockDataType::Float32 => Value::Float(f64::from(f32::from_le_bytes(quad))),
        BlockDataType::Float64 => Value::Float(f64::from_le_bytes(raw)),
    };
    Ok(value)
}

/// Extracts bit `bit_index` of `register`. Indices past 63 read as `false`.
#[inline]
pub fn decode_bit(register: u64, bit_index: u8) -> bool {
    register
        .checked_shr(u32::from(bit_index))
        .is_some_and(|shifted| shifted & 1 == 1)
}

/// Parses an integer token: decimal with optional sign, SCPI radix forms
/// (`#H1F`, `#Q17`, `#B101`), or an integral real such as `+1.30E+02`.
///
/// Radix forms above `i64::MAX` are rejected; see [`parse_register`].
pub fn parse_integer(token: &str) -> Option<i64> {
    if let Some(rest) = token.strip_prefix('#') {
        return parse_radix(rest).and_then(|v| i64::try_from(v).ok());
    }
    if let Ok(v) = token.parse::<i64>() {
        return Some(v);
    }
    let f = token.parse::<f64>().ok()?;
    if f.is_finite() && f.abs() < I64_LIMIT && (f as i64) as f64 == f {
        Some(f as i64)
    } else {
        None
    }
}

/// Parses a status register. Like [`parse_integer`], but radix forms use all
/// 64 bits and negative decimals are taken as two's complement.
pub fn parse_register(token: &str) -> Option<u64> {
    match token.strip_prefix('#') {
        Some(rest) => parse_radix(rest),
        None => parse_integer(token).map(|v| v as u64),
    }
}

fn parse_radix(rest: &str) -> Option<u64> {
    let mut chars = rest.chars();
    let radix = match chars.next()? {
        'H' | 'h' => 16,
        'Q' | 'q' => 8,
        'B' | 'b' => 2,
        _ => return None,
    };
    let digits = chars.as_str();
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

fn unparsable(attribute: &Attribute, token: &str, expected: &'static str) -> AttributeError {
    ReplyError::UnparsableToken {
        attribute: attribute.name().to_string(),
        token: String::from(token),
        expected,
    }
    .into()
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::AttributeDescriptor;

    fn frequency() -> Attribute {
        Attribute::new(
            "frequency",
            AttributeDescriptor::float("FREQ")
                .unit("Hz")
                .bounds(950_000.0, 4_000_000_000.0)
                .resolution(0.0001),
        )
    }

    fn power() -> Attribute {
        Attribute::new(
            "power_dbm",
            AttributeDescriptor::float("POWR").unit("dBm").bounds(-110.0, 16.5).resolution(0.01),
        )
    }

    fn settings() -> DeviceSettings {
        DeviceSettings {
            argument_separator: ",".into(),
            ..DeviceSettings::default()
        }
    }

    #[test]
    fn test_frequency_rounds_to_resolution() {
        let token = encode(&frequency(), &Value::Float(2400000000.0001234), &settings()).unwrap();
        assert_eq!(token, "2400000000.0001");
        assert_eq!(decode(&frequency(), &token).unwrap(), Value::Float(2400000000.0001));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let s = settings();
        assert_eq!(encode(&frequency(), &Value::Float(950_000.0), &s).unwrap(), "950000.0000");
        assert_eq!(
            encode(&frequency(), &Value::Float(4_000_000_000.0), &s).unwrap(),
            "4000000000.0000"
        );
        assert_eq!(
            encode(&frequency(), &Value::Float(949_999.9999), &s),
            Err(AttributeError::ValueOutOfRange {
                name: "frequency".into(),
                value: 949_999.9999,
                min: Some(950_000.0),
                max: Some(4_000_000_000.0),
            })
        );
        assert!(matches!(
            encode(&power(), &Value::Int(999999), &s),
            Err(AttributeError::ValueOutOfRange { ref name, .. }) if name == "power_dbm"
        ));
    }

    #[test]
    fn test_round_trip_matches_quantize() {
        let s = settings();
        let attr = power();
        for v in [-110.0, -54.321, -0.005, 0.0, 0.004, 0.015, 3.14159, 16.5] {
            let token = encode(&attr, &Value::Float(v), &s).unwrap();
            let decoded = decode(&attr, &token).unwrap();
            assert_eq!(decoded, Value::Float(quantize(&attr, v).unwrap()), "value {}", v);
        }
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_half_away(2.5), 3.0);
        assert_eq!(round_half_away(-2.5), -3.0);
        assert_eq!(round_half_away(2.4999), 2.0);
        assert_eq!(round_half_away(-0.4), 0.0);
        assert_eq!(round_half_away(1.0e17), 1.0e17);

        let half = Attribute::new("x", AttributeDescriptor::float("X").resolution(0.5));
        assert_eq!(encode(&half, &Value::Float(1.25), &settings()).unwrap(), "1.5");
        assert_eq!(encode(&half, &Value::Float(-1.25), &settings()).unwrap(), "-1.5");
    }

    #[test]
    fn test_float_formatting_never_uses_exponent() {
        let free = Attribute::new("x", AttributeDescriptor::float("X"));
        let s = settings();
        assert_eq!(encode(&free, &Value::Float(1.0e-7), &s).unwrap(), "0.0000001");
        assert_eq!(encode(&free, &Value::Float(1.0e20), &s).unwrap(), "100000000000000000000");
        assert_eq!(encode(&free, &Value::Int(42), &s).unwrap(), "42");

        let fine = Attribute::new("y", AttributeDescriptor::float("Y").resolution(1.0e-9));
        assert_eq!(encode(&fine, &Value::Float(0.5), &s).unwrap(), "0.500000000");
    }

    #[test]
    fn test_non_finite_rejected() {
        let free = Attribute::new("x", AttributeDescriptor::float("X"));
        assert!(matches!(
            encode(&free, &Value::Float(f64::NAN), &settings()),
            Err(AttributeError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(&free, &Value::Float(f64::INFINITY), &settings()),
            Err(AttributeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_integer_encoding_and_resolution() {
        let s = settings();
        let plain = Attribute::new("n", AttributeDescriptor::integer("N").bounds(-5.0, 5.0));
        assert_eq!(encode(&plain, &Value::Int(-5), &s).unwrap(), "-5");
        assert_eq!(encode(&plain, &Value::Float(3.0), &s).unwrap(), "3");
        assert!(matches!(
            encode(&plain, &Value::Float(3.5), &s),
            Err(AttributeError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(&plain, &Value::Int(6), &s),
            Err(AttributeError::ValueOutOfRange { .. })
        ));

        let stepped = Attribute::new("avg", AttributeDescriptor::integer("AVG").resolution(10.0));
        assert_eq!(encode(&stepped, &Value::Int(44), &s).unwrap(), "40");
        assert_eq!(encode(&stepped, &Value::Int(45), &s).unwrap(), "50");
        assert_eq!(quantize(&stepped, 45.0).unwrap(), 50.0);
    }

    #[test]
    fn test_boolean_tokens_are_strict() {
        let attr = Attribute::new("rf_output_on", AttributeDescriptor::boolean("ENBR"));
        let s = settings();
        assert_eq!(encode(&attr, &Value::Bool(true), &s).unwrap(), "1");
        assert_eq!(encode(&attr, &Value::Int(0), &s).unwrap(), "0");
        assert!(matches!(
            encode(&attr, &Value::Int(2), &s),
            Err(AttributeError::InvalidValue { .. })
        ));
        assert_eq!(decode(&attr, "1").unwrap(), Value::Bool(true));
        assert_eq!(decode(&attr, "0").unwrap(), Value::Bool(false));
        for bad in ["ON", "true", " 1", ""] {
            assert_eq!(
                decode(&attr, bad),
                Err(AttributeError::MalformedReply(ReplyError::UnparsableToken {
                    attribute: "rf_output_on".into(),
                    token: bad.into(),
                    expected: "boolean 1/0",
                }))
            );
        }
    }

    #[test]
    fn test_string_framing_rejected() {
        let attr = Attribute::new("label", AttributeDescriptor::string("LABL"));
        let s = settings();
        assert_eq!(encode(&attr, &Value::from("bench 3"), &s).unwrap(), "bench 3");
        assert!(matches!(
            encode(&attr, &Value::from("a,b"), &s),
            Err(AttributeError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(&attr, &Value::from("a\r\nb"), &s),
            Err(AttributeError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(&attr, &Value::Float(1.0), &s),
            Err(AttributeError::InvalidValue { .. })
        ));
        assert_eq!(decode(&attr, " verbatim ").unwrap(), Value::from(" verbatim "));
    }

    #[test]
    fn test_bit_attributes_cannot_be_written() {
        let attr = Attribute::new("overripe", AttributeDescriptor::bit("FLAGS", 0).read_write());
        assert!(matches!(
            encode(&attr, &Value::Bool(true), &settings()),
            Err(AttributeError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_bit_extraction() {
        for n in [0u64, 1, 130, 0xFFFF_FFFF, u64::MAX, 0x8000_0000_0000_0000] {
            for i in 0..64u8 {
                assert_eq!(decode_bit(n, i), (n >> i) & 1 == 1);
            }
        }
        assert!(!decode_bit(u64::MAX, 64));

        let under_ripe = Attribute::new("under-ripe", AttributeDescriptor::bit("FLAGS", 1));
        let chilled = Attribute::new("chilled", AttributeDescriptor::bit("FLAGS", 7));
        assert_eq!(decode(&under_ripe, "130").unwrap(), Value::Bool(true));
        assert_eq!(decode(&chilled, "130").unwrap(), Value::Bool(true));
        assert_eq!(decode(&chilled, "#H7F").unwrap(), Value::Bool(false));
        assert!(matches!(
            decode(&chilled, "x"),
            Err(AttributeError::MalformedReply(ReplyError::UnparsableToken { .. }))
        ));
    }

    #[test]
    fn test_numeric_decode_passes_out_of_range_through() {
        assert_eq!(decode(&power(), "99.5").unwrap(), Value::Float(99.5));
        assert_eq!(decode(&power(), " +2.4E+01\n").unwrap(), Value::Float(24.0));
        assert_eq!(
            decode(&power(), "n/a"),
            Err(AttributeError::MalformedReply(ReplyError::UnparsableToken {
                attribute: "power_dbm".into(),
                token: "n/a".into(),
                expected: "float",
            }))
        );
    }

    #[test]
    fn test_parse_integer_forms() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("+42"), Some(42));
        assert_eq!(parse_integer("-7"), Some(-7));
        assert_eq!(parse_integer("#H1F"), Some(31));
        assert_eq!(parse_integer("#Q17"), Some(15));
        assert_eq!(parse_integer("#B101"), Some(5));
        assert_eq!(parse_integer("+1.30E+02"), Some(130));
        assert_eq!(parse_integer("1.5"), None);
        assert_eq!(parse_integer("#X12"), None);
        assert_eq!(parse_integer("#H"), None);
    }

    #[test]
    fn test_rounding_never_leaves_bounds() {
        let s = settings();
        let level = Attribute::new("level", AttributeDescriptor::float("LEV").bounds(0.0, 16.5).resolution(0.2));
        assert_eq!(encode(&level, &Value::Float(16.5), &s).unwrap(), "16.4");
        assert_eq!(encode(&level, &Value::Float(16.45), &s).unwrap(), "16.4");
        assert_eq!(encode(&level, &Value::Float(0.0), &s).unwrap(), "0.0");
        assert_eq!(quantize(&level, 16.5).unwrap(), 16.4);
        assert_eq!(decode(&level, "16.4").unwrap(), Value::Float(quantize(&level, 16.5).unwrap()));

        let offset = Attribute::new("offset", AttributeDescriptor::float("OFS").bounds(-16.5, 0.0).resolution(0.2));
        assert_eq!(encode(&offset, &Value::Float(-16.5), &s).unwrap(), "-16.4");

        let average = Attribute::new("average", AttributeDescriptor::integer("AVG").bounds(0.0, 45.0).resolution(10.0));
        assert_eq!(encode(&average, &Value::Int(45), &s).unwrap(), "40");
        assert_eq!(encode(&average, &Value::Int(44), &s).unwrap(), "40");

        // No multiple of the resolution lies between the bounds.
        let narrow = Attribute::new("narrow", AttributeDescriptor::float("NAR").bounds(0.05, 0.07).resolution(0.1));
        assert_eq!(
            encode(&narrow, &Value::Float(0.06), &s),
            Err(AttributeError::ValueOutOfRange {
                name: "narrow".into(),
                value: 0.06,
                min: Some(0.05),
                max: Some(0.07),
            })
        );
    }

    #[test]
    fn test_non_numeric_float_tokens_rejected() {
        for token in ["NaN", "nan", "inf", "-infinity", "1e400"] {
            assert!(
                matches!(
                    decode(&power(), token),
                    Err(AttributeError::MalformedReply(ReplyError::UnparsableToken { .. }))
                ),
                "accepted {}",
                token
            );
        }
        assert_eq!(decode(&power(), "9.91E37").unwrap(), Value::Float(9.91e37));
    }

    #[test]
    fn test_wide_radix_values() {
        let count = Attribute::new("count", AttributeDescriptor::integer("CNT"));
        assert!(matches!(
            decode(&count, "#HFFFFFFFFFFFFFFFF"),
            Err(AttributeError::MalformedReply(ReplyError::UnparsableToken { .. }))
        ));
        assert_eq!(decode(&count, "#H7FFFFFFFFFFFFFFF").unwrap(), Value::Int(i64::MAX));

        let top = Attribute::new("top", AttributeDescriptor::bit("STAT", 63));
        assert_eq!(decode(&top, "#HFFFFFFFFFFFFFFFF").unwrap(), Value::Bool(true));
        assert_eq!(decode(&top, "-1").unwrap(), Value::Bool(true));
        assert_eq!(parse_register("#H8000000000000000"), Some(1 << 63));
        assert_eq!(parse_integer("#H8000000000000000"), None);
    }

    #[test]
    fn test_packet_items() {
        let boiled = Attribute::new("boiled", AttributeDescriptor::packet_item("PROCESS", 0));
        let fermented = Attribute::new("fermented", AttributeDescriptor::packet_item("PROCESS", 3));
        assert_eq!(decode(&boiled, "1.5 2 -3.25 4E1").unwrap(), Value::Float(1.5));
        assert_eq!(decode(&fermented, "1.5 2 -3.25 4E1\r\n").unwrap(), Value::Float(40.0));
        assert_eq!(
            decode(&fermented, "1.5 2"),
            Err(AttributeError::MalformedReply(ReplyError::PacketTooShort {
                attribute: "fermented".into(),
                index: 3,
                items: 2,
            }))
        );
        assert!(matches!(
            decode(&boiled, "hot 2"),
            Err(AttributeError::MalformedReply(ReplyError::UnparsableToken { .. }))
        ));
        assert!(matches!(
            encode(&boiled, &Value::Float(1.0), &settings()),
            Err(AttributeError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_block_header() {
        assert_eq!(block_header(b"#15hello"), Some((3, Some(5))));
        assert_eq!(block_header(b"#212abc"), Some((4, Some(12))));
        assert_eq!(block_header(b"#0data"), Some((2, None)));
        assert_eq!(block_header(b"#2"), None);
        assert_eq!(block_header(b"#HFF"), None);
        assert_eq!(block_header(b"12"), None);
    }

    #[test]
    fn test_block_decoding() {
        let trace = Attribute::new("trace", AttributeDescriptor::block("TRAC", BlockDataType::Float32));
        let mut token = b"#18".to_vec();
        token.extend_from_slice(&1.5f32.to_le_bytes());
        token.extend_from_slice(&(-2.0f32).to_le_bytes());
        assert_eq!(
            decode_bytes(&trace, &token).unwrap(),
            Value::List(alloc::vec![Value::Float(1.5), Value::Float(-2.0)])
        );

        let samples = Attribute::new("samples", AttributeDescriptor::block("SAMP", BlockDataType::Int16));
        assert_eq!(
            decode_bytes(&samples, b"#14\xff\xff\x02\x01").unwrap(),
            Value::List(alloc::vec![Value::Int(-1), Value::Int(258)])
        );
        assert_eq!(
            decode_bytes(&samples, b"#0\x01\x00").unwrap(),
            Value::List(alloc::vec![Value::Int(1)])
        );
        assert_eq!(decode_bytes(&samples, b"#10").unwrap(), Value::List(alloc::vec![]));

        assert_eq!(
            decode_bytes(&samples, b"#16\x01\x00"),
            Err(AttributeError::MalformedReply(ReplyError::BlockLength { declared: 6, actual: 2 }))
        );
        assert!(matches!(
            decode_bytes(&samples, b"#13\x01\x00\x00"),
            Err(AttributeError::MalformedReply(ReplyError::UnparsableToken { .. }))
        ));
        assert!(matches!(
            decode_bytes(&samples, b"1,2"),
            Err(AttributeError::MalformedReply(ReplyError::UnparsableToken { .. }))
        ));
        assert!(matches!(
            encode(&samples, &Value::List(alloc::vec![]), &settings()),
            Err(AttributeError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_decode_bytes_requires_utf8_for_text() {
        assert_eq!(
            decode_bytes(&power(), &[0xff, 0xfe]),
            Err(AttributeError::MalformedReply(ReplyError::InvalidUtf8))
        );
        assert_eq!(decode_bytes(&power(), b"-3.5").unwrap(), Value::Float(-3.5));
    }
}
