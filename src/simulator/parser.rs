// src/simulator/parser.rs

use crate::common::schema::DeviceSettings;
use alloc::vec::Vec;

/// One unit of an inbound message, borrowed from the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedUnit<'a> {
    /// `FIELD` followed by the query suffix (only when the suffix is non-empty).
    Query(&'a str),
    /// `FIELD` alone: a query when the dialect has no query suffix, or a
    /// command invocation.
    Bare(&'a str),
    /// `FIELD<value_separator>ARGUMENT`.
    Write { field: &'a str, argument: &'a str },
}

impl<'a> ParsedUnit<'a> {
    pub fn field(&self) -> &'a str {
        match *self {
            ParsedUnit::Query(field) | ParsedUnit::Bare(field) => field,
            ParsedUnit::Write { field, .. } => field,
        }
    }
}

/// Reasons an inbound message is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MessageParseError {
    #[error("message is empty")]
    Empty,
    #[error("unit {position} has no field")]
    EmptyUnit { position: usize },
}

/// Parses a message (sentinel already removed) into its units.
///
/// Units are split on the argument separator outside double quotes. The
/// first value separator in a unit divides field from argument, so string
/// arguments may contain it.
pub fn parse_message<'a>(message: &'a str, settings: &DeviceSettings) -> Result<Vec<ParsedUnit<'a>>, MessageParseError> {
    if message.trim().is_empty() {
        return Err(MessageParseError::Empty);
    }

    let mut units = Vec::new();
    for (position, raw) in split_units(message, &settings.argument_separator).into_iter().enumerate() {
        let unit = match raw.split_once(settings.value_separator.as_str()) {
            Some((field, argument)) => ParsedUnit::Write { field, argument },
            None => {
                let suffix = settings.query_suffix.as_str();
                match raw.strip_suffix(suffix) {
                    Some(field) if !suffix.is_empty() => ParsedUnit::Query(field),
                    _ => ParsedUnit::Bare(raw),
                }
            }
        };
        if unit.field().is_empty() {
            return Err(MessageParseError::EmptyUnit { position });
        }
        units.push(unit);
    }
    Ok(units)
}

fn split_units<'a>(message: &'a str, separator: &str) -> Vec<&'a str> {
    let bytes = message.as_bytes();
    let sep = separator.as_bytes();
    let mut units = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            quoted = !quoted;
            i += 1;
        } else if !quoted && !sep.is_empty() && bytes[i..].starts_with(sep) {
            units.push(&message[start..i]);
            i += sep.len();
            start = i;
        } else {
            i += 1;
        }
    }
    units.push(&message[start..]);
    units
}
