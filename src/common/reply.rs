// src/common/reply.rs

//! Reply decoding: splits the raw bytes preceding the sentinel into tokens and
//! routes each one through the value codec.
//!
//! Tokens are kept as bytes so IEEE 488.2 block data (`#<n><len><data>`) may
//! carry separators, quotes or sentinel bytes without being split.

use alloc::string::String;
use alloc::vec::Vec;

use super::codec::{self, block_header};
use super::command::ReplySlot;
use super::error::{AttributeError, ReplyError};
use super::schema::AttributeSchema;
use super::value::Value;

/// Raw reply tokens, in message order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedReply {
    tokens: Vec<Vec<u8>>,
}

impl DecodedReply {
    /// Splits `bytes` (sentinel already removed) on `separator`.
    ///
    /// Trailing CR/LF and whitespace are dropped; an empty reply yields no
    /// tokens. Separators inside double-quoted segments or inside block data
    /// do not split.
    pub fn parse(bytes: &[u8], separator: &str) -> Result<Self, ReplyError> {
        let end = bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |last| last + 1);
        if end == 0 {
            return Ok(Self::default());
        }
        Ok(DecodedReply {
            tokens: split_tokens(bytes, end, separator.as_bytes())?,
        })
    }

    pub fn tokens(&self) -> &[Vec<u8>] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Fails unless exactly `expected` tokens are present.
    pub fn expect_count(&self, expected: usize) -> Result<(), ReplyError> {
        if self.tokens.len() != expected {
            return Err(ReplyError::TokenCount {
                expected,
                actual: self.tokens.len(),
            });
        }
        Ok(())
    }
}

/// Splits `bytes[..end]`. A block's data may run into the trimmed tail;
/// it keeps its full declared length.
fn split_tokens(bytes: &[u8], end: usize, sep: &[u8]) -> Result<Vec<Vec<u8>>, ReplyError> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut i = 0;
    while i < end {
        if i == start {
            if let Some((header_len, declared)) = block_header(&bytes[i..]) {
                let data_start = i + header_len;
                let block_end = declared.map_or(bytes.len(), |len| data_start.saturating_add(len));
                if block_end > bytes.len() {
                    return Err(ReplyError::BlockLength {
                        declared: declared.unwrap_or_default(),
                        actual: bytes.len() - data_start,
                    });
                }
                let mut next = block_end;
                while next < end && !bytes[next..end].starts_with(sep) {
                    next += 1;
                }
                // Only whitespace may sit between a block and the next separator.
                if !bytes[block_end..next.max(block_end)].iter().all(u8::is_ascii_whitespace) {
                    return Err(ReplyError::BlockLength {
                        declared: declared.unwrap_or_default(),
                        actual: next - data_start,
                    });
                }
                tokens.push(bytes[i..block_end].to_vec());
                if next >= end {
                    return Ok(tokens);
                }
                i = next + sep.len();
                start = i;
                continue;
            }
        }
        if bytes[i] == b'"' {
            quoted = !quoted;
            i += 1;
        } else if !quoted && !sep.is_empty() && bytes[i..end].starts_with(sep) {
            tokens.push(bytes[start..i].to_vec());
            i += sep.len();
            start = i;
        } else {
            i += 1;
        }
    }
    tokens.push(bytes[start..end].to_vec());
    Ok(tokens)
}

/// Detects the end of a reply as it arrives byte by byte.
///
/// The sentinel ends the reply unless it falls inside the data of a
/// definite-length block.
#[derive(Debug, Clone)]
pub(crate) struct ReplyFramer<'a> {
    separator: &'a [u8],
    token_start: usize,
    quoted: bool,
    header_checked: bool,
    protected_until: usize,
}

impl<'a> ReplyFramer<'a> {
    pub(crate) fn new(separator: &'a [u8]) -> Self {
        ReplyFramer {
            separator,
            token_start: 0,
            quoted: false,
            header_checked: false,
            protected_until: 0,
        }
    }

    /// Call after appending each byte; returns `true` once `buffer` ends in
    /// a sentinel that terminates the reply.
    pub(crate) fn push(&mut self, buffer: &[u8], sentinel: &[u8]) -> bool {
        let len = buffer.len();
        if len == 0 || len <= self.protected_until {
            return false;
        }
        if !self.quoted && !self.header_checked {
            let token = &buffer[self.token_start.min(len)..];
            match block_header(token) {
                Some((header_len, declared)) => {
                    self.header_checked = true;
                    if let Some(declared) = declared {
                        self.protected_until = (self.token_start + header_len).saturating_add(declared);
                    }
                }
                // `#`, one count digit and at most nine length digits.
                None if token.first() != Some(&b'#') || token.len() > 11 => self.header_checked = true,
                None => {}
            }
        }

        if buffer[len - 1] == b'"' {
            self.quoted = !self.quoted;
        } else if !self.quoted
            && !self.separator.is_empty()
            && len >= self.protected_until.saturating_add(self.separator.len())
            && buffer.ends_with(self.separator)
        {
            self.token_start = len;
            self.header_checked = false;
        }

        len >= self.protected_until.saturating_add(sentinel.len()) && buffer.ends_with(sentinel)
    }
}

/// Decodes a reply against the slots of the command that produced it.
///
/// Returns one value per [`ReplySlot::Value`], in order; acknowledgement
/// tokens are consumed and dropped. Nothing is returned unless every token
/// decodes.
pub fn decode_reply(schema: &AttributeSchema, slots: &[ReplySlot], bytes: &[u8]) -> Result<Vec<Value>, AttributeError> {
    let reply = DecodedReply::parse(bytes, schema.settings().reply_separator())?;
    reply.expect_count(slots.len())?;

    let mut values = Vec::with_capacity(slots.len());
    for (slot, token) in slots.iter().zip(reply.tokens()) {
        match slot {
            ReplySlot::Value(name) => {
                let attribute = schema.resolve(name)?;
                values.push(codec::decode_bytes(attribute, token)?);
            }
            ReplySlot::Ack(name) => {
                tracing::trace!(attribute = %name, token = %String::from_utf8_lossy(token), "write acknowledged");
            }
        }
    }
    Ok(values)
}
