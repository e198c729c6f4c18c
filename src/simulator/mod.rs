// src/simulator/mod.rs

//! In-memory SCPI instrument driven by an [`AttributeSchema`].
//!
//! The simulator implements the transport and timer traits itself, so an
//! [`AttributeSession`](crate::session::AttributeSession) can run against it
//! without hardware. Time is simulated: delays advance an internal clock.

pub mod parser;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::convert::Infallible;
use core::time::Duration;

use crate::common::{
    codec,
    error::AttributeError,
    hal_traits::{ScpiTimer, ScpiTransport},
    schema::{AttributeSchema, BlockDataType, ValueKind},
    value::Value,
};
use parser::{parse_message, ParsedUnit};

/// Token sent for writes and invocations on acknowledging attributes.
pub const ACK_TOKEN: &str = "OK";

/// Microseconds since the simulator was created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SimulatedInstant(u64);

impl SimulatedInstant {
    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

impl core::ops::Add<Duration> for SimulatedInstant {
    type Output = Self;
    fn add(self, rhs: Duration) -> Self {
        SimulatedInstant(self.0.saturating_add(rhs.as_micros() as u64))
    }
}

impl core::ops::Sub<SimulatedInstant> for SimulatedInstant {
    type Output = Duration;
    fn sub(self, rhs: SimulatedInstant) -> Duration {
        Duration::from_micros(self.0.saturating_sub(rhs.0))
    }
}

#[derive(Debug)]
pub struct ScpiSimulator {
    schema: Arc<AttributeSchema>,
    // Raw token last written to each field.
    fields: BTreeMap<String, Vec<u8>>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    received: Vec<String>,
    invoked: Vec<String>,
    responsive: bool,
    clock: SimulatedInstant,
}

impl ScpiSimulator {
    pub fn new(schema: impl Into<Arc<AttributeSchema>>) -> Self {
        ScpiSimulator {
            schema: schema.into(),
            fields: BTreeMap::new(),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            received: Vec::new(),
            invoked: Vec::new(),
            responsive: true,
            clock: SimulatedInstant::default(),
        }
    }

    /// Seeds an attribute's value as the instrument would report it.
    ///
    /// Bit attributes set or clear their bit in the shared register; packet
    /// items replace their element of the shared packet.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<Value>) -> Result<(), AttributeError> {
        let value = value.into();
        let attribute = self.schema.resolve(name)?;
        let field = String::from(attribute.descriptor().field());
        let expected = |what: &str| AttributeError::InvalidValue {
            name: String::from(name),
            reason: alloc::format!("expected {}, got {}", what, value.type_name()),
        };
        match attribute.descriptor().kind() {
            ValueKind::Bit { bit_index } => {
                let on = value.as_bool().ok_or_else(|| expected("boolean"))?;
                let register = self
                    .field_text(&field)
                    .and_then(codec::parse_register)
                    .unwrap_or(0);
                let mask = 1u64 << bit_index;
                let register = if on { register | mask } else { register & !mask };
                self.fields.insert(field, alloc::format!("{}", register).into_bytes());
            }
            ValueKind::PacketItem { index } => {
                let item = value.as_f64().ok_or_else(|| expected("number"))?;
                let mut packet: Vec<String> = self
                    .field_text(&field)
                    .map(|text| text.split(' ').map(String::from).collect())
                    .unwrap_or_default();
                if packet.len() <= *index {
                    packet.resize(*index + 1, String::from("0"));
                }
                packet[*index] = alloc::format!("{}", item);
                self.fields.insert(field, packet.join(" ").into_bytes());
            }
            ValueKind::Block(data_type) => {
                let items = value.as_list().ok_or_else(|| expected("list"))?;
                let token = block_token(name, *data_type, items)?;
                self.fields.insert(field, token);
            }
            ValueKind::Command => {
                return Err(AttributeError::UnsupportedOperation {
                    name: String::from(name),
                    reason: "commands hold no value",
                });
            }
            _ => {
                let token = codec::encode(attribute, &value, self.schema.settings())?;
                self.fields.insert(field, token.into_bytes());
            }
        }
        Ok(())
    }

    /// Current value of an attribute, or `None` if its field was never set.
    pub fn attribute(&self, name: &str) -> Result<Option<Value>, AttributeError> {
        let attribute = self.schema.resolve(name)?;
        match self.fields.get(attribute.descriptor().field()) {
            Some(token) => codec::decode_bytes(attribute, token).map(Some),
            None => Ok(None),
        }
    }

    fn field_text(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|token| core::str::from_utf8(token).ok())
    }

    /// A silent simulator swallows messages and never replies.
    pub fn set_responsive(&mut self, responsive: bool) {
        self.responsive = responsive;
    }

    /// Messages received so far, sentinel removed.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// Names of the command attributes invoked so far.
    pub fn invocations(&self) -> &[String] {
        &self.invoked
    }

    pub fn schema(&self) -> &Arc<AttributeSchema> {
        &self.schema
    }

    pub fn elapsed(&self) -> Duration {
        self.clock - SimulatedInstant::default()
    }

    fn handle_message(&mut self, raw: &[u8]) {
        let schema = self.schema.clone();
        let settings = schema.settings();

        let Ok(text) = core::str::from_utf8(raw) else {
            tracing::warn!(bytes = raw.len(), "simulator dropped non-UTF-8 message");
            return;
        };
        self.received.push(String::from(text));
        if !self.responsive {
            return;
        }
        let units = match parse_message(text, settings) {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!(message = %text, error = %e, "simulator dropped message");
                return;
            }
        };

        let mut tokens: Vec<Vec<u8>> = Vec::new();
        let mut reply_due = false;
        for unit in units {
            match unit {
                ParsedUnit::Query(field) => {
                    reply_due = true;
                    tokens.extend(self.read_field(field));
                }
                ParsedUnit::Bare(field) => {
                    let command = schema
                        .attributes_for_field(field)
                        .find(|a| *a.descriptor().kind() == ValueKind::Command);
                    if let Some(command) = command {
                        self.invoked.push(String::from(command.name()));
                        if command.descriptor().writes_acknowledged() {
                            reply_due = true;
                            tokens.push(ACK_TOKEN.as_bytes().to_vec());
                        }
                    } else if settings.query_suffix.is_empty() {
                        reply_due = true;
                        tokens.extend(self.read_field(field));
                    }
                }
                ParsedUnit::Write { field, argument } => {
                    if !schema.attributes_for_field(field).any(|a| a.descriptor().access_mode().can_write()) {
                        tracing::debug!(field = %field, "simulator ignored write to unknown field");
                        continue;
                    }
                    self.fields.insert(String::from(field), argument.as_bytes().to_vec());
                    if schema.attributes_for_field(field).any(|a| a.descriptor().writes_acknowledged()) {
                        reply_due = true;
                        tokens.push(ACK_TOKEN.as_bytes().to_vec());
                    }
                }
            }
        }

        if reply_due {
            let reply = tokens.join(settings.reply_separator().as_bytes());
            tracing::trace!(bytes = reply.len(), "simulator reply");
            self.outbound.extend(reply);
            self.outbound.extend(settings.sentinel.iter().copied());
        }
    }

    fn read_field(&self, field: &str) -> Option<Vec<u8>> {
        if let Some(token) = self.fields.get(field) {
            return Some(token.clone());
        }
        // Status registers read as zero until a bit is set.
        self.schema
            .attributes_for_field(field)
            .any(|a| matches!(a.descriptor().kind(), ValueKind::Bit { .. }))
            .then(|| b"0".to_vec())
    }
}

/// Renders `items` as a definite-length block (`#<n><len><data>`).
fn block_token(name: &str, data_type: BlockDataType, items: &[Value]) -> Result<Vec<u8>, AttributeError> {
    let mut data = Vec::with_capacity(items.len() * data_type.size());
    for item in items {
        let out_of_type = || AttributeError::InvalidValue {
            name: String::from(name),
            reason: alloc::format!("{} does not fit a {} element", item, data_type),
        };
        if data_type.is_float() {
            let v = item.as_f64().ok_or_else(out_of_type)?;
            match data_type {
                BlockDataType::Float32 => data.extend_from_slice(&(v as f32).to_le_bytes()),
                _ => data.extend_from_slice(&v.to_le_bytes()),
            }
            continue;
        }
        let v = item.as_i64().ok_or_else(out_of_type)?;
        match data_type {
            BlockDataType::Int8 => data.extend_from_slice(&i8::try_from(v).map_err(|_| out_of_type())?.to_le_bytes()),
            BlockDataType::Uint8 => data.extend_from_slice(&u8::try_from(v).map_err(|_| out_of_type())?.to_le_bytes()),
            BlockDataType::Int16 => data.extend_from_slice(&i16::try_from(v).map_err(|_| out_of_type())?.to_le_bytes()),
            BlockDataType::Uint16 => data.extend_from_slice(&u16::try_from(v).map_err(|_| out_of_type())?.to_le_bytes()),
            BlockDataType::Int32 => data.extend_from_slice(&i32::try_from(v).map_err(|_| out_of_type())?.to_le_bytes()),
            BlockDataType::Uint32 => data.extend_from_slice(&u32::try_from(v).map_err(|_| out_of_type())?.to_le_bytes()),
            BlockDataType::Int64 => data.extend_from_slice(&v.to_le_bytes()),
            BlockDataType::Uint64 => data.extend_from_slice(&u64::try_from(v).map_err(|_| out_of_type())?.to_le_bytes()),
            BlockDataType::Float32 | BlockDataType::Float64 => {}
        }
    }
    let len = alloc::format!("{}", data.len());
    let mut token = alloc::format!("#{}{}", len.len(), len).into_bytes();
    token.extend_from_slice(&data);
    Ok(token)
}

impl ScpiTransport for ScpiSimulator {
    type Error = Infallible;

    fn read_byte(&mut self) -> nb::Result<u8, Infallible> {
        self.outbound.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), Infallible> {
        self.inbound.push(byte);
        let sentinel_len = self.schema.settings().sentinel.len();
        if self.inbound.ends_with(&self.schema.settings().sentinel) {
            let mut message = core::mem::take(&mut self.inbound);
            message.truncate(message.len() - sentinel_len);
            self.handle_message(&message);
        }
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}

impl ScpiTimer for ScpiSimulator {
    type Instant = SimulatedInstant;

    fn now(&self) -> SimulatedInstant {
        self.clock
    }

    fn delay_us(&mut self, us: u32) {
        self.clock = self.clock + Duration::from_micros(us as u64);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock = self.clock + Duration::from_millis(ms as u64);
    }
}
