// src/common/command.rs

//! Command compiler: turns attribute operations into one wire message.
//!
//! A read compiles to `FIELD` followed by the schema's query suffix, a write to
//! `FIELD<value_separator>TOKEN`, an invocation to `FIELD` alone. Several units
//! are joined with the argument separator when the device supports chaining.
//! The framing sentinel is not part of the compiled message; the session
//! appends it when sending.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use super::codec;
use super::error::AttributeError;
use super::schema::{AccessKind, AttributeSchema, ValueKind};
use super::value::Value;

/// One requested attribute operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Query the attribute's current value.
    Read(String),
    /// Write a new value.
    Write(String, Value),
    /// Invoke an argument-less command attribute.
    Invoke(String),
}

impl Operation {
    pub fn read(name: impl Into<String>) -> Self {
        Operation::Read(name.into())
    }

    pub fn write(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Operation::Write(name.into(), value.into())
    }

    pub fn invoke(name: impl Into<String>) -> Self {
        Operation::Invoke(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Operation::Read(name) | Operation::Write(name, _) | Operation::Invoke(name) => name,
        }
    }

    pub fn kind(&self) -> AccessKind {
        match self {
            Operation::Read(_) => AccessKind::Read,
            Operation::Write(..) | Operation::Invoke(_) => AccessKind::Write,
        }
    }
}

/// An ordered batch of reads, writes and invocations, executed as one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeRequest {
    operations: Vec<Operation>,
}

impl AttributeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>) -> Self {
        self.operations.push(Operation::read(name));
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations.push(Operation::write(name, value));
        self
    }

    pub fn invoke(mut self, name: impl Into<String>) -> Self {
        self.operations.push(Operation::invoke(name));
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

impl From<Vec<Operation>> for AttributeRequest {
    fn from(operations: Vec<Operation>) -> Self {
        AttributeRequest { operations }
    }
}

/// One field (plus argument) of a wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireUnit {
    Query { field: String },
    Write { field: String, token: String },
    Invoke { field: String },
}

impl WireUnit {
    pub fn field(&self) -> &str {
        match self {
            WireUnit::Query { field } | WireUnit::Write { field, .. } | WireUnit::Invoke { field } => field,
        }
    }
}

/// A token the reply is expected to contain, in message order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySlot {
    /// Value of a read attribute.
    Value(String),
    /// Status token acknowledging a write to this attribute.
    Ack(String),
}

impl ReplySlot {
    pub fn attribute(&self) -> &str {
        match self {
            ReplySlot::Value(name) | ReplySlot::Ack(name) => name,
        }
    }
}

/// A compiled outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCommand {
    units: Vec<WireUnit>,
    slots: Vec<ReplySlot>,
    message: String,
}

impl WireCommand {
    pub fn units(&self) -> &[WireUnit] {
        &self.units
    }

    pub fn reply_slots(&self) -> &[ReplySlot] {
        &self.slots
    }

    /// Whether the device will answer this message at all.
    pub fn expects_reply(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.message
    }

    /// Message bytes, without the framing sentinel.
    pub fn as_bytes(&self) -> &[u8] {
        self.message.as_bytes()
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Compiles `operations` into a single message.
///
/// Every operation is resolved, access-checked and encoded before the batch
/// shape is checked, so a bad value is always reported as such.
pub fn compile(schema: &AttributeSchema, operations: &[Operation]) -> Result<WireCommand, AttributeError> {
    if operations.is_empty() {
        return Err(AttributeError::EmptyRequest);
    }
    let settings = schema.settings();

    let mut units = Vec::with_capacity(operations.len());
    let mut slots = Vec::new();
    for operation in operations {
        let name = operation.name();
        let attribute = schema.resolve_for(name, operation.kind())?;
        let descriptor = attribute.descriptor();
        let field = String::from(descriptor.field());
        match operation {
            Operation::Read(_) => {
                units.push(WireUnit::Query { field });
                slots.push(ReplySlot::Value(String::from(name)));
            }
            Operation::Write(_, value) => {
                let token = codec::encode(attribute, value, settings)?;
                units.push(WireUnit::Write { field, token });
                if descriptor.writes_acknowledged() {
                    slots.push(ReplySlot::Ack(String::from(name)));
                }
            }
            Operation::Invoke(_) => {
                if *descriptor.kind() != ValueKind::Command {
                    return Err(AttributeError::UnsupportedOperation {
                        name: String::from(name),
                        reason: "only command attributes can be invoked",
                    });
                }
                units.push(WireUnit::Invoke { field });
                if descriptor.writes_acknowledged() {
                    slots.push(ReplySlot::Ack(String::from(name)));
                }
            }
        }
    }

    if operations.len() > 1 {
        if !settings.supports_chains {
            return Err(AttributeError::ChainingUnsupported {
                requested: operations.len(),
            });
        }
        let reads = operations.iter().any(|op| op.kind() == AccessKind::Read);
        let writes = operations.iter().any(|op| op.kind() == AccessKind::Write);
        if reads && writes && !settings.allow_mixed_batches {
            return Err(AttributeError::MixedBatchUnsupported);
        }
    }

    let mut message = String::new();
    for (i, unit) in units.iter().enumerate() {
        if i > 0 {
            message.push_str(&settings.argument_separator);
        }
        match unit {
            WireUnit::Query { field } => {
                message.push_str(field);
                message.push_str(&settings.query_suffix);
            }
            WireUnit::Write { field, token } => {
                message.push_str(field);
                message.push_str(&settings.value_separator);
                message.push_str(token);
            }
            WireUnit::Invoke { field } => message.push_str(field),
        }
    }

    tracing::trace!(message = %message, replies = slots.len(), "compiled wire command");

    Ok(WireCommand { units, slots, message })
}
