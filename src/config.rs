// src/config.rs

//! Interface definitions as stored in configuration files.
//!
//! Each attribute is declared under a `read`, `write` or `read_write` key:
//!
//! ```json
//! {
//!   "model": "TSG4104A",
//!   "supports_chains": true,
//!   "poll_rate": 0.1,
//!   "timeout": 0.5,
//!   "sentinel_string": "\r\n",
//!   "argument_separator": ",",
//!   "attributes": {
//!     "frequency": {"read_write": {"field": "FREQ", "field_type": "float",
//!                   "min_value": 950000, "max_value": 4000000000,
//!                   "absolute_resolution": 0.0001}},
//!     "locked": {"read": {"field": "STAT", "field_type": "bit", "bit": 3}},
//!     "temperature": {"read": {"field": "SENS", "field_type": "packet_item", "packet_item": 1}},
//!     "trace": {"read": {"field": "TRAC", "field_type": "arbitrary_block",
//!               "block_data_type": "float32"}},
//!     "reset": {"write": {"field": "*RST"}}
//!   }
//! }
//! ```
//!
//! An attribute without `field_type` is a command. Durations are seconds.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{
    error::AttributeError,
    schema::{Access, AttributeDescriptor, AttributeSchema, BlockDataType, DeviceSettings, NumericSpec, ValueKind},
    timing,
    value::Value,
};

/// Top-level interface definition for one instrument model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDefinition {
    pub model: String,
    #[serde(default)]
    pub supports_chains: bool,
    /// Seconds between polls.
    #[serde(default = "default_poll_rate")]
    pub poll_rate: f64,
    /// Reply timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_sentinel")]
    pub sentinel_string: String,
    #[serde(default = "default_argument_separator")]
    pub argument_separator: String,
    #[serde(default)]
    pub value_separator: Option<String>,
    #[serde(default)]
    pub reply_separator: Option<String>,
    #[serde(default)]
    pub query_suffix: Option<String>,
    #[serde(default)]
    pub allow_mixed_batches: Option<bool>,
    #[serde(default)]
    pub max_reply_len: Option<usize>,
    /// Whether the device answers every write with a status token.
    /// Attributes may override it with `acknowledges_write`.
    #[serde(default)]
    pub return_response: bool,
    pub attributes: BTreeMap<String, AttributeAccessDefinition>,
}

/// The access keys of one attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeAccessDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<AttributeDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<AttributeDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_write: Option<AttributeDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub field: String,
    /// `str`, `float`, `int`, `bool`, `bit`, `packet_item` or
    /// `arbitrary_block`; absent for commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_resolution: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit: Option<u8>,
    /// Element index of a `packet_item` attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_item: Option<usize>,
    /// Element type of an `arbitrary_block` attribute, e.g. `uint16` or `float32`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledges_write: Option<bool>,
    /// Initial value, used to seed simulators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

fn default_poll_rate() -> f64 {
    timing::DEFAULT_POLL_RATE.as_secs_f64()
}

fn default_timeout() -> f64 {
    timing::DEFAULT_TIMEOUT.as_secs_f64()
}

fn default_sentinel() -> String {
    String::from("\r\n")
}

fn default_argument_separator() -> String {
    String::from(";")
}

impl AttributeAccessDefinition {
    /// Collapses the access keys into one definition and its access mode.
    fn resolve(&self, name: &str) -> Result<(&AttributeDefinition, Access), AttributeError> {
        match (&self.read, &self.write, &self.read_write) {
            (None, None, Some(def)) => Ok((def, Access::ReadWrite)),
            (Some(def), None, None) => Ok((def, Access::ReadOnly)),
            (None, Some(def), None) => Ok((def, Access::WriteOnly)),
            (Some(read), Some(write), None) => {
                if read.field != write.field || read.field_type != write.field_type {
                    return Err(invalid(format!(
                        "attribute '{}' declares different read and write fields",
                        name
                    )));
                }
                Ok((read, Access::ReadWrite))
            }
            (None, None, None) => Err(invalid(format!("attribute '{}' declares no access", name))),
            _ => Err(invalid(format!(
                "attribute '{}' mixes read_write with read or write",
                name
            ))),
        }
    }
}

impl AttributeDefinition {
    fn kind(&self, name: &str) -> Result<ValueKind, AttributeError> {
        let numeric = NumericSpec {
            min: self.min_value,
            max: self.max_value,
            resolution: self.absolute_resolution,
        };
        let field_type = self.field_type.as_deref();
        if self.bit.is_some() && field_type != Some("bit") {
            return Err(invalid(format!("non-bit attribute '{}' declares a bit index", name)));
        }
        if self.packet_item.is_some() && field_type != Some("packet_item") {
            return Err(invalid(format!("attribute '{}' declares a packet item but is not one", name)));
        }
        if self.block_data_type.is_some() && field_type != Some("arbitrary_block") {
            return Err(invalid(format!("attribute '{}' declares a block data type but is not a block", name)));
        }
        let kind = match field_type {
            Some("bit") => {
                let bit_index = self
                    .bit
                    .ok_or_else(|| invalid(format!("bit attribute '{}' has no bit index", name)))?;
                ValueKind::Bit { bit_index }
            }
            Some("packet_item") => {
                let index = self
                    .packet_item
                    .ok_or_else(|| invalid(format!("packet attribute '{}' has no item index", name)))?;
                ValueKind::PacketItem { index }
            }
            Some("arbitrary_block") => {
                let data_type = self
                    .block_data_type
                    .as_deref()
                    .ok_or_else(|| invalid(format!("block attribute '{}' has no block_data_type", name)))?;
                let data_type = BlockDataType::from_name(data_type).ok_or_else(|| {
                    invalid(format!(
                        "block attribute '{}' has unsupported data type '{}'",
                        name, data_type
                    ))
                })?;
                ValueKind::Block(data_type)
            }
            None => ValueKind::Command,
            Some("str") | Some("string") => ValueKind::String,
            Some("float") => ValueKind::Float(numeric),
            Some("int") | Some("integer") => ValueKind::Integer(numeric),
            Some("bool") | Some("boolean") => ValueKind::Boolean,
            Some(other) => {
                return Err(invalid(format!(
                    "attribute '{}' has unsupported field type '{}'",
                    name, other
                )))
            }
        };
        Ok(kind)
    }
}

impl InterfaceDefinition {
    /// Device settings with defaults filled in.
    pub fn settings(&self) -> Result<DeviceSettings, AttributeError> {
        let defaults = DeviceSettings::default();
        Ok(DeviceSettings {
            poll_rate: seconds("poll_rate", self.poll_rate)?,
            timeout: seconds("timeout", self.timeout)?,
            supports_chains: self.supports_chains,
            sentinel: self.sentinel_string.clone().into_bytes(),
            argument_separator: self.argument_separator.clone(),
            value_separator: self.value_separator.clone().unwrap_or(defaults.value_separator),
            reply_separator: self.reply_separator.clone(),
            query_suffix: self.query_suffix.clone().unwrap_or(defaults.query_suffix),
            allow_mixed_batches: self.allow_mixed_batches.unwrap_or(defaults.allow_mixed_batches),
            max_reply_len: self.max_reply_len.unwrap_or(defaults.max_reply_len),
        })
    }

    /// Initial values declared in the definition, in attribute name order.
    pub fn initial_values(&self) -> Vec<(&str, &Value)> {
        self.attributes
            .iter()
            .filter_map(|(name, access)| {
                let def = access.read_write.as_ref().or(access.read.as_ref()).or(access.write.as_ref())?;
                def.value.as_ref().map(|value| (name.as_str(), value))
            })
            .collect()
    }
}

impl TryFrom<&InterfaceDefinition> for AttributeSchema {
    type Error = AttributeError;

    fn try_from(definition: &InterfaceDefinition) -> Result<Self, Self::Error> {
        let mut builder = AttributeSchema::builder(definition.model.clone()).settings(definition.settings()?);

        for (name, access) in &definition.attributes {
            let (def, mode) = access.resolve(name)?;
            let acknowledges = def
                .acknowledges_write
                .unwrap_or(definition.return_response && mode.can_write());
            let mut descriptor = AttributeDescriptor::new(def.field.clone(), def.kind(name)?, mode)
                .acknowledges_write(acknowledges);
            if let Some(unit) = &def.unit {
                descriptor = descriptor.unit(unit.clone());
            }
            builder = builder.attribute(name.clone(), descriptor);
        }

        builder.build()
    }
}

impl TryFrom<InterfaceDefinition> for AttributeSchema {
    type Error = AttributeError;

    fn try_from(definition: InterfaceDefinition) -> Result<Self, Self::Error> {
        AttributeSchema::try_from(&definition)
    }
}

fn seconds(what: &str, secs: f64) -> Result<Duration, AttributeError> {
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(format!("{} must be a non-negative number of seconds", what)))
}

fn invalid(msg: String) -> AttributeError {
    AttributeError::InvalidSchema(msg)
}
