// src/common/mod.rs

// --- Declare all public modules within common ---
pub mod codec;
pub mod command;
pub mod error;
pub mod hal_traits;
pub mod reply;
pub mod schema;
pub mod timing;
pub mod value;

// --- Re-export key types/traits/functions for easier access ---

pub use codec::{decode, decode_bit, decode_bytes, encode, quantize};
pub use command::{compile, AttributeRequest, Operation, ReplySlot, WireCommand, WireUnit};
pub use error::{AttributeError, ReplyError, ScpiError};
pub use hal_traits::{ScpiInstant, ScpiTimer, ScpiTransport};
pub use reply::{decode_reply, DecodedReply};
pub use schema::{
    Access, AccessKind, Attribute, AttributeDescriptor, AttributeInfo, AttributeSchema, BlockDataType,
    DeviceSettings, NumericSpec, SchemaBuilder, ValueKind, ValueType,
};
pub use value::Value;
