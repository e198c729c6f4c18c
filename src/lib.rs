// src/lib.rs

//! Schema-driven SCPI attribute engine.
//!
//! Attributes of a piece of test equipment are declared in an
//! [`AttributeSchema`]; an [`AttributeSession`] compiles reads and writes of
//! those attributes into SCPI-style wire messages, validates values before
//! anything is sent, and decodes the instrument's replies into typed
//! [`Value`]s.

#![no_std] // Specify no_std at the crate root

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod common;
pub mod session;
pub mod simulator;

#[cfg(feature = "serde")]
pub mod config;

#[cfg(feature = "std")]
pub mod std_io;

// Re-export key types for convenience
pub use common::{
    AccessKind, Access, AttributeDescriptor, AttributeError, AttributeRequest, AttributeSchema, BlockDataType, Operation,
    ReplyError, ScpiError, ScpiTimer, ScpiTransport, Value, ValueKind,
};
pub use session::{AttributeSession, CallState, CancelHandle, ChainPolicy};
pub use simulator::ScpiSimulator;

#[cfg(feature = "serde")]
pub use config::InterfaceDefinition;

#[cfg(feature = "std")]
pub use std_io::StreamInterface;
