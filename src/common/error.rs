// src/common/error.rs

use alloc::string::String;

use super::schema::AccessKind;

/// Errors raised by the attribute engine itself: schema lookups, value
/// validation, command compilation and reply decoding.
///
/// None of these involve the transport, so they carry no I/O error type and
/// can be produced (and tested) without an interface.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributeError {
    /// The schema has no attribute with this name.
    #[error("unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    /// The descriptor does not permit the requested direction.
    #[error("attribute '{name}' does not permit {operation}")]
    AccessViolation { name: String, operation: AccessKind },

    /// The operation is not defined for this value type (e.g. writing a bit view).
    #[error("attribute '{name}': {reason}")]
    UnsupportedOperation { name: String, reason: &'static str },

    /// Numeric value outside the declared inclusive bounds.
    #[error("value {value} for attribute '{name}' is outside [{min:?}, {max:?}]")]
    ValueOutOfRange {
        name: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    /// The value cannot be encoded (wrong type, non-finite, or would corrupt framing).
    #[error("invalid value for attribute '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    /// More than one operation was requested from a device that cannot chain.
    #[error("device cannot chain commands ({requested} operations requested)")]
    ChainingUnsupported { requested: usize },

    /// Reads and writes were mixed in one message on a dialect that forbids it.
    #[error("device cannot mix reads and writes in one message")]
    MixedBatchUnsupported,

    /// Nothing to compile.
    #[error("request contains no operations")]
    EmptyRequest,

    /// The instrument reply could not be decoded.
    #[error("malformed reply: {0}")]
    MalformedReply(#[from] ReplyError),

    /// Schema construction found an inconsistent declaration.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// Details of a reply that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// Reply split into a different number of tokens than attributes requested.
    #[error("expected={expected}, actual={actual}")]
    TokenCount { expected: usize, actual: usize },

    /// A token could not be parsed as the attribute's value type.
    #[error("attribute '{attribute}' expected {expected}, got {token:?}")]
    UnparsableToken {
        attribute: String,
        token: String,
        expected: &'static str,
    },

    /// Reply bytes are not valid UTF-8.
    #[error("reply is not valid UTF-8")]
    InvalidUtf8,

    /// A packet had no element at the attribute's index.
    #[error("attribute '{attribute}' reads packet item {index}, packet has {items}")]
    PacketTooShort {
        attribute: String,
        index: usize,
        items: usize,
    },

    /// Block data shorter or longer than its `#<n><len>` header declares.
    #[error("block declares {declared} data bytes, got {actual}")]
    BlockLength { declared: usize, actual: usize },
}

/// Errors surfaced by an [`AttributeSession`](crate::session::AttributeSession).
///
/// `E` is the transport's own error type; it is propagated untouched.
#[derive(Debug, thiserror::Error)]
pub enum ScpiError<E = ()>
where
    E: core::fmt::Debug,
{
    /// Validation, compilation or decoding failure.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// No complete reply arrived within the schema timeout.
    #[error("operation timed out")]
    Timeout,

    /// The call was aborted through its cancel handle.
    #[error("operation cancelled")]
    Cancelled,

    /// Reply exceeded the configured maximum length before the sentinel arrived.
    #[error("reply exceeded {limit} bytes without a sentinel")]
    BufferOverflow { limit: usize },

    /// Underlying I/O error from the transport.
    #[error("I/O error: {0:?}")]
    Io(E),
}

impl<E: core::fmt::Debug> ScpiError<E> {
    /// Returns the engine error, if this is one.
    pub fn as_attribute(&self) -> Option<&AttributeError> {
        match self {
            ScpiError::Attribute(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: core::fmt::Debug> From<ReplyError> for ScpiError<E> {
    fn from(e: ReplyError) -> Self {
        ScpiError::Attribute(AttributeError::MalformedReply(e))
    }
}
