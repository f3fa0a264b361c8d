use super::session::ConnectionState;
use std::fmt;
use std::result::Result as StdResult;
use thiserror::Error as ThisError;

/// Unified S7 result type
pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timeout")]
    ErrConnectTimeout,

    #[error("request timeout")]
    ErrRequestTimeout,

    #[error("invalid frame")]
    ErrInvalidFrame,

    #[error("unexpected PDU or function")]
    ErrUnexpectedPdu,

    #[error("can not use closed connection")]
    ErrUseClosedConnection,

    #[error("session is not active")]
    ErrNotActive,

    #[error("invalid configuration for: {0}")]
    InvalidConfiguration(&'static str),

    /// Malformed bytes that are not a protocol contract breach
    #[error("decode error: {context}")]
    Decode { context: &'static str },

    #[error("encode error: {context}")]
    Encode { context: &'static str },

    /// Typed value does not fit the tag it is written to.
    #[error("value mismatch for {tag}: {reason}")]
    ValueMismatch { tag: String, reason: String },

    /// Protocol contract violated. Fails the whole logical operation.
    #[error("protocol violation: {context}")]
    ProtocolViolation { context: &'static str },

    /// Response item count differs from the request item count.
    #[error("response carries {actual} items, request had {expected}")]
    ItemCountMismatch { expected: usize, actual: usize },

    #[error("insufficient data: needed {needed} bytes, available {available} bytes")]
    InsufficientData { needed: usize, available: usize },

    /// The same tag name appears twice in one request.
    #[error("duplicate tag name: {0}")]
    DuplicateTagName(String),

    #[error("unsupported feature: {feature}")]
    UnsupportedFeature { feature: &'static str },

    /// Header-level error class/code reported by the device outside of a
    /// read/write exchange (setup, identify).
    #[allow(clippy::enum_variant_names)]
    #[error("S7 error: {0}")]
    S7Error(S7HeaderError),

    /// Connection handshake did not complete.
    #[error("handshake failed while {state:?}: {source}")]
    Handshake {
        state: ConnectionState,
        #[source]
        source: Box<Error>,
    },

    #[error("Rack value {0} is out of range (0..=7)")]
    InvalidRack(u8),

    #[error("Slot value {0} is out of range (0..=31)")]
    InvalidSlot(u8),
}

impl Error {
    /// Errors after which the connection can not be used any more.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ErrUseClosedConnection
                | Error::ErrConnectTimeout
                | Error::Handshake { .. }
        )
    }
}

/// Error class/code pair carried by Ack and AckData headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct S7HeaderError {
    pub class: u8,
    pub code: u8,
}

impl S7HeaderError {
    pub const NONE: S7HeaderError = S7HeaderError::new(0x00, 0x00);
    /// Function not enabled on the device, typically PUT/GET access switched off.
    pub const FEATURE_NOT_ENABLED: S7HeaderError = S7HeaderError::new(0x81, 0x04);
    /// Request or response would exceed the negotiated PDU length.
    pub const PDU_SIZE_EXCEEDED: S7HeaderError = S7HeaderError::new(0x85, 0x00);

    pub const fn new(class: u8, code: u8) -> Self {
        Self { class, code }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.class == 0 && self.code == 0
    }

    #[inline]
    pub fn as_u16(&self) -> u16 {
        u16::from_be_bytes([self.class, self.code])
    }
}

impl From<u16> for S7HeaderError {
    fn from(value: u16) -> Self {
        let [class, code] = value.to_be_bytes();
        Self { class, code }
    }
}

impl fmt::Display for S7HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match *self {
            Self::NONE => "no error",
            Self::FEATURE_NOT_ENABLED => "service not implemented or feature not enabled",
            Self::PDU_SIZE_EXCEEDED => "PDU size exceeded",
            _ => match self.class {
                0x81 => "application relationship error",
                0x82 => "object definition error",
                0x83 => "no resources available",
                0x84 => "error on service processing",
                0x85 => "error on supplies",
                0x87 => "access error",
                _ => "unknown error class",
            },
        };
        write!(f, "0x{:04X} ({label})", self.as_u16())
    }
}
