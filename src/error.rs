//! Error types for the depth-cam crate.

use std::error::Error as StdError;
use std::fmt;

/// Crate-wide error type.
///
/// The variants follow the propagation policy of the device-control core:
/// transport and validation failures are surfaced to the caller unchanged,
/// configuration failures abort device construction, and unsupported
/// operations are a normal outcome for some endpoint/stream combinations.
#[derive(Debug)]
pub enum Error {
    /// The underlying transfer failed at the channel. Never retried here.
    Transport(String),

    /// A response failed a caller-side contract: too short, bad checksum,
    /// unexpected opcode echo, or an unsupported record version.
    Validation(String),

    /// The requested operation has no meaning for this endpoint or stream.
    NotImplemented(String),

    /// A required sibling interface or descriptor is missing. Fatal to
    /// device construction.
    Config(String),

    /// A value was rejected: out of range, not in the enumerated set, or a
    /// direct write to a control currently owned by an automatic mechanism.
    InvalidValue(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Validation(msg) => write!(f, "validation error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "not implemented: {}", msg),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
        }
    }
}

impl StdError for Error {}

impl Error {
    /// Create a transport error with a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Create a validation error with a message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a not-implemented error with a message.
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }

    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an invalid-value error with a message.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Error::InvalidValue(msg.into())
    }

    /// Returns true if this is a Transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Returns true if this is a Validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Returns true if this is a NotImplemented error.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented(_))
    }

    /// Returns true if this is a Config error.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Returns true if this is an InvalidValue error.
    pub fn is_invalid_value(&self) -> bool {
        matches!(self, Error::InvalidValue(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// Result type for depth-cam operations.
pub type Result<T> = std::result::Result<T, Error>;
