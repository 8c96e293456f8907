//! Error types for Skiff

use std::fmt;

/// Unified error type for all Skiff operations
#[derive(Debug)]
pub enum SkiffError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (corrupt framing, negotiation failure, bad message)
    Protocol(String),

    /// Security error (MAC failure, key exchange failure, signature mismatch)
    Security(String),

    /// Authentication method failure; the authenticator may try the next
    /// configured method
    Auth(String),

    /// The user declined to continue the current operation; distinct from an
    /// outright failure so callers can retry with different credentials
    Cancelled(String),

    /// The connection was terminated, carrying the disconnect reason code
    /// and a human-readable description
    Disconnected {
        /// SSH disconnect reason code (RFC 4253 Section 11.1)
        code: u32,
        /// Human-readable description
        description: String,
    },

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for SkiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkiffError::Io(e) => write!(f, "IO error: {}", e),
            SkiffError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SkiffError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SkiffError::Security(msg) => write!(f, "Security error: {}", msg),
            SkiffError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            SkiffError::Cancelled(msg) => write!(f, "Cancelled: {}", msg),
            SkiffError::Disconnected { code, description } => {
                write!(f, "Disconnected (reason {}): {}", code, description)
            }
            SkiffError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for SkiffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SkiffError::Io(e) => Some(e),
            SkiffError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SkiffError {
    fn from(err: std::io::Error) -> Self {
        SkiffError::Io(err)
    }
}

/// Result type for Skiff operations
pub type SkiffResult<T> = Result<T, SkiffError>;
