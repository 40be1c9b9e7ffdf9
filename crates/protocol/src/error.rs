//! Error types for the protocol crate.

use thiserror::Error;

use crate::messages::Role;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a control message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a control message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The peers proposed incompatible roles and neither yields.
    #[error("role conflict: both peers proposed {proposed:?}")]
    RoleConflict {
        /// The role both sides insisted on.
        proposed: Role,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
