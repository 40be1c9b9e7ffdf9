//! Control-plane message definitions.
//!
//! Control frames carry compact JSON objects discriminated by a `type` tag.
//! The resize message keeps the original `winch` wire shape; negotiation
//! messages extend the same scheme. Unparseable payloads are a local,
//! recoverable condition: receivers log and discard them.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Which peer exposes the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// No preference; the tie-break rule decides.
    #[default]
    None,
    /// This peer runs the shell and owns the PTY.
    Host,
    /// This peer drives a terminal.
    Client,
}

impl Role {
    /// The opposite concrete role. `None` has no complement and maps to
    /// itself.
    pub fn complement(self) -> Role {
        match self {
            Role::Host => Role::Client,
            Role::Client => Role::Host,
            Role::None => Role::None,
        }
    }
}

/// Privilege level granted to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Not yet negotiated.
    #[default]
    None,
    /// Default privilege level.
    Restricted,
    /// Elevated privileges, granted only by explicit host authorization.
    Admin,
}

/// A control message carried in a CONTROL frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Terminal resize notification: apply `rows` x `cols` to the PTY.
    Winch {
        /// Terminal height in rows.
        rows: u16,
        /// Terminal width in columns.
        cols: u16,
    },

    /// Role proposal sent by each peer during negotiation.
    Role {
        /// The role this peer proposes for itself.
        role: Role,
    },

    /// Privilege request sent by the non-host peer.
    ModeRequest {
        /// Whether admin privileges are requested.
        admin: bool,
    },

    /// The host's privilege decision.
    ModeGrant {
        /// The granted mode.
        mode: Mode,
    },

    /// Intentional session end, distinct from a network-level close.
    Terminate,
}

impl ControlMessage {
    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(ProtocolError::from)
    }

    /// Parse from a CONTROL frame payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(ProtocolError::from)
    }
}

/// Resolve the local peer's role from both proposals.
///
/// The rule is deterministic and symmetric: both peers compute it from the
/// same inputs (their listener/connector position and the two proposals)
/// and arrive at complementary roles, or both fail with the same conflict.
///
/// 1. Two distinct concrete proposals: each side takes its own.
/// 2. Two equal concrete proposals: [`ProtocolError::RoleConflict`].
/// 3. One concrete proposal: that side keeps it, the other side takes the
///    complement.
/// 4. No concrete proposal: the listener is Host, the connector is Client.
pub fn resolve_role(is_listener: bool, local: Role, remote: Role) -> Result<Role> {
    match (local, remote) {
        (Role::None, Role::None) => Ok(if is_listener { Role::Host } else { Role::Client }),
        (Role::None, concrete) => Ok(concrete.complement()),
        (concrete, Role::None) => Ok(concrete),
        (mine, theirs) if mine == theirs => Err(ProtocolError::RoleConflict { proposed: mine }),
        (mine, _) => Ok(mine),
    }
}
