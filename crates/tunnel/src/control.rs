//! Control-channel negotiation.
//!
//! After the handshake, both sides exchange role proposals and then run a
//! one-round privilege confirmation before any terminal data flows. The
//! exchanges are symmetric on the wire: each side sends its message first
//! and then reads until the peer's counterpart arrives, so neither order
//! of arrival can deadlock.

use protocol::{ControlMessage, Mode, Role};
use thiserror::Error;

use crate::transport::{FrameReader, SharedWriter, TransportError};

/// Errors during control-channel negotiation.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The peer closed the channel before negotiation completed.
    #[error("peer closed during negotiation")]
    PeerClosed,

    /// The peer asked to terminate during negotiation.
    #[error("peer requested termination")]
    PeerTerminated,

    /// Transport failure under the negotiation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Conflicting or malformed negotiation messages.
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
}

/// Exchange role proposals with the peer and resolve the local role.
///
/// Sends our proposal first, then reads until the peer's arrives. Frames
/// that are not a role proposal (early winch, stray data) are logged and
/// skipped rather than failing the negotiation.
pub async fn negotiate_role(
    reader: &mut FrameReader,
    writer: &SharedWriter,
    is_listener: bool,
    proposed: Role,
) -> Result<Role, ControlError> {
    writer.send_control(&ControlMessage::Role { role: proposed }).await?;

    let remote = loop {
        match read_control(reader).await? {
            ControlMessage::Role { role } => break role,
            ControlMessage::Terminate => return Err(ControlError::PeerTerminated),
            other => {
                tracing::debug!(message = ?other, "ignoring control message during role negotiation");
            }
        }
    };

    let resolved = protocol::resolve_role(is_listener, proposed, remote)?;
    tracing::info!(?proposed, ?remote, ?resolved, "role negotiation complete");
    Ok(resolved)
}

/// Host side of privilege confirmation: answer the client's request.
///
/// Admin is granted only when the client asks for it and this side was
/// started with admin grants enabled; everything else gets restricted.
pub async fn confirm_mode_host(
    reader: &mut FrameReader,
    writer: &SharedWriter,
    allow_admin: bool,
) -> Result<Mode, ControlError> {
    let requested_admin = loop {
        match read_control(reader).await? {
            ControlMessage::ModeRequest { admin } => break admin,
            ControlMessage::Terminate => return Err(ControlError::PeerTerminated),
            other => {
                tracing::debug!(message = ?other, "ignoring control message awaiting mode request");
            }
        }
    };

    let mode = if requested_admin && allow_admin {
        Mode::Admin
    } else {
        Mode::Restricted
    };
    writer.send_control(&ControlMessage::ModeGrant { mode }).await?;
    tracing::info!(requested_admin, granted = ?mode, "privilege confirmation complete");
    Ok(mode)
}

/// Client side of privilege confirmation: request and await the grant.
pub async fn confirm_mode_client(
    reader: &mut FrameReader,
    writer: &SharedWriter,
    request_admin: bool,
) -> Result<Mode, ControlError> {
    writer
        .send_control(&ControlMessage::ModeRequest { admin: request_admin })
        .await?;

    let mode = loop {
        match read_control(reader).await? {
            ControlMessage::ModeGrant { mode } => break mode,
            ControlMessage::Terminate => return Err(ControlError::PeerTerminated),
            other => {
                tracing::debug!(message = ?other, "ignoring control message awaiting mode grant");
            }
        }
    };

    tracing::info!(requested_admin = request_admin, granted = ?mode, "privilege confirmation complete");
    Ok(mode)
}

/// Ask the peer to wind the session down. Best-effort.
pub async fn send_terminate(writer: &SharedWriter) {
    if let Err(e) = writer.send_control(&ControlMessage::Terminate).await {
        tracing::debug!(error = %e, "terminate send failed");
    }
}

/// Read the next parseable control message, skipping data frames and
/// unparseable control payloads.
async fn read_control(reader: &mut FrameReader) -> Result<ControlMessage, ControlError> {
    loop {
        let frame = reader.read_frame().await?.ok_or(ControlError::PeerClosed)?;
        match frame.frame_type {
            protocol::FrameType::Control => match ControlMessage::from_bytes(&frame.payload) {
                Ok(msg) => return Ok(msg),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable control payload");
                }
            },
            protocol::FrameType::Data => {
                tracing::debug!(len = frame.payload.len(), "skipping data frame during negotiation");
            }
        }
    }
}
