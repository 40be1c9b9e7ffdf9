//! # Shellpipe Protocol Library
//!
//! Wire-level definitions for the shellpipe encrypted PTY tunnel:
//!
//! - **Frame Codec**: type-tagged, length-prefixed frames carried over the
//!   TLS channel. Exactly two frame types exist: CONTROL and DATA.
//! - **Control Messages**: JSON-encoded negotiation and administrative
//!   messages (resize, role proposal, privilege confirmation, terminate).
//! - **Role Resolution**: the deterministic tie-break rule both peers apply
//!   to converge on who hosts the shell.
//!
//! ## Wire format
//!
//! ```text
//! ┌──────┬──────────────┬─────────────┐
//! │ type │ length (BE)  │   payload   │
//! │ 1 B  │     4 B      │  length B   │
//! └──────┴──────────────┴─────────────┘
//! ```
//!
//! DATA payloads are raw session bytes; CONTROL payloads are JSON objects
//! with a `"type"` discriminator (e.g. `{"type":"winch","rows":24,"cols":80}`).
//!
//! ## Modules
//!
//! - [`framing`]: frame encode and header decode
//! - [`messages`]: control message definitions and role resolution
//! - [`error`]: error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{encode, decode_header, Frame, FrameHeader, FrameType, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use messages::{resolve_role, ControlMessage, Mode, Role};
