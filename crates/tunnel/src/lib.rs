//! # Shellpipe Tunnel
//!
//! This crate implements the runtime side of shellpipe: a mutually
//! authenticatable TLS tunnel multiplexing an interactive shell session
//! (PTY output/input, window-resize events, and a control channel) over a
//! single encrypted stream. One peer listens, the other connects; after the
//! handshake and control-plane negotiation, the Host side runs a shell that
//! is driven remotely while the Client side drives a terminal.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Session Manager                         │
//! │  listen/connect → handshake → negotiate → bridge → teardown  │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────┐  ┌───────────────┐  ┌────────────────────┐  │
//! │  │  Control   │  │    Resize     │  │     I/O Bridge     │  │
//! │  │  Protocol  │  │   Coalescer   │  │  (console / shell) │  │
//! │  └────────────┘  └───────────────┘  └────────────────────┘  │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │        Secure Transport (framed TLS read/write)        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: TLS handshake, framed reader/writer, close-notify
//! - [`cert`]: PEM loading and self-signed certificate provisioning
//! - [`control`]: role negotiation, privilege confirmation, terminate
//! - [`resize`]: SIGWINCH coalescing into single `winch` control frames
//! - [`bridge`]: the concurrent pump loops for both session topologies
//! - [`mirror`]: lossy ANSI sanitizer for the clean local mirror
//! - [`pty`]: PTY spawn/write/resize/terminate around portable-pty
//! - [`session`]: the session state machine and orchestration
//! - [`config`]: CLI surface and validated runtime configuration

pub mod bridge;
pub mod cert;
pub mod config;
pub mod control;
pub mod mirror;
pub mod pty;
pub mod resize;
pub mod session;
pub mod transport;
