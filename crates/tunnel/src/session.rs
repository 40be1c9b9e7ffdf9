//! Session lifecycle management.
//!
//! A session walks a fixed sequence of states:
//!
//! ```text
//! Initial ──> Listening ─┐
//!         └─> Connecting ┴─> Handshake ──> NegotiatingRoles
//!                 ──> ConfirmingPrivileges ──> SessionActive ──> SessionEnded
//! ```
//!
//! Transitions are monotonic: the state only ever moves forward, and a
//! failure at any stage jumps straight to `SessionEnded`.

use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use protocol::Role;
use tokio::net::{TcpListener, TcpStream};

use crate::bridge::{self, MirrorOptions};
use crate::config::{Config, PeerMode};
use crate::control;
use crate::pty::ShellPty;
use crate::resize::{self, ResizeCoalescer};
use crate::transport::{self, SecureChannel, TlsSettings};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has happened yet.
    Initial,
    /// Waiting for an inbound TCP connection.
    Listening,
    /// Dialing the peer.
    Connecting,
    /// TCP is up, TLS handshake in progress.
    Handshake,
    /// Exchanging role proposals.
    NegotiatingRoles,
    /// Exchanging privilege request and grant.
    ConfirmingPrivileges,
    /// Terminal data is flowing.
    SessionActive,
    /// The session is over, successfully or not.
    SessionEnded,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::Initial => 0,
            SessionState::Listening | SessionState::Connecting => 1,
            SessionState::Handshake => 2,
            SessionState::NegotiatingRoles => 3,
            SessionState::ConfirmingPrivileges => 4,
            SessionState::SessionActive => 5,
            SessionState::SessionEnded => 6,
        }
    }
}

/// Tracks the monotonic session state.
#[derive(Debug)]
pub struct StateTracker {
    state: Mutex<SessionState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Initial),
        }
    }

    /// Current state.
    pub fn current(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Advance to `next`. Backward moves are ignored so a late failure
    /// path cannot resurrect an ended session.
    pub fn advance(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        if next.rank() >= state.rank() {
            tracing::debug!(from = ?*state, to = ?next, "session state");
            *state = next;
        } else {
            tracing::debug!(from = ?*state, refused = ?next, "ignoring backward state move");
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one session from connection establishment to teardown.
pub struct SessionManager {
    config: Config,
    state: Arc<StateTracker>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Arc::new(StateTracker::new()),
        }
    }

    /// Shared handle to the state tracker.
    pub fn state(&self) -> Arc<StateTracker> {
        Arc::clone(&self.state)
    }

    /// Run the session to completion.
    pub async fn run(&self) -> Result<()> {
        let result = self.run_inner().await;
        self.state.advance(SessionState::SessionEnded);
        result
    }

    async fn run_inner(&self) -> Result<()> {
        let tls = TlsSettings {
            cert: self.config.cert.clone(),
            key: self.config.key.clone(),
            trust_anchor: self.config.cacert.clone(),
            verify_required: self.config.verify_required,
        };

        // Establish TCP, then TLS.
        let channel = match &self.config.peer_mode {
            PeerMode::Listen => {
                self.state.advance(SessionState::Listening);
                let bind_addr = format!("0.0.0.0:{}", self.config.port);
                let listener = TcpListener::bind(&bind_addr)
                    .await
                    .with_context(|| format!("cannot listen on {bind_addr}"))?;
                tracing::info!(addr = %bind_addr, "listening");
                let (stream, peer_addr) = listener
                    .accept()
                    .await
                    .context("accepting connection failed")?;
                tracing::info!(peer = %peer_addr, "peer connected");

                self.state.advance(SessionState::Handshake);
                transport::accept(stream, &tls).await?
            }
            PeerMode::Connect(host) => {
                self.state.advance(SessionState::Connecting);
                let addr = format!("{host}:{}", self.config.port);
                let stream = TcpStream::connect(&addr)
                    .await
                    .with_context(|| format!("cannot connect to {addr}"))?;
                tracing::info!(addr = %addr, "connected");

                self.state.advance(SessionState::Handshake);
                transport::connect(stream, host, &tls).await?
            }
        };

        let SecureChannel {
            mut reader,
            writer,
            info,
        } = channel;

        if info.peer_fingerprint.is_empty() {
            println!("Peer presented no certificate");
        } else {
            println!("Peer certificate SHA-256: {}", info.peer_fingerprint);
        }
        if self.config.tls_info {
            println!("TLS version: {}", info.protocol_version);
            println!("Cipher suite: {}", info.cipher_suite);
        }

        // Negotiate who runs the shell.
        self.state.advance(SessionState::NegotiatingRoles);
        let is_listener = self.config.peer_mode == PeerMode::Listen;
        let role =
            control::negotiate_role(&mut reader, &writer, is_listener, self.config.role).await?;

        // Confirm privileges for the resolved topology.
        self.state.advance(SessionState::ConfirmingPrivileges);
        let mode = match role {
            Role::Host => {
                control::confirm_mode_host(&mut reader, &writer, self.config.allow_admin).await?
            }
            Role::Client => {
                control::confirm_mode_client(&mut reader, &writer, self.config.request_admin)
                    .await?
            }
            Role::None => bail!("role negotiation resolved to none"),
        };
        println!("Session mode: {mode:?}, local role: {role:?}");

        self.state.advance(SessionState::SessionActive);
        match role {
            Role::Host => {
                let (rows, cols) = crossterm::terminal::size()
                    .map(|(c, r)| (r, c))
                    .unwrap_or((24, 80));
                let (pty, pty_reader) =
                    ShellPty::spawn(self.config.shell.clone(), rows, cols)?;
                let opts = MirrorOptions {
                    output: self.config.mirror_output,
                    input: self.config.mirror_input,
                    clean: self.config.mirror_clean,
                };
                bridge::run_shell(reader, writer, Arc::new(pty), pty_reader, opts).await?;
            }
            Role::Client => {
                let coalescer = Arc::new(ResizeCoalescer::new());
                coalescer.start(writer.clone()).await;
                // Push the starting size so the remote PTY matches before
                // the first keystroke.
                coalescer.signal_resize();
                #[cfg(unix)]
                let watcher = resize::spawn_winch_watcher(Arc::clone(&coalescer));

                let result = bridge::run_console(reader, writer).await;

                coalescer.stop().await;
                #[cfg(unix)]
                watcher.abort();
                result?;
            }
            Role::None => unreachable!("rejected above"),
        }

        tracing::info!("session finished");
        Ok(())
    }
}
