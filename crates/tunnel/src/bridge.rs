//! Bidirectional I/O bridging for an active session.
//!
//! Two topologies share the same shape: a local pump moving bytes toward
//! the peer and a remote pump applying peer frames locally. Whichever pump
//! finishes first drives the shutdown sequence for the other.
//!
//! ```text
//! console side                        shell side
//!   stdin  ──> DATA frames ──tls──>  DATA frames ──> PTY input
//!   stdout <── DATA frames <──tls──  DATA frames <── PTY output
//!                                        │
//!                                        └─> optional local mirror
//! ```

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use protocol::{ControlMessage, FrameType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::mirror;
use crate::pty::ShellPty;
use crate::transport::{FrameReader, SharedWriter, TransportError};

/// How long to wait for the peer's pump to drain after a local shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// PTY read chunk size.
const READ_BUFFER_SIZE: usize = 4096;

/// Local mirroring configuration for the shell side.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorOptions {
    /// Copy shell output to the local terminal.
    pub output: bool,
    /// Forward local keystrokes into the shell.
    pub input: bool,
    /// Scrub escape sequences from the local output copy.
    pub clean: bool,
}

/// Puts the local terminal into raw mode for the guard's lifetime.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// Enable raw mode. A failure (no TTY) is logged and tolerated.
    pub fn enable() -> Self {
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Self { active: true },
            Err(e) => {
                tracing::warn!(error = %e, "cannot enable raw mode");
                Self { active: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = crossterm::terminal::disable_raw_mode() {
                tracing::warn!(error = %e, "cannot disable raw mode");
            }
        }
    }
}

/// Run the console side: local terminal wired to the remote shell.
///
/// Returns when either the local input closes, the peer terminates, or the
/// transport fails. Raw mode is held for the whole call.
pub async fn run_console(
    mut reader: FrameReader,
    writer: SharedWriter,
) -> Result<(), TransportError> {
    let _raw = RawModeGuard::enable();

    // Local pump: stdin bytes become DATA frames.
    let input_writer = writer.clone();
    let mut local = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match stdin.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => {
                    if input_writer.send_data(&buffer[..n]).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    // Remote pump: DATA frames go to stdout, terminate ends the session.
    let mut remote = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => match frame.frame_type {
                    FrameType::Data => {
                        if stdout.write_all(&frame.payload).await.is_err() {
                            break;
                        }
                        let _ = stdout.flush().await;
                    }
                    FrameType::Control => match ControlMessage::from_bytes(&frame.payload) {
                        Ok(ControlMessage::Terminate) => {
                            tracing::info!("peer requested termination");
                            break;
                        }
                        Ok(other) => {
                            tracing::debug!(message = ?other, "ignoring control message on console side");
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "unparseable control payload");
                        }
                    },
                },
                Ok(None) => {
                    tracing::info!("peer closed the channel");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut local => {
            // Our input is done: tell the peer, close our half, and give
            // the remote pump a bounded window to drain.
            crate::control::send_terminate(&writer).await;
            writer.close_notify().await;
            if timeout(SHUTDOWN_GRACE, &mut remote).await.is_err() {
                remote.abort();
            }
        }
        _ = &mut remote => {
            writer.close_notify().await;
            // stdin.read is uncancellable by itself; dropping the task
            // releases our interest in it.
            local.abort();
        }
    }
    Ok(())
}

/// Run the shell side: remote frames drive the PTY, PTY output goes back.
///
/// `pty_reader` is the blocking output reader handed out by
/// [`ShellPty::spawn`]. Returns when the shell exits, the peer terminates,
/// or the transport fails.
pub async fn run_shell(
    mut reader: FrameReader,
    writer: SharedWriter,
    pty: Arc<ShellPty>,
    pty_reader: Box<dyn Read + Send>,
    opts: MirrorOptions,
) -> Result<(), TransportError> {
    // Remote pump: peer input and control applied to the PTY.
    let remote_pty = Arc::clone(&pty);
    let mut remote = tokio::spawn(async move {
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => match frame.frame_type {
                    FrameType::Data => {
                        if let Err(e) = remote_pty.write(&frame.payload).await {
                            tracing::warn!(error = %e, "PTY write failed");
                            break;
                        }
                    }
                    FrameType::Control => match ControlMessage::from_bytes(&frame.payload) {
                        Ok(ControlMessage::Winch { rows, cols }) => {
                            if let Err(e) = remote_pty.resize(rows, cols).await {
                                tracing::debug!(error = %e, "PTY resize failed");
                            }
                        }
                        Ok(ControlMessage::Terminate) => {
                            tracing::info!("peer requested termination");
                            break;
                        }
                        Ok(other) => {
                            tracing::debug!(message = ?other, "ignoring control message on shell side");
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "unparseable control payload");
                        }
                    },
                },
                Ok(None) => {
                    tracing::info!("peer closed the channel");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport read failed");
                    break;
                }
            }
        }
    });

    // Local pump: blocking PTY reads forwarded as DATA frames, with the
    // optional mirror copy on the local terminal.
    let output_writer = writer.clone();
    let pty_reader = Arc::new(std::sync::Mutex::new(pty_reader));
    let mut local = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            let reader_clone = Arc::clone(&pty_reader);
            let chunk = tokio::task::spawn_blocking(move || {
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                let mut reader = reader_clone.lock().unwrap();
                match reader.read(&mut buffer) {
                    Ok(0) => Ok(None),
                    Ok(n) => {
                        buffer.truncate(n);
                        Ok(Some(buffer))
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

            match chunk {
                Ok(Ok(Some(data))) => {
                    if opts.output {
                        let copy = if opts.clean { mirror::scrub(&data) } else { data.clone() };
                        let _ = stdout.write_all(&copy).await;
                        let _ = stdout.flush().await;
                    }
                    if output_writer.send_data(&data).await.is_err() {
                        break;
                    }
                }
                Ok(Ok(None)) => {
                    tracing::info!("shell output reached EOF");
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "PTY read failed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "PTY read task panicked");
                    break;
                }
            }
        }
    });

    // Optional mirror-input pump: local keystrokes into the PTY. Held in
    // raw mode so control characters pass through unmangled.
    let mirror_input = if opts.input {
        let input_pty = Arc::clone(&pty);
        Some(tokio::spawn(async move {
            let _raw = RawModeGuard::enable();
            let mut stdin = tokio::io::stdin();
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match stdin.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if input_pty.write(&buffer[..n]).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "mirror stdin read failed");
                        break;
                    }
                }
            }
        }))
    } else {
        None
    };

    tokio::select! {
        _ = &mut local => {
            // Shell exited: notify the peer, close our half, wait for its
            // acknowledgement within the grace period.
            crate::control::send_terminate(&writer).await;
            writer.close_notify().await;
            if timeout(SHUTDOWN_GRACE, &mut remote).await.is_err() {
                remote.abort();
            }
        }
        _ = &mut remote => {
            writer.close_notify().await;
            // Killing the shell unblocks the pending blocking read, which
            // lets the local pump observe EOF and stop.
            if let Err(e) = pty.terminate().await {
                tracing::debug!(error = %e, "shell termination failed");
            }
            if timeout(SHUTDOWN_GRACE, &mut local).await.is_err() {
                local.abort();
            }
        }
    }

    if let Err(e) = pty.terminate().await {
        tracing::debug!(error = %e, "shell termination failed");
    }
    if let Some(task) = mirror_input {
        task.abort();
    }
    Ok(())
}
