//! PTY management for the shell side of a session.
//!
//! One session owns one pseudo-terminal with a shell process. Input from
//! the remote peer is written to the PTY; PTY output is read by the bridge
//! through a blocking reader handed out at spawn time.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors that can occur managing the shell PTY.
#[derive(Error, Debug)]
pub enum PtyError {
    /// The shell has already been terminated.
    #[error("shell already terminated")]
    AlreadyTerminated,

    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to kill the shell process.
    #[error("failed to kill shell: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A pseudo-terminal running the user's shell.
///
/// Cheap to share behind an [`Arc`]: writes, resizes, and termination all
/// take `&self`. The output reader is handed out once at spawn time so the
/// bridge can pump it without locking.
pub struct ShellPty {
    /// The PTY master handle, kept for resizing.
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,

    /// The writer for shell input.
    writer: Arc<Mutex<Box<dyn Write + Send>>>,

    /// The shell child process.
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,

    /// Cleared on termination; write and resize refuse afterwards.
    running: Arc<AtomicBool>,
}

impl ShellPty {
    /// Spawn the shell in a fresh PTY of the given size.
    ///
    /// `shell` overrides the default; otherwise `$SHELL` is used, falling
    /// back to `/bin/sh`. The shell starts in `$HOME` when it is set.
    /// Returns the PTY alongside the blocking output reader.
    pub fn spawn(
        shell: Option<String>,
        rows: u16,
        cols: u16,
    ) -> Result<(Self, Box<dyn Read + Send>), PtyError> {
        let shell_cmd = detect_shell(shell);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell_cmd);
        if let Ok(home) = std::env::var("HOME") {
            cmd.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        tracing::info!(shell = %shell_cmd, rows, cols, "spawned shell");

        let pty = ShellPty {
            master: Arc::new(Mutex::new(pair.master)),
            writer: Arc::new(Mutex::new(writer)),
            child: Arc::new(Mutex::new(child)),
            running: Arc::new(AtomicBool::new(true)),
        };

        Ok((pty, reader))
    }

    /// Returns whether the shell is still considered running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Write input bytes to the shell.
    pub async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_running() {
            return Err(PtyError::AlreadyTerminated);
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Resize the PTY to the given dimensions.
    pub async fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        if !self.is_running() {
            return Err(PtyError::AlreadyTerminated);
        }

        let master = self.master.lock().await;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        tracing::debug!(rows, cols, "resized PTY");
        Ok(())
    }

    /// Kill the shell process and reap it.
    ///
    /// Killing the child also unblocks any pending read on the output
    /// reader. Idempotent: a second call is a no-op.
    pub async fn terminate(&self) -> Result<(), PtyError> {
        if self.running.swap(false, Ordering::SeqCst) {
            let mut child = self.child.lock().await;
            child
                .kill()
                .map_err(|e| PtyError::KillFailed(e.to_string()))?;
            let status = child
                .wait()
                .map_err(|e| PtyError::KillFailed(e.to_string()))?;
            tracing::info!(exit_code = status.exit_code(), "shell terminated");
        }
        Ok(())
    }

    /// Check whether the shell process has already exited.
    pub async fn try_wait(&self) -> Result<Option<u32>, PtyError> {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.running.store(false, Ordering::SeqCst);
                Ok(Some(status.exit_code()))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(PtyError::Io(e)),
        }
    }
}

/// Detects the shell to use.
///
/// Order of preference: the provided override, then `$SHELL`, then
/// `/bin/sh`.
fn detect_shell(shell: Option<String>) -> String {
    if let Some(s) = shell {
        return s;
    }

    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_detect_shell_with_provided() {
        let shell = detect_shell(Some("/bin/bash".to_string()));
        assert_eq!(shell, "/bin/bash");
    }

    #[test]
    fn test_detect_shell_from_env() {
        // Should either be from $SHELL or /bin/sh.
        let shell = detect_shell(None);
        assert!(!shell.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_and_terminate() {
        let result = ShellPty::spawn(Some("/bin/sh".to_string()), 24, 80);
        assert!(result.is_ok(), "Failed to spawn: {:?}", result.err());

        let (pty, _reader) = result.unwrap();
        assert!(pty.is_running());

        pty.terminate().await.unwrap();
        assert!(!pty.is_running());
    }

    #[tokio::test]
    async fn test_write_and_read_output() {
        let (pty, mut reader) = ShellPty::spawn(Some("/bin/sh".to_string()), 24, 80).unwrap();

        pty.write(b"echo shell_marker\n").await.unwrap();

        // Drain output on a blocking task until the marker echoes back.
        let found = tokio::task::spawn_blocking(move || {
            let mut collected = Vec::new();
            let mut buffer = [0u8; 4096];
            for _ in 0..50 {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        collected.extend_from_slice(&buffer[..n]);
                        if String::from_utf8_lossy(&collected).contains("shell_marker") {
                            return true;
                        }
                    }
                    Err(_) => break,
                }
            }
            false
        })
        .await
        .unwrap();

        assert!(found, "Did not receive echoed output");
        pty.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_resize() {
        let (pty, _reader) = ShellPty::spawn(Some("/bin/sh".to_string()), 24, 80).unwrap();

        let result = pty.resize(50, 132).await;
        assert!(result.is_ok(), "Failed to resize: {:?}", result.err());

        pty.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_terminate() {
        let (pty, _reader) = ShellPty::spawn(Some("/bin/sh".to_string()), 24, 80).unwrap();

        pty.terminate().await.unwrap();

        let result = pty.write(b"hello\n").await;
        assert!(matches!(result, Err(PtyError::AlreadyTerminated)));
        let result = pty.resize(30, 100).await;
        assert!(matches!(result, Err(PtyError::AlreadyTerminated)));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (pty, _reader) = ShellPty::spawn(Some("/bin/sh".to_string()), 24, 80).unwrap();

        pty.terminate().await.unwrap();
        pty.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_try_wait_after_exit() {
        let (pty, mut reader) = ShellPty::spawn(Some("/bin/sh".to_string()), 24, 80).unwrap();

        // Keep the PTY drained so the shell is not blocked on output.
        let drain = tokio::task::spawn_blocking(move || {
            let mut buffer = [0u8; 4096];
            while let Ok(n) = reader.read(&mut buffer) {
                if n == 0 {
                    break;
                }
            }
        });

        assert!(pty.try_wait().await.unwrap().is_none());

        pty.write(b"exit 42\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let code = pty.try_wait().await.unwrap();
        assert_eq!(code, Some(42));
        drain.await.unwrap();
    }
}
