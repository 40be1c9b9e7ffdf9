//! Terminal-resize coalescing.
//!
//! Resize signals can arrive in bursts while a window is dragged. The
//! coalescer folds any number of signals that land while a send is in
//! flight into a single pending flag, so the peer sees at most one winch
//! message per quiescent period, carrying the latest dimensions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use protocol::ControlMessage;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::transport::SharedWriter;

/// Source of the current terminal dimensions (rows, cols).
type SizeFn = Arc<dyn Fn() -> Option<(u16, u16)> + Send + Sync>;

/// Coalesces resize signals into winch control messages.
///
/// `signal_resize` is cheap and non-blocking; it may be called from any
/// task at any rate. The background task drains the pending flag, reads
/// the size once, and sends one message.
pub struct ResizeCoalescer {
    pending: Arc<AtomicBool>,
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    size_fn: SizeFn,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResizeCoalescer {
    /// Create a coalescer that reads the real terminal size.
    pub fn new() -> Self {
        Self::with_size_fn(Arc::new(|| crossterm::terminal::size().ok().map(|(c, r)| (r, c))))
    }

    /// Create a coalescer with an injected size source.
    pub fn with_size_fn(size_fn: SizeFn) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            size_fn,
            handle: Mutex::new(None),
        }
    }

    /// Start the background sender task.
    pub async fn start(&self, writer: SharedWriter) {
        self.running.store(true, Ordering::SeqCst);

        let pending = Arc::clone(&self.pending);
        let notify = Arc::clone(&self.notify);
        let running = Arc::clone(&self.running);
        let size_fn = Arc::clone(&self.size_fn);

        let task = tokio::spawn(async move {
            loop {
                notify.notified().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                // Clear the flag before reading the size: a signal racing
                // in after this point re-arms us for another round.
                if pending.swap(false, Ordering::SeqCst) {
                    let Some((rows, cols)) = size_fn() else {
                        tracing::debug!("terminal size unavailable, skipping winch");
                        continue;
                    };
                    if let Err(e) = writer.send_control(&ControlMessage::Winch { rows, cols }).await
                    {
                        tracing::debug!(error = %e, "winch send failed, stopping coalescer");
                        break;
                    }
                    tracing::trace!(rows, cols, "sent winch");
                }
            }
        });

        *self.handle.lock().await = Some(task);
    }

    /// Record a resize signal. Never blocks; duplicate signals before the
    /// sender wakes collapse into one message.
    pub fn signal_resize(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Stop the background task and wait for it to finish.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
        if let Some(task) = self.handle.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl Default for ResizeCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward SIGWINCH to the coalescer until the signal stream ends.
#[cfg(unix)]
pub fn spawn_winch_watcher(coalescer: Arc<ResizeCoalescer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut winch = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGWINCH handler");
                return;
            }
        };
        while winch.recv().await.is_some() {
            coalescer.signal_resize();
        }
    })
}
