//! Frame-capture pipeline bindings (spec §6).
//!
//! The real capture pipeline (video + per-tick state) is out of scope; these
//! two implementations stand in for it.

use async_trait::async_trait;
use duet_core::recording::FrameCapture;

/// Completes `await_stopped` immediately. Used in smoke-test mode and tests
/// where no real capture process exists to confirm shutdown.
pub struct NullFrameCapture;

#[async_trait]
impl FrameCapture for NullFrameCapture {
    async fn signal_start(&self, episode_index: u64) {
        tracing::debug!(episode_index, "capture: start (null)");
    }
    async fn signal_stop(&self) {
        tracing::debug!("capture: stop (null)");
    }
    async fn await_stopped(&self) {}
}

/// Integration point for a real out-of-process capture pipeline (§6): start
/// and stop are logged; `await_stopped` blocks on a channel the real
/// pipeline would close when its connection to the capture process drops.
/// The channel here is never populated — a production binding would spawn
/// the external process and wire its exit/close event into `done_rx`.
pub struct ProcessFrameCapture {
    done_rx: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
}

impl ProcessFrameCapture {
    pub fn new() -> (Self, tokio::sync::oneshot::Sender<()>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            Self {
                done_rx: tokio::sync::Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl FrameCapture for ProcessFrameCapture {
    async fn signal_start(&self, episode_index: u64) {
        tracing::info!(episode_index, "capture: start (process)");
    }
    async fn signal_stop(&self) {
        tracing::info!("capture: stop (process)");
    }
    async fn await_stopped(&self) {
        let rx = self.done_rx.lock().await.take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}
