//! Recording Lifecycle Controller (C3).
//!
//! Wraps an abstract frame-capture collaborator (the video+state pipeline,
//! out of scope per spec §1) behind two signals and one suspension point.
//! The concrete binding is supplied by the embedding binary via the
//! [`FrameCapture`] trait — see `duet-agent::capture` for the stub used when
//! no real pipeline is wired up.

use std::time::Duration;

use async_trait::async_trait;

/// The abstract signal/await contract the Recording Controller drives.
#[async_trait]
pub trait FrameCapture: Send + Sync {
    /// Non-blocking: tell the pipeline to start capturing this episode.
    async fn signal_start(&self, episode_index: u64);
    /// Non-blocking: tell the pipeline to stop capturing.
    async fn signal_stop(&self);
    /// Suspension point: resolves once the pipeline confirms its connection
    /// has fully closed. Callers apply their own timeout (§4.3).
    async fn await_stopped(&self);
}

/// Drives start/stop signals and tracks whether recording was started for
/// this episode, matching the `recording_started` flag in the episode
/// record (§3).
pub struct RecordingController<C: FrameCapture> {
    capture: C,
    stop_timeout: Duration,
    started: bool,
    stop_signaled: bool,
}

impl<C: FrameCapture> RecordingController<C> {
    pub fn new(capture: C, stop_timeout: Duration) -> Self {
        Self {
            capture,
            stop_timeout,
            started: false,
            stop_signaled: false,
        }
    }

    /// `recording_started` is set exactly here (§4.3).
    pub async fn start(&mut self, episode_index: u64) {
        self.capture.signal_start(episode_index).await;
        self.started = true;
    }

    pub fn recording_started(&self) -> bool {
        self.started
    }

    /// Signal stop and await confirmation, bounded by `stop_timeout`. I4:
    /// only emitted when `start` was previously called; idempotent within an
    /// episode (a second call is a no-op) so the STOP-guard in the phase
    /// engine can call it unconditionally during teardown.
    pub async fn stop_and_await(&mut self) {
        if !self.started || self.stop_signaled {
            return;
        }
        self.stop_signaled = true;
        self.capture.signal_stop().await;
        if tokio::time::timeout(self.stop_timeout, self.capture.await_stopped())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = self.stop_timeout.as_secs(),
                "recording await_stopped timed out, treating as torn down"
            );
        }
    }

    /// Reset state for the next episode (§4.4 TEARDOWN).
    pub fn reset(&mut self) {
        self.started = false;
        self.stop_signaled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingCapture {
        starts: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
        awaits: Arc<AtomicU32>,
        hang_forever: bool,
    }

    #[async_trait]
    impl FrameCapture for CountingCapture {
        async fn signal_start(&self, _episode_index: u64) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        async fn signal_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        async fn await_stopped(&self) {
            self.awaits.fetch_add(1, Ordering::SeqCst);
            if self.hang_forever {
                std::future::pending::<()>().await;
            }
        }
    }

    #[tokio::test]
    async fn stop_is_a_no_op_if_never_started() {
        let capture = CountingCapture::default();
        let mut ctl = RecordingController::new(capture.clone(), Duration::from_millis(50));
        ctl.stop_and_await().await;
        assert_eq!(capture.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_within_one_episode() {
        let capture = CountingCapture::default();
        let mut ctl = RecordingController::new(capture.clone(), Duration::from_millis(50));
        ctl.start(0).await;
        ctl.stop_and_await().await;
        ctl.stop_and_await().await;
        assert_eq!(capture.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn await_stopped_timeout_does_not_hang() {
        let capture = CountingCapture {
            hang_forever: true,
            ..Default::default()
        };
        let mut ctl = RecordingController::new(capture, Duration::from_millis(20));
        ctl.start(0).await;
        let result = tokio::time::timeout(Duration::from_secs(1), ctl.stop_and_await()).await;
        assert!(result.is_ok(), "stop_and_await itself must respect its internal timeout");
    }

    #[tokio::test]
    async fn reset_allows_starting_again_next_episode() {
        let capture = CountingCapture::default();
        let mut ctl = RecordingController::new(capture.clone(), Duration::from_millis(50));
        ctl.start(0).await;
        ctl.stop_and_await().await;
        ctl.reset();
        ctl.start(1).await;
        ctl.stop_and_await().await;
        assert_eq!(capture.starts.load(Ordering::SeqCst), 2);
        assert_eq!(capture.stops.load(Ordering::SeqCst), 2);
    }
}
