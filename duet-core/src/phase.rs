//! Episode Phase Engine (C4) — the heart of the core.
//!
//! Runs one episode as a distributed state machine synchronized with the
//! peer via phase-rendezvous. See spec §4.4 for the full state diagram;
//! this module is a direct transcription of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::catalogue::EpisodeType;
use crate::context::EpisodeContext;
use crate::coordinator::PeerCoordinator;
use crate::error::PhaseError;
use crate::message::{PhaseEvent, PhaseKind};
use crate::recording::{FrameCapture, RecordingController};
use crate::rng::Stream;
use crate::world::{Position, WorldHandle};

/// Register-then-send, same turn, no await between the two (I2). Every
/// phase-rendezvous in the engine and in episode bodies (`EpisodeContext::phase`)
/// goes through this one function so the ordering invariant has a single
/// enforcement point.
pub(crate) async fn rendezvous(
    coordinator: &PeerCoordinator,
    kind: &PhaseKind,
    params: serde_json::Value,
    episode_index: u64,
    timeout: Duration,
) -> Result<PhaseEvent, PhaseError> {
    let rx = coordinator.once(kind, episode_index);
    coordinator
        .send(kind, params, episode_index)
        .map_err(|e| match e {
            crate::error::CoordinatorError::Disconnected => PhaseError::PeerError,
            other => PhaseError::Internal(other.to_string()),
        })?;
    // Races the peer's reply against the phase deadline and against the
    // coordinator reporting the link down — a dead peer must surface as
    // `peer_error`, not as an indistinguishable timeout (§7 PeerLinkError).
    tokio::select! {
        res = rx => match res {
            Ok(event) => Ok(event),
            Err(_) => Err(PhaseError::Internal("peer sender dropped mid-rendezvous".into())),
        },
        _ = tokio::time::sleep(timeout) => Err(PhaseError::Timeout {
            phase: kind.wire_name(),
        }),
        _ = coordinator.disconnected() => Err(PhaseError::PeerError),
    }
}

/// One episode's persisted outcome (§3).
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub episode_index: u64,
    pub agent_name: String,
    pub episode_type: String,
    pub encountered_error: bool,
    pub peer_error: bool,
    pub agent_died: bool,
    pub recording_started: bool,
    pub eval_metadata: Option<serde_json::Value>,
}

/// Why an episode entered STOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Normal,
    Error,
    AgentDied,
    PeerError,
}

/// Runs episodes to completion, owning the recording controller and world
/// handle for the process's lifetime; the coordinator is shared (it outlives
/// episodes, per the ownership note in §3).
pub struct PhaseEngine<C: FrameCapture> {
    coordinator: Arc<PeerCoordinator>,
    recording: RecordingController<C>,
    world: Arc<dyn WorldHandle>,
    own_name: String,
    peer_name: String,
    is_primary: bool,
    phase_timeout: Duration,
    episode_stopping: AtomicBool,
}

impl<C: FrameCapture> PhaseEngine<C> {
    pub fn new(
        coordinator: Arc<PeerCoordinator>,
        recording: RecordingController<C>,
        world: Arc<dyn WorldHandle>,
        own_name: String,
        peer_name: String,
        is_primary: bool,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            recording,
            world,
            own_name,
            peer_name,
            is_primary,
            phase_timeout,
            episode_stopping: AtomicBool::new(false),
        }
    }

    /// Run one full episode and return its record. Never propagates a phase
    /// body's error out of this function — every fault is caught and folded
    /// into the record's failure flags (§7 propagation policy).
    pub async fn run_episode(
        &mut self,
        episode_index: u64,
        episode_type: Arc<dyn EpisodeType>,
        episode_rng: &mut Stream,
    ) -> EpisodeRecord {
        self.episode_stopping.store(false, Ordering::SeqCst);

        let teleport_outcome = self.teleport_phase(episode_index, &episode_type, episode_rng).await;
        if let Err(e) = teleport_outcome {
            tracing::warn!(error = %e, "teleport phase reported non-fatal issue, proceeding");
        }

        self.recording.start(episode_index).await;

        let stop_reason = {
            let mut ctx = EpisodeContext::new(
                Arc::clone(&self.coordinator),
                episode_rng,
                episode_index,
                &self.own_name,
                &self.peer_name,
                self.is_primary,
                Arc::clone(&self.world),
                self.phase_timeout,
            );

            if let Err(e) = episode_type.setup(&mut ctx).await {
                tracing::warn!(error = %e, "episode setup failed");
                self.classify_error(e)
            } else {
                let death_watch = self.world.watch_death(&self.own_name);
                let peer_watch = self.coordinator.disconnected();
                tokio::select! {
                    result = episode_type.entry_point(&mut ctx) => {
                        match result {
                            Ok(()) => StopReason::Normal,
                            Err(e) => self.classify_error(e),
                        }
                    }
                    _ = death_watch => StopReason::AgentDied,
                    _ = peer_watch => StopReason::PeerError,
                }
            }
        };

        let (encountered_error, agent_died, peer_error) = match stop_reason {
            StopReason::Normal => (false, false, false),
            StopReason::Error => (true, false, false),
            StopReason::AgentDied => (false, true, false),
            StopReason::PeerError => (false, false, true),
        };

        self.enter_stop(episode_index).await;

        self.recording.stop_and_await().await;

        self.stopped_phase(episode_index).await;

        {
            let mut ctx = EpisodeContext::new(
                Arc::clone(&self.coordinator),
                episode_rng,
                episode_index,
                &self.own_name,
                &self.peer_name,
                self.is_primary,
                Arc::clone(&self.world),
                self.phase_timeout,
            );
            episode_type.teardown(&mut ctx).await;
        }

        self.coordinator.clear_scope(episode_index);
        self.recording.reset();

        EpisodeRecord {
            timestamp: chrono::Utc::now(),
            episode_index,
            agent_name: self.own_name.clone(),
            episode_type: episode_type.name().to_string(),
            encountered_error,
            peer_error,
            agent_died,
            recording_started: self.recording.recording_started(),
            eval_metadata: None,
        }
    }

    fn classify_error(&self, err: PhaseError) -> StopReason {
        match err {
            PhaseError::AgentDeath => StopReason::AgentDied,
            PhaseError::PeerError => StopReason::PeerError,
            PhaseError::Timeout { .. } | PhaseError::World(_) | PhaseError::Internal(_) => {
                StopReason::Error
            }
        }
    }

    /// Teleport phase (§4.4). The primary peer (lexicographically smaller
    /// name) issues the positioning command; both sides still rendezvous so
    /// the secondary knows when it's safe to proceed.
    async fn teleport_phase(
        &mut self,
        episode_index: u64,
        episode_type: &Arc<dyn EpisodeType>,
        episode_rng: &mut Stream,
    ) -> Result<(), PhaseError> {
        if self.is_primary {
            const MAX_ATTEMPTS: u32 = 4;
            let mut distance = episode_type.min_init_distance();
            let max_distance = episode_type.max_init_distance();
            let mut placed = false;
            for attempt in 0..MAX_ATTEMPTS {
                let angle = episode_rng.next_float() * std::f64::consts::TAU;
                let pos = Position {
                    x: distance * angle.cos(),
                    y: 64.0,
                    z: distance * angle.sin(),
                };
                match self.world.teleport(&self.own_name, pos).await {
                    Ok(()) => {
                        placed = true;
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(attempt, error = %e, "teleport attempt failed, expanding radius");
                        distance = (distance + (max_distance - episode_type.min_init_distance()) / MAX_ATTEMPTS as f64).min(max_distance * 2.0);
                    }
                }
            }
            if !placed {
                tracing::warn!("teleport exhausted retries, proceeding without guaranteed placement");
            }
        }

        rendezvous(
            &self.coordinator,
            &PhaseKind::Teleport,
            serde_json::json!({ "primary": self.is_primary }),
            episode_index,
            self.phase_timeout,
        )
        .await
        .map(|_| ())
    }

    /// STOP transition (§4.4). I3: the check-and-set is atomic within one
    /// turn (no await between check and set), so concurrent triggers collapse
    /// to a single execution.
    async fn enter_stop(&mut self, episode_index: u64) {
        if self
            .episode_stopping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let _ = rendezvous(
            &self.coordinator,
            &PhaseKind::Stop,
            serde_json::json!({}),
            episode_index,
            self.phase_timeout,
        )
        .await;
    }

    async fn stopped_phase(&mut self, episode_index: u64) {
        let _ = rendezvous(
            &self.coordinator,
            &PhaseKind::Stopped,
            serde_json::json!({}),
            episode_index,
            self.phase_timeout,
        )
        .await;
    }
}
