//! Per-episode context handed to `EpisodeType` callbacks (§4.5).
//!
//! Bundles just enough of the engine's state — the coordinator, this
//! episode's shared RNG stream, identity/tie-break info, and the world
//! handle — that an episode body can drive its own phase-rendezvous
//! sequence without reaching into engine internals (avoiding the
//! coordinator-engine-episode cyclic-reference trap called out in the
//! design notes: the episode never holds a reference back to the engine,
//! only to the coordinator and world handle it was lent).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::PeerCoordinator;
use crate::error::PhaseError;
use crate::message::PhaseKind;
use crate::rng::Stream;
use crate::world::WorldHandle;

/// Handed by reference to `EpisodeType::setup`/`entry_point`/`teardown`.
pub struct EpisodeContext<'a> {
    pub(crate) coordinator: Arc<PeerCoordinator>,
    pub rng: &'a mut Stream,
    pub episode_index: u64,
    pub own_name: &'a str,
    pub peer_name: &'a str,
    pub is_primary: bool,
    pub world: Arc<dyn WorldHandle>,
    pub(crate) phase_timeout: Duration,
    iteration_counters: HashMap<String, u32>,
}

impl<'a> EpisodeContext<'a> {
    pub fn new(
        coordinator: Arc<PeerCoordinator>,
        rng: &'a mut Stream,
        episode_index: u64,
        own_name: &'a str,
        peer_name: &'a str,
        is_primary: bool,
        world: Arc<dyn WorldHandle>,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            rng,
            episode_index,
            own_name,
            peer_name,
            is_primary,
            world,
            phase_timeout,
            iteration_counters: HashMap::new(),
        }
    }

    /// Run one episode-specific phase-rendezvous: register, then send, then
    /// await the peer's reply to the same phase (I2). `name` is auto-scoped
    /// to an increasing iteration counter so repeated phases within one
    /// episode (e.g. "approach" fired three times in a chase) don't collide.
    pub async fn phase(
        &mut self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<crate::message::PhaseEvent, PhaseError> {
        let iteration = {
            let counter = self.iteration_counters.entry(name.to_string()).or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };
        let kind = PhaseKind::Custom {
            name: name.to_string(),
            iteration,
        };
        crate::phase::rendezvous(
            &self.coordinator,
            &kind,
            params,
            self.episode_index,
            self.phase_timeout,
        )
        .await
    }
}
