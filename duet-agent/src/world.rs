//! Stub world-server binding.
//!
//! The real Minecraft-protocol admin-command client is out of scope (spec
//! §1); this logs every command at debug level and succeeds after a short
//! simulated latency, which is enough to drive and test the phase engine
//! end-to-end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duet_core::error::WorldError;
use duet_core::world::{Position, WorldHandle};
use tokio::sync::Notify;

pub struct LoggingWorldHandle {
    simulated_latency: Duration,
    death: Arc<Notify>,
}

impl LoggingWorldHandle {
    pub fn new(simulated_latency: Duration) -> Self {
        Self {
            simulated_latency,
            death: Arc::new(Notify::new()),
        }
    }

    /// Test/fault-injection hook: simulate a death event for the owning
    /// agent, waking any in-flight `watch_death` call.
    pub fn inject_death(&self) {
        self.death.notify_waiters();
    }
}

#[async_trait]
impl WorldHandle for LoggingWorldHandle {
    async fn teleport(&self, agent: &str, pos: Position) -> Result<(), WorldError> {
        tracing::debug!(agent, ?pos, "world: teleport");
        tokio::time::sleep(self.simulated_latency).await;
        Ok(())
    }

    async fn summon(&self, entity: &str, pos: Position) -> Result<(), WorldError> {
        tracing::debug!(entity, ?pos, "world: summon");
        tokio::time::sleep(self.simulated_latency).await;
        Ok(())
    }

    async fn give(&self, agent: &str, item: &str, count: u32) -> Result<(), WorldError> {
        tracing::debug!(agent, item, count, "world: give");
        tokio::time::sleep(self.simulated_latency).await;
        Ok(())
    }

    async fn effect(&self, agent: &str, effect: &str, duration_secs: u32) -> Result<(), WorldError> {
        tracing::debug!(agent, effect, duration_secs, "world: effect");
        tokio::time::sleep(self.simulated_latency).await;
        Ok(())
    }

    async fn rule_set(&self, rule: &str, value: &str) -> Result<(), WorldError> {
        tracing::debug!(rule, value, "world: rule_set");
        Ok(())
    }

    async fn difficulty_set(&self, difficulty: &str) -> Result<(), WorldError> {
        tracing::debug!(difficulty, "world: difficulty_set");
        Ok(())
    }

    async fn watch_death(&self, agent: &str) {
        tracing::trace!(agent, "world: watching for death event");
        self.death.notified().await;
        tracing::info!(agent, "world: death event observed");
    }
}
