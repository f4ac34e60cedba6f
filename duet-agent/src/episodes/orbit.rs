//! Orbit: both peers circle a shared center point, exchanging a tick phase
//! each lap so their drift stays correlated.

use async_trait::async_trait;
use duet_core::{EpisodeContext, EpisodeType, PhaseError};

const LAPS: u32 = 3;

pub struct Orbit;

#[async_trait]
impl EpisodeType for Orbit {
    fn name(&self) -> &'static str {
        "orbit"
    }

    fn works_in_non_flat_world(&self) -> bool {
        true
    }

    fn min_init_distance(&self) -> f64 {
        4.0
    }

    fn max_init_distance(&self) -> f64 {
        6.0
    }

    async fn entry_point(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        // Both peers draw the same orbit radius from the shared stream (I1)
        // so their circles stay concentric without exchanging it.
        let radius = 3.0 + ctx.rng.next_float() * 2.0;

        for lap in 0..LAPS {
            ctx.phase("orbit_tick", serde_json::json!({ "lap": lap, "radius": radius }))
                .await?;
        }
        Ok(())
    }
}
