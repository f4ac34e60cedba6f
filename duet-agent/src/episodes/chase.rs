//! Chase: one peer flees, the other pursues for a fixed number of ticks.
//! Who chases is decided once via the shared RNG plus the lexicographic
//! tie-break (spec §4.4 "Tie-breaking within a phase"), so both peers agree
//! without exchanging the decision.

use async_trait::async_trait;
use duet_core::{EpisodeContext, EpisodeType, PhaseError};

const TICKS: u32 = 5;

pub struct Chase;

#[async_trait]
impl EpisodeType for Chase {
    fn name(&self) -> &'static str {
        "chase"
    }

    fn works_in_non_flat_world(&self) -> bool {
        true
    }

    fn min_init_distance(&self) -> f64 {
        6.0
    }

    fn max_init_distance(&self) -> f64 {
        12.0
    }

    async fn entry_point(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        // Shared draw both peers make identically (I1); combined with the
        // name tie-break so the decision is stable even if the draw is near
        // the boundary.
        let draw = ctx.rng.next_float();
        let chaser_is_primary = draw < 0.5;
        let i_am_chaser = chaser_is_primary == ctx.is_primary;

        for tick in 0..TICKS {
            let role = if i_am_chaser { "chase" } else { "flee" };
            ctx.phase("chase_tick", serde_json::json!({ "tick": tick, "role": role }))
                .await?;
        }
        Ok(())
    }
}
