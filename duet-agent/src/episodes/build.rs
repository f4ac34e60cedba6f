//! Collaborative building: peers alternate placement turns on a shared
//! structure. Does not implement any actual building pattern (out of
//! scope, §1) — each turn is a single phase-rendezvous carrying an opaque
//! "placement" payload.

use async_trait::async_trait;
use duet_core::{EpisodeContext, EpisodeType, PhaseError};

const TURNS: u32 = 4;

pub struct CollaborativeBuild;

#[async_trait]
impl EpisodeType for CollaborativeBuild {
    fn name(&self) -> &'static str {
        "collaborative_build"
    }

    fn works_in_non_flat_world(&self) -> bool {
        false
    }

    fn min_init_distance(&self) -> f64 {
        2.0
    }

    fn max_init_distance(&self) -> f64 {
        4.0
    }

    async fn setup(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        ctx.world
            .give(ctx.own_name, "building_blocks", 64)
            .await?;
        Ok(())
    }

    async fn entry_point(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        for turn in 0..TURNS {
            // Even turns: the primary places; odd turns: the secondary.
            let my_turn = (turn % 2 == 0) == ctx.is_primary;
            ctx.phase(
                "build_turn",
                serde_json::json!({ "turn": turn, "placing": my_turn }),
            )
            .await?;
        }
        Ok(())
    }
}
