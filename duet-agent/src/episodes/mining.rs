//! Mining: peers dig in to a shared seam, reporting findings each pass.
//! Actual pathfinding/digging tactics are out of scope (§1).

use async_trait::async_trait;
use duet_core::{EpisodeContext, EpisodeType, PhaseError};

const PASSES: u32 = 4;

pub struct Mining;

#[async_trait]
impl EpisodeType for Mining {
    fn name(&self) -> &'static str {
        "mining"
    }

    fn works_in_non_flat_world(&self) -> bool {
        true
    }

    fn min_init_distance(&self) -> f64 {
        1.0
    }

    fn max_init_distance(&self) -> f64 {
        3.0
    }

    async fn setup(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        ctx.world.give(ctx.own_name, "pickaxe", 1).await?;
        Ok(())
    }

    async fn entry_point(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        for pass in 0..PASSES {
            let found_ore = ctx.rng.next_float() < 0.3;
            ctx.phase("mining_pass", serde_json::json!({ "pass": pass, "found_ore": found_ore }))
                .await?;
        }
        Ok(())
    }
}
