//! Combat: a short sparring sequence. Combat tactics/damage resolution are
//! out of scope (§1) — each round is one phase-rendezvous carrying an
//! opaque action payload, with the attacker for the round chosen from the
//! shared stream (I1).

use async_trait::async_trait;
use duet_core::{EpisodeContext, EpisodeType, PhaseError};

const ROUNDS: u32 = 6;

pub struct Combat;

#[async_trait]
impl EpisodeType for Combat {
    fn name(&self) -> &'static str {
        "combat"
    }

    fn works_in_non_flat_world(&self) -> bool {
        true
    }

    fn min_init_distance(&self) -> f64 {
        2.0
    }

    fn max_init_distance(&self) -> f64 {
        4.0
    }

    async fn setup(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        ctx.world.effect(ctx.own_name, "resistance", 30).await?;
        Ok(())
    }

    async fn entry_point(&self, ctx: &mut EpisodeContext<'_>) -> Result<(), PhaseError> {
        for round in 0..ROUNDS {
            let attacker_is_primary = ctx.rng.next_float() < 0.5;
            let i_attack = attacker_is_primary == ctx.is_primary;
            ctx.phase("combat_round", serde_json::json!({ "round": round, "attacking": i_attack }))
                .await?;
        }
        Ok(())
    }

    async fn teardown(&self, ctx: &mut EpisodeContext<'_>) {
        let _ = ctx.world.difficulty_set("peaceful").await;
    }
}
