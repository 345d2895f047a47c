use std::time::Duration;

use apihub_common::{error::Error, migration::MigrationRun};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::EngineContext;

/// What one recovery pass changed.
#[derive(Debug, Default)]
pub struct RecoveryOutcome {
    /// Stale run this instance now owns and must resume.
    pub claimed: Option<MigrationRun>,
    /// Cancelling runs whose owner died, now `Cancelled`.
    pub cancelled: Vec<Uuid>,
}

/// Finalizes abandoned cancellations, then tries to claim a stale run.
/// ---
/// Claiming locks with lock skipping, instances racing on the
/// same run never both win it.
pub async fn recover_once(ctx: &EngineContext) -> Result<RecoveryOutcome, Error> {
    let stale_after = ctx.settings.stale_after;

    let cancelled = ctx.db.finalize_abandoned_cancellations(stale_after).await?;
    for migration_id in &cancelled {
        warn!(%migration_id, "Owner of cancelling migration is gone, marked cancelled");
    }

    let claimed = ctx
        .db
        .claim_stale_migration_run(&ctx.instance_id, stale_after)
        .await?;

    if let Some(run) = &claimed {
        info!(
            migration_id = %run.id,
            stage = %run.stage,
            instance_id = %ctx.instance_id,
            "Claimed stale migration"
        );
    }

    Ok(RecoveryOutcome { claimed, cancelled })
}

/// `interval` plus up to a fifth of it, so instances started
/// together do not probe in lock step.
pub fn jittered(interval: Duration) -> Duration {
    let max_jitter_ms = (interval.as_millis() / 5).min(u128::from(u64::MAX)) as u64;
    if max_jitter_ms == 0 {
        return interval;
    }

    interval + Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
}
