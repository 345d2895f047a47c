use apihub_common::error::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::EngineContext;

/// Blocks until no task tagged with `migration_id` is pending or running.
/// ---
/// The overall timeout is `outstanding at entry * per_task_timeout`.
/// Returns the number of tasks that were outstanding at entry.
pub async fn wait_for_outstanding(
    ctx: &EngineContext,
    migration_id: Uuid,
    ownership: &CancellationToken,
) -> Result<u64, Error> {
    let total = ctx.db.count_outstanding_tasks(migration_id).await?;
    if total == 0 {
        return Ok(0);
    }

    let timeout = ctx
        .settings
        .per_task_timeout
        .saturating_mul(u32::try_from(total).unwrap_or(u32::MAX));
    let deadline = tokio::time::sleep_until(Instant::now() + timeout);
    tokio::pin!(deadline);

    let poll_interval = ctx.settings.poll_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(%migration_id, "Waiting for {} outstanding tasks", total);

    let mut outstanding = total;
    loop {
        tokio::select! {
            _ = ownership.cancelled() => {
                return Err(Error::OwnershipLost(migration_id));
            }
            _ = &mut deadline => {
                return Err(Error::Timeout(format!(
                    "{} of {} tasks of migration {} still outstanding after {:?}",
                    outstanding, total, migration_id, timeout
                )));
            }
            _ = ticker.tick() => {
                outstanding = ctx.db.count_outstanding_tasks(migration_id).await?;
                info!(
                    %migration_id,
                    "finished {} / {}",
                    total.saturating_sub(outstanding),
                    total
                );

                if outstanding == 0 {
                    return Ok(total);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        engine::task_factory::create_comparison_task,
        testing::{FakeWorkerPool, MemoryStateDb, key, pair, test_context},
    };

    use super::*;

    async fn seed_tasks(ctx: &EngineContext, migration_id: Uuid, count: i32) {
        for revision in 1..=count {
            let comparison = pair(key("a", "2", revision), key("a", "1", 1));
            create_comparison_task(ctx, &comparison, migration_id)
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_outstanding_returns_at_once() {
        let db = MemoryStateDb::new();
        let ctx = test_context(&db, "node-1");

        let waited = wait_for_outstanding(&ctx, Uuid::new_v4(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(waited, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_drained() {
        let db = MemoryStateDb::new();
        let ctx = test_context(&db, "node-1");
        let migration_id = Uuid::new_v4();
        seed_tasks(&ctx, migration_id, 3).await;

        let worker = FakeWorkerPool::always_complete(db.clone());
        let waited = wait_for_outstanding(&ctx, migration_id, &CancellationToken::new())
            .await
            .unwrap();
        worker.stop().await;

        assert_eq!(waited, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_scales_with_outstanding() {
        let db = MemoryStateDb::new();
        let ctx = test_context(&db, "node-1");
        let migration_id = Uuid::new_v4();
        seed_tasks(&ctx, migration_id, 2).await;

        let started = Instant::now();
        let err = wait_for_outstanding(&ctx, migration_id, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(120) && elapsed < Duration::from_secs(121));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_ownership_interrupts_wait() {
        let db = MemoryStateDb::new();
        let ctx = test_context(&db, "node-1");
        let migration_id = Uuid::new_v4();
        seed_tasks(&ctx, migration_id, 1).await;

        let ownership = CancellationToken::new();
        let canceller = ownership.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let err = wait_for_outstanding(&ctx, migration_id, &ownership)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OwnershipLost(id) if id == migration_id));
    }
}
