use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::EngineContext;

/// Background heartbeat of one owned run.
/// ---
/// Keeps beating while the run is cancelling, so recovery elsewhere
/// does not finalize a cancellation this instance is still handling.
/// Stops by itself once the conditional refresh matches no row.
/// When the row names another instance by then, the run's ownership
/// token is cancelled so the local coordinator halts.
pub struct Keepalive {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Keepalive {
    pub fn spawn(ctx: EngineContext, migration_id: Uuid, ownership: CancellationToken) -> Self {
        // Child of the ownership token, losing the run also stops the heartbeat.
        let stop = ownership.child_token();
        let handle = tokio::spawn(run_keepalive(ctx, migration_id, ownership, stop.clone()));

        Self { stop, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn stop(self) {
        self.stop.cancel();

        if let Err(join_error) = self.handle.await {
            warn!("Keepalive task ended abnormally: {:?}", join_error);
        }
    }
}

async fn run_keepalive(
    ctx: EngineContext,
    migration_id: Uuid,
    ownership: CancellationToken,
    stop: CancellationToken,
) {
    let interval = ctx.settings.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!(%migration_id, "Keepalive stopped");
                return;
            }
            _ = ticker.tick() => {
                match ctx.db.refresh_heartbeat(migration_id, &ctx.instance_id).await {
                    Ok(true) => debug!(%migration_id, "Heartbeat refreshed"),
                    Ok(false) => {
                        match ctx.db.get_migration_run(migration_id).await {
                            Ok(Some(run)) if run.instance_id != ctx.instance_id => {
                                warn!(
                                    %migration_id,
                                    owner = %run.instance_id,
                                    "Migration was taken over, releasing it"
                                );
                                ownership.cancel();
                            }
                            Ok(_) => info!(%migration_id, "Migration no longer running, keepalive stops"),
                            Err(e) => warn!(%migration_id, "Failed to re-read migration after heartbeat miss: {}", e),
                        }
                        return;
                    }
                    // Transient, the next tick retries. Repeated failures let
                    // the heartbeat go stale, which hands the run over.
                    Err(e) => warn!(%migration_id, "Failed to refresh heartbeat: {}", e),
                }
            }
        }
    }
}
