use std::time::Duration;

use apihub_common::build::{BuildStatus, BuildTask};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::MemoryStateDb;

/// Stands in for the worker pool: finishes outstanding tasks on every tick
/// with the status `outcome` picks. An outstanding status leaves the task alone.
pub(crate) struct FakeWorkerPool {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl FakeWorkerPool {
    pub(crate) fn spawn<F>(db: MemoryStateDb, every: Duration, outcome: F) -> Self
    where
        F: Fn(&BuildTask) -> BuildStatus + Send + Sync + 'static,
    {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {
                        db.finish_outstanding(&outcome).await;
                    }
                }
            }
        });

        Self { stop, handle }
    }

    /// Completes every task it sees.
    pub(crate) fn always_complete(db: MemoryStateDb) -> Self {
        Self::spawn(db, Duration::from_millis(500), |_| BuildStatus::Complete)
    }

    pub(crate) async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}
