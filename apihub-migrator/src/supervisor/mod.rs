use std::{
    pin::Pin,
    task::{Context, Poll},
};

use apihub_common::{error::Error, migration::MigrationStatus};
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

pub mod default;

pub use default::Supervisor;

/// Coordinator task of one run, resolving to its run id and outcome.
pub struct MonitoredMigrationTask {
    migration_id: Uuid,
    handle: JoinHandle<Result<MigrationStatus, Error>>,
}

impl Future for MonitoredMigrationTask {
    type Output = (Uuid, Result<Result<MigrationStatus, Error>, JoinError>);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(join_result) => Poll::Ready((self.migration_id, join_result)),
            Poll::Pending => Poll::Pending,
        }
    }
}
