use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    build::{BuildTask, NewBuildTask, TaskStatusCount},
    error::Error,
};

use super::BaseDbTrait;

#[async_trait]
pub trait BuildTaskDbTrait: BaseDbTrait {
    /// Inserts a task row and its source row in one transaction.
    async fn insert_build_task(&self, task: NewBuildTask) -> Result<Uuid, Error>;

    /// Forces every `Pending` or `Running` task of a migration into `Error`.
    /// Returns the number of tasks changed.
    async fn cancel_outstanding_tasks(&self, migration_id: Uuid) -> Result<u64, Error>;

    /// Number of `Pending` + `Running` tasks tagged with `migration_id`.
    async fn count_outstanding_tasks(&self, migration_id: Uuid) -> Result<u64, Error>;

    /// Task counts of a migration grouped by build type and status.
    async fn count_tasks_by_status(&self, migration_id: Uuid)
    -> Result<Vec<TaskStatusCount>, Error>;

    /// Tasks of a migration that ended in `Error`, oldest first.
    async fn list_failed_tasks(&self, migration_id: Uuid, limit: u64)
    -> Result<Vec<BuildTask>, Error>;
}
