use async_trait::async_trait;
use uuid::Uuid;

use crate::{error::Error, object_store::BlobRef};

use super::BaseDbTrait;

#[async_trait]
pub trait MaintenanceDbTrait: BaseDbTrait {
    /// Copies the comparison table into a table namespaced by `migration_id`.
    /// Replaces a leftover snapshot of the same run.
    async fn create_comparison_snapshot(&self, migration_id: Uuid) -> Result<(), Error>;

    async fn drop_comparison_snapshot(&self, migration_id: Uuid) -> Result<(), Error>;

    /// Object-store blobs referenced by tasks of terminal runs other than `current`.
    async fn list_stale_source_blobs(&self, current: Uuid) -> Result<Vec<BlobRef>, Error>;

    /// Deletes the tasks of terminal runs other than `current`.
    /// Returns the number of tasks deleted.
    async fn purge_previous_migration_tasks(&self, current: Uuid) -> Result<u64, Error>;

    /// Drops snapshot tables left behind by runs that are no longer active.
    /// Returns the names of the dropped tables.
    async fn drop_stale_snapshots(&self, current: Uuid) -> Result<Vec<String>, Error>;
}
