use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::Error,
    migration::{MigrationRequest, MigrationRun, MigrationStage, MigrationStatus, PostCheckResult},
};

use super::BaseDbTrait;

#[async_trait]
pub trait MigrationDbTrait: BaseDbTrait {
    //// --- READs --- ////

    async fn get_migration_run(&self, migration_id: Uuid) -> Result<Option<MigrationRun>, Error>;

    /// Gets the run currently `Running` or `Cancelling`, if any.
    async fn get_active_migration_run(&self) -> Result<Option<MigrationRun>, Error>;

    //// --- WRITEs --- ////

    /// Creates a new `Running` run owned by `instance_id`.
    /// ---
    /// Fails with `Error::Conflict` when another run is active,
    /// or when a concurrent creation won the sequence number.
    async fn create_migration_run(
        &self,
        migration_id: Uuid,
        request: &MigrationRequest,
        instance_id: &str,
    ) -> Result<MigrationRun, Error>;

    /// Persists the stage checkpoint.
    /// ---
    /// Only applies while the run is `Running` and owned by `instance_id`.
    /// Returns `false` when the condition did not hold.
    async fn update_migration_stage(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        stage: MigrationStage,
    ) -> Result<bool, Error>;

    /// Writes the post-check residuals of a run owned by `instance_id`.
    async fn record_post_check_result(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        result: &PostCheckResult,
    ) -> Result<bool, Error>;

    /// Moves a `Running` or `Cancelling` run owned by `instance_id`
    /// into a terminal status, setting `finished_at`.
    /// `Complete` is only reachable from `Running`.
    async fn finalize_migration_run(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        final_status: MigrationStatus,
        error_details: Option<String>,
    ) -> Result<bool, Error>;

    /// Refreshes the liveness timestamp of a `Running` or `Cancelling`
    /// run owned by `instance_id`.
    async fn refresh_heartbeat(&self, migration_id: Uuid, instance_id: &str)
    -> Result<bool, Error>;

    /// Claims a `Running` run whose heartbeat is older than `stale_after`
    /// and which is owned by another instance.
    /// ---
    /// Uses a row lock with lock skipping, so concurrent
    /// callers never claim the same run twice.
    async fn claim_stale_migration_run(
        &self,
        instance_id: &str,
        stale_after: Duration,
    ) -> Result<Option<MigrationRun>, Error>;

    /// Moves a `Running` run to `Cancelling` and forces every outstanding
    /// task of the run into `Error`, in one transaction.
    /// Returns the number of tasks cancelled.
    async fn request_cancellation(&self, migration_id: Uuid) -> Result<u64, Error>;

    /// Moves `Cancelling` runs with a stale heartbeat to `Cancelled`.
    /// Returns the ids of the runs finalized.
    async fn finalize_abandoned_cancellations(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<Uuid>, Error>;
}
