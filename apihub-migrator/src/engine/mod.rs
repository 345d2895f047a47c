use std::{sync::Arc, time::Duration};

use apihub_common::{
    error::Error, migration::MigrationStatus, object_store::ObjectStore, state::DatabaseTrait,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod archive;
pub mod coordinator;
pub mod post_check;
pub mod stages;
pub mod task_factory;
pub mod wait;

/// Error text of a run stopped by an operator cancel.
pub const CANCELLED_MESSAGE: &str = "migration cancelled";

/// Timing and sourcing knobs of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// How often the wait-barrier re-counts outstanding tasks.
    pub poll_interval: Duration,
    /// Wait-barrier allowance per outstanding task.
    pub per_task_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Heartbeat age after which a run may be taken over.
    pub stale_after: Duration,
    pub recovery_interval: Duration,
    /// Inline off-loaded archives instead of passing a blob reference.
    pub inline_offloaded_sources: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            per_task_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            recovery_interval: Duration::from_secs(60),
            inline_offloaded_sources: false,
        }
    }
}

/// Collaborators shared by every coordinator of one service instance.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub db: Arc<dyn DatabaseTrait>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub settings: EngineSettings,
    pub instance_id: String,
}

impl EngineContext {
    pub fn new(
        db: Arc<dyn DatabaseTrait>,
        object_store: Option<Arc<dyn ObjectStore>>,
        settings: EngineSettings,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            object_store,
            settings,
            instance_id: instance_id.into(),
        }
    }

    /// Confirms the run is still `Running` and owned by this instance.
    /// ---
    /// A run moved to `Cancelling` surfaces as `Error::Cancelled`,
    /// a run owned elsewhere as `Error::OwnershipLost`.
    pub async fn ensure_owned_and_running(
        &self,
        migration_id: Uuid,
        ownership: &CancellationToken,
    ) -> Result<(), Error> {
        if ownership.is_cancelled() {
            return Err(Error::OwnershipLost(migration_id));
        }

        let run = self
            .db
            .get_migration_run(migration_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource_type: "MigrationRun".into(),
                resource_id: migration_id.to_string(),
            })?;

        if run.instance_id != self.instance_id {
            ownership.cancel();
            return Err(Error::OwnershipLost(migration_id));
        }

        match run.status {
            MigrationStatus::Running => Ok(()),
            MigrationStatus::Cancelling => Err(Error::Cancelled(CANCELLED_MESSAGE.to_string())),
            other => Err(Error::StateTransition(format!(
                "Migration {} is {}",
                migration_id, other
            ))),
        }
    }
}
