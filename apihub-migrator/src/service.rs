use std::sync::Arc;

use apihub_common::{
    command::{CommandRouter, SupervisorCommand},
    error::Error,
    migration::{MigrationRequest, MigrationRun},
    state::DatabaseTrait,
};
use chrono::Utc;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::report::{MigrationReport, build_report};

/// Entry point of the control surface.
/// ---
/// Start and cancel go through the supervisor of this instance,
/// reads go straight to the database.
#[derive(Clone)]
pub struct MigrationService {
    cmd_router: Arc<CommandRouter>,
    db: Arc<dyn DatabaseTrait>,
}

fn validate_request(request: &MigrationRequest) -> Result<(), Error> {
    let blank = |values: &[String]| values.iter().any(|v| v.trim().is_empty());

    if blank(&request.scope.package_ids) {
        return Err(Error::InvalidInput(
            "package ids of a migration scope must not be blank".to_string(),
        ));
    }
    if blank(&request.scope.versions) {
        return Err(Error::InvalidInput(
            "versions of a migration scope must not be blank".to_string(),
        ));
    }

    Ok(())
}

impl MigrationService {
    pub fn new(cmd_router: Arc<CommandRouter>, db: Arc<dyn DatabaseTrait>) -> Self {
        Self { cmd_router, db }
    }

    /// Creates a run and starts its coordinator on this instance.
    /// Fails with `Error::Conflict` while another run is active.
    pub async fn start_migration(&self, request: MigrationRequest) -> Result<MigrationRun, Error> {
        validate_request(&request)?;

        let (response_oneshot, response) = oneshot::channel();
        self.cmd_router
            .dispatch(SupervisorCommand::StartMigration {
                request,
                response_oneshot,
            })
            .await?;

        response.await.map_err(|e| {
            Error::ChannelComm(format!("Supervisor dropped the start response: {}", e))
        })?
    }

    pub async fn cancel_migration(&self, migration_id: Uuid) -> Result<(), Error> {
        let (response_oneshot, response) = oneshot::channel();
        self.cmd_router
            .dispatch(SupervisorCommand::CancelMigration {
                migration_id,
                response_oneshot,
            })
            .await?;

        response.await.map_err(|e| {
            Error::ChannelComm(format!("Supervisor dropped the cancel response: {}", e))
        })?
    }

    pub async fn get_report(&self, migration_id: Uuid) -> Result<MigrationReport, Error> {
        build_report(self.db.as_ref(), migration_id, Utc::now()).await
    }

    pub async fn get_active_migration(&self) -> Result<Option<MigrationRun>, Error> {
        self.db.get_active_migration_run().await
    }
}
