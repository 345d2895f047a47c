use std::{any::Any, panic::AssertUnwindSafe};

use apihub_common::{
    error::Error,
    event::EventType,
    migration::{MigrationRun, MigrationStage, MigrationStatus},
};
use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::keepalive::Keepalive;

use super::{
    EngineContext,
    stages::{self, StageReport},
};

/// Drives one migration run through its stages.
/// ---
/// The stage is checkpointed after every transition, so a coordinator
/// started on a persisted run (fresh, resumed or taken over) continues
/// from exactly where the previous owner stopped.
pub struct MigrationCoordinator {
    ctx: EngineContext,
    run: MigrationRun,
    ownership: CancellationToken,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl MigrationCoordinator {
    pub fn new(ctx: EngineContext, run: MigrationRun, ownership: CancellationToken) -> Self {
        Self {
            ctx,
            run,
            ownership,
        }
    }

    pub fn migration_id(&self) -> Uuid {
        self.run.id
    }

    /// Runs the state machine from the run's persisted stage.
    /// ---
    /// Returns the terminal status this instance wrote, or
    /// `Error::OwnershipLost` when the run was released without
    /// writing anything.
    pub async fn start(self) -> Result<MigrationStatus, Error> {
        let keepalive = Keepalive::spawn(self.ctx.clone(), self.run.id, self.ownership.clone());

        let outcome = self.drive().await;

        keepalive.stop().await;

        outcome
    }

    async fn drive(&self) -> Result<MigrationStatus, Error> {
        let migration_id = self.run.id;
        let changelog_only = self.run.changelog_only;
        let mut stage = self.run.stage;

        if stage != MigrationStage::initial(changelog_only) {
            info!(%migration_id, %stage, "Resuming migration");
            self.log_event(
                EventType::RunResumed,
                format!("Resumed at stage {}", stage),
                json!({ "stage": stage, "instance_id": self.ctx.instance_id }),
            )
            .await;
        }

        loop {
            if stage.is_done() {
                return self.complete().await;
            }

            if let Err(e) = self.run_stage_guarded(stage).await {
                return self.fail(stage, e).await;
            }

            let Some(next) = stage.next(changelog_only) else {
                return self.complete().await;
            };

            match self
                .ctx
                .db
                .update_migration_stage(migration_id, &self.ctx.instance_id, next)
                .await
            {
                Ok(true) => stage = next,
                Ok(false) => {
                    // The checkpoint only applies to a running run we own,
                    // find out which of the two stopped holding.
                    let err = match self
                        .ctx
                        .ensure_owned_and_running(migration_id, &self.ownership)
                        .await
                    {
                        Err(e) => e,
                        Ok(()) => Error::Internal(format!(
                            "Checkpoint of stage {} was rejected",
                            next
                        )),
                    };
                    return self.fail(stage, err).await;
                }
                Err(e) => return self.fail(stage, e).await,
            }
        }
    }

    /// Runs one stage function, turning a panic into `Error::StageFault`.
    async fn run_stage_guarded(&self, stage: MigrationStage) -> Result<StageReport, Error> {
        let migration_id = self.run.id;

        info!(%migration_id, %stage, "Stage started");
        self.log_event(
            EventType::StageStarted,
            format!("Stage {} started", stage),
            json!({ "stage": stage }),
        )
        .await;

        let outcome = AssertUnwindSafe(stages::run_stage(
            &self.ctx,
            &self.run,
            &self.ownership,
            stage,
        ))
        .catch_unwind()
        .await;

        let report = match outcome {
            Ok(result) => result?,
            Err(panic) => {
                return Err(Error::StageFault(format!(
                    "stage {} panicked: {}",
                    stage,
                    panic_message(panic.as_ref())
                )));
            }
        };

        info!(
            %migration_id,
            %stage,
            rounds = report.rounds,
            tasks_created = report.tasks_created,
            "Stage completed"
        );
        self.log_event(
            EventType::StageCompleted,
            format!("Stage {} completed", stage),
            json!({
                "stage": stage,
                "rounds": report.rounds,
                "tasks_created": report.tasks_created,
            }),
        )
        .await;

        Ok(report)
    }

    async fn complete(&self) -> Result<MigrationStatus, Error> {
        let migration_id = self.run.id;

        if let Err(e) = self
            .ctx
            .ensure_owned_and_running(migration_id, &self.ownership)
            .await
        {
            return self.fail(MigrationStage::Done, e).await;
        }

        // A leftover snapshot is dropped by the next unscoped cleanup.
        if let Err(e) = self.ctx.db.drop_comparison_snapshot(migration_id).await {
            warn!(%migration_id, "Failed to drop comparison snapshot: {}", e);
        }

        match self
            .ctx
            .db
            .finalize_migration_run(
                migration_id,
                &self.ctx.instance_id,
                MigrationStatus::Complete,
                None,
            )
            .await
        {
            Ok(true) => {
                info!(%migration_id, "Migration complete");
                Ok(MigrationStatus::Complete)
            }
            Ok(false) => {
                let err = self
                    .ctx
                    .ensure_owned_and_running(migration_id, &self.ownership)
                    .await
                    .err()
                    .unwrap_or_else(|| Error::Internal("Completion was rejected".to_string()));
                self.fail(MigrationStage::Done, err).await
            }
            Err(e) => self.fail(MigrationStage::Done, e).await,
        }
    }

    /// Persists `Failed` with the error text, unless ownership was lost.
    async fn fail(&self, stage: MigrationStage, err: Error) -> Result<MigrationStatus, Error> {
        let migration_id = self.run.id;

        let details = match &err {
            Error::OwnershipLost(_) => {
                info!(%migration_id, %stage, "Migration released, another instance owns it");
                return Err(err);
            }
            Error::Cancelled(message) => {
                info!(%migration_id, %stage, "Migration cancelled");
                // Tasks inserted while the cancel landed are still outstanding.
                match self.ctx.db.cancel_outstanding_tasks(migration_id).await {
                    Ok(0) => {}
                    Ok(swept) => info!(%migration_id, "Errored {} tasks created during cancellation", swept),
                    Err(e) => warn!(%migration_id, "Failed to error outstanding tasks: {}", e),
                }
                message.clone()
            }
            other => {
                error!(%migration_id, %stage, "Stage failed: {}", other);
                self.log_event(
                    EventType::StageFailed,
                    other.to_string(),
                    json!({ "stage": stage }),
                )
                .await;
                other.to_string()
            }
        };

        let finalized = self
            .ctx
            .db
            .finalize_migration_run(
                migration_id,
                &self.ctx.instance_id,
                MigrationStatus::Failed,
                Some(details),
            )
            .await?;

        if finalized {
            Ok(MigrationStatus::Failed)
        } else {
            Err(Error::OwnershipLost(migration_id))
        }
    }

    /// Event log writes never stop the run.
    async fn log_event(&self, event_type: EventType, message: String, metadata: serde_json::Value) {
        if let Err(e) = self
            .ctx
            .db
            .log_migration_event(Some(self.run.id), event_type, message, Some(metadata))
            .await
        {
            warn!(migration_id = %self.run.id, "Failed to log {} event: {}", event_type, e);
        }
    }
}
