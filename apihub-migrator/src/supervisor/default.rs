use std::{collections::HashMap, sync::Arc, time::Duration};

use apihub_common::{
    command::{CommandRouter, SupervisorCommand},
    error::Error,
    migration::{MigrationRun, MigrationStatus},
};
use futures::{StreamExt, stream::FuturesUnordered};
use tokio::{sync::mpsc, task::JoinError, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    engine::{EngineContext, coordinator::MigrationCoordinator},
    recovery::{jittered, recover_once},
};

use super::MonitoredMigrationTask;

/// How long `Terminate` waits for released coordinators to stop.
const TERMINATE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-lived task of one service instance.
/// ---
/// Multiplexes operator commands, the recovery tick and
/// the coordinator tasks of the runs this instance owns.
pub struct Supervisor {
    ctx: EngineContext,
    command_rx: mpsc::Receiver<SupervisorCommand>,
    /// Ownership token of every run a local coordinator is driving.
    active_runs: HashMap<Uuid, CancellationToken>,
    active_tasks: FuturesUnordered<MonitoredMigrationTask>,
}

impl Supervisor {
    /// Subscribes to `SupervisorCommand`s, the handler
    /// must already be registered on the router.
    pub async fn new(ctx: EngineContext, cmd_router: Arc<CommandRouter>) -> Result<Self, Error> {
        let command_rx = cmd_router.subscribe::<SupervisorCommand>().await?;

        Ok(Self {
            ctx,
            command_rx,
            active_runs: HashMap::new(),
            active_tasks: FuturesUnordered::new(),
        })
    }

    pub fn active_run_ids(&self) -> Vec<Uuid> {
        self.active_runs.keys().copied().collect()
    }

    /// Runs until `Terminate` is received or the command channel closes.
    pub async fn run_main_loop(&mut self) -> Result<(), Error> {
        self.resume_own_runs().await;

        // First recovery pass right away, jittered ticks after that.
        let recovery = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(recovery);

        loop {
            tokio::select! {
                maybe_command = self.command_rx.recv() => {
                    let Some(command) = maybe_command else {
                        error!("Supervisor command channel was closed");
                        return Err(Error::ChannelComm(
                            "Supervisor command channel closed".to_string(),
                        ));
                    };

                    if let Some(ack_chan) = self.handle_command(command).await {
                        let graceful = self.release_all().await;
                        if ack_chan.send(graceful).is_err() {
                            warn!("Terminate requester went away before the ack");
                        }
                        return Ok(());
                    }
                },

                _ = &mut recovery => {
                    self.recovery_tick().await;
                    recovery
                        .as_mut()
                        .reset(Instant::now() + jittered(self.ctx.settings.recovery_interval));
                },

                Some((migration_id, join_outcome)) = self.active_tasks.next(), if !self.active_tasks.is_empty() => {
                    self.on_coordinator_finished(migration_id, join_outcome).await;
                }
            }
        }
    }

    /// Handles one command. Returns the ack channel on `Terminate`.
    async fn handle_command(
        &mut self,
        command: SupervisorCommand,
    ) -> Option<tokio::sync::oneshot::Sender<bool>> {
        match command {
            SupervisorCommand::StartMigration {
                request,
                response_oneshot,
            } => {
                let created = self
                    .ctx
                    .db
                    .create_migration_run(Uuid::new_v4(), &request, &self.ctx.instance_id)
                    .await;

                match created {
                    Ok(run) => {
                        info!(
                            migration_id = %run.id,
                            sequence_number = run.sequence_number,
                            "Migration created"
                        );
                        self.spawn_coordinator(run.clone());
                        let _ = response_oneshot.send(Ok(run));
                    }
                    Err(err) => {
                        warn!("Migration not started: {}", err);
                        let _ = response_oneshot.send(Err(err));
                    }
                }

                None
            }
            SupervisorCommand::CancelMigration {
                migration_id,
                response_oneshot,
            } => {
                // The owning coordinator notices at its next status check.
                let result = self
                    .ctx
                    .db
                    .request_cancellation(migration_id)
                    .await
                    .map(|cancelled_tasks| {
                        info!(%migration_id, cancelled_tasks, "Migration cancellation requested");
                    });

                let _ = response_oneshot.send(result);

                None
            }
            SupervisorCommand::Terminate { ack_chan } => Some(ack_chan),
        }
    }

    fn spawn_coordinator(&mut self, run: MigrationRun) {
        let migration_id = run.id;
        if self.active_runs.contains_key(&migration_id) {
            debug!(%migration_id, "Coordinator already running locally");
            return;
        }

        let ownership = CancellationToken::new();
        let coordinator = MigrationCoordinator::new(self.ctx.clone(), run, ownership.clone());
        let handle = tokio::spawn(coordinator.start());

        self.active_runs.insert(migration_id, ownership);
        self.active_tasks.push(MonitoredMigrationTask {
            migration_id,
            handle,
        });
    }

    /// Picks up active runs still registered to this instance id,
    /// e.g. after a restart with a fixed instance id.
    async fn resume_own_runs(&mut self) {
        match self.ctx.db.get_active_migration_run().await {
            Ok(Some(run)) if run.instance_id == self.ctx.instance_id => {
                info!(migration_id = %run.id, stage = %run.stage, "Resuming own migration");
                self.spawn_coordinator(run);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to look up own active migration: {}", e),
        }
    }

    async fn recovery_tick(&mut self) {
        match recover_once(&self.ctx).await {
            Ok(outcome) => {
                if let Some(run) = outcome.claimed {
                    self.spawn_coordinator(run);
                }
            }
            Err(e) => warn!("Recovery pass failed: {}", e),
        }
    }

    async fn on_coordinator_finished(
        &mut self,
        migration_id: Uuid,
        join_outcome: Result<Result<MigrationStatus, Error>, JoinError>,
    ) {
        self.active_runs.remove(&migration_id);

        let failure = match join_outcome {
            Ok(Ok(status)) => {
                info!(%migration_id, %status, "Coordinator finished");
                return;
            }
            Ok(Err(Error::OwnershipLost(_))) => {
                info!(%migration_id, "Coordinator released the migration");
                return;
            }
            Ok(Err(e)) => {
                error!(%migration_id, "Coordinator ended with an error: {}", e);
                e.to_string()
            }
            Err(join_error) => {
                error!(%migration_id, "Coordinator task panicked: {:?}", join_error);
                format!("coordinator task panicked: {}", join_error)
            }
        };

        // The run would otherwise stay running under this instance id.
        match self
            .ctx
            .db
            .finalize_migration_run(
                migration_id,
                &self.ctx.instance_id,
                MigrationStatus::Failed,
                Some(failure),
            )
            .await
        {
            Ok(true) => warn!(%migration_id, "Migration marked failed"),
            Ok(false) => debug!(%migration_id, "Migration was already finalized"),
            Err(e) => error!(%migration_id, "Failed to mark migration failed: {}", e),
        }
    }

    /// Releases every local run without writing a status, so another
    /// instance can take them over once the heartbeat goes stale.
    /// Returns `true` when every coordinator stopped in time.
    async fn release_all(&mut self) -> bool {
        for (migration_id, ownership) in self.active_runs.drain() {
            info!(%migration_id, "Releasing migration for shutdown");
            ownership.cancel();
        }

        let drain = async {
            while let Some((migration_id, outcome)) = self.active_tasks.next().await {
                debug!(%migration_id, ok = outcome.is_ok(), "Coordinator stopped");
            }
        };

        match tokio::time::timeout(TERMINATE_DRAIN_TIMEOUT, drain).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Timed out waiting for coordinators to stop");
                false
            }
        }
    }
}
