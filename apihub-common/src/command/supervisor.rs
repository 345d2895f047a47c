use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    error::Error,
    migration::{MigrationRequest, MigrationRun},
};

/// Commands accepted by the migration supervisor of one service instance.
pub enum SupervisorCommand {
    StartMigration {
        request: MigrationRequest,
        /// Send the created run or `Error` back to the caller
        response_oneshot: oneshot::Sender<Result<MigrationRun, Error>>,
    },
    CancelMigration {
        migration_id: Uuid,
        /// Send `Ok` or `Error` back to the caller
        response_oneshot: oneshot::Sender<Result<(), Error>>,
    },
    Terminate {
        /// `true` when every local run was released cleanly
        ack_chan: oneshot::Sender<bool>,
    },
}
