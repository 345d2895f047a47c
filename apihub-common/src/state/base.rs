use async_trait::async_trait;
use std::fmt::Debug;
use uuid::Uuid;

use crate::{
    error::Error,
    event::{EventLogRecord, EventType},
};

#[async_trait]
pub trait BaseDbTrait: Send + Sync + Debug + 'static {
    /// Appends a record to the durable migration event log.
    /// ---
    /// Should be used sparingly.
    /// State changes log their own events as part of
    /// the same transaction, this is for events that
    /// are not tied to a specific state update.
    async fn log_migration_event(
        &self,
        migration_id: Option<Uuid>,
        event_type: EventType,
        message: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), Error>;

    /// Most recent events of a run, newest first.
    async fn list_migration_events(
        &self,
        migration_id: Uuid,
        limit: u64,
    ) -> Result<Vec<EventLogRecord>, Error>;
}
