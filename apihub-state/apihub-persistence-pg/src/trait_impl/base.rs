use apihub_common::{
    error::Error,
    event::{EventLogRecord, EventType},
    state::BaseDbTrait,
};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::{
    db::PostgresStateDb,
    entities::migration_event_log,
    event_logging::log_event_direct,
    mapping::{db_error_to_domain, event_log_to_domain},
};

#[async_trait]
impl BaseDbTrait for PostgresStateDb {
    async fn log_migration_event(
        &self,
        migration_id: Option<Uuid>,
        event_type: EventType,
        message: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        log_event_direct(&self.conn, migration_id, event_type, Some(message), metadata).await
    }

    async fn list_migration_events(
        &self,
        migration_id: Uuid,
        limit: u64,
    ) -> Result<Vec<EventLogRecord>, Error> {
        let models = migration_event_log::Entity::find()
            .filter(migration_event_log::Column::MigrationId.eq(migration_id))
            .order_by_desc(migration_event_log::Column::EventId)
            .limit(limit)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        models.into_iter().map(event_log_to_domain).collect()
    }
}
