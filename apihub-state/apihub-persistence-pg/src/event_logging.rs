use apihub_common::{error::Error, event::EventType};
use chrono::Utc;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr, EntityTrait};
use uuid::Uuid;

use crate::{entities::migration_event_log, mapping::db_error_to_domain};

fn event_model(
    migration_id: Option<Uuid>,
    event_type: EventType,
    message: Option<String>,
    metadata: Option<serde_json::Value>,
) -> migration_event_log::ActiveModel {
    migration_event_log::ActiveModel {
        migration_id: Set(migration_id),
        event_type: Set(event_type.to_string()),
        message: Set(message),
        metadata: Set(metadata),
        timestamp: Set(Utc::now().into()),
        ..Default::default()
    }
}

/// Appends an event as part of an open transaction.
pub(crate) async fn log_event_in_txn<C: ConnectionTrait>(
    txn: &C,
    migration_id: Option<Uuid>,
    event_type: EventType,
    message: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<(), DbErr> {
    migration_event_log::Entity::insert(event_model(migration_id, event_type, message, metadata))
        .exec(txn)
        .await?;

    Ok(())
}

pub(crate) async fn log_event_direct(
    conn: &sea_orm::DatabaseConnection,
    migration_id: Option<Uuid>,
    event_type: EventType,
    message: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<(), Error> {
    migration_event_log::Entity::insert(event_model(migration_id, event_type, message, metadata))
        .exec(conn)
        .await
        .map_err(db_error_to_domain)?;

    Ok(())
}
