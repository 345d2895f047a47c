use sea_orm_migration::sea_orm::Iden;
use sea_orm_migration::sea_query;

#[derive(Iden)]
#[iden = "migration_event_log"]
pub enum MigrationEventLog {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "migration_id"]
    MigrationId,
    #[iden = "timestamp"]
    Timestamp,
    #[iden = "event_type"]
    EventType,
    #[iden = "message"]
    Message,
    #[iden = "metadata"]
    Metadata,
}
