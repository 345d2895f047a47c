use sea_orm_migration::{
    prelude::{extension::postgres::Type, *},
    sea_orm::{ActiveEnum, DbBackend, Schema},
};

use crate::db_entities::{
    BuildTask, BuildTaskSource, DbBuildStatus, DbMigrationStatus, MigrationEventLog,
    MigrationRun,
};

const IDX_MIGRATION_RUNS_STATUS: &str = "idx_migration_runs_status";
const IDX_MIGRATION_RUNS_LAST_HEARTBEAT: &str = "idx_migration_runs_last_heartbeat";
const IDX_MIGRATION_RUNS_SINGLE_ACTIVE: &str = "idx_migration_runs_single_active";
const IDX_BUILD_TASKS_MIGRATION_ID_STATUS: &str = "idx_build_tasks_migration_id_status";
const IDX_BUILD_TASKS_STATUS_PRIORITY: &str = "idx_build_tasks_status_priority";
const IDX_BUILD_TASKS_VERSION_KEY: &str = "idx_build_tasks_version_key";
const IDX_EVENT_LOG_MIGRATION_ID_TIMESTAMP: &str = "idx_migration_event_log_migration_id_timestamp";
const IDX_EVENT_LOG_EVENT_TYPE: &str = "idx_migration_event_log_event_type";

const IDX_NAMES: &[&str] = &[
    IDX_MIGRATION_RUNS_STATUS,
    IDX_MIGRATION_RUNS_LAST_HEARTBEAT,
    IDX_MIGRATION_RUNS_SINGLE_ACTIVE,
    IDX_BUILD_TASKS_MIGRATION_ID_STATUS,
    IDX_BUILD_TASKS_STATUS_PRIORITY,
    IDX_BUILD_TASKS_VERSION_KEY,
    IDX_EVENT_LOG_MIGRATION_ID_TIMESTAMP,
    IDX_EVENT_LOG_EVENT_TYPE,
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db_backend = manager.get_database_backend();

        if db_backend == DbBackend::Postgres {
            let schema = Schema::new(DbBackend::Postgres);

            manager
                .create_type(schema.create_enum_from_active_enum::<DbMigrationStatus>())
                .await?;

            manager
                .create_type(schema.create_enum_from_active_enum::<DbBuildStatus>())
                .await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(MigrationRun::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MigrationRun::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MigrationRun::SequenceNumber)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(MigrationRun::PackageIds)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MigrationRun::Versions).json_binary().not_null())
                    .col(
                        ColumnDef::new(MigrationRun::ChangelogOnly)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MigrationRun::SkipValidation)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MigrationRun::Status)
                            .custom(DbMigrationStatus::name())
                            .not_null(),
                    )
                    .col(ColumnDef::new(MigrationRun::Stage).text().not_null())
                    .col(ColumnDef::new(MigrationRun::InstanceId).text().not_null())
                    .col(
                        ColumnDef::new(MigrationRun::LastHeartbeat)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(MigrationRun::ErrorDetails).text())
                    .col(ColumnDef::new(MigrationRun::PostCheckResult).json_binary())
                    .col(
                        ColumnDef::new(MigrationRun::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(MigrationRun::FinishedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(MigrationRun::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BuildTask::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(BuildTask::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(BuildTask::PackageId).text().not_null())
                    .col(ColumnDef::new(BuildTask::Version).text().not_null())
                    .col(ColumnDef::new(BuildTask::Revision).integer().not_null())
                    .col(ColumnDef::new(BuildTask::BuildType).text().not_null())
                    .col(
                        ColumnDef::new(BuildTask::Status)
                            .custom(DbBuildStatus::name())
                            .not_null(),
                    )
                    .col(ColumnDef::new(BuildTask::Details).text())
                    .col(
                        ColumnDef::new(BuildTask::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(BuildTask::MigrationId).uuid())
                    .col(ColumnDef::new(BuildTask::PreviousPackageId).text())
                    .col(ColumnDef::new(BuildTask::PreviousVersion).text())
                    .col(ColumnDef::new(BuildTask::PreviousRevision).integer())
                    .col(ColumnDef::new(BuildTask::WorkerId).text())
                    .col(
                        ColumnDef::new(BuildTask::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BuildTask::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BuildTaskSource::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BuildTaskSource::BuildId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BuildTaskSource::Source).binary())
                    .col(ColumnDef::new(BuildTaskSource::ObjectBucket).text())
                    .col(ColumnDef::new(BuildTaskSource::ObjectKey).text())
                    .col(
                        ColumnDef::new(BuildTaskSource::Config)
                            .json_binary()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_build_task_source_task")
                            .from(BuildTaskSource::Table, BuildTaskSource::BuildId)
                            .to(BuildTask::Table, BuildTask::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MigrationEventLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MigrationEventLog::EventId) // BIGSERIAL
                            .big_integer()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MigrationEventLog::MigrationId).uuid())
                    .col(
                        ColumnDef::new(MigrationEventLog::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(MigrationEventLog::EventType).text().not_null())
                    .col(ColumnDef::new(MigrationEventLog::Message).text())
                    .col(ColumnDef::new(MigrationEventLog::Metadata).json_binary())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_MIGRATION_RUNS_STATUS)
                    .table(MigrationRun::Table)
                    .col(MigrationRun::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_MIGRATION_RUNS_LAST_HEARTBEAT)
                    .table(MigrationRun::Table)
                    .col(MigrationRun::LastHeartbeat)
                    .to_owned(),
            )
            .await?;

        if db_backend == DbBackend::Postgres {
            // at most one active run, backing the in-transaction check
            manager
                .get_connection()
                .execute_unprepared(&format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {IDX_MIGRATION_RUNS_SINGLE_ACTIVE} \
                     ON migration_runs ((true)) \
                     WHERE status IN ('RUNNING', 'CANCELLING')"
                ))
                .await?;
        }

        manager
            .create_index(
                Index::create()
                    .name(IDX_BUILD_TASKS_MIGRATION_ID_STATUS)
                    .table(BuildTask::Table)
                    .col(BuildTask::MigrationId)
                    .col(BuildTask::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_BUILD_TASKS_STATUS_PRIORITY)
                    .table(BuildTask::Table)
                    .col(BuildTask::Status)
                    .col(BuildTask::Priority)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_BUILD_TASKS_VERSION_KEY)
                    .table(BuildTask::Table)
                    .col(BuildTask::PackageId)
                    .col(BuildTask::Version)
                    .col(BuildTask::Revision)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_EVENT_LOG_MIGRATION_ID_TIMESTAMP)
                    .table(MigrationEventLog::Table)
                    .col(MigrationEventLog::MigrationId)
                    .col(MigrationEventLog::Timestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_EVENT_LOG_EVENT_TYPE)
                    .table(MigrationEventLog::Table)
                    .col(MigrationEventLog::EventType)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db_backend = manager.get_database_backend();

        for idx_name in IDX_NAMES {
            manager
                .drop_index(Index::drop().name(*idx_name).if_exists().to_owned())
                .await?;
        }

        manager
            .drop_table(
                Table::drop()
                    .table(MigrationEventLog::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(BuildTaskSource::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(BuildTask::Table).if_exists().to_owned())
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(MigrationRun::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        if db_backend == DbBackend::Postgres {
            manager
                .drop_type(Type::drop().name(DbBuildStatus::name()).to_owned())
                .await?;

            manager
                .drop_type(Type::drop().name(DbMigrationStatus::name()).to_owned())
                .await?;
        }

        Ok(())
    }
}
