use sea_orm_migration::sea_query;
use sea_orm_migration::{
    prelude::*,
    sea_orm::{DeriveActiveEnum, EnumIter},
};

#[derive(Iden)]
#[iden = "migration_runs"]
pub enum MigrationRun {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "sequence_number"]
    SequenceNumber,
    #[iden = "package_ids"]
    PackageIds,
    #[iden = "versions"]
    Versions,
    #[iden = "changelog_only"]
    ChangelogOnly,
    #[iden = "skip_validation"]
    SkipValidation,
    #[iden = "status"]
    Status,
    #[iden = "stage"]
    Stage,
    #[iden = "instance_id"]
    InstanceId,
    #[iden = "last_heartbeat"]
    LastHeartbeat,
    #[iden = "error_details"]
    ErrorDetails,
    #[iden = "post_check_result"]
    PostCheckResult,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "finished_at"]
    FinishedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

#[derive(EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "migration_status")]
pub enum DbMigrationStatus {
    #[sea_orm(string_value = "RUNNING")]
    Running,
    #[sea_orm(string_value = "COMPLETE")]
    Complete,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "CANCELLING")]
    Cancelling,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}
