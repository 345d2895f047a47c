use sea_orm_migration::sea_query;
use sea_orm_migration::{
    prelude::*,
    sea_orm::{DeriveActiveEnum, EnumIter},
};

#[derive(Iden)]
#[iden = "build_tasks"]
pub enum BuildTask {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "package_id"]
    PackageId,
    #[iden = "version"]
    Version,
    #[iden = "revision"]
    Revision,
    #[iden = "build_type"]
    BuildType,
    #[iden = "status"]
    Status,
    #[iden = "details"]
    Details,
    #[iden = "priority"]
    Priority,
    #[iden = "migration_id"]
    MigrationId,
    #[iden = "previous_package_id"]
    PreviousPackageId,
    #[iden = "previous_version"]
    PreviousVersion,
    #[iden = "previous_revision"]
    PreviousRevision,
    #[iden = "worker_id"]
    WorkerId,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

#[derive(Iden)]
#[iden = "build_task_sources"]
pub enum BuildTaskSource {
    Table,
    #[iden = "build_id"]
    BuildId,
    #[iden = "source"]
    Source,
    #[iden = "object_bucket"]
    ObjectBucket,
    #[iden = "object_key"]
    ObjectKey,
    #[iden = "config"]
    Config,
}

#[derive(EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "build_status")]
pub enum DbBuildStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "RUNNING")]
    Running,
    #[sea_orm(string_value = "COMPLETE")]
    Complete,
    #[sea_orm(string_value = "ERROR")]
    Error,
}
