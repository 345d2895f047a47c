use std::str::FromStr;

use crate::entities::{
    build_tasks, migration_event_log, migration_runs, sea_orm_active_enums,
};
use apihub_common::{
    build::{BuildStatus, BuildTask, BuildType},
    catalog::VersionKey,
    error::Error,
    event::{EventLogRecord, EventType},
    migration::{MigrationRun, MigrationScope, MigrationStage, MigrationStatus},
};
use sea_orm::{
    DbErr, SqlErr,
    prelude::Expr,
    sea_query::{Alias, SimpleExpr},
};

pub(crate) const MIGRATION_STATUS_DB_ENUM_NAME: &str = "migration_status";
pub(crate) const BUILD_STATUS_DB_ENUM_NAME: &str = "build_status";

pub(crate) fn db_error_to_domain(e: DbErr) -> Error {
    Error::Database(e.to_string())
}

pub(crate) fn is_unique_violation(e: &DbErr) -> bool {
    matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

pub(crate) fn migration_run_to_domain(model: migration_runs::Model) -> Result<MigrationRun, Error> {
    let stage = MigrationStage::from_str(&model.stage).map_err(|e| {
        Error::Internal(format!(
            "Failed to parse stage '{}' of migration {}: {}",
            model.stage, model.id, e
        ))
    })?;

    let scope = MigrationScope {
        package_ids: serde_json::from_value(model.package_ids)?,
        versions: serde_json::from_value(model.versions)?,
    };

    let post_check_result = model
        .post_check_result
        .map(serde_json::from_value)
        .transpose()?;

    Ok(MigrationRun {
        id: model.id,
        sequence_number: model.sequence_number,
        scope,
        changelog_only: model.changelog_only,
        skip_validation: model.skip_validation,
        status: migration_status_to_domain(model.status),
        stage,
        instance_id: model.instance_id,
        last_heartbeat: model.last_heartbeat.into(),
        error_details: model.error_details,
        post_check_result,
        started_at: model.started_at.into(),
        finished_at: model.finished_at.map(|t| t.into()),
        updated_at: model.updated_at.into(),
    })
}

pub(crate) fn build_task_to_domain(model: build_tasks::Model) -> Result<BuildTask, Error> {
    let build_type = BuildType::from_str(&model.build_type).map_err(|e| {
        Error::Internal(format!(
            "Failed to parse build type '{}' of task {}: {}",
            model.build_type, model.id, e
        ))
    })?;

    let previous = match (
        model.previous_package_id,
        model.previous_version,
        model.previous_revision,
    ) {
        (Some(package_id), Some(version), Some(revision)) => {
            Some(VersionKey::new(package_id, version, revision))
        }
        _ => None,
    };

    Ok(BuildTask {
        id: model.id,
        key: VersionKey::new(model.package_id, model.version, model.revision),
        build_type,
        status: build_status_to_domain(model.status),
        priority: model.priority,
        migration_id: model.migration_id,
        previous,
        details: model.details,
        created_at: model.created_at.into(),
    })
}

pub(crate) fn event_log_to_domain(model: migration_event_log::Model) -> Result<EventLogRecord, Error> {
    let event_type = model.event_type.parse::<EventType>().map_err(|e| {
        Error::Internal(format!(
            "Failed to parse event type '{}': {}",
            model.event_type, e
        ))
    })?;

    Ok(EventLogRecord {
        event_id: model.event_id,
        migration_id: model.migration_id,
        timestamp: model.timestamp.into(),
        event_type,
        message: model.message,
        metadata: model.metadata,
    })
}

// Implementing From<T> for T is annoying, as the db entities are generated by SeaORM CLI
// and any manually written impls in the entities module will be overwritten
// on a fresh generation of entities.

pub(crate) fn migration_status_to_domain(
    model: sea_orm_active_enums::MigrationStatus,
) -> MigrationStatus {
    match model {
        sea_orm_active_enums::MigrationStatus::Running => MigrationStatus::Running,
        sea_orm_active_enums::MigrationStatus::Complete => MigrationStatus::Complete,
        sea_orm_active_enums::MigrationStatus::Failed => MigrationStatus::Failed,
        sea_orm_active_enums::MigrationStatus::Cancelling => MigrationStatus::Cancelling,
        sea_orm_active_enums::MigrationStatus::Cancelled => MigrationStatus::Cancelled,
    }
}

pub(crate) fn domain_migration_status_to_db(
    model: MigrationStatus,
) -> sea_orm_active_enums::MigrationStatus {
    match model {
        MigrationStatus::Running => sea_orm_active_enums::MigrationStatus::Running,
        MigrationStatus::Complete => sea_orm_active_enums::MigrationStatus::Complete,
        MigrationStatus::Failed => sea_orm_active_enums::MigrationStatus::Failed,
        MigrationStatus::Cancelling => sea_orm_active_enums::MigrationStatus::Cancelling,
        MigrationStatus::Cancelled => sea_orm_active_enums::MigrationStatus::Cancelled,
    }
}

pub(crate) fn migration_status_as_expr(model: MigrationStatus) -> SimpleExpr {
    Expr::val(model.to_string()).cast_as(Alias::new(MIGRATION_STATUS_DB_ENUM_NAME))
}

pub(crate) fn build_status_to_domain(model: sea_orm_active_enums::BuildStatus) -> BuildStatus {
    match model {
        sea_orm_active_enums::BuildStatus::Pending => BuildStatus::Pending,
        sea_orm_active_enums::BuildStatus::Running => BuildStatus::Running,
        sea_orm_active_enums::BuildStatus::Complete => BuildStatus::Complete,
        sea_orm_active_enums::BuildStatus::Error => BuildStatus::Error,
    }
}

pub(crate) fn domain_build_status_to_db(model: BuildStatus) -> sea_orm_active_enums::BuildStatus {
    match model {
        BuildStatus::Pending => sea_orm_active_enums::BuildStatus::Pending,
        BuildStatus::Running => sea_orm_active_enums::BuildStatus::Running,
        BuildStatus::Complete => sea_orm_active_enums::BuildStatus::Complete,
        BuildStatus::Error => sea_orm_active_enums::BuildStatus::Error,
    }
}

pub(crate) fn build_status_as_expr(model: BuildStatus) -> SimpleExpr {
    Expr::val(model.to_string()).cast_as(Alias::new(BUILD_STATUS_DB_ENUM_NAME))
}
