use std::str::FromStr;

use crate::{
    db::PostgresStateDb,
    entities::{build_task_sources, build_tasks, sea_orm_active_enums},
    mapping::{
        build_status_as_expr, build_task_to_domain, db_error_to_domain, domain_build_status_to_db,
    },
    sql,
};

use apihub_common::{
    build::{BuildSource, BuildStatus, BuildTask, BuildType, NewBuildTask, TaskStatusCount},
    error::Error,
    state::BuildTaskDbTrait,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait, prelude::Expr,
};
use uuid::Uuid;

fn source_model(task: &NewBuildTask) -> Result<build_task_sources::ActiveModel, Error> {
    let (source, object_bucket, object_key) = match &task.source {
        BuildSource::None => (None, None, None),
        BuildSource::Inline(archive) => (Some(archive.clone()), None, None),
        BuildSource::ObjectStore { bucket, key } => (None, Some(bucket.clone()), Some(key.clone())),
    };

    Ok(build_task_sources::ActiveModel {
        build_id: Set(task.id),
        source: Set(source),
        object_bucket: Set(object_bucket),
        object_key: Set(object_key),
        config: Set(serde_json::to_value(&task.config)?),
    })
}

#[async_trait]
impl BuildTaskDbTrait for PostgresStateDb {
    async fn insert_build_task(&self, task: NewBuildTask) -> Result<Uuid, Error> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let source = source_model(&task)?;

        let (previous_package_id, previous_version, previous_revision) = match task.previous {
            Some(prev) => (Some(prev.package_id), Some(prev.version), Some(prev.revision)),
            None => (None, None, None),
        };

        let new_task = build_tasks::ActiveModel {
            id: Set(task.id),
            package_id: Set(task.key.package_id),
            version: Set(task.key.version),
            revision: Set(task.key.revision),
            build_type: Set(task.build_type.to_string()),
            status: Set(domain_build_status_to_db(BuildStatus::Pending)),
            details: Set(None),
            priority: Set(task.priority),
            migration_id: Set(task.migration_id),
            previous_package_id: Set(previous_package_id),
            previous_version: Set(previous_version),
            previous_revision: Set(previous_revision),
            worker_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        if let Err(db_err) = build_tasks::Entity::insert(new_task).exec(&txn).await {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Err(db_error_to_domain(db_err));
        }

        if let Err(db_err) = build_task_sources::Entity::insert(source).exec(&txn).await {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Err(db_error_to_domain(db_err));
        }

        txn.commit().await.map_err(db_error_to_domain)?;

        Ok(task.id)
    }

    async fn cancel_outstanding_tasks(&self, migration_id: Uuid) -> Result<u64, Error> {
        let res = build_tasks::Entity::update_many()
            .col_expr(
                build_tasks::Column::Status,
                build_status_as_expr(BuildStatus::Error),
            )
            .col_expr(build_tasks::Column::Details, Expr::value("cancelled"))
            .col_expr(
                build_tasks::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(build_tasks::Column::MigrationId.eq(migration_id))
            .filter(build_tasks::Column::Status.is_in([
                sea_orm_active_enums::BuildStatus::Pending,
                sea_orm_active_enums::BuildStatus::Running,
            ]))
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(res.rows_affected)
    }

    async fn count_outstanding_tasks(&self, migration_id: Uuid) -> Result<u64, Error> {
        build_tasks::Entity::find()
            .filter(build_tasks::Column::MigrationId.eq(migration_id))
            .filter(build_tasks::Column::Status.is_in([
                sea_orm_active_enums::BuildStatus::Pending,
                sea_orm_active_enums::BuildStatus::Running,
            ]))
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)
    }

    async fn count_tasks_by_status(
        &self,
        migration_id: Uuid,
    ) -> Result<Vec<TaskStatusCount>, Error> {
        let rows = self
            .conn
            .query_all(sql::task_counts(migration_id))
            .await
            .map_err(db_error_to_domain)?;

        rows.iter()
            .map(|row| {
                let build_type: String = row.try_get("", "build_type").map_err(db_error_to_domain)?;
                let status: String = row.try_get("", "status").map_err(db_error_to_domain)?;
                let count: i64 = row.try_get("", "task_count").map_err(db_error_to_domain)?;

                Ok(TaskStatusCount {
                    build_type: BuildType::from_str(&build_type).map_err(|e| {
                        Error::Internal(format!("Unknown build type '{}': {}", build_type, e))
                    })?,
                    status: BuildStatus::from_str(&status).map_err(|e| {
                        Error::Internal(format!("Unknown build status '{}': {}", status, e))
                    })?,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn list_failed_tasks(
        &self,
        migration_id: Uuid,
        limit: u64,
    ) -> Result<Vec<BuildTask>, Error> {
        let models = build_tasks::Entity::find()
            .filter(build_tasks::Column::MigrationId.eq(migration_id))
            .filter(build_tasks::Column::Status.eq(sea_orm_active_enums::BuildStatus::Error))
            .order_by_asc(build_tasks::Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        models.into_iter().map(build_task_to_domain).collect()
    }
}
