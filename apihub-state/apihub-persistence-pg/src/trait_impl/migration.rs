use std::time::Duration;

use crate::{
    db::PostgresStateDb,
    entities::{build_tasks, migration_runs, sea_orm_active_enums},
    event_logging::{log_event_direct, log_event_in_txn},
    mapping::{
        build_status_as_expr, db_error_to_domain, domain_migration_status_to_db,
        is_unique_violation, migration_run_to_domain, migration_status_as_expr,
    },
    sql,
};

use apihub_common::{
    build::BuildStatus,
    error::Error,
    event::EventType,
    migration::{MigrationRequest, MigrationRun, MigrationStage, MigrationStatus, PostCheckResult},
    state::MigrationDbTrait,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, TransactionTrait, prelude::Expr,
};
use serde_json::json;
use uuid::Uuid;

const ACTIVE_STATUSES: [sea_orm_active_enums::MigrationStatus; 2] = [
    sea_orm_active_enums::MigrationStatus::Running,
    sea_orm_active_enums::MigrationStatus::Cancelling,
];

const CANCELLED_MESSAGE: &str = "migration cancelled";

fn final_event_type(status: MigrationStatus) -> Result<EventType, Error> {
    match status {
        MigrationStatus::Complete => Ok(EventType::RunCompleted),
        MigrationStatus::Failed => Ok(EventType::RunFailed),
        MigrationStatus::Cancelled => Ok(EventType::RunCancelled),
        other => Err(Error::StateTransition(format!(
            "{other} is not a terminal migration status"
        ))),
    }
}

#[async_trait]
impl MigrationDbTrait for PostgresStateDb {
    async fn get_migration_run(&self, migration_id: Uuid) -> Result<Option<MigrationRun>, Error> {
        let maybe_model = migration_runs::Entity::find_by_id(migration_id)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        maybe_model.map(migration_run_to_domain).transpose()
    }

    async fn get_active_migration_run(&self) -> Result<Option<MigrationRun>, Error> {
        let maybe_model = migration_runs::Entity::find()
            .filter(migration_runs::Column::Status.is_in(ACTIVE_STATUSES))
            .order_by_desc(migration_runs::Column::SequenceNumber)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        maybe_model.map(migration_run_to_domain).transpose()
    }

    async fn create_migration_run(
        &self,
        migration_id: Uuid,
        request: &MigrationRequest,
        instance_id: &str,
    ) -> Result<MigrationRun, Error> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        let active = migration_runs::Entity::find()
            .filter(migration_runs::Column::Status.is_in(ACTIVE_STATUSES))
            .count(&txn)
            .await
            .map_err(db_error_to_domain)?;

        if active > 0 {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Err(Error::Conflict(
                "Another migration is already in progress".to_string(),
            ));
        }

        let next_seq = txn
            .query_one(sql::next_sequence_number())
            .await
            .map_err(db_error_to_domain)?
            .map(|row| row.try_get::<i64>("", "next_seq"))
            .transpose()
            .map_err(db_error_to_domain)?
            .unwrap_or(1);

        let new_run = migration_runs::ActiveModel {
            id: Set(migration_id),
            sequence_number: Set(next_seq),
            package_ids: Set(serde_json::to_value(&request.scope.package_ids)?),
            versions: Set(serde_json::to_value(&request.scope.versions)?),
            changelog_only: Set(request.changelog_only),
            skip_validation: Set(request.skip_validation),
            status: Set(domain_migration_status_to_db(MigrationStatus::Running)),
            stage: Set(MigrationStage::initial(request.changelog_only).to_string()),
            instance_id: Set(instance_id.to_string()),
            last_heartbeat: Set(now),
            error_details: Set(None),
            post_check_result: Set(None),
            started_at: Set(now),
            finished_at: Set(None),
            updated_at: Set(now),
        };

        let model = match migration_runs::Entity::insert(new_run)
            .exec_with_returning(&txn)
            .await
        {
            Ok(model) => model,
            Err(db_err) => {
                txn.rollback().await.map_err(db_error_to_domain)?;

                // Either the sequence number or the single-active index
                // was taken by a concurrent creation.
                if is_unique_violation(&db_err) {
                    return Err(Error::Conflict(
                        "Another migration is already in progress".to_string(),
                    ));
                }

                log_event_direct(
                    &self.conn,
                    None,
                    EventType::EngineEvent,
                    Some(format!("Failed to insert migration run: {}", db_err)),
                    None,
                )
                .await?;

                return Err(db_error_to_domain(db_err));
            }
        };

        if let Err(db_err) = log_event_in_txn(
            &txn,
            Some(migration_id),
            EventType::RunCreated,
            Some(format!("Migration #{} created", next_seq)),
            Some(json!({
                "instance_id": instance_id,
                "scope": request.scope,
                "changelog_only": request.changelog_only,
                "skip_validation": request.skip_validation,
            })),
        )
        .await
        {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Err(db_error_to_domain(db_err));
        }

        txn.commit().await.map_err(db_error_to_domain)?;

        migration_run_to_domain(model)
    }

    async fn update_migration_stage(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        stage: MigrationStage,
    ) -> Result<bool, Error> {
        let res = migration_runs::Entity::update_many()
            .col_expr(migration_runs::Column::Stage, Expr::value(stage.to_string()))
            .col_expr(
                migration_runs::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(migration_runs::Column::Id.eq(migration_id))
            .filter(migration_runs::Column::InstanceId.eq(instance_id))
            .filter(
                migration_runs::Column::Status.eq(sea_orm_active_enums::MigrationStatus::Running),
            )
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(res.rows_affected > 0)
    }

    async fn record_post_check_result(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        result: &PostCheckResult,
    ) -> Result<bool, Error> {
        let res = migration_runs::Entity::update_many()
            .col_expr(
                migration_runs::Column::PostCheckResult,
                Expr::value(serde_json::to_value(result)?),
            )
            .col_expr(
                migration_runs::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(migration_runs::Column::Id.eq(migration_id))
            .filter(migration_runs::Column::InstanceId.eq(instance_id))
            .filter(migration_runs::Column::Status.is_in(ACTIVE_STATUSES))
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(res.rows_affected > 0)
    }

    async fn finalize_migration_run(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        final_status: MigrationStatus,
        error_details: Option<String>,
    ) -> Result<bool, Error> {
        let event_type = final_event_type(final_status)?;

        // A run an operator started cancelling can fail, never complete.
        let allowed_from: Vec<sea_orm_active_enums::MigrationStatus> = match final_status {
            MigrationStatus::Complete => vec![sea_orm_active_enums::MigrationStatus::Running],
            _ => ACTIVE_STATUSES.to_vec(),
        };

        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        let update_res = migration_runs::Entity::update_many()
            .col_expr(
                migration_runs::Column::Status,
                migration_status_as_expr(final_status),
            )
            .col_expr(
                migration_runs::Column::ErrorDetails,
                Expr::value(error_details.clone()),
            )
            .col_expr(
                migration_runs::Column::FinishedAt,
                Expr::current_timestamp().into(),
            )
            .col_expr(
                migration_runs::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(migration_runs::Column::Id.eq(migration_id))
            .filter(migration_runs::Column::InstanceId.eq(instance_id))
            .filter(migration_runs::Column::Status.is_in(allowed_from))
            .exec(&txn)
            .await;

        match update_res {
            Ok(res) if res.rows_affected > 0 => {
                if let Err(db_err) = log_event_in_txn(
                    &txn,
                    Some(migration_id),
                    event_type,
                    error_details,
                    Some(json!({ "instance_id": instance_id })),
                )
                .await
                {
                    txn.rollback().await.map_err(db_error_to_domain)?;
                    return Err(db_error_to_domain(db_err));
                }

                txn.commit().await.map_err(db_error_to_domain)?;

                Ok(true)
            }
            Ok(_) => {
                txn.rollback().await.map_err(db_error_to_domain)?;

                Ok(false)
            }
            Err(db_err) => {
                txn.rollback().await.map_err(db_error_to_domain)?;

                log_event_direct(
                    &self.conn,
                    Some(migration_id),
                    EventType::EngineEvent,
                    Some(format!("Failed to finalize migration run: {}", db_err)),
                    None,
                )
                .await?;

                Err(db_error_to_domain(db_err))
            }
        }
    }

    async fn refresh_heartbeat(
        &self,
        migration_id: Uuid,
        instance_id: &str,
    ) -> Result<bool, Error> {
        let res = migration_runs::Entity::update_many()
            .col_expr(
                migration_runs::Column::LastHeartbeat,
                Expr::current_timestamp().into(),
            )
            .filter(migration_runs::Column::Id.eq(migration_id))
            .filter(migration_runs::Column::InstanceId.eq(instance_id))
            // A live owner keeps a cancelling run fresh until it finalizes it.
            .filter(migration_runs::Column::Status.is_in(ACTIVE_STATUSES))
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(res.rows_affected > 0)
    }

    async fn claim_stale_migration_run(
        &self,
        instance_id: &str,
        stale_after: Duration,
    ) -> Result<Option<MigrationRun>, Error> {
        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        let maybe_row = txn
            .query_one(sql::lock_stale_run(instance_id, stale_after.as_secs_f64()))
            .await
            .map_err(db_error_to_domain)?;

        let Some(row) = maybe_row else {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Ok(None);
        };

        let migration_id: Uuid = row.try_get("", "id").map_err(db_error_to_domain)?;

        let previous_owner = migration_runs::Entity::find_by_id(migration_id)
            .one(&txn)
            .await
            .map_err(db_error_to_domain)?
            .map(|model| model.instance_id);

        migration_runs::Entity::update_many()
            .col_expr(
                migration_runs::Column::InstanceId,
                Expr::value(instance_id.to_string()),
            )
            .col_expr(
                migration_runs::Column::LastHeartbeat,
                Expr::current_timestamp().into(),
            )
            .col_expr(
                migration_runs::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(migration_runs::Column::Id.eq(migration_id))
            .exec(&txn)
            .await
            .map_err(db_error_to_domain)?;

        let model = migration_runs::Entity::find_by_id(migration_id)
            .one(&txn)
            .await
            .map_err(db_error_to_domain)?
            .ok_or_else(|| Error::NotFound {
                resource_type: "MigrationRun".into(),
                resource_id: migration_id.to_string(),
            })?;

        if let Err(db_err) = log_event_in_txn(
            &txn,
            Some(migration_id),
            EventType::RunTakenOver,
            Some(format!("Migration taken over by {}", instance_id)),
            Some(json!({
                "instance_id": instance_id,
                "previous_instance_id": previous_owner,
                "stage": model.stage,
            })),
        )
        .await
        {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Err(db_error_to_domain(db_err));
        }

        txn.commit().await.map_err(db_error_to_domain)?;

        migration_run_to_domain(model).map(Some)
    }

    async fn request_cancellation(&self, migration_id: Uuid) -> Result<u64, Error> {
        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        let run_res = migration_runs::Entity::update_many()
            .col_expr(
                migration_runs::Column::Status,
                migration_status_as_expr(MigrationStatus::Cancelling),
            )
            .col_expr(
                migration_runs::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(migration_runs::Column::Id.eq(migration_id))
            .filter(
                migration_runs::Column::Status.eq(sea_orm_active_enums::MigrationStatus::Running),
            )
            .exec(&txn)
            .await
            .map_err(db_error_to_domain)?;

        if run_res.rows_affected == 0 {
            txn.rollback().await.map_err(db_error_to_domain)?;

            return match self.get_migration_run(migration_id).await? {
                Some(run) => Err(Error::StateTransition(format!(
                    "Migration {} is {}, only running migrations can be cancelled",
                    migration_id, run.status
                ))),
                None => Err(Error::NotFound {
                    resource_type: "MigrationRun".into(),
                    resource_id: migration_id.to_string(),
                }),
            };
        }

        let tasks_res = build_tasks::Entity::update_many()
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
            .exec(&txn)
            .await
            .map_err(db_error_to_domain)?;

        if let Err(db_err) = log_event_in_txn(
            &txn,
            Some(migration_id),
            EventType::RunCancelling,
            Some("Migration cancellation requested".to_string()),
            Some(json!({ "cancelled_tasks": tasks_res.rows_affected })),
        )
        .await
        {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Err(db_error_to_domain(db_err));
        }

        txn.commit().await.map_err(db_error_to_domain)?;

        Ok(tasks_res.rows_affected)
    }

    async fn finalize_abandoned_cancellations(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<Uuid>, Error> {
        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        let rows = txn
            .query_all(sql::lock_abandoned_cancellations(stale_after.as_secs_f64()))
            .await
            .map_err(db_error_to_domain)?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid>("", "id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error_to_domain)?;

        if ids.is_empty() {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Ok(ids);
        }

        migration_runs::Entity::update_many()
            .col_expr(
                migration_runs::Column::Status,
                migration_status_as_expr(MigrationStatus::Cancelled),
            )
            .col_expr(
                migration_runs::Column::ErrorDetails,
                Expr::value(CANCELLED_MESSAGE),
            )
            .col_expr(
                migration_runs::Column::FinishedAt,
                Expr::current_timestamp().into(),
            )
            .col_expr(
                migration_runs::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(migration_runs::Column::Id.is_in(ids.clone()))
            .exec(&txn)
            .await
            .map_err(db_error_to_domain)?;

        for id in &ids {
            if let Err(db_err) = log_event_in_txn(
                &txn,
                Some(*id),
                EventType::RunCancelled,
                Some("Cancelling migration abandoned by its owner".to_string()),
                None,
            )
            .await
            {
                txn.rollback().await.map_err(db_error_to_domain)?;
                return Err(db_error_to_domain(db_err));
            }
        }

        txn.commit().await.map_err(db_error_to_domain)?;

        Ok(ids)
    }
}
