use std::collections::HashSet;

use crate::{
    db::PostgresStateDb,
    entities::{migration_runs, sea_orm_active_enums},
    mapping::db_error_to_domain,
    sql::{self, LIVE_COMPARISONS_TABLE},
};

use apihub_common::{
    error::Error,
    object_store::BlobRef,
    state::{COMPARISON_SNAPSHOT_PREFIX, MaintenanceDbTrait, comparison_snapshot_table},
};
use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Migration id encoded in a snapshot table name, if it is one.
fn snapshot_owner(table_name: &str) -> Option<Uuid> {
    table_name
        .strip_prefix(COMPARISON_SNAPSHOT_PREFIX)
        .and_then(|suffix| Uuid::try_parse(suffix).ok())
}

#[async_trait]
impl MaintenanceDbTrait for PostgresStateDb {
    async fn create_comparison_snapshot(&self, migration_id: Uuid) -> Result<(), Error> {
        let table = comparison_snapshot_table(migration_id);
        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        for stmt in [
            format!("DROP TABLE IF EXISTS {table}"),
            format!("CREATE TABLE {table} AS SELECT * FROM {LIVE_COMPARISONS_TABLE}"),
        ] {
            if let Err(db_err) = txn.execute_unprepared(&stmt).await {
                txn.rollback().await.map_err(db_error_to_domain)?;
                return Err(db_error_to_domain(db_err));
            }
        }

        txn.commit().await.map_err(db_error_to_domain)?;
        debug!("Created comparison snapshot {}", table);

        Ok(())
    }

    async fn drop_comparison_snapshot(&self, migration_id: Uuid) -> Result<(), Error> {
        let table = comparison_snapshot_table(migration_id);

        self.conn
            .execute_unprepared(&format!("DROP TABLE IF EXISTS {table}"))
            .await
            .map_err(db_error_to_domain)?;

        debug!("Dropped comparison snapshot {}", table);

        Ok(())
    }

    async fn list_stale_source_blobs(&self, current: Uuid) -> Result<Vec<BlobRef>, Error> {
        let rows = self
            .conn
            .query_all(sql::stale_source_blobs(current))
            .await
            .map_err(db_error_to_domain)?;

        rows.iter()
            .map(|row| {
                Ok(BlobRef {
                    bucket: row.try_get("", "object_bucket").map_err(db_error_to_domain)?,
                    key: row.try_get("", "object_key").map_err(db_error_to_domain)?,
                })
            })
            .collect()
    }

    async fn purge_previous_migration_tasks(&self, current: Uuid) -> Result<u64, Error> {
        let res = self
            .conn
            .execute(sql::purge_previous_tasks(current))
            .await
            .map_err(db_error_to_domain)?;

        Ok(res.rows_affected())
    }

    async fn drop_stale_snapshots(&self, current: Uuid) -> Result<Vec<String>, Error> {
        let active: HashSet<Uuid> = migration_runs::Entity::find()
            .select_only()
            .column(migration_runs::Column::Id)
            .filter(migration_runs::Column::Status.is_in([
                sea_orm_active_enums::MigrationStatus::Running,
                sea_orm_active_enums::MigrationStatus::Cancelling,
            ]))
            .into_tuple::<Uuid>()
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .into_iter()
            .collect();

        let rows = self
            .conn
            .query_all(sql::list_snapshot_tables())
            .await
            .map_err(db_error_to_domain)?;

        let mut dropped = Vec::new();
        for row in rows {
            let table_name: String = row.try_get("", "tablename").map_err(db_error_to_domain)?;

            let Some(owner) = snapshot_owner(&table_name) else {
                continue;
            };
            if owner == current || active.contains(&owner) {
                continue;
            }

            // Re-rendered from the parsed id, catalog text never reaches the DDL.
            self.drop_comparison_snapshot(owner).await?;
            dropped.push(comparison_snapshot_table(owner));
        }

        if !dropped.is_empty() {
            info!("Dropped {} stale comparison snapshots", dropped.len());
        }

        Ok(dropped)
    }
}
