use crate::{db::PostgresStateDb, mapping::db_error_to_domain, sql};

use apihub_common::{
    catalog::{
        ComparisonKey, ComparisonSelection, PublishedFile, PublishedSource, PublishedVersion,
        VersionBuildInputs, VersionKey, VersionRef, VersionSelection,
    },
    error::Error,
    migration::MigrationScope,
    state::CatalogDbTrait,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sea_orm::{FromQueryResult, Statement};
use uuid::Uuid;

#[derive(Debug, FromQueryResult)]
struct VersionKeyRow {
    package_id: String,
    version: String,
    revision: i32,
}

impl From<VersionKeyRow> for VersionKey {
    fn from(row: VersionKeyRow) -> Self {
        VersionKey::new(row.package_id, row.version, row.revision)
    }
}

#[derive(Debug, FromQueryResult)]
struct ComparisonRow {
    package_id: String,
    version: String,
    revision: i32,
    previous_package_id: String,
    previous_version: String,
    previous_revision: i32,
}

impl From<ComparisonRow> for ComparisonKey {
    fn from(row: ComparisonRow) -> Self {
        ComparisonKey {
            current: VersionKey::new(row.package_id, row.version, row.revision),
            previous: VersionKey::new(
                row.previous_package_id,
                row.previous_version,
                row.previous_revision,
            ),
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct PublishedVersionRow {
    package_id: String,
    version: String,
    revision: i32,
    previous_version: Option<String>,
    previous_version_package_id: Option<String>,
    published_at: DateTime<FixedOffset>,
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, FromQueryResult)]
struct VersionRefRow {
    reference_id: String,
    reference_version: String,
    reference_revision: i32,
}

#[derive(Debug, FromQueryResult)]
struct PublishedSourceRow {
    config: Option<Vec<u8>>,
    archive: Option<Vec<u8>>,
    object_key: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct PublishedFileRow {
    file_id: String,
    path: String,
    data: Vec<u8>,
}

impl PostgresStateDb {
    async fn version_keys(&self, stmt: Statement) -> Result<Vec<VersionKey>, Error> {
        let rows = VersionKeyRow::find_by_statement(stmt)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(rows.into_iter().map(VersionKey::from).collect())
    }

    async fn comparison_keys(&self, stmt: Statement) -> Result<Vec<ComparisonKey>, Error> {
        let rows = ComparisonRow::find_by_statement(stmt)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(rows.into_iter().map(ComparisonKey::from).collect())
    }
}

#[async_trait]
impl CatalogDbTrait for PostgresStateDb {
    async fn find_eligible_versions(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        selection: VersionSelection,
    ) -> Result<Vec<VersionKey>, Error> {
        self.version_keys(sql::eligible_versions(migration_id, scope, selection))
            .await
    }

    async fn find_eligible_comparisons(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        selection: ComparisonSelection,
    ) -> Result<Vec<ComparisonKey>, Error> {
        self.comparison_keys(sql::eligible_comparisons(migration_id, scope, selection))
            .await
    }

    async fn get_version_build_inputs(
        &self,
        key: &VersionKey,
    ) -> Result<Option<VersionBuildInputs>, Error> {
        let maybe_version = PublishedVersionRow::find_by_statement(sql::published_version(key))
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let Some(row) = maybe_version else {
            return Ok(None);
        };

        let refs = VersionRefRow::find_by_statement(sql::version_refs(key))
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .into_iter()
            .map(|r| VersionRef {
                package_id: r.reference_id,
                version: r.reference_version,
                revision: r.reference_revision,
            })
            .collect();

        let source = PublishedSourceRow::find_by_statement(sql::published_source(key))
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .map(|s| PublishedSource {
                config: s.config.unwrap_or_default(),
                archive: s.archive,
                object_key: s.object_key,
            });

        Ok(Some(VersionBuildInputs {
            version: PublishedVersion {
                key: VersionKey::new(row.package_id, row.version, row.revision),
                previous_version: row.previous_version,
                previous_version_package_id: row.previous_version_package_id,
                published_at: row.published_at.into(),
                metadata: row.metadata,
            },
            refs,
            source,
        }))
    }

    async fn list_published_files(&self, key: &VersionKey) -> Result<Vec<PublishedFile>, Error> {
        let rows = PublishedFileRow::find_by_statement(sql::published_files(key))
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(rows
            .into_iter()
            .map(|f| PublishedFile {
                file_id: f.file_id,
                path: f.path,
                data: f.data,
            })
            .collect())
    }

    async fn find_unmigrated_versions(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
    ) -> Result<Vec<VersionKey>, Error> {
        self.version_keys(sql::unmigrated_versions(migration_id, scope))
            .await
    }

    async fn find_unmigrated_comparisons(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        changelog_only: bool,
    ) -> Result<Vec<ComparisonKey>, Error> {
        self.comparison_keys(sql::unmigrated_comparisons(migration_id, scope, changelog_only))
            .await
    }
}
