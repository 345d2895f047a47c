use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    catalog::{
        ComparisonKey, ComparisonSelection, PublishedFile, VersionBuildInputs, VersionKey,
        VersionSelection,
    },
    error::Error,
    migration::MigrationScope,
};

use super::BaseDbTrait;

/// Read access to the catalog tables.
/// ---
/// "Tagged" below means a build task carrying `migration_id` exists
/// for the entity, "migrated" means such a task is `Complete`.
#[async_trait]
pub trait CatalogDbTrait: BaseDbTrait {
    /// Versions of one stage partition that are in scope,
    /// not yet tagged, and whose ancestors are all migrated.
    /// ---
    /// Ordered by publication time, package id, version, revision.
    async fn find_eligible_versions(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        selection: VersionSelection,
    ) -> Result<Vec<VersionKey>, Error>;

    /// Comparisons to rebuild, see `ComparisonSelection`.
    async fn find_eligible_comparisons(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        selection: ComparisonSelection,
    ) -> Result<Vec<ComparisonKey>, Error>;

    /// Loads what the task factory needs to rebuild a version.
    async fn get_version_build_inputs(
        &self,
        key: &VersionKey,
    ) -> Result<Option<VersionBuildInputs>, Error>;

    /// Individually stored files of a version, in publish order.
    async fn list_published_files(&self, key: &VersionKey) -> Result<Vec<PublishedFile>, Error>;

    /// Non-deleted versions in scope without a completed build task.
    async fn find_unmigrated_versions(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
    ) -> Result<Vec<VersionKey>, Error>;

    /// Comparisons in scope not covered by a completed task.
    async fn find_unmigrated_comparisons(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        changelog_only: bool,
    ) -> Result<Vec<ComparisonKey>, Error>;
}
