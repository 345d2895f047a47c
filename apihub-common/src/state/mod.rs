mod base;
mod build_task;
mod catalog;
mod maintenance;
mod migration;

pub use base::BaseDbTrait;
pub use build_task::BuildTaskDbTrait;
pub use catalog::CatalogDbTrait;
pub use maintenance::MaintenanceDbTrait;
pub use migration::MigrationDbTrait;

/// Combined trait for all database operations
/// (Runs, Tasks, Catalog, Maintenance)
/// Should be used through dyn dispatch at the top level
/// to pass the complete database interface
pub trait DatabaseTrait:
    MigrationDbTrait + BuildTaskDbTrait + CatalogDbTrait + MaintenanceDbTrait
{
}

/// Name of the comparison snapshot table of a run.
/// Derived from the id only, never from caller text.
pub fn comparison_snapshot_table(migration_id: uuid::Uuid) -> String {
    format!(
        "{}{}",
        COMPARISON_SNAPSHOT_PREFIX,
        migration_id.as_simple()
    )
}

pub const COMPARISON_SNAPSHOT_PREFIX: &str = "migration_version_comparison_";
