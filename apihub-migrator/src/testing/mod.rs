//! In-memory collaborators for engine tests.

use std::{sync::Arc, time::Duration};

use apihub_common::{
    catalog::{ComparisonKey, VersionKey},
    migration::{MigrationRequest, MigrationRun, MigrationScope},
    object_store::ObjectStore,
    state::MigrationDbTrait,
};
use uuid::Uuid;

use crate::engine::{EngineContext, EngineSettings};

mod memory_db;
mod worker;

pub(crate) use memory_db::{CatalogVersion, FIXTURE_ARCHIVE, FIXTURE_CONFIG, MemoryStateDb};
pub(crate) use worker::FakeWorkerPool;

pub(crate) fn test_settings() -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::from_secs(1),
        per_task_timeout: Duration::from_secs(60),
        heartbeat_interval: Duration::from_secs(5),
        stale_after: Duration::from_secs(20),
        recovery_interval: Duration::from_secs(10),
        inline_offloaded_sources: false,
    }
}

pub(crate) fn test_context(db: &MemoryStateDb, instance_id: &str) -> EngineContext {
    EngineContext::new(Arc::new(db.clone()), None, test_settings(), instance_id)
}

pub(crate) fn test_context_with_store(
    db: &MemoryStateDb,
    instance_id: &str,
    store: Arc<dyn ObjectStore>,
    inline_offloaded_sources: bool,
) -> EngineContext {
    let settings = EngineSettings {
        inline_offloaded_sources,
        ..test_settings()
    };
    EngineContext::new(Arc::new(db.clone()), Some(store), settings, instance_id)
}

pub(crate) fn key(package_id: &str, version: &str, revision: i32) -> VersionKey {
    VersionKey::new(package_id, version, revision)
}

pub(crate) fn pair(current: VersionKey, previous: VersionKey) -> ComparisonKey {
    ComparisonKey { current, previous }
}

pub(crate) fn scoped(package_ids: &[&str]) -> MigrationRequest {
    MigrationRequest {
        scope: MigrationScope {
            package_ids: package_ids.iter().map(|p| p.to_string()).collect(),
            versions: Vec::new(),
        },
        ..Default::default()
    }
}

pub(crate) async fn create_run(
    db: &MemoryStateDb,
    request: &MigrationRequest,
    instance_id: &str,
) -> MigrationRun {
    db.create_migration_run(Uuid::new_v4(), request, instance_id)
        .await
        .expect("run should be created")
}
