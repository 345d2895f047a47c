use std::collections::BTreeMap;

use apihub_common::{
    catalog::{ComparisonSelection, DependencyClass, RevisionClass, VersionSelection},
    error::Error,
    event::EventType,
    migration::{MigrationRun, MigrationStage},
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{EngineContext, post_check, task_factory, wait::wait_for_outstanding};

/// Outcome of one stage, logged with the stage completion event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Rounds that created at least one task.
    pub rounds: u32,
    pub tasks_created: u64,
}

/// What a task-creating stage selects each round.
#[derive(Debug, Clone, Copy)]
enum StageWork {
    Versions(VersionSelection),
    Comparisons(ComparisonSelection),
}

const fn versions(dependency: DependencyClass, revisions: RevisionClass) -> StageWork {
    StageWork::Versions(VersionSelection {
        dependency,
        revisions,
    })
}

/// Runs the stage function of `stage` for `run`.
pub async fn run_stage(
    ctx: &EngineContext,
    run: &MigrationRun,
    ownership: &CancellationToken,
    stage: MigrationStage,
) -> Result<StageReport, Error> {
    use DependencyClass::*;
    use RevisionClass::*;

    match stage {
        MigrationStage::Starting => starting(ctx, run).await,
        MigrationStage::CleanupBefore => cleanup_before(ctx, run).await,
        MigrationStage::IndependentVersionsLastRevs => {
            work_rounds(ctx, run, ownership, versions(Independent, Latest)).await
        }
        MigrationStage::DependentVersionsLastRevs => {
            work_rounds(ctx, run, ownership, versions(Dependent, Latest)).await
        }
        MigrationStage::IndependentVersionsOldRevs => {
            work_rounds(ctx, run, ownership, versions(Independent, Old)).await
        }
        MigrationStage::DependentVersionsOldRevs => {
            work_rounds(ctx, run, ownership, versions(Dependent, Old)).await
        }
        MigrationStage::ComparisonsOther => {
            let work = StageWork::Comparisons(ComparisonSelection::Other);
            work_rounds(ctx, run, ownership, work).await
        }
        MigrationStage::ComparisonsOnly => {
            let work = StageWork::Comparisons(ComparisonSelection::Only);
            work_rounds(ctx, run, ownership, work).await
        }
        MigrationStage::PostCheck => {
            post_check::run_post_check(ctx, run).await?;
            Ok(StageReport::default())
        }
        MigrationStage::Done => Ok(StageReport::default()),
    }
}

/// Snapshots the comparison table so the comparison stage
/// does not see rows published while the run is in progress.
async fn starting(ctx: &EngineContext, run: &MigrationRun) -> Result<StageReport, Error> {
    ctx.db.create_comparison_snapshot(run.id).await?;

    Ok(StageReport::default())
}

/// Purges what earlier migrations left behind. Scoped runs skip it.
async fn cleanup_before(ctx: &EngineContext, run: &MigrationRun) -> Result<StageReport, Error> {
    if !run.scope.is_unscoped() {
        info!(migration_id = %run.id, "Scoped migration, skipping cleanup");
        return Ok(StageReport::default());
    }

    // Blob references live on the task sources, collect them before the purge.
    let blobs = ctx.db.list_stale_source_blobs(run.id).await?;
    let mut removed_blobs = 0usize;

    if !blobs.is_empty() {
        match &ctx.object_store {
            Some(store) => {
                let mut by_bucket: BTreeMap<&str, Vec<String>> = BTreeMap::new();
                for blob in &blobs {
                    by_bucket
                        .entry(blob.bucket.as_str())
                        .or_default()
                        .push(blob.key.clone());
                }

                for (bucket, keys) in by_bucket {
                    store.remove_blobs(bucket, &keys).await?;
                    removed_blobs += keys.len();
                }
            }
            None => warn!(
                migration_id = %run.id,
                "{} stale source blobs left in place, no object store configured",
                blobs.len()
            ),
        }
    }

    let purged_tasks = ctx.db.purge_previous_migration_tasks(run.id).await?;
    let dropped_snapshots = ctx.db.drop_stale_snapshots(run.id).await?;

    info!(
        migration_id = %run.id,
        "Cleanup removed {} blobs, {} tasks and {} snapshot tables",
        removed_blobs,
        purged_tasks,
        dropped_snapshots.len()
    );

    ctx.db
        .log_migration_event(
            Some(run.id),
            EventType::CleanupPurged,
            "Purged data of previous migrations".to_string(),
            Some(json!({
                "blobs": removed_blobs,
                "tasks": purged_tasks,
                "snapshots": dropped_snapshots,
            })),
        )
        .await?;

    Ok(StageReport::default())
}

/// drain, verify, query, create, wait, verify; until a round finds nothing.
/// ---
/// The leading drain also covers tasks created before a crash.
/// Dependent stages reach their fixed point this way, every round
/// unlocks the versions whose ancestors the previous round migrated.
async fn work_rounds(
    ctx: &EngineContext,
    run: &MigrationRun,
    ownership: &CancellationToken,
    work: StageWork,
) -> Result<StageReport, Error> {
    let mut report = StageReport::default();

    loop {
        wait_for_outstanding(ctx, run.id, ownership).await?;
        ctx.ensure_owned_and_running(run.id, ownership).await?;

        let created = match work {
            StageWork::Versions(selection) => {
                let keys = ctx
                    .db
                    .find_eligible_versions(run.id, &run.scope, selection)
                    .await?;

                for key in &keys {
                    ctx.ensure_owned_and_running(run.id, ownership).await?;
                    task_factory::create_build_task(ctx, key, run).await?;
                }

                keys.len()
            }
            StageWork::Comparisons(selection) => {
                let pairs = ctx
                    .db
                    .find_eligible_comparisons(run.id, &run.scope, selection)
                    .await?;

                for pair in &pairs {
                    ctx.ensure_owned_and_running(run.id, ownership).await?;
                    task_factory::create_comparison_task(ctx, pair, run.id).await?;
                }

                pairs.len()
            }
        };

        if created == 0 {
            break;
        }

        report.rounds += 1;
        report.tasks_created += created as u64;
        info!(
            migration_id = %run.id,
            round = report.rounds,
            "Created {} tasks",
            created
        );

        wait_for_outstanding(ctx, run.id, ownership).await?;
        ctx.ensure_owned_and_running(run.id, ownership).await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apihub_common::{
        build::{BuildConfig, BuildSource, BuildType, MIGRATION_BUILD_PRIORITY, NewBuildTask},
        catalog::PublishedSource,
        migration::{MigrationRequest, MigrationStatus},
        object_store::LocalFsObjectStore,
        state::{BuildTaskDbTrait, MaintenanceDbTrait, MigrationDbTrait},
    };
    use uuid::Uuid;

    use super::*;
    use crate::testing::{
        CatalogVersion, MemoryStateDb, create_run, key, scoped, test_context_with_store,
    };

    const BUCKET: &str = "published-sources";

    async fn offloaded_task(db: &MemoryStateDb, migration_id: Uuid, object_key: &str) {
        db.insert_build_task(NewBuildTask {
            id: Uuid::new_v4(),
            key: key("a", "1", 1),
            build_type: BuildType::Build,
            priority: MIGRATION_BUILD_PRIORITY,
            migration_id: Some(migration_id),
            previous: None,
            source: BuildSource::ObjectStore {
                bucket: BUCKET.to_string(),
                key: object_key.to_string(),
            },
            config: BuildConfig::default(),
        })
        .await
        .unwrap();
    }

    /// A finished run with two off-loaded tasks and a leftover snapshot.
    async fn seed_previous_run(db: &MemoryStateDb) -> Uuid {
        db.add_version(CatalogVersion::new("a", "1", 1)).await;
        db.set_source(
            &key("a", "1", 1),
            Some(PublishedSource {
                config: b"{\"files\":[]}".to_vec(),
                archive: None,
                object_key: Some("kept.zip".to_string()),
            }),
        )
        .await;

        let previous = create_run(db, &MigrationRequest::default(), "node-1").await;
        offloaded_task(db, previous.id, "old.zip").await;
        offloaded_task(db, previous.id, "kept.zip").await;
        db.create_comparison_snapshot(previous.id).await.unwrap();
        db.finalize_migration_run(previous.id, "node-1", MigrationStatus::Failed, None)
            .await
            .unwrap();

        previous.id
    }

    #[tokio::test]
    async fn test_cleanup_purges_previous_runs() {
        let db = MemoryStateDb::new();
        let previous = seed_previous_run(&db).await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(BUCKET)).unwrap();
        for blob in ["old.zip", "kept.zip"] {
            std::fs::write(dir.path().join(BUCKET).join(blob), b"PK").unwrap();
        }
        let store = Arc::new(LocalFsObjectStore::new(dir.path(), BUCKET));

        let run = create_run(&db, &MigrationRequest::default(), "node-1").await;
        let ctx = test_context_with_store(&db, "node-1", store, false);
        let report = run_stage(&ctx, &run, &CancellationToken::new(), MigrationStage::CleanupBefore)
            .await
            .unwrap();
        assert_eq!(report, StageReport::default());

        assert!(!dir.path().join(BUCKET).join("old.zip").exists());
        // Still referenced by a published source.
        assert!(dir.path().join(BUCKET).join("kept.zip").exists());

        assert!(db.tasks_of(previous).await.is_empty());
        assert_eq!(db.snapshot_of(previous).await, None);

        let purged = db
            .events_of(run.id)
            .await
            .into_iter()
            .find(|e| e.event_type == EventType::CleanupPurged)
            .and_then(|e| e.metadata)
            .unwrap();
        assert_eq!(purged["blobs"], 1);
        assert_eq!(purged["tasks"], 2);
    }

    #[tokio::test]
    async fn test_scoped_run_skips_cleanup() {
        let db = MemoryStateDb::new();
        let previous = seed_previous_run(&db).await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalFsObjectStore::new(dir.path(), BUCKET));

        let run = create_run(&db, &scoped(&["a"]), "node-1").await;
        let ctx = test_context_with_store(&db, "node-1", store, false);
        run_stage(&ctx, &run, &CancellationToken::new(), MigrationStage::CleanupBefore)
            .await
            .unwrap();

        assert_eq!(db.tasks_of(previous).await.len(), 2);
        assert!(db.snapshot_of(previous).await.is_some());
    }

    #[tokio::test]
    async fn test_starting_snapshots_comparisons() {
        let db = MemoryStateDb::new();
        db.add_comparison(key("a", "2", 1), key("a", "1", 1)).await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalFsObjectStore::new(dir.path(), BUCKET));
        let run = create_run(&db, &MigrationRequest::default(), "node-1").await;
        let ctx = test_context_with_store(&db, "node-1", store, false);

        run_stage(&ctx, &run, &CancellationToken::new(), MigrationStage::Starting)
            .await
            .unwrap();
        // Rows published after the snapshot are not part of it.
        db.add_comparison(key("a", "3", 1), key("a", "2", 1)).await;

        assert_eq!(
            db.snapshot_of(run.id).await.map(|rows| rows.len()),
            Some(1)
        );
    }
}
