use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use apihub_common::{
    build::{BuildConfig, BuildSource, BuildStatus, BuildTask, BuildType, NewBuildTask, TaskStatusCount},
    catalog::{
        ComparisonKey, ComparisonSelection, DependencyClass, PublishedFile, PublishedSource,
        PublishedVersion, RevisionClass, VersionBuildInputs, VersionKey, VersionRef,
        VersionSelection,
    },
    error::Error,
    event::{EventLogRecord, EventType},
    migration::{
        MigrationRequest, MigrationRun, MigrationScope, MigrationStage, MigrationStatus,
        PostCheckResult,
    },
    object_store::BlobRef,
    state::{
        BaseDbTrait, BuildTaskDbTrait, CatalogDbTrait, DatabaseTrait, MaintenanceDbTrait,
        MigrationDbTrait, comparison_snapshot_table,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::CANCELLED_MESSAGE;

/// Retained config every fixture version is published with.
pub(crate) const FIXTURE_CONFIG: &[u8] = br#"{"files":[{"fileId":"openapi.yaml"}],"apiType":"rest"}"#;
pub(crate) const FIXTURE_ARCHIVE: &[u8] = b"PK\x03\x04fixture";

/// Catalog row of the in-memory store.
#[derive(Debug, Clone)]
pub(crate) struct CatalogVersion {
    pub key: VersionKey,
    pub previous_version: Option<String>,
    pub previous_version_package_id: Option<String>,
    pub refs: Vec<VersionRef>,
    pub published_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub metadata: Option<Value>,
}

impl CatalogVersion {
    pub(crate) fn new(package_id: &str, version: &str, revision: i32) -> Self {
        Self {
            key: VersionKey::new(package_id, version, revision),
            previous_version: None,
            previous_version_package_id: None,
            refs: Vec::new(),
            published_at: None,
            deleted: false,
            metadata: None,
        }
    }

    pub(crate) fn previous(mut self, package_id: &str, version: &str) -> Self {
        self.previous_version = Some(version.to_string());
        if package_id != self.key.package_id {
            self.previous_version_package_id = Some(package_id.to_string());
        }
        self
    }

    pub(crate) fn with_ref(mut self, package_id: &str, version: &str, revision: i32) -> Self {
        self.refs.push(VersionRef {
            package_id: package_id.to_string(),
            version: version.to_string(),
            revision,
        });
        self
    }

    pub(crate) fn published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub(crate) fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn is_independent(&self) -> bool {
        self.previous_version.as_deref().unwrap_or("").is_empty() && self.refs.is_empty()
    }

    /// `(package, version)` the version currently points back at.
    fn previous_pointer(&self) -> (String, String) {
        let package = self
            .previous_version_package_id
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.key.package_id.clone());
        (package, self.previous_version.clone().unwrap_or_default())
    }
}

/// A persisted task together with the order it was created and finished in.
#[derive(Debug, Clone)]
pub(crate) struct StoredTask {
    pub task: BuildTask,
    pub source: BuildSource,
    pub config: BuildConfig,
    pub created_seq: u64,
    pub finished_seq: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    runs: Vec<MigrationRun>,
    tasks: Vec<StoredTask>,
    events: Vec<EventLogRecord>,
    versions: Vec<CatalogVersion>,
    sources: HashMap<VersionKey, PublishedSource>,
    files: HashMap<VersionKey, Vec<PublishedFile>>,
    comparisons: Vec<ComparisonKey>,
    snapshots: BTreeMap<Uuid, Vec<ComparisonKey>>,
    clock: u64,
}

fn is_active(status: MigrationStatus) -> bool {
    matches!(status, MigrationStatus::Running | MigrationStatus::Cancelling)
}

fn not_found(migration_id: Uuid) -> Error {
    Error::NotFound {
        resource_type: "MigrationRun".into(),
        resource_id: migration_id.to_string(),
    }
}

fn is_stale(run: &MigrationRun, stale_after: Duration) -> bool {
    let age = Utc::now() - run.last_heartbeat;
    age.to_std().map(|age| age > stale_after).unwrap_or(false)
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn log_event(
        &mut self,
        migration_id: Option<Uuid>,
        event_type: EventType,
        message: String,
        metadata: Option<Value>,
    ) {
        let event_id = self.events.len() as i64 + 1;
        self.events.push(EventLogRecord {
            event_id,
            migration_id,
            timestamp: Utc::now(),
            event_type,
            message: Some(message),
            metadata,
        });
    }

    fn run_mut(&mut self, migration_id: Uuid) -> Option<&mut MigrationRun> {
        self.runs.iter_mut().find(|r| r.id == migration_id)
    }

    fn cancel_outstanding(&mut self, migration_id: Uuid) -> u64 {
        let mut cancelled = 0u64;
        for idx in 0..self.tasks.len() {
            let stored = &self.tasks[idx];
            if stored.task.migration_id != Some(migration_id) || !stored.task.status.is_outstanding() {
                continue;
            }
            let seq = self.tick();
            let stored = &mut self.tasks[idx];
            stored.task.status = BuildStatus::Error;
            stored.task.details = Some("cancelled".to_string());
            stored.finished_seq = Some(seq);
            cancelled += 1;
        }
        cancelled
    }

    fn live(&self, key: &VersionKey) -> Option<&CatalogVersion> {
        self.versions.iter().find(|v| !v.deleted && &v.key == key)
    }

    fn any_revision_live(&self, package_id: &str, version: &str) -> bool {
        self.versions
            .iter()
            .any(|v| !v.deleted && v.key.package_id == package_id && v.key.version == version)
    }

    fn max_live_revision(&self, package_id: &str, version: &str) -> Option<i32> {
        self.versions
            .iter()
            .filter(|v| !v.deleted && v.key.package_id == package_id && v.key.version == version)
            .map(|v| v.key.revision)
            .max()
    }

    fn published_at(&self, key: &VersionKey) -> DateTime<Utc> {
        self.live(key)
            .and_then(|v| v.published_at)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn migration_tasks(&self, migration_id: Uuid) -> impl Iterator<Item = &StoredTask> {
        self.tasks
            .iter()
            .filter(move |t| t.task.migration_id == Some(migration_id))
    }

    fn version_tagged(
        &self,
        migration_id: Uuid,
        key: &VersionKey,
        status: Option<BuildStatus>,
    ) -> bool {
        self.migration_tasks(migration_id).any(|t| {
            t.task.build_type == BuildType::Build
                && &t.task.key == key
                && status.is_none_or(|s| t.task.status == s)
        })
    }

    fn comparison_tagged(
        &self,
        migration_id: Uuid,
        pair: &ComparisonKey,
        status: Option<BuildStatus>,
    ) -> bool {
        self.migration_tasks(migration_id).any(|t| {
            t.task.build_type == BuildType::Changelog
                && t.task.key == pair.current
                && t.task.previous.as_ref() == Some(&pair.previous)
                && status.is_none_or(|s| t.task.status == s)
        })
    }

    fn ancestor_satisfied(
        &self,
        migration_id: Uuid,
        package_id: &str,
        version: &str,
        scope: &MigrationScope,
    ) -> bool {
        let rebuilt = self.migration_tasks(migration_id).any(|t| {
            t.task.build_type == BuildType::Build
                && t.task.status == BuildStatus::Complete
                && t.task.key.package_id == package_id
                && t.task.key.version == version
        });

        rebuilt || !self.any_revision_live(package_id, version) || !scope.contains(package_id, version)
    }

    fn endpoint_migrated(&self, migration_id: Uuid, key: &VersionKey, scope: &MigrationScope) -> bool {
        self.version_tagged(migration_id, key, Some(BuildStatus::Complete))
            || !scope.contains(&key.package_id, &key.version)
    }

    fn pointer_changed(&self, pair: &ComparisonKey) -> bool {
        let Some(current) = self.live(&pair.current) else {
            return false;
        };
        current.previous_pointer()
            != (pair.previous.package_id.clone(), pair.previous.version.clone())
    }

    /// Pairs of `table` whose endpoints are both live.
    fn live_pairs<'a>(&'a self, table: &'a [ComparisonKey]) -> impl Iterator<Item = &'a ComparisonKey> {
        table
            .iter()
            .filter(|c| self.live(&c.current).is_some() && self.live(&c.previous).is_some())
    }

    fn comparisons_table(&self, migration_id: Uuid, snapshot: bool) -> Result<&[ComparisonKey], Error> {
        if !snapshot {
            return Ok(&self.comparisons);
        }

        self.snapshots
            .get(&migration_id)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                Error::Database(format!(
                    "relation \"{}\" does not exist",
                    comparison_snapshot_table(migration_id)
                ))
            })
    }

    fn sort_versions(&self, mut keys: Vec<VersionKey>) -> Vec<VersionKey> {
        keys.sort_by_cached_key(|k| (self.published_at(k), k.clone()));
        keys
    }

    fn sort_comparisons(&self, mut pairs: Vec<ComparisonKey>) -> Vec<ComparisonKey> {
        pairs.sort_by_cached_key(|c| (self.published_at(&c.current), c.clone()));
        pairs
    }

    fn terminal_runs_other_than(&self, current: Uuid) -> BTreeSet<Uuid> {
        self.runs
            .iter()
            .filter(|r| r.id != current && r.status.is_terminal())
            .map(|r| r.id)
            .collect()
    }
}

/// In-memory state store with the same row semantics as the Postgres one.
/// Every operation runs under one lock, which stands in for transactions
/// and row locks.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryStateDb {
    state: Arc<Mutex<State>>,
}

impl MemoryStateDb {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Publishes a version with a retained config and archive.
    pub(crate) async fn add_version(&self, mut version: CatalogVersion) {
        let mut state = self.state.lock().await;
        if version.published_at.is_none() {
            let offset = state.versions.len() as i64;
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
            version.published_at = base.map(|b| b + chrono::Duration::minutes(offset));
        }

        state.sources.insert(
            version.key.clone(),
            PublishedSource {
                config: FIXTURE_CONFIG.to_vec(),
                archive: Some(FIXTURE_ARCHIVE.to_vec()),
                object_key: None,
            },
        );
        state.versions.push(version);
    }

    pub(crate) async fn set_source(&self, key: &VersionKey, source: Option<PublishedSource>) {
        let mut state = self.state.lock().await;
        match source {
            Some(source) => state.sources.insert(key.clone(), source),
            None => state.sources.remove(key),
        };
    }

    pub(crate) async fn set_files(&self, key: &VersionKey, files: Vec<PublishedFile>) {
        self.state.lock().await.files.insert(key.clone(), files);
    }

    pub(crate) async fn delete_version(&self, key: &VersionKey) {
        let mut state = self.state.lock().await;
        for version in state.versions.iter_mut().filter(|v| &v.key == key) {
            version.deleted = true;
        }
    }

    pub(crate) async fn add_comparison(&self, current: VersionKey, previous: VersionKey) {
        self.state
            .lock()
            .await
            .comparisons
            .push(ComparisonKey { current, previous });
    }

    /// Tasks of a migration in creation order.
    pub(crate) async fn tasks_of(&self, migration_id: Uuid) -> Vec<StoredTask> {
        self.state
            .lock()
            .await
            .migration_tasks(migration_id)
            .cloned()
            .collect()
    }

    /// Events of a migration, oldest first.
    pub(crate) async fn events_of(&self, migration_id: Uuid) -> Vec<EventLogRecord> {
        self.state
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.migration_id == Some(migration_id))
            .cloned()
            .collect()
    }

    pub(crate) async fn snapshot_of(&self, migration_id: Uuid) -> Option<Vec<ComparisonKey>> {
        self.state.lock().await.snapshots.get(&migration_id).cloned()
    }

    /// Moves every outstanding task into the status `outcome` picks.
    /// Returns the number of tasks finished.
    pub(crate) async fn finish_outstanding(
        &self,
        outcome: &(dyn Fn(&BuildTask) -> BuildStatus + Sync),
    ) -> usize {
        let mut state = self.state.lock().await;
        let mut finished = 0;

        for idx in 0..state.tasks.len() {
            if !state.tasks[idx].task.status.is_outstanding() {
                continue;
            }

            let status = outcome(&state.tasks[idx].task);
            if status.is_outstanding() {
                continue;
            }

            let seq = state.tick();
            let stored = &mut state.tasks[idx];
            stored.task.status = status;
            stored.finished_seq = Some(seq);
            if status == BuildStatus::Error {
                stored.task.details = Some("forced failure".to_string());
            }
            finished += 1;
        }

        finished
    }

    /// Pushes the heartbeat of a run into the past.
    pub(crate) async fn age_heartbeat(&self, migration_id: Uuid, by: Duration) {
        let mut state = self.state.lock().await;
        if let Some(run) = state.run_mut(migration_id) {
            run.last_heartbeat -= chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }
    }
}

#[async_trait]
impl BaseDbTrait for MemoryStateDb {
    async fn log_migration_event(
        &self,
        migration_id: Option<Uuid>,
        event_type: EventType,
        message: String,
        metadata: Option<Value>,
    ) -> Result<(), Error> {
        self.state
            .lock()
            .await
            .log_event(migration_id, event_type, message, metadata);
        Ok(())
    }

    async fn list_migration_events(
        &self,
        migration_id: Uuid,
        limit: u64,
    ) -> Result<Vec<EventLogRecord>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.migration_id == Some(migration_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MigrationDbTrait for MemoryStateDb {
    async fn get_migration_run(&self, migration_id: Uuid) -> Result<Option<MigrationRun>, Error> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == migration_id).cloned())
    }

    async fn get_active_migration_run(&self) -> Result<Option<MigrationRun>, Error> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| is_active(r.status)).cloned())
    }

    async fn create_migration_run(
        &self,
        migration_id: Uuid,
        request: &MigrationRequest,
        instance_id: &str,
    ) -> Result<MigrationRun, Error> {
        let mut state = self.state.lock().await;

        if state.runs.iter().any(|r| is_active(r.status)) {
            return Err(Error::Conflict(
                "Another migration is already in progress".to_string(),
            ));
        }

        let sequence_number = state
            .runs
            .iter()
            .map(|r| r.sequence_number)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();

        let run = MigrationRun {
            id: migration_id,
            sequence_number,
            scope: request.scope.clone(),
            changelog_only: request.changelog_only,
            skip_validation: request.skip_validation,
            status: MigrationStatus::Running,
            stage: MigrationStage::initial(request.changelog_only),
            instance_id: instance_id.to_string(),
            last_heartbeat: now,
            error_details: None,
            post_check_result: None,
            started_at: now,
            finished_at: None,
            updated_at: now,
        };

        state.runs.push(run.clone());
        state.log_event(
            Some(migration_id),
            EventType::RunCreated,
            format!("Migration #{} created", sequence_number),
            Some(json!({ "instance_id": instance_id })),
        );

        Ok(run)
    }

    async fn update_migration_stage(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        stage: MigrationStage,
    ) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        match state.run_mut(migration_id) {
            Some(run) if run.status == MigrationStatus::Running && run.instance_id == instance_id => {
                run.stage = stage;
                run.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_post_check_result(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        result: &PostCheckResult,
    ) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        match state.run_mut(migration_id) {
            Some(run) if is_active(run.status) && run.instance_id == instance_id => {
                run.post_check_result = Some(result.clone());
                run.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_migration_run(
        &self,
        migration_id: Uuid,
        instance_id: &str,
        final_status: MigrationStatus,
        error_details: Option<String>,
    ) -> Result<bool, Error> {
        let event_type = match final_status {
            MigrationStatus::Complete => EventType::RunCompleted,
            MigrationStatus::Failed => EventType::RunFailed,
            MigrationStatus::Cancelled => EventType::RunCancelled,
            other => {
                return Err(Error::StateTransition(format!(
                    "{other} is not a terminal migration status"
                )));
            }
        };

        let mut state = self.state.lock().await;
        let Some(run) = state.run_mut(migration_id) else {
            return Ok(false);
        };

        let allowed = match final_status {
            MigrationStatus::Complete => run.status == MigrationStatus::Running,
            _ => is_active(run.status),
        };
        if !allowed || run.instance_id != instance_id {
            return Ok(false);
        }

        let now = Utc::now();
        run.status = final_status;
        run.error_details = error_details.clone();
        run.finished_at = Some(now);
        run.updated_at = now;

        state.log_event(
            Some(migration_id),
            event_type,
            format!("Migration finished as {}", final_status),
            error_details.map(|details| json!({ "error": details })),
        );

        Ok(true)
    }

    async fn refresh_heartbeat(&self, migration_id: Uuid, instance_id: &str) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        match state.run_mut(migration_id) {
            Some(run) if is_active(run.status) && run.instance_id == instance_id => {
                run.last_heartbeat = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_stale_migration_run(
        &self,
        instance_id: &str,
        stale_after: Duration,
    ) -> Result<Option<MigrationRun>, Error> {
        let mut state = self.state.lock().await;

        let candidate = state
            .runs
            .iter()
            .filter(|r| {
                r.status == MigrationStatus::Running
                    && r.instance_id != instance_id
                    && is_stale(r, stale_after)
            })
            .min_by_key(|r| r.sequence_number)
            .map(|r| r.id);
        let Some(migration_id) = candidate else {
            return Ok(None);
        };

        let Some(run) = state.run_mut(migration_id) else {
            return Ok(None);
        };
        let previous_owner = std::mem::replace(&mut run.instance_id, instance_id.to_string());
        let now = Utc::now();
        run.last_heartbeat = now;
        run.updated_at = now;
        let claimed = run.clone();

        state.log_event(
            Some(migration_id),
            EventType::RunTakenOver,
            format!("Migration taken over by {}", instance_id),
            Some(json!({ "previous_owner": previous_owner, "stage": claimed.stage })),
        );

        Ok(Some(claimed))
    }

    async fn request_cancellation(&self, migration_id: Uuid) -> Result<u64, Error> {
        let mut state = self.state.lock().await;

        match state.run_mut(migration_id) {
            Some(run) if run.status == MigrationStatus::Running => {
                run.status = MigrationStatus::Cancelling;
                run.updated_at = Utc::now();
            }
            Some(run) => {
                return Err(Error::StateTransition(format!(
                    "Migration {} is {}, only running migrations can be cancelled",
                    migration_id, run.status
                )));
            }
            None => return Err(not_found(migration_id)),
        }

        let cancelled = state.cancel_outstanding(migration_id);

        state.log_event(
            Some(migration_id),
            EventType::RunCancelling,
            "Cancellation requested".to_string(),
            Some(json!({ "cancelled_tasks": cancelled })),
        );

        Ok(cancelled)
    }

    async fn finalize_abandoned_cancellations(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<Uuid>, Error> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let abandoned: Vec<Uuid> = state
            .runs
            .iter()
            .filter(|r| r.status == MigrationStatus::Cancelling && is_stale(r, stale_after))
            .map(|r| r.id)
            .collect();

        for migration_id in &abandoned {
            if let Some(run) = state.run_mut(*migration_id) {
                run.status = MigrationStatus::Cancelled;
                run.error_details = Some(CANCELLED_MESSAGE.to_string());
                run.finished_at = Some(now);
                run.updated_at = now;
            }
            state.log_event(
                Some(*migration_id),
                EventType::RunCancelled,
                "Owner of the cancelling migration is gone".to_string(),
                None,
            );
        }

        Ok(abandoned)
    }
}

#[async_trait]
impl BuildTaskDbTrait for MemoryStateDb {
    async fn insert_build_task(&self, task: NewBuildTask) -> Result<Uuid, Error> {
        let mut state = self.state.lock().await;
        let created_seq = state.tick();

        state.tasks.push(StoredTask {
            task: BuildTask {
                id: task.id,
                key: task.key,
                build_type: task.build_type,
                status: BuildStatus::Pending,
                priority: task.priority,
                migration_id: task.migration_id,
                previous: task.previous,
                details: None,
                created_at: Utc::now(),
            },
            source: task.source,
            config: task.config,
            created_seq,
            finished_seq: None,
        });

        Ok(task.id)
    }

    async fn cancel_outstanding_tasks(&self, migration_id: Uuid) -> Result<u64, Error> {
        Ok(self.state.lock().await.cancel_outstanding(migration_id))
    }

    async fn count_outstanding_tasks(&self, migration_id: Uuid) -> Result<u64, Error> {
        let state = self.state.lock().await;
        Ok(state
            .migration_tasks(migration_id)
            .filter(|t| t.task.status.is_outstanding())
            .count() as u64)
    }

    async fn count_tasks_by_status(&self, migration_id: Uuid) -> Result<Vec<TaskStatusCount>, Error> {
        let state = self.state.lock().await;

        // Keyed by the text forms, matching the database ordering.
        let mut buckets: BTreeMap<(String, String), (BuildType, BuildStatus, u64)> = BTreeMap::new();
        for stored in state.migration_tasks(migration_id) {
            let task = &stored.task;
            buckets
                .entry((task.build_type.to_string(), task.status.to_string()))
                .or_insert((task.build_type, task.status, 0))
                .2 += 1;
        }

        Ok(buckets
            .into_values()
            .map(|(build_type, status, count)| TaskStatusCount {
                build_type,
                status,
                count,
            })
            .collect())
    }

    async fn list_failed_tasks(&self, migration_id: Uuid, limit: u64) -> Result<Vec<BuildTask>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .migration_tasks(migration_id)
            .filter(|t| t.task.status == BuildStatus::Error)
            .take(limit as usize)
            .map(|t| t.task.clone())
            .collect())
    }
}

// Each query restates its builder in `apihub-persistence-pg/src/sql.rs`.
#[async_trait]
impl CatalogDbTrait for MemoryStateDb {
    async fn find_eligible_versions(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        selection: VersionSelection,
    ) -> Result<Vec<VersionKey>, Error> {
        let state = self.state.lock().await;

        let keys = state
            .versions
            .iter()
            .filter(|v| !v.deleted)
            .filter(|v| {
                let max = state.max_live_revision(&v.key.package_id, &v.key.version);
                match selection.revisions {
                    RevisionClass::Latest => max == Some(v.key.revision),
                    RevisionClass::Old => max.is_some_and(|m| v.key.revision < m),
                }
            })
            .filter(|v| match selection.dependency {
                DependencyClass::Independent => v.is_independent(),
                DependencyClass::Dependent => {
                    let previous_ok = match v.previous_version.as_deref() {
                        None | Some("") => true,
                        Some(_) => {
                            let (package, version) = v.previous_pointer();
                            state.ancestor_satisfied(migration_id, &package, &version, scope)
                        }
                    };
                    let refs_ok = v.refs.iter().all(|r| {
                        state.ancestor_satisfied(migration_id, &r.package_id, &r.version, scope)
                    });

                    !v.is_independent() && previous_ok && refs_ok
                }
            })
            .filter(|v| scope.contains(&v.key.package_id, &v.key.version))
            .filter(|v| !state.version_tagged(migration_id, &v.key, None))
            .map(|v| v.key.clone())
            .collect();

        Ok(state.sort_versions(keys))
    }

    async fn find_eligible_comparisons(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        selection: ComparisonSelection,
    ) -> Result<Vec<ComparisonKey>, Error> {
        let state = self.state.lock().await;

        let table = state.comparisons_table(migration_id, selection == ComparisonSelection::Other)?;
        let pairs = state
            .live_pairs(table)
            .filter(|c| match selection {
                ComparisonSelection::Other => {
                    state.pointer_changed(c)
                        && state.endpoint_migrated(migration_id, &c.current, scope)
                        && state.endpoint_migrated(migration_id, &c.previous, scope)
                }
                ComparisonSelection::Only => true,
            })
            .filter(|c| scope.contains(&c.current.package_id, &c.current.version))
            .filter(|c| !state.comparison_tagged(migration_id, c, None))
            .cloned()
            .collect();

        Ok(state.sort_comparisons(pairs))
    }

    async fn get_version_build_inputs(&self, key: &VersionKey) -> Result<Option<VersionBuildInputs>, Error> {
        let state = self.state.lock().await;
        let Some(version) = state.live(key) else {
            return Ok(None);
        };

        let mut refs = version.refs.clone();
        refs.sort_by(|a, b| {
            (&a.package_id, &a.version, a.revision).cmp(&(&b.package_id, &b.version, b.revision))
        });

        Ok(Some(VersionBuildInputs {
            version: PublishedVersion {
                key: version.key.clone(),
                previous_version: version.previous_version.clone(),
                previous_version_package_id: version.previous_version_package_id.clone(),
                published_at: version.published_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
                metadata: version.metadata.clone(),
            },
            refs,
            source: state.sources.get(key).cloned(),
        }))
    }

    async fn list_published_files(&self, key: &VersionKey) -> Result<Vec<PublishedFile>, Error> {
        let state = self.state.lock().await;
        Ok(state.files.get(key).cloned().unwrap_or_default())
    }

    async fn find_unmigrated_versions(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
    ) -> Result<Vec<VersionKey>, Error> {
        let state = self.state.lock().await;

        let keys = state
            .versions
            .iter()
            .filter(|v| !v.deleted && scope.contains(&v.key.package_id, &v.key.version))
            .filter(|v| !state.version_tagged(migration_id, &v.key, Some(BuildStatus::Complete)))
            .map(|v| v.key.clone())
            .collect();

        Ok(state.sort_versions(keys))
    }

    async fn find_unmigrated_comparisons(
        &self,
        migration_id: Uuid,
        scope: &MigrationScope,
        changelog_only: bool,
    ) -> Result<Vec<ComparisonKey>, Error> {
        let state = self.state.lock().await;

        let table = state.comparisons_table(migration_id, !changelog_only)?;
        let pairs = state
            .live_pairs(table)
            .filter(|c| scope.contains(&c.current.package_id, &c.current.version))
            .filter(|c| !state.comparison_tagged(migration_id, c, Some(BuildStatus::Complete)))
            .filter(|c| {
                changelog_only
                    || state.pointer_changed(c)
                    || !state.version_tagged(migration_id, &c.current, Some(BuildStatus::Complete))
            })
            .cloned()
            .collect();

        Ok(state.sort_comparisons(pairs))
    }
}

#[async_trait]
impl MaintenanceDbTrait for MemoryStateDb {
    async fn create_comparison_snapshot(&self, migration_id: Uuid) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let rows = state.comparisons.clone();
        state.snapshots.insert(migration_id, rows);
        Ok(())
    }

    async fn drop_comparison_snapshot(&self, migration_id: Uuid) -> Result<(), Error> {
        self.state.lock().await.snapshots.remove(&migration_id);
        Ok(())
    }

    async fn list_stale_source_blobs(&self, current: Uuid) -> Result<Vec<BlobRef>, Error> {
        let state = self.state.lock().await;
        let old_runs = state.terminal_runs_other_than(current);

        let blobs: BTreeSet<BlobRef> = state
            .tasks
            .iter()
            .filter(|t| t.task.migration_id.is_some_and(|id| old_runs.contains(&id)))
            .filter_map(|t| match &t.source {
                BuildSource::ObjectStore { bucket, key } => Some(BlobRef {
                    bucket: bucket.clone(),
                    key: key.clone(),
                }),
                _ => None,
            })
            .filter(|blob| {
                !state
                    .sources
                    .values()
                    .any(|s| s.object_key.as_deref() == Some(blob.key.as_str()))
            })
            .collect();

        Ok(blobs.into_iter().collect())
    }

    async fn purge_previous_migration_tasks(&self, current: Uuid) -> Result<u64, Error> {
        let mut state = self.state.lock().await;
        let old_runs = state.terminal_runs_other_than(current);

        let before = state.tasks.len();
        state
            .tasks
            .retain(|t| !t.task.migration_id.is_some_and(|id| old_runs.contains(&id)));

        Ok((before - state.tasks.len()) as u64)
    }

    async fn drop_stale_snapshots(&self, current: Uuid) -> Result<Vec<String>, Error> {
        let mut state = self.state.lock().await;
        let active: BTreeSet<Uuid> = state
            .runs
            .iter()
            .filter(|r| is_active(r.status))
            .map(|r| r.id)
            .collect();

        let stale: Vec<Uuid> = state
            .snapshots
            .keys()
            .filter(|owner| **owner != current && !active.contains(owner))
            .copied()
            .collect();

        Ok(stale
            .into_iter()
            .map(|owner| {
                state.snapshots.remove(&owner);
                comparison_snapshot_table(owner)
            })
            .collect())
    }
}

impl DatabaseTrait for MemoryStateDb {}
