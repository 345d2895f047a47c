//! Parameterized SQL over the catalog and task tables.
//!
//! Every caller-supplied value is bound; list filters expand into
//! `IN ($n, $n+1, ...)`. The only identifiers built at runtime are
//! snapshot table names, which are derived from a migration id.
//!
//! The engine tests run against the in-memory store in
//! `apihub-migrator/src/testing/memory_db.rs`, which restates the
//! eligibility and post-check queries below row by row. A change to
//! one of them has to be made to its counterpart there too.

use apihub_common::{
    build::{BuildStatus, BuildType},
    catalog::{
        ComparisonSelection, DependencyClass, RevisionClass, VersionKey, VersionSelection,
    },
    migration::{MigrationScope, MigrationStatus},
    state::comparison_snapshot_table,
};
use sea_orm::{DbBackend, Statement, Value};
use uuid::Uuid;

use crate::mapping::{BUILD_STATUS_DB_ENUM_NAME, MIGRATION_STATUS_DB_ENUM_NAME};

pub(crate) const LIVE_COMPARISONS_TABLE: &str = "version_comparisons";

const NO_PREVIOUS: &str = "COALESCE(pv.previous_version, '') = ''";
const PREVIOUS_PACKAGE: &str = "COALESCE(NULLIF(pv.previous_version_package_id, ''), pv.package_id)";
const REFS_OF_PV: &str = "SELECT 1 FROM published_version_refs r \
     WHERE r.package_id = pv.package_id AND r.version = pv.version AND r.revision = pv.revision";
const MAX_LIVE_REVISION: &str = "(SELECT MAX(lr.revision) FROM published_versions lr \
     WHERE lr.package_id = pv.package_id AND lr.version = pv.version AND lr.deleted_at IS NULL)";

/// Positional parameters of one statement.
#[derive(Debug, Default)]
pub(crate) struct SqlParams {
    values: Vec<Value>,
}

impl SqlParams {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Binds a value and returns its placeholder.
    pub(crate) fn push(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("${}", self.values.len())
    }

    /// Binds a value cast to a named database type, e.g. a pg enum.
    pub(crate) fn push_cast(&mut self, value: impl Into<Value>, type_name: &str) -> String {
        format!("CAST({} AS {})", self.push(value), type_name)
    }

    /// Binds every item, returning `$a, $b, ...` for an `IN` list.
    pub(crate) fn push_list(&mut self, items: &[String]) -> String {
        items
            .iter()
            .map(|item| self.push(item.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn into_statement(self, sql: String) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, self.values)
    }
}

/// Placeholders shared by the eligibility and post-check queries.
struct TagParams {
    params: SqlParams,
    migration: String,
}

impl TagParams {
    fn new(migration_id: Uuid) -> Self {
        let mut params = SqlParams::new();
        let migration = params.push(migration_id);
        Self { params, migration }
    }

    fn build_status(&mut self, status: BuildStatus) -> String {
        self.params
            .push_cast(status.to_string(), BUILD_STATUS_DB_ENUM_NAME)
    }

    fn build_type(&mut self, build_type: BuildType) -> String {
        self.params.push(build_type.to_string())
    }

    /// `pkg IN (..) AND ver IN (..)`, `None` for an unscoped run.
    fn scope(&mut self, pkg: &str, ver: &str, scope: &MigrationScope) -> Option<String> {
        let mut parts = Vec::new();
        if !scope.package_ids.is_empty() {
            parts.push(format!(
                "{pkg} IN ({})",
                self.params.push_list(&scope.package_ids)
            ));
        }
        if !scope.versions.is_empty() {
            parts.push(format!("{ver} IN ({})", self.params.push_list(&scope.versions)));
        }

        (!parts.is_empty()).then(|| parts.join(" AND "))
    }

    /// An ancestor `(pkg, ver)` is satisfied when any of its revisions was
    /// rebuilt by this migration, when it is gone from the catalog, or
    /// when it lies outside the run's scope.
    fn ancestor_satisfied(&mut self, pkg: &str, ver: &str, scope: &MigrationScope) -> String {
        let build = self.build_type(BuildType::Build);
        let complete = self.build_status(BuildStatus::Complete);
        let migration = self.migration.clone();

        let mut clauses = vec![
            format!(
                "EXISTS (SELECT 1 FROM build_tasks anc WHERE anc.migration_id = {migration} \
                 AND anc.build_type = {build} AND anc.status = {complete} \
                 AND anc.package_id = {pkg} AND anc.version = {ver})"
            ),
            format!(
                "NOT EXISTS (SELECT 1 FROM published_versions apv \
                 WHERE apv.package_id = {pkg} AND apv.version = {ver} AND apv.deleted_at IS NULL)"
            ),
        ];
        if let Some(in_scope) = self.scope(pkg, ver, scope) {
            clauses.push(format!("NOT ({in_scope})"));
        }

        format!("({})", clauses.join(" OR "))
    }

    /// Exact `(pkg, ver, rev)` rebuilt by this migration, or out of scope.
    fn endpoint_migrated(
        &mut self,
        pkg: &str,
        ver: &str,
        rev: &str,
        scope: &MigrationScope,
    ) -> String {
        let migrated = self.version_tagged(pkg, ver, rev, Some(BuildStatus::Complete));
        match self.scope(pkg, ver, scope) {
            Some(in_scope) => format!("({migrated} OR NOT ({in_scope}))"),
            None => migrated,
        }
    }

    fn version_tagged(
        &mut self,
        pkg: &str,
        ver: &str,
        rev: &str,
        status: Option<BuildStatus>,
    ) -> String {
        let build = self.build_type(BuildType::Build);
        let status_clause = match status {
            Some(status) => format!(" AND t.status = {}", self.build_status(status)),
            None => String::new(),
        };

        format!(
            "EXISTS (SELECT 1 FROM build_tasks t WHERE t.migration_id = {} \
             AND t.build_type = {build}{status_clause} \
             AND t.package_id = {pkg} AND t.version = {ver} AND t.revision = {rev})",
            self.migration
        )
    }

    fn comparison_tagged(&mut self, status: Option<BuildStatus>) -> String {
        let changelog = self.build_type(BuildType::Changelog);
        let status_clause = match status {
            Some(status) => format!(" AND t.status = {}", self.build_status(status)),
            None => String::new(),
        };

        format!(
            "EXISTS (SELECT 1 FROM build_tasks t WHERE t.migration_id = {} \
             AND t.build_type = {changelog}{status_clause} \
             AND t.package_id = vc.package_id AND t.version = vc.version AND t.revision = vc.revision \
             AND t.previous_package_id = vc.previous_package_id \
             AND t.previous_version = vc.previous_version \
             AND t.previous_revision = vc.previous_revision)",
            self.migration
        )
    }
}

/// Counterpart: `MemoryStateDb::find_eligible_versions`.
pub(crate) fn eligible_versions(
    migration_id: Uuid,
    scope: &MigrationScope,
    selection: VersionSelection,
) -> Statement {
    let mut q = TagParams::new(migration_id);

    let mut conds = vec!["pv.deleted_at IS NULL".to_string()];
    conds.push(match selection.revisions {
        RevisionClass::Latest => format!("pv.revision = {MAX_LIVE_REVISION}"),
        RevisionClass::Old => format!("pv.revision < {MAX_LIVE_REVISION}"),
    });

    let independent = format!("({NO_PREVIOUS} AND NOT EXISTS ({REFS_OF_PV}))");
    match selection.dependency {
        DependencyClass::Independent => conds.push(independent),
        DependencyClass::Dependent => {
            conds.push(format!("NOT {independent}"));

            let previous_ok = q.ancestor_satisfied(PREVIOUS_PACKAGE, "pv.previous_version", scope);
            conds.push(format!("({NO_PREVIOUS} OR {previous_ok})"));

            let ref_ok = q.ancestor_satisfied("r.reference_id", "r.reference_version", scope);
            conds.push(format!("NOT EXISTS ({REFS_OF_PV} AND NOT {ref_ok})"));
        }
    }

    if let Some(in_scope) = q.scope("pv.package_id", "pv.version", scope) {
        conds.push(in_scope);
    }

    let tagged = q.version_tagged("pv.package_id", "pv.version", "pv.revision", None);
    conds.push(format!("NOT {tagged}"));

    let sql = format!(
        "SELECT pv.package_id, pv.version, pv.revision \
         FROM published_versions pv \
         WHERE {} \
         ORDER BY pv.published_at, pv.package_id, pv.version, pv.revision",
        conds.join(" AND ")
    );

    q.params.into_statement(sql)
}

const COMPARISON_COLUMNS: &str = "vc.package_id, vc.version, vc.revision, \
     vc.previous_package_id, vc.previous_version, vc.previous_revision";

const COMPARISON_ORDER: &str = "cur.published_at, vc.package_id, vc.version, vc.revision, \
     vc.previous_package_id, vc.previous_version, vc.previous_revision";

/// Joins both endpoints, only pairs whose endpoints are live survive.
fn comparison_source(table: &str) -> String {
    format!(
        "FROM {table} vc \
         JOIN published_versions cur ON cur.package_id = vc.package_id \
         AND cur.version = vc.version AND cur.revision = vc.revision AND cur.deleted_at IS NULL \
         JOIN published_versions prev ON prev.package_id = vc.previous_package_id \
         AND prev.version = vc.previous_version AND prev.revision = vc.previous_revision \
         AND prev.deleted_at IS NULL"
    )
}

/// The version's current previous pointer differs from the recorded one.
const POINTER_CHANGED: &str = "(COALESCE(NULLIF(cur.previous_version_package_id, ''), cur.package_id), \
     COALESCE(cur.previous_version, '')) IS DISTINCT FROM \
     (COALESCE(vc.previous_package_id, ''), COALESCE(vc.previous_version, ''))";

pub(crate) fn comparisons_table(migration_id: Uuid, snapshot: bool) -> String {
    if snapshot {
        comparison_snapshot_table(migration_id)
    } else {
        LIVE_COMPARISONS_TABLE.to_string()
    }
}

/// Counterpart: `MemoryStateDb::find_eligible_comparisons`.
pub(crate) fn eligible_comparisons(
    migration_id: Uuid,
    scope: &MigrationScope,
    selection: ComparisonSelection,
) -> Statement {
    let mut q = TagParams::new(migration_id);
    let mut conds = vec!["TRUE".to_string()];

    let table = match selection {
        ComparisonSelection::Other => {
            conds.push(POINTER_CHANGED.to_string());
            conds.push(q.endpoint_migrated("vc.package_id", "vc.version", "vc.revision", scope));
            conds.push(q.endpoint_migrated(
                "vc.previous_package_id",
                "vc.previous_version",
                "vc.previous_revision",
                scope,
            ));
            comparisons_table(migration_id, true)
        }
        ComparisonSelection::Only => comparisons_table(migration_id, false),
    };

    if let Some(in_scope) = q.scope("vc.package_id", "vc.version", scope) {
        conds.push(in_scope);
    }

    let tagged = q.comparison_tagged(None);
    conds.push(format!("NOT {tagged}"));

    let sql = format!(
        "SELECT {COMPARISON_COLUMNS} {} WHERE {} ORDER BY {COMPARISON_ORDER}",
        comparison_source(&table),
        conds.join(" AND ")
    );

    q.params.into_statement(sql)
}

/// Counterpart: `MemoryStateDb::find_unmigrated_versions`.
pub(crate) fn unmigrated_versions(migration_id: Uuid, scope: &MigrationScope) -> Statement {
    let mut q = TagParams::new(migration_id);
    let mut conds = vec!["pv.deleted_at IS NULL".to_string()];

    if let Some(in_scope) = q.scope("pv.package_id", "pv.version", scope) {
        conds.push(in_scope);
    }

    let migrated = q.version_tagged(
        "pv.package_id",
        "pv.version",
        "pv.revision",
        Some(BuildStatus::Complete),
    );
    conds.push(format!("NOT {migrated}"));

    let sql = format!(
        "SELECT pv.package_id, pv.version, pv.revision \
         FROM published_versions pv \
         WHERE {} \
         ORDER BY pv.published_at, pv.package_id, pv.version, pv.revision",
        conds.join(" AND ")
    );

    q.params.into_statement(sql)
}

/// Comparisons neither rebuilt by a changelog task nor, in full runs,
/// regenerated by their version's build while the pointer still matches.
/// Counterpart: `MemoryStateDb::find_unmigrated_comparisons`.
pub(crate) fn unmigrated_comparisons(
    migration_id: Uuid,
    scope: &MigrationScope,
    changelog_only: bool,
) -> Statement {
    let mut q = TagParams::new(migration_id);
    let mut conds = vec!["TRUE".to_string()];

    if let Some(in_scope) = q.scope("vc.package_id", "vc.version", scope) {
        conds.push(in_scope);
    }

    let changelog_done = q.comparison_tagged(Some(BuildStatus::Complete));
    conds.push(format!("NOT {changelog_done}"));

    if !changelog_only {
        let build_done = q.version_tagged(
            "vc.package_id",
            "vc.version",
            "vc.revision",
            Some(BuildStatus::Complete),
        );
        conds.push(format!("NOT (NOT {POINTER_CHANGED} AND {build_done})"));
    }

    let table = comparisons_table(migration_id, !changelog_only);
    let sql = format!(
        "SELECT {COMPARISON_COLUMNS} {} WHERE {} ORDER BY {COMPARISON_ORDER}",
        comparison_source(&table),
        conds.join(" AND ")
    );

    q.params.into_statement(sql)
}

/// Locks one stale run of another instance, skipping rows locked elsewhere.
pub(crate) fn lock_stale_run(instance_id: &str, stale_after_secs: f64) -> Statement {
    let mut p = SqlParams::new();
    let running = p.push_cast(
        MigrationStatus::Running.to_string(),
        MIGRATION_STATUS_DB_ENUM_NAME,
    );
    let instance = p.push(instance_id.to_string());
    let secs = p.push(stale_after_secs);

    let sql = format!(
        "SELECT id FROM migration_runs \
         WHERE status = {running} AND instance_id <> {instance} \
         AND last_heartbeat < NOW() - make_interval(secs => {secs}) \
         ORDER BY sequence_number \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED"
    );

    p.into_statement(sql)
}

pub(crate) fn lock_abandoned_cancellations(stale_after_secs: f64) -> Statement {
    let mut p = SqlParams::new();
    let cancelling = p.push_cast(
        MigrationStatus::Cancelling.to_string(),
        MIGRATION_STATUS_DB_ENUM_NAME,
    );
    let secs = p.push(stale_after_secs);

    let sql = format!(
        "SELECT id FROM migration_runs \
         WHERE status = {cancelling} \
         AND last_heartbeat < NOW() - make_interval(secs => {secs}) \
         FOR UPDATE SKIP LOCKED"
    );

    p.into_statement(sql)
}

pub(crate) fn next_sequence_number() -> Statement {
    SqlParams::new().into_statement(
        "SELECT COALESCE(MAX(sequence_number), 0) + 1 AS next_seq FROM migration_runs"
            .to_string(),
    )
}

pub(crate) fn task_counts(migration_id: Uuid) -> Statement {
    let mut p = SqlParams::new();
    let migration = p.push(migration_id);

    let sql = format!(
        "SELECT build_type, status::text AS status, COUNT(*) AS task_count \
         FROM build_tasks WHERE migration_id = {migration} \
         GROUP BY build_type, status \
         ORDER BY build_type, status"
    );

    p.into_statement(sql)
}

const TERMINAL_RUN_STATUSES: [MigrationStatus; 3] = [
    MigrationStatus::Complete,
    MigrationStatus::Failed,
    MigrationStatus::Cancelled,
];

fn terminal_runs_other_than(p: &mut SqlParams, current: Uuid) -> String {
    let current = p.push(current);
    let statuses = TERMINAL_RUN_STATUSES
        .iter()
        .map(|s| p.push_cast(s.to_string(), MIGRATION_STATUS_DB_ENUM_NAME))
        .collect::<Vec<_>>()
        .join(", ");

    format!("SELECT r.id FROM migration_runs r WHERE r.id <> {current} AND r.status IN ({statuses})")
}

/// Blobs of old migration task sources no published source points at any more.
pub(crate) fn stale_source_blobs(current: Uuid) -> Statement {
    let mut p = SqlParams::new();
    let old_runs = terminal_runs_other_than(&mut p, current);

    let sql = format!(
        "SELECT DISTINCT s.object_bucket, s.object_key \
         FROM build_task_sources s \
         JOIN build_tasks t ON t.id = s.build_id \
         WHERE t.migration_id IN ({old_runs}) \
         AND s.object_bucket IS NOT NULL AND s.object_key IS NOT NULL \
         AND NOT EXISTS (SELECT 1 FROM published_sources ps WHERE ps.object_key = s.object_key) \
         ORDER BY s.object_bucket, s.object_key"
    );

    p.into_statement(sql)
}

pub(crate) fn purge_previous_tasks(current: Uuid) -> Statement {
    let mut p = SqlParams::new();
    let old_runs = terminal_runs_other_than(&mut p, current);

    p.into_statement(format!(
        "DELETE FROM build_tasks WHERE migration_id IN ({old_runs})"
    ))
}

pub(crate) fn list_snapshot_tables() -> Statement {
    let mut p = SqlParams::new();
    let pattern = p.push(format!(
        "{}%",
        apihub_common::state::COMPARISON_SNAPSHOT_PREFIX.replace('_', "\\_")
    ));

    p.into_statement(format!(
        "SELECT tablename FROM pg_tables \
         WHERE schemaname = current_schema() AND tablename LIKE {pattern}"
    ))
}

fn key_filter(p: &mut SqlParams, key: &VersionKey) -> String {
    format!(
        "package_id = {} AND version = {} AND revision = {}",
        p.push(key.package_id.clone()),
        p.push(key.version.clone()),
        p.push(key.revision)
    )
}

pub(crate) fn published_version(key: &VersionKey) -> Statement {
    let mut p = SqlParams::new();
    let filter = key_filter(&mut p, key);

    p.into_statement(format!(
        "SELECT package_id, version, revision, previous_version, previous_version_package_id, \
         published_at, metadata \
         FROM published_versions WHERE {filter} AND deleted_at IS NULL"
    ))
}

pub(crate) fn version_refs(key: &VersionKey) -> Statement {
    let mut p = SqlParams::new();
    let filter = key_filter(&mut p, key);

    p.into_statement(format!(
        "SELECT reference_id, reference_version, reference_revision \
         FROM published_version_refs WHERE {filter} \
         ORDER BY reference_id, reference_version, reference_revision"
    ))
}

pub(crate) fn published_source(key: &VersionKey) -> Statement {
    let mut p = SqlParams::new();
    let filter = key_filter(&mut p, key);

    p.into_statement(format!(
        "SELECT config, archive, object_key FROM published_sources WHERE {filter}"
    ))
}

pub(crate) fn published_files(key: &VersionKey) -> Statement {
    let mut p = SqlParams::new();
    let filter = key_filter(&mut p, key);

    p.into_statement(format!(
        "SELECT file_id, path, data FROM published_files WHERE {filter} \
         ORDER BY publish_order, file_id"
    ))
}
