use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::catalog::VersionKey;

mod config;
pub use config::{BuildConfig, BuildConfigRef};

/// Priority migration tasks are created with.
/// The worker pool serves higher values first, so interactive
/// publishes (priority 0) are never queued behind a migration.
pub const MIGRATION_BUILD_PRIORITY: i32 = -1;

#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BuildStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl BuildStatus {
    /// Pending and running tasks both count as outstanding.
    pub fn is_outstanding(self) -> bool {
        matches!(self, BuildStatus::Pending | BuildStatus::Running)
    }
}

#[derive(
    Clone, Debug, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    #[default]
    Build,
    Changelog,
}

/// Where the worker finds the source archive of a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildSource {
    /// Comparison tasks carry no archive.
    None,
    Inline(Vec<u8>),
    ObjectStore { bucket: String, key: String },
}

/// Everything persisted for one task, written atomically.
#[derive(Clone, Debug)]
pub struct NewBuildTask {
    pub id: Uuid,
    pub key: VersionKey,
    pub build_type: BuildType,
    pub priority: i32,
    pub migration_id: Option<Uuid>,
    pub previous: Option<VersionKey>,
    pub source: BuildSource,
    pub config: BuildConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildTask {
    pub id: Uuid,
    pub key: VersionKey,
    pub build_type: BuildType,
    pub status: BuildStatus,
    pub priority: i32,
    pub migration_id: Option<Uuid>,
    pub previous: Option<VersionKey>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Number of a migration's tasks in one `(build_type, status)` bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusCount {
    pub build_type: BuildType,
    pub status: BuildStatus,
    pub count: u64,
}
