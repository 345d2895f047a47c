use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::catalog::{ComparisonKey, VersionKey};

mod stage;
pub use stage::MigrationStage;

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum MigrationStatus {
    Running,
    Complete,
    Failed,
    Cancelling,
    Cancelled,
}

impl MigrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationStatus::Complete | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }
}

/// Package / version filter of a run.
/// Both lists empty means the whole catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationScope {
    #[serde(default)]
    pub package_ids: Vec<String>,
    #[serde(default)]
    pub versions: Vec<String>,
}

impl MigrationScope {
    pub fn is_unscoped(&self) -> bool {
        self.package_ids.is_empty() && self.versions.is_empty()
    }

    /// Whether `(package_id, version)` falls inside the filter.
    pub fn contains(&self, package_id: &str, version: &str) -> bool {
        (self.package_ids.is_empty() || self.package_ids.iter().any(|p| p == package_id))
            && (self.versions.is_empty() || self.versions.iter().any(|v| v == version))
    }
}

/// Operator input for a new run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MigrationRequest {
    #[serde(default)]
    pub scope: MigrationScope,
    #[serde(default)]
    pub changelog_only: bool,
    #[serde(default)]
    pub skip_validation: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationRun {
    pub id: Uuid,
    pub sequence_number: i64,
    pub scope: MigrationScope,
    pub changelog_only: bool,
    pub skip_validation: bool,
    pub status: MigrationStatus,
    pub stage: MigrationStage,
    pub instance_id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub error_details: Option<String>,
    pub post_check_result: Option<PostCheckResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Entities left without a completed task after the main sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCheckResult {
    pub versions: Vec<VersionKey>,
    pub comparisons: Vec<ComparisonKey>,
}

impl PostCheckResult {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.comparisons.is_empty()
    }
}
