use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceRef;

/// A published `(package, version, revision)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub package_id: String,
    pub version: String,
    pub revision: i32,
}

impl VersionKey {
    pub fn new(package_id: impl Into<String>, version: impl Into<String>, revision: i32) -> Self {
        Self {
            package_id: package_id.into(),
            version: version.into(),
            revision,
        }
    }

    /// `version@revision`, the form build configs address versions by.
    pub fn version_with_revision(&self) -> String {
        format!("{}@{}", self.version, self.revision)
    }

    pub fn as_source_ref(&self) -> SourceRef {
        SourceRef {
            package_id: self.package_id.clone(),
            version: self.version.clone(),
            revision: self.revision,
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}@{}", self.package_id, self.version, self.revision)
    }
}

/// Ordered pair `(version, previous version)` whose changelog is derived data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComparisonKey {
    pub current: VersionKey,
    pub previous: VersionKey,
}

impl fmt::Display for ComparisonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- {}", self.current, self.previous)
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum DependencyClass {
    /// No previous version and no refs.
    Independent,
    /// Has a previous version or at least one ref.
    Dependent,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum RevisionClass {
    /// Highest non-deleted revision of a version.
    Latest,
    /// Any lower revision.
    Old,
}

/// Partition of the catalog a versions stage works on.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct VersionSelection {
    pub dependency: DependencyClass,
    pub revisions: RevisionClass,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum ComparisonSelection {
    /// Snapshot comparisons whose recorded previous pointer no longer
    /// matches the version's current one, both endpoints migrated.
    Other,
    /// Live comparisons, used by changelog-only runs.
    Only,
}

/// Catalog row of a published version, as far as the engine needs it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishedVersion {
    pub key: VersionKey,
    pub previous_version: Option<String>,
    pub previous_version_package_id: Option<String>,
    pub published_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// One entry of a version's ref list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    pub package_id: String,
    pub version: String,
    pub revision: i32,
}

/// Author inputs retained at publish time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishedSource {
    pub config: Vec<u8>,
    pub archive: Option<Vec<u8>>,
    /// Set when the archive was off-loaded to object storage.
    pub object_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VersionBuildInputs {
    pub version: PublishedVersion,
    pub refs: Vec<VersionRef>,
    pub source: Option<PublishedSource>,
}

/// A single stored file of a published version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedFile {
    pub file_id: String,
    pub path: String,
    pub data: Vec<u8>,
}
