use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the `(package, version, revision)` a build source lookup was made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub package_id: String,
    pub version: String,
    pub revision: i32,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}@{}", self.package_id, self.version, self.revision)
    }
}

/// Which lookup failed while assembling a build task payload.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildSourceError {
    #[error("published version {0} not found")]
    VersionNotFound(SourceRef),

    #[error("source archive for {0} is missing")]
    MissingArchive(SourceRef),

    #[error("build config for {0} is empty")]
    EmptyConfig(SourceRef),

    #[error("build config for {target} is invalid: {reason}")]
    InvalidConfig { target: SourceRef, reason: String },

    #[error("no published files stored for {0}")]
    NoFiles(SourceRef),

    #[error("failed to assemble archive for {target}: {reason}")]
    Archive { target: SourceRef, reason: String },
}
