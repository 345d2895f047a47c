use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    catalog::{VersionKey, VersionRef},
    error::BuildSourceError,
};

use super::BuildType;

/// Version metadata carried over verbatim into a rebuilt config.
pub const CARRIED_METADATA_KEYS: &[&str] = &["branch", "cloud", "namespace", "labels"];

/// Configuration handed to the worker together with the source archive.
/// ---
/// Fields the engine does not understand are kept in `extra`
/// and written back unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default)]
    pub package_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub build_type: BuildType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version_package_id: Option<String>,
    #[serde(default)]
    pub files: Vec<Value>,
    #[serde(default)]
    pub refs: Vec<BuildConfigRef>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<Uuid>,
    /// Worker skips spec validation, set from the run's mode flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_validation: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigRef {
    pub ref_id: String,
    /// `version@revision`
    pub version: String,
}

impl From<&VersionRef> for BuildConfigRef {
    fn from(r: &VersionRef) -> Self {
        Self {
            ref_id: r.package_id.clone(),
            version: format!("{}@{}", r.version, r.revision),
        }
    }
}

impl BuildConfig {
    /// Parses the config blob retained at publish time.
    pub fn from_retained(raw: &[u8], target: &VersionKey) -> Result<Self, BuildSourceError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(BuildSourceError::EmptyConfig(target.as_source_ref()));
        }

        let value: Value =
            serde_json::from_slice(raw).map_err(|e| BuildSourceError::InvalidConfig {
                target: target.as_source_ref(),
                reason: e.to_string(),
            })?;

        match &value {
            Value::Object(map) if map.is_empty() => {
                return Err(BuildSourceError::EmptyConfig(target.as_source_ref()));
            }
            Value::Object(_) => {}
            Value::Null => return Err(BuildSourceError::EmptyConfig(target.as_source_ref())),
            other => {
                return Err(BuildSourceError::InvalidConfig {
                    target: target.as_source_ref(),
                    reason: format!("expected a JSON object, found {other}"),
                });
            }
        }

        serde_json::from_value(value).map_err(|e| BuildSourceError::InvalidConfig {
            target: target.as_source_ref(),
            reason: e.to_string(),
        })
    }

    /// Copies the carried-over keys of the catalog metadata.
    pub fn stamp_metadata(&mut self, version_metadata: Option<&Value>) {
        let Some(Value::Object(source)) = version_metadata else {
            return;
        };

        for key in CARRIED_METADATA_KEYS {
            if let Some(value) = source.get(*key) {
                self.metadata.insert((*key).to_string(), value.clone());
            }
        }
    }
}
