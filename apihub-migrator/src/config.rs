use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use apihub_common::error::Error;
use serde::{Deserialize, Serialize};

use crate::engine::EngineSettings;

pub const DEFAULT_CONFIG_PATH: &str = "./migrator.yaml";
pub const DEFAULT_OBJECT_STORE_BUCKET: &str = "published-sources";

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_INSTANCE_ID: &str = "APIHUB_INSTANCE_ID";
pub const ENV_OBJECT_STORE_ROOT: &str = "APIHUB_OBJECT_STORE_ROOT";
pub const ENV_OBJECT_STORE_BUCKET: &str = "APIHUB_OBJECT_STORE_BUCKET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Directory buckets are laid out under.
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_bucket() -> String {
    DEFAULT_OBJECT_STORE_BUCKET.to_string()
}

/// Service configuration, YAML file first, environment on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    pub database_url: Option<String>,
    /// Falls back to `<hostname>:<pid>`.
    pub instance_id: Option<String>,
    pub log_level: String,
    pub poll_interval_secs: u64,
    pub per_task_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub stale_after_secs: u64,
    pub recovery_interval_secs: u64,
    pub inline_offloaded_sources: bool,
    pub object_store: Option<ObjectStoreConfig>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            instance_id: None,
            log_level: "info".to_string(),
            poll_interval_secs: 15,
            per_task_timeout_secs: 300,
            heartbeat_interval_secs: 30,
            stale_after_secs: 120,
            recovery_interval_secs: 60,
            inline_offloaded_sources: false,
            object_store: None,
        }
    }
}

impl MigratorConfig {
    /// Loads the YAML file (optional when `path` is `None`),
    /// applies the process environment and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Overrides file values with the environment variables that are set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var(ENV_DATABASE_URL) {
            self.database_url = Some(url);
        }
        if let Some(instance_id) = var(ENV_INSTANCE_ID) {
            self.instance_id = Some(instance_id);
        }

        let bucket = var(ENV_OBJECT_STORE_BUCKET);
        match (var(ENV_OBJECT_STORE_ROOT), self.object_store.as_mut()) {
            (Some(root), Some(store)) => {
                store.root = PathBuf::from(root);
            }
            (Some(root), None) => {
                self.object_store = Some(ObjectStoreConfig {
                    root: PathBuf::from(root),
                    bucket: default_bucket(),
                });
            }
            (None, _) => {}
        }
        if let (Some(bucket), Some(store)) = (bucket, self.object_store.as_mut()) {
            store.bucket = bucket;
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("per_task_timeout_secs", self.per_task_timeout_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("stale_after_secs", self.stale_after_secs),
            ("recovery_interval_secs", self.recovery_interval_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }

        if self.stale_after_secs <= self.heartbeat_interval_secs {
            return Err(Error::Config(format!(
                "stale_after_secs ({}) must be larger than heartbeat_interval_secs ({})",
                self.stale_after_secs, self.heartbeat_interval_secs
            )));
        }

        if let Some(store) = &self.object_store {
            if store.bucket.trim().is_empty() {
                return Err(Error::Config("object_store.bucket must not be empty".into()));
            }
        }

        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, Error> {
        self.database_url
            .as_deref()
            .ok_or_else(|| Error::Config(format!("{} must be set", ENV_DATABASE_URL)))
    }

    pub fn resolve_instance_id(&self) -> String {
        if let Some(instance_id) = &self.instance_id {
            return instance_id.clone();
        }

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());

        format!("{}:{}", host, std::process::id())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            per_task_timeout: Duration::from_secs(self.per_task_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
            recovery_interval: Duration::from_secs(self.recovery_interval_secs),
            inline_offloaded_sources: self.inline_offloaded_sources,
        }
    }
}
