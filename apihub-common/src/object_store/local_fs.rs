use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Error;

use super::ObjectStore;

/// Object store laid out as `<root>/<bucket>/<key>` on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalFsObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn blob_path(&self, bucket: &str, key: &str) -> Result<PathBuf, Error> {
        for segment in [bucket, key] {
            let escapes = Path::new(segment)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));

            if segment.is_empty() || escapes {
                return Err(Error::InvalidInput(format!(
                    "Object store path segment '{}' is not a plain relative path",
                    segment
                )));
            }
        }

        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    async fn get_blob(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Error> {
        let path = self.blob_path(bucket, key)?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(io_err) if io_err.kind() == ErrorKind::NotFound => Err(Error::NotFound {
                resource_type: "Blob".to_string(),
                resource_id: format!("{}/{}", bucket, key),
            }),
            Err(io_err) => Err(Error::ObjectStore(format!(
                "Failed to read blob at path {}: {}",
                path.display(),
                io_err
            ))),
        }
    }

    async fn remove_blobs(&self, bucket: &str, keys: &[String]) -> Result<(), Error> {
        for key in keys {
            let path = self.blob_path(bucket, key)?;

            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed blob {}", path.display()),
                Err(io_err) if io_err.kind() == ErrorKind::NotFound => {}
                Err(io_err) => {
                    return Err(Error::ObjectStore(format!(
                        "Failed to remove blob at path {}: {}",
                        path.display(),
                        io_err
                    )));
                }
            }
        }

        Ok(())
    }
}
