use async_trait::async_trait;

use crate::error::Error;

mod local_fs;
pub use local_fs::LocalFsObjectStore;

/// A blob referenced by a build task source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobRef {
    pub bucket: String,
    pub key: String,
}

/// Blob storage published source archives may be off-loaded to.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Bucket new references are resolved against.
    fn default_bucket(&self) -> &str;

    /// Reads the full contents of a blob.
    async fn get_blob(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Error>;

    /// Removes blobs, keys that do not exist are ignored.
    async fn remove_blobs(&self, bucket: &str, keys: &[String]) -> Result<(), Error>;
}
