//! Blob storage for page images, cropped figures and question JSON.
//!
//! Keys are `/`-separated and always start with the paper folder
//! (the normalised paper key):
//!
//! ```text
//! {paper}/page_{n}.png             rasterised page
//! {paper}/{page}_{label}_{qn}.png  cropped diagram / graph
//! {paper}/questions.json           consolidated questions
//! {paper}/rerun/…                  artefacts of the second extraction run
//! ```
//!
//! Uploads are fatal on failure. Deletes are best-effort: callers log and
//! carry on, which is why [`BlobStore::delete`] reports "already gone" as
//! `Ok(false)` rather than an error.

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalBlobStore;
#[cfg(feature = "s3")]
pub use s3::{S3BlobStore, S3Config};

use crate::error::ExamError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Store `data` under `key`, replacing any existing object; returns its public URL.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, ExamError>;

    /// Fetch an object; `Ok(None)` when it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ExamError>;

    /// Delete an object; `Ok(false)` when it was already absent.
    async fn delete(&self, key: &str) -> Result<bool, ExamError>;

    async fn exists(&self, key: &str) -> Result<bool, ExamError>;

    /// Public URL of a key.
    fn url_for(&self, key: &str) -> String;

    /// Inverse of [`BlobStore::url_for`]; `None` for URLs this store did not issue.
    fn key_for_url(&self, url: &str) -> Option<String>;

    async fn folder_exists(&self, folder: &str) -> Result<bool, ExamError> {
        self.exists(&folder_marker(folder)).await
    }

    /// Create the placeholder "directory" object for `folder` when missing.
    ///
    /// Returns `true` when the folder had to be created.
    async fn ensure_folder(&self, folder: &str) -> Result<bool, ExamError> {
        if self.folder_exists(folder).await? {
            return Ok(false);
        }
        let marker = folder_marker(folder);
        debug!("Creating folder marker {}", marker);
        self.put(&marker, Vec::new(), "application/x-directory").await?;
        Ok(true)
    }
}

/// Serialise `value` as pretty JSON and store it.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<String, ExamError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| ExamError::Internal(format!("serialise {key}: {e}")))?;
    store.put(key, bytes, "application/json").await
}

/// Load and deserialise a JSON object; `Ok(None)` when absent.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<T>, ExamError> {
    match store.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ExamError::storage(key, format!("invalid JSON: {e}"))),
        None => Ok(None),
    }
}

/// Best-effort delete by URL: failures and unknown URLs are logged only.
///
/// Returns how many objects were actually removed.
pub async fn delete_urls_best_effort(store: &dyn BlobStore, urls: &[String]) -> usize {
    let mut removed = 0;
    for url in urls {
        let Some(key) = store.key_for_url(url) else {
            warn!("Not deleting {}: not an object of the {} store", url, store.name());
            continue;
        };
        match store.delete(&key).await {
            Ok(true) => removed += 1,
            Ok(false) => warn!("Not deleting {}: object already missing", key),
            Err(e) => warn!("Failed to delete {}: {}", key, e),
        }
    }
    removed
}

fn folder_marker(folder: &str) -> String {
    format!("{}/", folder.trim_end_matches('/'))
}

/// Join key segments with `/`, dropping empty ones.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_key_trims_slashes() {
        assert_eq!(join_key(&["AES_2019/", "/rerun", "1_diagram_2.png"]), "AES_2019/rerun/1_diagram_2.png");
        assert_eq!(join_key(&["AES", "", "x.json"]), "AES/x.json");
    }
}
