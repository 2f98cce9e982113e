//! Filesystem-backed blob store.
//!
//! Objects live under `root/{key}` and are served by whatever static file
//! server fronts `public_base_url` (the HTTP API mounts one at `/files`).
//! Writes go through a temp file + rename so a crashed upload never leaves a
//! truncated PNG behind.

use super::BlobStore;
use crate::error::ExamError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, refusing anything that escapes it.
    fn path_for(&self, key: &str) -> Result<PathBuf, ExamError> {
        let rel = Path::new(key.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ExamError::storage(key, "key escapes the storage root"));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String, ExamError> {
        let path = self.path_for(key)?;

        if key.ends_with('/') {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| ExamError::storage(key, e))?;
            return Ok(self.url_for(key));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExamError::storage(key, e))?;
        }

        let tmp_path = path.with_extension("part");
        tokio::fs::write(&tmp_path, &data)
            .await
            .map_err(|e| ExamError::storage(key, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| ExamError::storage(key, e))?;

        debug!("Stored {} ({} bytes)", key, data.len());
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ExamError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExamError::storage(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, ExamError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ExamError::storage(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ExamError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ExamError::storage(key, e))
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base_url)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{delete_urls_best_effort, get_json, put_json};

    fn store() -> (LocalBlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (
            LocalBlobStore::new(dir.path(), "http://localhost:8080/files/"),
            dir,
        )
    }

    #[tokio::test]
    async fn put_get_delete() {
        let (store, _dir) = store();
        let url = store
            .put("AES/page_1.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:8080/files/AES/page_1.png");
        assert_eq!(store.get("AES/page_1.png").await.unwrap(), Some(vec![1, 2, 3]));
        assert!(store.delete("AES/page_1.png").await.unwrap());
        assert!(!store.delete("AES/page_1.png").await.unwrap());
        assert_eq!(store.get("AES/page_1.png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_folder_creates_once() {
        let (store, _dir) = store();
        assert!(store.ensure_folder("AES_2019").await.unwrap());
        assert!(!store.ensure_folder("AES_2019").await.unwrap());
        assert!(store.root().join("AES_2019").is_dir());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (store, _dir) = store();
        assert!(store.put("../evil.png", vec![], "image/png").await.is_err());
    }

    #[tokio::test]
    async fn url_round_trip_and_best_effort_delete() {
        let (store, _dir) = store();
        let url = store.put("P/a.png", vec![0], "image/png").await.unwrap();
        assert_eq!(store.key_for_url(&url).as_deref(), Some("P/a.png"));
        assert_eq!(store.key_for_url("https://elsewhere/a.png"), None);

        let removed = delete_urls_best_effort(
            &store,
            &[url.clone(), url, "https://elsewhere/a.png".to_string()],
        )
        .await;
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn json_helpers() {
        let (store, _dir) = store();
        put_json(&store, "P/questions.json", &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<u32>> = get_json(&store, "P/questions.json").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        let missing: Option<Vec<u32>> = get_json(&store, "P/none.json").await.unwrap();
        assert_eq!(missing, None);
    }
}
