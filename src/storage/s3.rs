//! S3-compatible blob store (AWS S3, Cloudflare R2, MinIO).
//!
//! Requires the `s3` feature.

use super::BlobStore;
use crate::error::ExamError;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Connection settings for [`S3BlobStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Path-style addressing; MinIO needs it.
    #[serde(default)]
    pub path_style: bool,
    /// Base for public object URLs; defaults to `{endpoint}/{bucket}`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3BlobStore {
    pub fn new(config: S3Config) -> Result<Self, ExamError> {
        if config.endpoint.trim().is_empty() {
            return Err(ExamError::InvalidConfig("S3 endpoint must not be empty".into()));
        }
        if config.bucket.trim().is_empty() {
            return Err(ExamError::InvalidConfig("S3 bucket must not be empty".into()));
        }

        let credentials = aws_sdk_s3::config::Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "exam2quiz",
        );

        let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(&config.endpoint)
            .region(aws_sdk_s3::config::Region::new(region))
            .force_path_style(config.path_style)
            .behavior_version_latest()
            .build();

        let public_base_url = config
            .public_base_url
            .clone()
            .unwrap_or_else(|| {
                format!("{}/{}", config.endpoint.trim_end_matches('/'), config.bucket)
            })
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket,
            public_base_url,
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, ExamError> {
        let len = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| ExamError::storage(key, e.into_service_error()))?;
        debug!("Uploaded s3://{}/{} ({} bytes)", self.bucket, key, len);
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ExamError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| ExamError::storage(key, e))?
                    .into_bytes()
                    .to_vec();
                Ok(Some(bytes))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(ExamError::storage(key, service_error))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, ExamError> {
        // DeleteObject succeeds for absent keys, so probe first to report them.
        if !self.exists(key).await? {
            return Ok(false);
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ExamError::storage(key, e.into_service_error()))?;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, ExamError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(ExamError::storage(key, service_error))
                }
            }
        }
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

    fn config() -> S3Config {
        S3Config {
            endpoint: "http://localhost:9000/".into(),
            bucket: "papers".into(),
            region: None,
            access_key_id: "minio".into(),
            secret_access_key: "minio123".into(),
            path_style: true,
            public_base_url: None,
        }
    }

    #[test]
    fn public_urls_default_to_endpoint_and_bucket() {
        let store = S3BlobStore::new(config()).unwrap();
        let url = store.url_for("AES/page_1.png");
        assert_eq!(url, "http://localhost:9000/papers/AES/page_1.png");
        assert_eq!(store.key_for_url(&url).as_deref(), Some("AES/page_1.png"));
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let mut cfg = config();
        cfg.bucket = " ".into();
        assert!(matches!(
            S3BlobStore::new(cfg),
            Err(ExamError::InvalidConfig(_))
        ));
    }
}
