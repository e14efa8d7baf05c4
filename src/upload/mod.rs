//! Object-storage uploads.
//!
//! The engine hands artifacts to storage by `(local path, bucket, key)` and
//! interprets nothing of the response beyond success or failure. Chunk
//! uploads carry a marker so the storage side can attach shorter TTL
//! metadata.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Marker header for chunk uploads; storage maps it onto a short TTL.
pub const CHUNK_TTL_HEADER: &str = "x-meetcap-chunk";

/// Blob PUT by bucket and key.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, local: &Path, bucket: &str, key: &str, chunk: bool) -> Result<()>;
}

/// HTTP object storage speaking plain `PUT {endpoint}/{bucket}/{key}`.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpObjectStorage {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn put(&self, local: &Path, bucket: &str, key: &str, chunk: bool) -> Result<()> {
        let body = tokio::fs::read(local)
            .await
            .with_context(|| format!("Failed to read {:?} for upload", local))?;

        let url = self.object_url(bucket, key);
        debug!("Uploading {:?} ({} bytes) to {}", local, body.len(), url);

        let mut request = self.client.put(&url).body(body);
        if chunk {
            request = request.header(CHUNK_TTL_HEADER, "1");
        }

        request
            .send()
            .await
            .with_context(|| format!("PUT {url} failed"))?
            .error_for_status()
            .with_context(|| format!("PUT {url} rejected"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_joins_bucket_and_key() {
        let storage = HttpObjectStorage::new("http://storage.local:9000/");
        assert_eq!(
            storage.object_url("meeting-videos", "abc.mp4"),
            "http://storage.local:9000/meeting-videos/abc.mp4"
        );
    }

    #[test]
    fn test_object_url_with_prefixed_key() {
        let storage = HttpObjectStorage::new("http://storage.local:9000");
        assert_eq!(
            storage.object_url("temporary-audio", "bot-1/bot-1-0.wav"),
            "http://storage.local:9000/temporary-audio/bot-1/bot-1-0.wav"
        );
    }
}
