//! Object store for opaque binary assets addressed by filename.
//!
//! The storage backend proper is an external collaborator; the hub only
//! depends on this trait. [`MemoryObjectStore`] backs tests and
//! single-process deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StorageResult;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Object filename.
    pub name: String,
    /// Size in bytes.
    pub size: usize,
    /// ISO-8601 upload time.
    pub uploaded: String,
}

/// A fetched object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectBody {
    /// Raw bytes.
    pub body: Vec<u8>,
    /// Size in bytes.
    pub size: usize,
    /// Content type recorded at upload.
    pub content_type: String,
}

/// Opaque blob storage addressed by filename.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Enumerate stored objects.
    async fn list(&self) -> StorageResult<Vec<ObjectInfo>>;

    /// Fetch one object, or `None` when absent.
    async fn get(&self, name: &str) -> StorageResult<Option<ObjectBody>>;

    /// Store one object, replacing any previous content.
    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()>;
}

/// Infer a content type from a filename suffix.
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".mp3") {
        "audio/mpeg"
    } else if lower.ends_with(".wav") {
        "audio/wav"
    } else if lower.ends_with(".ogg") {
        "audio/ogg"
    } else if lower.ends_with(".flac") {
        "audio/flac"
    } else if lower.ends_with(".m4a") {
        "audio/mp4"
    } else {
        "application/octet-stream"
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
    uploaded: String,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self) -> StorageResult<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .map(|(name, stored)| ObjectInfo {
                name: name.clone(),
                size: stored.bytes.len(),
                uploaded: stored.uploaded.clone(),
            })
            .collect())
    }

    async fn get(&self, name: &str) -> StorageResult<Option<ObjectBody>> {
        Ok(self.objects.read().await.get(name).map(|stored| ObjectBody {
            body: stored.bytes.clone(),
            size: stored.bytes.len(),
            content_type: stored.content_type.clone(),
        }))
    }

    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.objects.write().await.insert(
            name.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                uploaded: chrono::Utc::now().to_rfc3339(),
            },
        );
        Ok(())
    }
}
