//! File-backed durable store.
//!
//! One JSON envelope per key under a data directory. Writes go to a temp
//! file in the same directory and are renamed into place, so a reader never
//! sees a half-written value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::DurableStore;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct FileDurableStore {
    dir: PathBuf,
}

impl FileDurableStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    async fn read_envelope(&self, key: &str) -> StoreResult<Option<Envelope>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Map a key to a file name: `application/x-www-form-urlencoded` byte encoding,
/// so `:` and `/` become `%XX`.
fn encode_key(key: &str) -> String {
    url::form_urlencoded::byte_serialize(key.as_bytes()).collect()
}

#[async_trait]
impl DurableStore for FileDurableStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read_envelope(key).await?.map(|e| e.value))
    }

    async fn get_with_metadata(&self, key: &str) -> StoreResult<Option<(String, Option<Value>)>> {
        Ok(self
            .read_envelope(key)
            .await?
            .map(|e| (e.value, e.metadata)))
    }

    async fn put(&self, key: &str, value: &str, metadata: Option<Value>) -> StoreResult<()> {
        let envelope = Envelope {
            value: value.to_string(),
            metadata,
        };
        let raw = serde_json::to_vec(&envelope)?;
        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.{:x}.tmp", encode_key(key), fastrand::u64(..)));

        tokio::fs::write(&tmp, &raw).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Backend(format!(
                "failed to commit {}: {}",
                target.display(),
                e
            )));
        }
        Ok(())
    }
}
