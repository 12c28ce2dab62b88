//! Named response caches
//!
//! A cache storage holds any number of named caches, each mapping a request
//! key (origin-relative path and query) to a stored response.

use super::http::CachedResponse;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the named cache if it does not exist
    async fn open(&self, name: &str) -> Result<()>;

    /// Names of all caches
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove a cache and everything in it; false if it did not exist
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn match_in(&self, name: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Store a response, creating the cache if needed
    async fn put(&self, name: &str, key: &str, response: &CachedResponse) -> Result<()>;
}

/// In-process cache storage
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn match_in(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, key: &str, response: &CachedResponse) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }
}

/// Cache storage on disk
///
/// Each cache is a directory under the root. Entries are addressed by the
/// SHA-256 of their key in a two-level layout, e.g. key hash "abcd1234..."
/// lives at "<cache>/ab/cd/abcd1234...", with a `.json` metadata file and a
/// `.body` file next to it.
#[derive(Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct EntryMeta {
    key: String,
    #[serde(flatten)]
    response: CachedResponse,
}

impl DiskCacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Cache storage initialized at: {:?}", self.root);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(|c: char| c == '/' || c == '\\')
        {
            return Err(AppError::Cache(format!("Invalid cache name: {:?}", name)));
        }
        Ok(self.root.join(name))
    }

    fn entry_path(&self, name: &str, key: &str) -> Result<PathBuf> {
        let hash = hash_key(key);
        Ok(self
            .cache_dir(name)?
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(hash))
    }
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    fs::rename(temp_path, path).await?;
    Ok(())
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        fs::create_dir_all(self.cache_dir(name)?).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.root.exists() {
            return Ok(names);
        }

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.cache_dir(name)?;
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).await?;
        tracing::debug!("Deleted cache directory {:?}", dir);
        Ok(true)
    }

    async fn match_in(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
        let path = self.entry_path(name, key)?;
        let meta_path = path.with_extension("json");
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta: EntryMeta = serde_json::from_slice(&fs::read(&meta_path).await?)?;
        if meta.key != key {
            return Err(AppError::Cache(format!(
                "Hash collision in cache {}: {} vs {}",
                name, meta.key, key
            )));
        }

        let mut response = meta.response;
        response.body = fs::read(path.with_extension("body")).await?;
        Ok(Some(response))
    }

    async fn put(&self, name: &str, key: &str, response: &CachedResponse) -> Result<()> {
        let path = self.entry_path(name, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Body first so a visible metadata file always has its body
        write_atomic(&path.with_extension("body"), &response.body).await?;
        let meta = EntryMeta {
            key: key.to_string(),
            response: response.clone(),
        };
        write_atomic(&path.with_extension("json"), &serde_json::to_vec(&meta)?).await?;

        tracing::debug!("Cached {} in {} ({} bytes)", key, name, response.body.len());
        Ok(())
    }
}
