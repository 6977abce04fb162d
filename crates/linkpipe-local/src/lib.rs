use linkpipe_core::{Error, JsonCache, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod boilerplate;
pub mod document;
pub mod insert;
pub mod links;
pub mod locate;
pub mod openai_compat;
pub mod pipeline;
pub mod reduce;
pub mod resolve;
pub mod score;
pub mod suggest;
pub mod textprep;
pub mod verify;

pub use document::HtmlDocument;
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome};

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

fn is_expired(stored_at: u64, ttl: Option<Duration>) -> bool {
    ttl.is_some_and(|ttl| now_epoch_s().saturating_sub(stored_at) > ttl.as_secs())
}

/// JSON values on disk, one file per key under a two-level sha256 fan-out.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `$LINKPIPE_CACHE_DIR`, else a directory under the system temp dir.
    pub fn default_dir() -> PathBuf {
        std::env::var("LINKPIPE_CACHE_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("linkpipe-cache"))
    }

    fn hashed(key: &str) -> String {
        let mut h = Sha256::new();
        h.update(b"linkpipe-cache-v1\n");
        h.update(key.as_bytes());
        hex::encode(h.finalize())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let k = Self::hashed(key);
        self.root
            .join(&k[0..2])
            .join(&k[2..4])
            .join(format!("{k}.json"))
    }
}

impl JsonCache for FsCache {
    fn get(&self, key: &str, ttl: Option<Duration>) -> Result<Option<serde_json::Value>> {
        let p = self.path_for(key);
        if !p.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&p).map_err(|e| Error::Cache(e.to_string()))?;
        let mut entry: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| Error::Cache(e.to_string()))?;
        let stored_at = entry
            .get("stored_at_epoch_s")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if is_expired(stored_at, ttl) {
            return Ok(None);
        }
        Ok(entry.get_mut("value").map(serde_json::Value::take))
    }

    fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let p = self.path_for(key);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Cache(e.to_string()))?;
        }
        let entry = serde_json::json!({
            "schema_version": 1,
            "stored_at_epoch_s": now_epoch_s(),
            "value": value,
        });
        let bytes = serde_json::to_vec(&entry).map_err(|e| Error::Cache(e.to_string()))?;
        // Write-then-rename so concurrent readers never see a partial file.
        let tmp = p.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| Error::Cache(e.to_string()))?;
        fs::rename(&tmp, &p).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }
}

/// In-process cache; same TTL semantics as `FsCache`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, (u64, serde_json::Value)>>,
}

impl JsonCache for MemoryCache {
    fn get(&self, key: &str, ttl: Option<Duration>) -> Result<Option<serde_json::Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Cache("memory cache poisoned".to_string()))?;
        Ok(entries
            .get(key)
            .filter(|(stored_at, _)| !is_expired(*stored_at, ttl))
            .map(|(_, v)| v.clone()))
    }

    fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Cache("memory cache poisoned".to_string()))?;
        entries.insert(key.to_string(), (now_epoch_s(), value.clone()));
        Ok(())
    }
}
