//! Per-provider JSON snapshot files with a freshness window.

use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::CacheError;

/// A cached snapshot. The provider payload is flattened next to `timestamp`
/// so each file reads as one flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub timestamp: f64,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> CacheEntry<T> {
    pub fn fresh(payload: T) -> Self {
        Self {
            timestamp: now_unix(),
            payload,
        }
    }
}

pub fn now_unix() -> f64 {
    let now = OffsetDateTime::now_utc();
    now.unix_timestamp() as f64 + f64::from(now.nanosecond()) / 1e9
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn path(&self, provider: &str) -> PathBuf {
        self.dir.join(format!("{provider}_cache.json"))
    }

    /// Fresh entry for `provider`, or `None` when the file is missing,
    /// unreadable, malformed, or older than the TTL.
    pub async fn load<T: DeserializeOwned>(&self, provider: &str) -> Option<CacheEntry<T>> {
        let entry: CacheEntry<T> = self.load_any_age(provider).await?;
        let age = now_unix() - entry.timestamp;
        if age > self.ttl.as_secs_f64() {
            debug!("{} cache expired ({:.0}s old)", provider, age);
            return None;
        }
        debug!("{} cache hit ({:.0}s old)", provider, age);
        Some(entry)
    }

    async fn load_any_age<T: DeserializeOwned>(&self, provider: &str) -> Option<CacheEntry<T>> {
        let path = self.path(provider);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(_) => {
                debug!("{} cache miss", provider);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("{} cache unreadable, ignoring: {}", provider, e);
                None
            }
        }
    }

    /// Stamp `payload` with the current time and replace the file.
    pub async fn save<T: Serialize>(&self, provider: &str, payload: T) -> Result<(), CacheError> {
        self.save_entry(provider, &CacheEntry::fresh(payload)).await
    }

    pub async fn save_entry<T: Serialize>(
        &self,
        provider: &str,
        entry: &CacheEntry<T>,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_string_pretty(entry)?;
        let path = self.path(provider);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Best-effort save: failures are logged and otherwise ignored.
    pub async fn store<T: Serialize>(&self, provider: &str, payload: T) {
        if let Err(e) = self.save(provider, payload).await {
            warn!("failed to write {} cache: {}", provider, e);
        }
    }

    pub async fn store_entry<T: Serialize>(&self, provider: &str, entry: &CacheEntry<T>) {
        if let Err(e) = self.save_entry(provider, entry).await {
            warn!("failed to write {} cache: {}", provider, e);
        }
    }

    pub async fn clear(&self, provider: &str) {
        match fs::remove_file(self.path(provider)).await {
            Ok(()) => debug!("{} cache cleared", provider),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to clear {} cache: {}", provider, e),
        }
    }
}
