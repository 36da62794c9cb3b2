//! Local JSON snapshot cache.
//!
//! A single file, atomically written (write to a sibling temp file, then
//! rename), holding just enough state to survive a restart without the
//! configured store: the run id, baseline snapshots, the quarantine set, and
//! the ingest API key. Schema mismatches are treated as an empty cache rather
//! than a hard error, since the cache is a convenience, not a source of truth.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::immune::baseline::BaselineProfile;
use crate::utils::error::{ImmuneError, ImmuneResult};

/// Bumped whenever [`CacheSnapshot`]'s shape changes; older files are discarded.
const CACHE_SCHEMA_VERSION: u32 = 1;

#[cfg(unix)]
const CACHE_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub schema_version: u32,
    pub run_id: String,
    pub baselines: HashMap<String, BaselineProfile>,
    pub quarantined: HashSet<String>,
    pub api_key: Option<String>,
}

impl CacheSnapshot {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            run_id: run_id.into(),
            baselines: HashMap::new(),
            quarantined: HashSet::new(),
            api_key: None,
        }
    }
}

/// Guards a [`CacheSnapshot`] behind a lock and knows how to persist it.
pub struct LocalCache {
    path: PathBuf,
    state: RwLock<CacheSnapshot>,
    dirty: std::sync::atomic::AtomicBool,
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl LocalCache {
    /// Loads an existing cache file at `dir`/immune_cache.json, or starts
    /// fresh (including on a schema mismatch) under a new `run_id`.
    pub async fn load(dir: &str, run_id: impl Into<String>) -> ImmuneResult<Self> {
        let dir_path = expand_home(dir);
        tokio::fs::create_dir_all(&dir_path).await.map_err(|e| ImmuneError::CacheError {
            operation: "create_dir".to_string(),
            reason: e.to_string(),
        })?;
        let path = dir_path.join("immune_cache.json");
        let run_id = run_id.into();

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<CacheSnapshot>(&bytes) {
                Ok(snapshot) if snapshot.schema_version == CACHE_SCHEMA_VERSION => snapshot,
                Ok(stale) => {
                    tracing::warn!(found = stale.schema_version, expected = CACHE_SCHEMA_VERSION, "discarding cache with mismatched schema");
                    CacheSnapshot::new(run_id)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cache file unreadable, starting fresh");
                    CacheSnapshot::new(run_id)
                }
            },
            Err(_) => CacheSnapshot::new(run_id),
        };

        Ok(Self {
            path,
            state: RwLock::new(snapshot),
            dirty: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub async fn run_id(&self) -> String {
        self.state.read().await.run_id.clone()
    }

    pub async fn set_api_key(&self, api_key: Option<String>) {
        self.state.write().await.api_key = api_key;
        self.mark_dirty();
    }

    pub async fn api_key(&self) -> Option<String> {
        self.state.read().await.api_key.clone()
    }

    pub async fn put_baseline(&self, profile: BaselineProfile) {
        self.state.write().await.baselines.insert(profile.agent_id.clone(), profile);
        self.mark_dirty();
    }

    pub async fn get_baseline(&self, agent_id: &str) -> Option<BaselineProfile> {
        self.state.read().await.baselines.get(agent_id).cloned()
    }

    pub async fn mark_quarantined(&self, agent_id: &str) {
        self.state.write().await.quarantined.insert(agent_id.to_string());
        self.mark_dirty();
    }

    pub async fn clear_quarantined(&self, agent_id: &str) {
        self.state.write().await.quarantined.remove(agent_id);
        self.mark_dirty();
    }

    pub async fn quarantined(&self) -> HashSet<String> {
        self.state.read().await.quarantined.clone()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Flushes unconditionally; returns `Ok(false)` without writing if the
    /// cache has no pending changes since the last flush.
    pub async fn flush_if_dirty(&self) -> ImmuneResult<bool> {
        if !self.dirty.swap(false, std::sync::atomic::Ordering::Relaxed) {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }

    pub async fn flush(&self) -> ImmuneResult<()> {
        let snapshot = self.state.read().await.clone();
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| ImmuneError::CacheError {
            operation: "serialize".to_string(),
            reason: e.to_string(),
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| ImmuneError::CacheError {
            operation: "write_tmp".to_string(),
            reason: e.to_string(),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(CACHE_FILE_MODE);
            tokio::fs::set_permissions(&tmp_path, perms).await.map_err(|e| ImmuneError::CacheError {
                operation: "chmod".to_string(),
                reason: e.to_string(),
            })?;
        }

        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| ImmuneError::CacheError {
            operation: "rename".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Spawns a background task that flushes on a fixed cadence until the
    /// returned handle is dropped or aborted.
    pub fn spawn_periodic_flush(self: std::sync::Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = self.flush_if_dirty().await {
                    tracing::warn!(error = %e, "periodic cache flush failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_returns_identical_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dir_str = dir.path().to_str().expect("utf8 path").to_string();
        let cache = LocalCache::load(&dir_str, "run-1").await.expect("load");
        cache.mark_quarantined("agent-a").await;
        cache.set_api_key(Some("secret".to_string())).await;
        cache.flush().await.expect("flush");

        let reloaded = LocalCache::load(&dir_str, "run-2").await.expect("reload");
        assert_eq!(reloaded.run_id().await, "run-1");
        assert!(reloaded.quarantined().await.contains("agent-a"));
        assert_eq!(reloaded.api_key().await.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn schema_mismatch_yields_empty_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("immune_cache.json");
        let stale = serde_json::json!({
            "schema_version": CACHE_SCHEMA_VERSION + 1,
            "run_id": "old-run",
            "baselines": {},
            "quarantined": [],
            "api_key": null
        });
        tokio::fs::write(&path, serde_json::to_vec(&stale).unwrap()).await.unwrap();

        let dir_str = dir.path().to_str().unwrap().to_string();
        let cache = LocalCache::load(&dir_str, "fresh-run").await.expect("load");
        assert_eq!(cache.run_id().await, "fresh-run");
        assert!(cache.quarantined().await.is_empty());
    }
}
