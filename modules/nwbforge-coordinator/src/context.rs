//! Session persistence with a write-through strategy: a fast cache with TTL
//! in front, one JSON file per session behind it. Both writes must succeed
//! for a mutation to succeed; reads prefer the cache and repopulate it after
//! a filesystem fallback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use nwbforge_common::{NwbforgeError, SessionContext};

// --- Cache backend ---

/// Key-value cache with per-entry TTL. The production backend is Redis;
/// `MemoryCache` backs tests and cache-less local runs.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn ping(&self) -> Result<(), NwbforgeError>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), NwbforgeError>;
    async fn get(&self, key: &str) -> Result<Option<String>, NwbforgeError>;
    async fn delete(&self, key: &str) -> Result<(), NwbforgeError>;
}

pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Open a connection manager and verify liveness with a PING.
    pub async fn connect(url: &str) -> Result<Self, NwbforgeError> {
        let client = redis::Client::open(url)
            .map_err(|e| NwbforgeError::Storage(format!("invalid Redis URL: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| NwbforgeError::Storage(format!("failed to connect to Redis: {e}")))?;
        let cache = Self { manager };
        cache.ping().await?;
        info!("connected to Redis session cache");
        Ok(cache)
    }
}

#[async_trait]
impl SessionCache for RedisCache {
    async fn ping(&self) -> Result<(), NwbforgeError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| NwbforgeError::Storage(format!("Redis ping failed: {e}")))?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), NwbforgeError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| NwbforgeError::Storage(format!("Redis write failed: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, NwbforgeError> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| NwbforgeError::Storage(format!("Redis read failed: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), NwbforgeError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| NwbforgeError::Storage(format!("Redis delete failed: {e}")))?;
        Ok(())
    }
}

/// In-memory cache for tests and cache-less local development. TTLs are
/// accepted but not enforced; entries live until deleted. Clones share the
/// same underlying map.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn ping(&self) -> Result<(), NwbforgeError> {
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<(), NwbforgeError> {
        self.entries
            .lock()
            .expect("memory cache lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, NwbforgeError> {
        Ok(self
            .entries
            .lock()
            .expect("memory cache lock poisoned")
            .get(key)
            .cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), NwbforgeError> {
        self.entries
            .lock()
            .expect("memory cache lock poisoned")
            .remove(key);
        Ok(())
    }
}

// --- Store ---

pub struct ContextStore {
    cache: Box<dyn SessionCache>,
    base_path: PathBuf,
    ttl_secs: u64,
}

impl ContextStore {
    pub fn new(cache: Box<dyn SessionCache>, base_path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            cache,
            base_path: base_path.into(),
            ttl_secs,
        }
    }

    fn cache_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join("sessions").join(format!("{session_id}.json"))
    }

    /// Liveness of the cache backend, reported by the health endpoint.
    pub async fn cache_connected(&self) -> bool {
        self.cache.ping().await.is_ok()
    }

    /// Persist a new session to both backends.
    pub async fn create(&self, session: &SessionContext) -> Result<(), NwbforgeError> {
        let json = serialize(session)?;
        self.cache
            .set_with_ttl(&Self::cache_key(&session.session_id), &json, self.ttl_secs)
            .await?;
        write_atomic(&self.session_path(&session.session_id), &json).await?;
        debug!(session_id = %session.session_id, "session created");
        Ok(())
    }

    /// Fetch a session: cache first, filesystem fallback. A filesystem hit
    /// restores the cache entry with a fresh TTL.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionContext>, NwbforgeError> {
        let key = Self::cache_key(session_id);
        if let Some(json) = self.cache.get(&key).await? {
            return Ok(Some(deserialize(&json)?));
        }

        let path = self.session_path(session_id);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(NwbforgeError::Storage(format!(
                    "failed to read session backup {}: {e}",
                    path.display()
                )))
            }
        };
        let session = deserialize(&json)?;
        self.cache.set_with_ttl(&key, &json, self.ttl_secs).await?;
        debug!(session_id, "session restored to cache from filesystem backup");
        Ok(Some(session))
    }

    /// Apply a partial overlay to an existing session and persist the result
    /// to both backends. Refreshes `last_updated`. Last writer wins; callers
    /// serialize writes per session at the workflow level.
    pub async fn update(
        &self,
        session_id: &str,
        overlay: &serde_json::Value,
    ) -> Result<SessionContext, NwbforgeError> {
        let mut session = self
            .get(session_id)
            .await?
            .ok_or_else(|| NwbforgeError::NotFound(format!("Session {session_id} not found")))?;

        session.apply_overlay(overlay)?;

        let json = serialize(&session)?;
        self.cache
            .set_with_ttl(&Self::cache_key(session_id), &json, self.ttl_secs)
            .await?;
        write_atomic(&self.session_path(session_id), &json).await?;
        Ok(session)
    }

    /// Remove a session from both backends. Idempotent: missing entries are
    /// not an error.
    pub async fn delete(&self, session_id: &str) -> Result<(), NwbforgeError> {
        self.cache.delete(&Self::cache_key(session_id)).await?;
        let path = self.session_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NwbforgeError::Storage(format!(
                "failed to delete session backup {}: {e}",
                path.display()
            ))),
        }
    }
}

fn serialize(session: &SessionContext) -> Result<String, NwbforgeError> {
    serde_json::to_string(session)
        .map_err(|e| NwbforgeError::Storage(format!("failed to serialize session: {e}")))
}

fn deserialize(json: &str) -> Result<SessionContext, NwbforgeError> {
    serde_json::from_str(json)
        .map_err(|e| NwbforgeError::Storage(format!("corrupt session record: {e}")))
}

/// Write via a temp file plus rename so a crash mid-write never leaves a
/// truncated backup behind.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), NwbforgeError> {
    let parent = path
        .parent()
        .ok_or_else(|| NwbforgeError::Storage(format!("no parent directory for {}", path.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| NwbforgeError::Storage(format!("failed to create {}: {e}", parent.display())))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| NwbforgeError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| NwbforgeError::Storage(format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}
