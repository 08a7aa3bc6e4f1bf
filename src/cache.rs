//! Local-cache port: durable key-value storage private to the running
//! client, used for instant offline bootstrap. Writes may fail (quota,
//! storage disabled) and every failure is caught at the gateway; the
//! in-memory state stays authoritative for the session.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CompletionRecord, CycleSettings, UnixTimeMs};

pub const MAX_KEY_LENGTH: usize = 512;

/// Snapshot schema understood by this build. A snapshot stamped with a
/// newer version is rejected at hydration, same as a record without
/// `isInitialLoadComplete: true`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("storage quota exceeded writing {size} bytes")]
    QuotaExceeded { size: usize },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt cache payload: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub(crate) fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot be empty".to_string(),
        });
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey {
            key: key.chars().take(50).collect::<String>() + "...",
            reason: format!("key exceeds maximum length of {MAX_KEY_LENGTH} bytes"),
        });
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
            reason: "key contains control characters".to_string(),
        });
    }
    Ok(())
}

/// String key-value storage with no transactionality guarantees.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// The persisted local-cache record. A record without
/// `isInitialLoadComplete: true` (or with an unknown newer schema) is
/// never adopted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "Snapshot::default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub training_maxes: BTreeMap<String, f64>,
    #[serde(default)]
    pub cycle_settings: CycleSettings,
    #[serde(default)]
    pub accessories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub session_completion: BTreeMap<String, CompletionRecord>,
    #[serde(default)]
    pub last_remote_sync_at: Option<UnixTimeMs>,
    #[serde(default)]
    pub last_local_change_at: Option<UnixTimeMs>,
    #[serde(default)]
    pub is_initial_load_complete: bool,
}

impl Snapshot {
    fn default_schema_version() -> u32 {
        CURRENT_SCHEMA_VERSION
    }

    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Whether this record may be adopted wholesale at hydration.
    #[must_use]
    pub fn is_adoptable(&self) -> bool {
        self.is_initial_load_complete && self.schema_version <= CURRENT_SCHEMA_VERSION
    }
}

/// In-memory cache; the default for tests and shell-less runs. An optional
/// byte quota exercises the quota-exceeded path.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        validate_key(key)?;
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        if let Some(quota) = self.quota_bytes {
            if value.len() > quota {
                return Err(CacheError::QuotaExceeded { size: value.len() });
            }
        }
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        self.entries().remove(key);
        Ok(())
    }
}

/// SQLite-backed cache for desktop/mobile shells.
#[cfg(not(target_arch = "wasm32"))]
pub struct SqliteCache {
    conn: Mutex<rusqlite::Connection>,
}

#[cfg(not(target_arch = "wasm32"))]
impl SqliteCache {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, CacheError> {
        let conn = rusqlite::Connection::open(path).map_err(sqlite_error)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(sqlite_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self, CacheError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_cache (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(sqlite_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl LocalCache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        use rusqlite::OptionalExtension;

        validate_key(key)?;
        self.conn()
            .query_row(
                "SELECT value FROM kv_cache WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(sqlite_error)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        self.conn()
            .execute(
                "INSERT INTO kv_cache (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        self.conn()
            .execute("DELETE FROM kv_cache WHERE key = ?1", rusqlite::params![key])
            .map_err(sqlite_error)?;
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn sqlite_error(e: rusqlite::Error) -> CacheError {
    match e {
        rusqlite::Error::SqliteFailure(err, message)
            if err.code == rusqlite::ErrorCode::DiskFull =>
        {
            CacheError::QuotaExceeded {
                size: message.map(|m| m.len()).unwrap_or_default(),
            }
        }
        other => CacheError::Unavailable(other.to_string()),
    }
}
