//! Remote data service port: the network-accessible authoritative store,
//! reachable only once identity is established. Four reads and four
//! writes, each returning a record, an explicit not-found sentinel, or an
//! error. Implementations live in the shell; the core only orders and
//! interprets the calls.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::CompletionRecord;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// No record yet. Not a failure: the caller proceeds with defaults.
    #[error("record not found")]
    NotFound,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("not authenticated")]
    Unauthenticated,

    #[error("permission denied")]
    PermissionDenied,

    #[error("service error: {0}")]
    Service(String),
}

impl RemoteError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The cycle-progress record. Completion rows are filed under its
/// `ref_id`, which is why this read must resolve before the completion
/// load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleProgressRecord {
    pub ref_id: String,
    pub cycle: u32,
    pub week: u32,
}

/// One per-lift completion row for the active cycle progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompletionRow {
    pub key: String,
    #[serde(default)]
    pub record: CompletionRecord,
}

#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn load_training_maxes(&self, uid: &str) -> RemoteResult<BTreeMap<String, f64>>;

    async fn load_cycle_progress(&self, uid: &str) -> RemoteResult<CycleProgressRecord>;

    async fn load_accessories(&self, uid: &str) -> RemoteResult<BTreeMap<String, Vec<String>>>;

    async fn load_session_completions(
        &self,
        uid: &str,
        progress_ref: &str,
    ) -> RemoteResult<Vec<SessionCompletionRow>>;

    async fn save_training_maxes(
        &self,
        uid: &str,
        maxes: &BTreeMap<String, f64>,
    ) -> RemoteResult<()>;

    async fn save_cycle_progress(&self, uid: &str, record: &CycleProgressRecord)
        -> RemoteResult<()>;

    async fn save_accessories(
        &self,
        uid: &str,
        accessories: &BTreeMap<String, Vec<String>>,
    ) -> RemoteResult<()>;

    async fn save_session_completions(
        &self,
        uid: &str,
        progress_ref: &str,
        rows: &[SessionCompletionRow],
    ) -> RemoteResult<()>;
}
