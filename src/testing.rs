//! In-process collaborator doubles for scenario tests and shell-less
//! runs: a scripted remote service, a static identity provider and a
//! cache that always fails.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheError, LocalCache};
use crate::identity::{IdentityProvider, Principal};
use crate::remote::{
    CycleProgressRecord, RemoteError, RemoteResult, RemoteService, SessionCompletionRow,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ScriptedResults {
    training_maxes: RemoteResult<BTreeMap<String, f64>>,
    cycle_progress: RemoteResult<CycleProgressRecord>,
    accessories: RemoteResult<BTreeMap<String, Vec<String>>>,
    session_completions: RemoteResult<Vec<SessionCompletionRow>>,
    save_training_maxes: RemoteResult<()>,
    save_cycle_progress: RemoteResult<()>,
    save_accessories: RemoteResult<()>,
    save_session_completions: RemoteResult<()>,
}

impl Default for ScriptedResults {
    fn default() -> Self {
        Self {
            training_maxes: Err(RemoteError::NotFound),
            cycle_progress: Err(RemoteError::NotFound),
            accessories: Err(RemoteError::NotFound),
            session_completions: Err(RemoteError::NotFound),
            save_training_maxes: Ok(()),
            save_cycle_progress: Ok(()),
            save_accessories: Ok(()),
            save_session_completions: Ok(()),
        }
    }
}

/// Payloads captured by the save operations.
#[derive(Clone, Debug, Default)]
pub struct SavedPayloads {
    pub training_maxes: Option<BTreeMap<String, f64>>,
    pub cycle_progress: Option<CycleProgressRecord>,
    pub accessories: Option<BTreeMap<String, Vec<String>>>,
    pub session_completions: Option<(String, Vec<SessionCompletionRow>)>,
}

/// A remote service whose eight operations return pre-scripted results.
/// Every call is appended to an order log; reads default to the not-found
/// sentinel and writes to success.
pub struct ScriptedRemote {
    results: Mutex<ScriptedResults>,
    saved: Mutex<SavedPayloads>,
    calls: Mutex<Vec<&'static str>>,
    delay: Option<Duration>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            results: Mutex::new(ScriptedResults::default()),
            saved: Mutex::new(SavedPayloads::default()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_training_maxes(self, maxes: BTreeMap<String, f64>) -> Self {
        lock(&self.results).training_maxes = Ok(maxes);
        self
    }

    #[must_use]
    pub fn with_cycle_progress(self, record: CycleProgressRecord) -> Self {
        lock(&self.results).cycle_progress = Ok(record);
        self
    }

    #[must_use]
    pub fn with_accessories(self, accessories: BTreeMap<String, Vec<String>>) -> Self {
        lock(&self.results).accessories = Ok(accessories);
        self
    }

    #[must_use]
    pub fn with_session_completions(self, rows: Vec<SessionCompletionRow>) -> Self {
        lock(&self.results).session_completions = Ok(rows);
        self
    }

    #[must_use]
    pub fn failing_cycle_progress(self, error: RemoteError) -> Self {
        lock(&self.results).cycle_progress = Err(error);
        self
    }

    #[must_use]
    pub fn failing_training_maxes(self, error: RemoteError) -> Self {
        lock(&self.results).training_maxes = Err(error);
        self
    }

    #[must_use]
    pub fn failing_save_accessories(self, error: RemoteError) -> Self {
        lock(&self.results).save_accessories = Err(error);
        self
    }

    /// The operations invoked so far, in order.
    #[must_use]
    pub fn call_log(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    /// Payloads the save operations received.
    #[must_use]
    pub fn saved(&self) -> SavedPayloads {
        lock(&self.saved).clone()
    }

    async fn enter(&self, op: &'static str) {
        lock(&self.calls).push(op);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteService for ScriptedRemote {
    async fn load_training_maxes(&self, _uid: &str) -> RemoteResult<BTreeMap<String, f64>> {
        self.enter("load_training_maxes").await;
        lock(&self.results).training_maxes.clone()
    }

    async fn load_cycle_progress(&self, _uid: &str) -> RemoteResult<CycleProgressRecord> {
        self.enter("load_cycle_progress").await;
        lock(&self.results).cycle_progress.clone()
    }

    async fn load_accessories(&self, _uid: &str) -> RemoteResult<BTreeMap<String, Vec<String>>> {
        self.enter("load_accessories").await;
        lock(&self.results).accessories.clone()
    }

    async fn load_session_completions(
        &self,
        _uid: &str,
        _progress_ref: &str,
    ) -> RemoteResult<Vec<SessionCompletionRow>> {
        self.enter("load_session_completions").await;
        lock(&self.results).session_completions.clone()
    }

    async fn save_training_maxes(
        &self,
        _uid: &str,
        maxes: &BTreeMap<String, f64>,
    ) -> RemoteResult<()> {
        self.enter("save_training_maxes").await;
        lock(&self.saved).training_maxes = Some(maxes.clone());
        lock(&self.results).save_training_maxes.clone()
    }

    async fn save_cycle_progress(
        &self,
        _uid: &str,
        record: &CycleProgressRecord,
    ) -> RemoteResult<()> {
        self.enter("save_cycle_progress").await;
        lock(&self.saved).cycle_progress = Some(record.clone());
        lock(&self.results).save_cycle_progress.clone()
    }

    async fn save_accessories(
        &self,
        _uid: &str,
        accessories: &BTreeMap<String, Vec<String>>,
    ) -> RemoteResult<()> {
        self.enter("save_accessories").await;
        lock(&self.saved).accessories = Some(accessories.clone());
        lock(&self.results).save_accessories.clone()
    }

    async fn save_session_completions(
        &self,
        _uid: &str,
        progress_ref: &str,
        rows: &[SessionCompletionRow],
    ) -> RemoteResult<()> {
        self.enter("save_session_completions").await;
        lock(&self.saved).session_completions =
            Some((progress_ref.to_string(), rows.to_vec()));
        lock(&self.results).save_session_completions.clone()
    }
}

/// Identity provider resolving to a fixed answer, optionally after a
/// delay, or never (to exercise the timeout race).
pub struct StaticIdentity {
    principal: Option<Principal>,
    delay: Option<Duration>,
    unresponsive: bool,
}

impl StaticIdentity {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            principal: None,
            delay: None,
            unresponsive: false,
        }
    }

    #[must_use]
    pub fn signed_in(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            delay: None,
            unresponsive: false,
        }
    }

    /// A provider whose check never completes.
    #[must_use]
    pub fn unresponsive() -> Self {
        Self {
            principal: None,
            delay: None,
            unresponsive: true,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn identity_check(&self) -> Option<Principal> {
        if self.unresponsive {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.principal.clone()
    }
}

/// A cache where every operation fails, for the swallow-and-continue
/// paths.
pub struct FailingCache;

impl LocalCache for FailingCache {
    fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("storage disabled".into()))
    }

    fn set(&self, _key: &str, value: &str) -> Result<(), CacheError> {
        Err(CacheError::QuotaExceeded { size: value.len() })
    }

    fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("storage disabled".into()))
    }
}
