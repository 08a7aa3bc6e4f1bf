//! Dual-persistence gateway: reads/writes the local cache synchronously
//! and the remote service asynchronously, and owns the bootstrap sequence
//! that decides whether the session is offline or authenticated+loaded.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{LocalCache, Snapshot, CURRENT_SCHEMA_VERSION};
use crate::container::StateContainer;
use crate::identity::{IdentityProvider, Principal};
use crate::model::{
    default_accessories, seed_known_lifts, ApplicationState, CompletionRecord, CycleSettings,
    SyncMeta, UnixTimeMs,
};
use crate::presenter::{derive_sync_status, StoreSignal, SyncStatus};
use crate::remote::{CycleProgressRecord, RemoteError, RemoteResult, RemoteService, SessionCompletionRow};
use crate::{IDENTITY_WAIT_TIMEOUT, LOCAL_WRITE_DEBOUNCE, SNAPSHOT_KEY};

/// The only error that crosses the core boundary into the caller:
/// [`PersistenceGateway::persist_remote`]'s rejection, which the presenter
/// is expected to catch.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote save requires an authenticated identity")]
    NotAuthenticated,

    #[error("state snapshot could not be serialized: {0}")]
    Snapshot(String),

    #[error("remote save failed: {summary}")]
    RemoteWrite {
        summary: String,
        failures: Vec<(&'static str, RemoteError)>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapPhase {
    Init,
    LocalLoaded,
    AwaitingIdentity,
    OfflineReady,
    RemoteLoading,
    Ready,
}

/// Debouncing as an explicit armed-timer state machine: every arm bumps
/// the generation, and only the timer that survives the whole window with
/// its generation intact fires.
struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn arm<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = Arc::clone(&self.generation);
        let armed = generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Outside a runtime there is nothing to defer on: write through.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            action();
            return;
        };

        let window = self.window;
        handle.spawn(async move {
            tokio::time::sleep(window).await;
            if generation.load(Ordering::SeqCst) == armed {
                debug!("debounce window elapsed; flushing");
                action();
            }
        });
    }
}

/// Serializes the user-data fields plus sync timestamps into the local
/// cache. Cache failures are swallowed: the in-memory state remains
/// authoritative for the session and the user is not interrupted.
struct SnapshotWriter {
    container: Arc<StateContainer>,
    cache: Arc<dyn LocalCache>,
}

impl SnapshotWriter {
    fn write_now(&self) {
        let tree = self.container.get();
        let snapshot = match snapshot_from_tree(&tree) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "state tree not snapshotable; skipping local write");
                return;
            }
        };
        match snapshot.encode() {
            Ok(raw) => {
                if let Err(e) = self.cache.set(SNAPSHOT_KEY, &raw) {
                    warn!(error = %e, "local cache write failed; in-memory state remains authoritative");
                }
            }
            Err(e) => warn!(error = %e, "snapshot serialization failed; skipping local write"),
        }
    }
}

fn snapshot_from_tree(tree: &Value) -> Result<Snapshot, serde_json::Error> {
    let state = ApplicationState::from_tree(tree)?;
    Ok(Snapshot {
        schema_version: CURRENT_SCHEMA_VERSION,
        training_maxes: state.training_maxes,
        cycle_settings: state.cycle_settings,
        accessories: state.accessories,
        session_completion: state.session_completion,
        last_remote_sync_at: state.sync_meta.last_remote_sync_at,
        last_local_change_at: state.sync_meta.last_local_change_at,
        is_initial_load_complete: state.sync_meta.is_initial_load_complete,
    })
}

pub struct PersistenceGateway {
    container: Arc<StateContainer>,
    cache: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteService>,
    identity: Arc<dyn IdentityProvider>,
    signals: broadcast::Sender<StoreSignal>,
    phase: Mutex<BootstrapPhase>,
    pending_reloads: AtomicU32,
    local_writer: Arc<SnapshotWriter>,
    debouncer: Debouncer,
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(
        container: Arc<StateContainer>,
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteService>,
        identity: Arc<dyn IdentityProvider>,
        signals: broadcast::Sender<StoreSignal>,
    ) -> Self {
        let local_writer = Arc::new(SnapshotWriter {
            container: Arc::clone(&container),
            cache: Arc::clone(&cache),
        });
        Self {
            container,
            cache,
            remote,
            identity,
            signals,
            phase: Mutex::new(BootstrapPhase::Init),
            pending_reloads: AtomicU32::new(0),
            local_writer,
            debouncer: Debouncer::new(LOCAL_WRITE_DEBOUNCE),
        }
    }

    #[must_use]
    pub fn phase(&self) -> BootstrapPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: BootstrapPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
        debug!(?phase, "bootstrap phase");
    }

    /// Run the bootstrap sequence: hydrate from the local cache, wait
    /// (bounded) for the identity check, remote-load if authenticated,
    /// then flip the session ready. Emits `FullyReady` exactly once.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) {
        self.hydrate_local();
        self.set_phase(BootstrapPhase::AwaitingIdentity);

        let principal = match timeout(IDENTITY_WAIT_TIMEOUT, self.identity.identity_check()).await
        {
            Ok(principal) => principal,
            Err(_) => {
                warn!("identity check did not complete in time; proceeding unauthenticated");
                None
            }
        };

        if let Some(principal) = principal {
            self.publish_identity(&principal);
            self.set_phase(BootstrapPhase::RemoteLoading);
            let _ = self.container.update(json!({"syncMeta": {"isLoading": true}}));
            self.load_remote_state(&principal).await;
            let _ = self.container.update(json!({"syncMeta": {"isLoading": false}}));
        } else {
            self.set_phase(BootstrapPhase::OfflineReady);
        }

        self.mark_initial_load_complete();
        self.set_phase(BootstrapPhase::Ready);
        let _ = self.signals.send(StoreSignal::FullyReady);
        let _ = self
            .signals
            .send(StoreSignal::SyncStatusChanged(self.current_status()));
    }

    /// Synchronous local hydration. Only a snapshot that finished a prior
    /// bootstrap (`isInitialLoadComplete: true`, known schema) is adopted;
    /// every failure is swallowed and the state stays at defaults.
    fn hydrate_local(&self) {
        match self.cache.get(SNAPSHOT_KEY) {
            Ok(Some(raw)) => match Snapshot::decode(&raw) {
                Ok(snapshot) if snapshot.is_adoptable() => {
                    self.adopt_snapshot(snapshot);
                    info!("hydrated state from local cache");
                }
                Ok(_) => debug!("local snapshot not adoptable; keeping defaults"),
                Err(e) => warn!(error = %e, "local snapshot corrupt; keeping defaults"),
            },
            Ok(None) => debug!("no local snapshot"),
            Err(e) => warn!(error = %e, "local cache read failed; keeping defaults"),
        }
        self.set_phase(BootstrapPhase::LocalLoaded);
    }

    fn adopt_snapshot(&self, snapshot: Snapshot) {
        let sync_meta = SyncMeta {
            last_local_change_at: snapshot.last_local_change_at,
            last_remote_sync_at: snapshot.last_remote_sync_at,
            is_loading: false,
            is_initial_load_complete: true,
            remote_session_ref: None,
        };
        self.container.replace_fields(json!({
            "trainingMaxes": seed_known_lifts(snapshot.training_maxes),
            "cycleSettings": snapshot.cycle_settings,
            "accessories": snapshot.accessories,
            "sessionCompletion": snapshot.session_completion,
            "syncMeta": sync_meta,
        }));
    }

    fn publish_identity(&self, principal: &Principal) {
        let value = serde_json::to_value(principal).unwrap_or(Value::Null);
        self.container.replace_fields(json!({"identity": value}));
    }

    /// Ordered remote load: training maxes, then cycle progress (the
    /// completion rows are filed under its ref), then accessories, then
    /// completion rows. `NotFound` means "use defaults" — except that a
    /// field carrying unsynced local changes keeps its local value until
    /// an explicit save pushes it. Any other error aborts the remaining
    /// reads but the bootstrap still completes (fail open).
    #[instrument(skip_all, fields(uid = %principal.uid))]
    async fn load_remote_state(&self, principal: &Principal) {
        let uid = &principal.uid;
        let had_local_changes = self
            .container
            .get_path("syncMeta.lastLocalChangeAt")
            .is_some_and(|v| !v.is_null());

        let outcome: RemoteResult<bool> = async {
            let mut kept_local = false;

            match optional(self.remote.load_training_maxes(uid).await)? {
                Some(maxes) => self
                    .container
                    .replace_fields(json!({"trainingMaxes": seed_known_lifts(maxes)})),
                None if had_local_changes => kept_local = true,
                None => self
                    .container
                    .replace_fields(json!({"trainingMaxes": seed_known_lifts(BTreeMap::new())})),
            }

            let progress_ref = match optional(self.remote.load_cycle_progress(uid).await)? {
                Some(progress) => {
                    self.container.replace_fields(
                        json!({"cycleSettings": CycleSettings::new(progress.cycle, progress.week)}),
                    );
                    Some(progress.ref_id)
                }
                None => {
                    if had_local_changes {
                        kept_local = true;
                    } else {
                        self.container
                            .replace_fields(json!({"cycleSettings": CycleSettings::default()}));
                    }
                    None
                }
            };
            if let Some(ref_id) = &progress_ref {
                let _ = self
                    .container
                    .update(json!({"syncMeta": {"remoteSessionRef": ref_id}}));
            }

            match optional(self.remote.load_accessories(uid).await)? {
                Some(accessories) => self
                    .container
                    .replace_fields(json!({"accessories": accessories})),
                None if had_local_changes => kept_local = true,
                None => self
                    .container
                    .replace_fields(json!({"accessories": default_accessories()})),
            }

            let no_completions: BTreeMap<String, CompletionRecord> = BTreeMap::new();
            match &progress_ref {
                Some(progress_ref) => {
                    match optional(self.remote.load_session_completions(uid, progress_ref).await)? {
                        Some(rows) => {
                            let map: BTreeMap<String, CompletionRecord> = rows
                                .into_iter()
                                .map(|row| (row.key, row.record))
                                .collect();
                            self.container
                                .replace_fields(json!({"sessionCompletion": map}));
                        }
                        None if had_local_changes => kept_local = true,
                        None => self
                            .container
                            .replace_fields(json!({"sessionCompletion": no_completions})),
                    }
                }
                None if !had_local_changes => self
                    .container
                    .replace_fields(json!({"sessionCompletion": no_completions})),
                None => {}
            }

            Ok(kept_local)
        }
        .await;

        match outcome {
            Ok(kept_local) => {
                if kept_local {
                    let _ = self
                        .container
                        .update(json!({"syncMeta": {"lastRemoteSyncAt": UnixTimeMs::now()}}));
                    info!("remote load complete; unsynced local changes retained until explicit save");
                } else {
                    let _ = self.container.update(json!({"syncMeta": {
                        "lastRemoteSyncAt": UnixTimeMs::now(),
                        "lastLocalChangeAt": null,
                    }}));
                    info!("remote load complete");
                }
                self.local_writer.write_now();
            }
            Err(e) => {
                warn!(error = %e, "remote load failed; completing bootstrap with local state");
            }
        }
    }

    fn mark_initial_load_complete(&self) {
        let was_complete = self
            .container
            .get_path("syncMeta.isInitialLoadComplete")
            .and_then(|v| v.as_bool())
            == Some(true);
        let _ = self.container.update(json!({"syncMeta": {
            "isInitialLoadComplete": true,
            "isLoading": false,
        }}));
        if !was_complete {
            // The completion transition always persists, outside the
            // debounce window.
            self.local_writer.write_now();
        }
    }

    /// Record a user-data change: stamp the dirty marker and arm the
    /// debounced cache write.
    pub fn note_local_change(&self) {
        let _ = self
            .container
            .update(json!({"syncMeta": {"lastLocalChangeAt": UnixTimeMs::now()}}));
        let _ = self
            .signals
            .send(StoreSignal::SyncStatusChanged(self.current_status()));
        let writer = Arc::clone(&self.local_writer);
        self.debouncer.arm(move || writer.write_now());
    }

    /// Immediate, non-debounced local persist (shutdown, tests).
    pub fn flush_local(&self) {
        self.local_writer.write_now();
    }

    /// All-fields remote save: four writes dispatched concurrently, all of
    /// which must succeed or the operation reports failure. Manual-trigger
    /// only; routine state changes stay cheap-local-only.
    #[instrument(skip(self))]
    pub async fn persist_remote(&self) -> Result<(), SyncError> {
        let tree = self.container.get();
        let state =
            ApplicationState::from_tree(&tree).map_err(|e| SyncError::Snapshot(e.to_string()))?;
        let principal = state.identity.ok_or(SyncError::NotAuthenticated)?;
        let uid = principal.uid;

        let progress_ref = state
            .sync_meta
            .remote_session_ref
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let progress = CycleProgressRecord {
            ref_id: progress_ref.clone(),
            cycle: state.cycle_settings.cycle,
            week: state.cycle_settings.week,
        };
        let rows: Vec<SessionCompletionRow> = state
            .session_completion
            .iter()
            .map(|(key, record)| SessionCompletionRow {
                key: key.clone(),
                record: record.clone(),
            })
            .collect();

        let (maxes, cycle, accessories, completions) = tokio::join!(
            self.remote.save_training_maxes(&uid, &state.training_maxes),
            self.remote.save_cycle_progress(&uid, &progress),
            self.remote.save_accessories(&uid, &state.accessories),
            self.remote
                .save_session_completions(&uid, &progress_ref, &rows),
        );

        let mut failures = Vec::new();
        for (field, result) in [
            ("trainingMaxes", maxes),
            ("cycleProgress", cycle),
            ("accessories", accessories),
            ("sessionCompletion", completions),
        ] {
            if let Err(e) = result {
                failures.push((field, e));
            }
        }
        if !failures.is_empty() {
            let summary = failures
                .iter()
                .map(|(field, e)| format!("{field}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SyncError::RemoteWrite { summary, failures });
        }

        let _ = self.container.update(json!({"syncMeta": {
            "lastRemoteSyncAt": UnixTimeMs::now(),
            "lastLocalChangeAt": null,
            "remoteSessionRef": progress_ref,
        }}));
        self.local_writer.write_now();
        Ok(())
    }

    /// App-resume reconciliation. A resume while a reload is already in
    /// flight starts a new reload rather than cancelling the old one; the
    /// counter absorbs the double-completion so the loading indicator
    /// clears only when the last reload finishes.
    #[instrument(skip(self))]
    pub async fn handle_app_resume(&self) {
        let Ok(state) = ApplicationState::from_tree(&self.container.get()) else {
            return;
        };
        let Some(principal) = state.identity else {
            debug!("resume without identity; nothing to reconcile");
            return;
        };
        self.reload(&principal).await;
    }

    pub(crate) async fn reload(&self, principal: &Principal) {
        self.pending_reloads.fetch_add(1, Ordering::SeqCst);
        let _ = self.container.update(json!({"syncMeta": {"isLoading": true}}));
        let _ = self.signals.send(StoreSignal::ReloadingStarted);

        self.load_remote_state(principal).await;

        let remaining = self.pending_reloads.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let _ = self
                .container
                .update(json!({"syncMeta": {"isLoading": false}}));
            let _ = self.signals.send(StoreSignal::FullyReady);
            let _ = self
                .signals
                .send(StoreSignal::SyncStatusChanged(self.current_status()));
        }
    }

    /// "Signed in" notification from the identity provider.
    pub async fn handle_signed_in(&self, principal: Principal) {
        self.publish_identity(&principal);
        self.reload(&principal).await;
        self.mark_initial_load_complete();
    }

    /// "Signed out" notification: clear the identity and restore defaults.
    /// The cached snapshot is left in place; history is never purged.
    pub fn handle_signed_out(&self) {
        self.container.replace_fields(json!({"identity": null}));
        self.container.reset();
        let _ = self
            .container
            .update(json!({"syncMeta": {"isInitialLoadComplete": true}}));
        let _ = self
            .signals
            .send(StoreSignal::SyncStatusChanged(SyncStatus::Offline));
    }

    fn current_status(&self) -> SyncStatus {
        derive_sync_status(&self.container.get())
    }
}

fn optional<T>(result: RemoteResult<T>) -> RemoteResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(flavor = "multi_thread")]
    async fn debouncer_collapses_bursts_into_one_fire() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let fired = Arc::clone(&fired);
            debouncer.arm(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn debouncer_fires_again_after_a_quiet_window() {
        let debouncer = Debouncer::new(Duration::from_millis(30));
        let fired = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&fired);
        debouncer.arm(move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;

        let second = Arc::clone(&fired);
        debouncer.arm(move || {
            second.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
