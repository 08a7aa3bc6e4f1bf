//! The composition root: an explicitly constructed, dependency-injected
//! store instance wiring the container, gateway, readiness gate, queue and
//! presenter together, plus the domain convenience accessors UI components
//! call.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::cache::LocalCache;
use crate::container::{StateContainer, SubscriptionId};
use crate::gateway::{BootstrapPhase, PersistenceGateway, SyncError};
use crate::identity::{IdentityProvider, Principal};
use crate::model::{coerce_training_max, completion_key, CompletionRecord, CycleSettings};
use crate::presenter::{StoreSignal, SyncStatus, SyncStatusPresenter};
use crate::readiness::{PendingAction, PendingActionQueue, ReadinessGate};
use crate::remote::RemoteService;
use crate::SIGNAL_CHANNEL_CAPACITY;

pub struct CoreStore {
    container: Arc<StateContainer>,
    gateway: Arc<PersistenceGateway>,
    gate: ReadinessGate,
    queue: PendingActionQueue,
    presenter: SyncStatusPresenter,
    signals: broadcast::Sender<StoreSignal>,
}

impl CoreStore {
    #[must_use]
    pub fn new(
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteService>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Arc<Self> {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let container = Arc::new(StateContainer::new());
        let gateway = Arc::new(PersistenceGateway::new(
            Arc::clone(&container),
            cache,
            remote,
            identity,
            signals.clone(),
        ));
        let presenter = SyncStatusPresenter::new(
            Arc::clone(&container),
            Arc::clone(&gateway),
            signals.clone(),
        );
        Arc::new(Self {
            container,
            gateway,
            gate: ReadinessGate::new(),
            queue: PendingActionQueue::new(signals.clone()),
            presenter,
            signals,
        })
    }

    /// Subscribe to the broadcast signals: `ReloadingStarted`,
    /// `FullyReady` and `SyncStatusChanged`.
    #[must_use]
    pub fn signals(&self) -> broadcast::Receiver<StoreSignal> {
        self.signals.subscribe()
    }

    /// Run the full bootstrap sequence, then replay any actions queued
    /// while the session was not yet ready.
    pub async fn bootstrap(&self) {
        self.gate.attach(Arc::clone(&self.container));
        self.gateway.bootstrap().await;
        self.queue.process_pending().await;
    }

    #[must_use]
    pub fn phase(&self) -> BootstrapPhase {
        self.gateway.phase()
    }

    // --- container surface ---

    #[must_use]
    pub fn get(&self) -> Value {
        self.container.get()
    }

    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<Value> {
        self.container.get_path(path)
    }

    /// Merge a partial into the state. A user-data change stamps the dirty
    /// marker and arms the debounced local-cache write; subscribers are
    /// notified either way.
    pub fn update(&self, partial: Value) -> bool {
        let changed = self.container.update(partial);
        if changed {
            self.gateway.note_local_change();
        }
        changed
    }

    pub fn subscribe<F>(&self, path: &str, callback: F) -> SubscriptionId
    where
        F: FnMut(&Value, &Value) + Send + 'static,
    {
        self.container.subscribe(path, callback)
    }

    pub fn unsubscribe(&self, subscription: &SubscriptionId) {
        self.container.unsubscribe(subscription);
    }

    /// Restore defaults, preserving `identity`.
    pub fn reset(&self) {
        self.container.reset();
    }

    // --- domain convenience accessors ---

    /// The stored max for a lift; a missing lift reads as 0.
    #[must_use]
    pub fn training_max(&self, lift: &str) -> f64 {
        self.container
            .get_path(&format!("trainingMaxes.{lift}"))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    /// Store a training max. Accepts whatever the input field produced:
    /// numbers pass through, numeric strings parse, garbage stores as 0.
    pub fn set_training_max(&self, lift: &str, value: impl Into<Value>) {
        let coerced = coerce_training_max(&value.into());
        self.update(json!({"trainingMaxes": {lift: coerced}}));
    }

    #[must_use]
    pub fn cycle_settings(&self) -> CycleSettings {
        self.container
            .get_path("cycleSettings")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn set_cycle_settings(&self, cycle: u32, week: u32) {
        self.update(json!({"cycleSettings": CycleSettings::new(cycle, week)}));
    }

    #[must_use]
    pub fn accessories(&self, lift: &str) -> Vec<String> {
        self.container
            .get_path(&format!("accessories.{lift}"))
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn set_accessories(&self, lift: &str, exercises: Vec<String>) {
        self.update(json!({"accessories": {lift: exercises}}));
    }

    /// The completion record for a (lift, cycle, week). An absent key
    /// yields a fresh all-empty record, never a missing value.
    #[must_use]
    pub fn session_completion(&self, lift: &str, cycle: u32, week: u32) -> CompletionRecord {
        let key = completion_key(lift, cycle, week);
        self.container
            .get_path(&format!("sessionCompletion.{key}"))
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn set_session_completion(
        &self,
        lift: &str,
        cycle: u32,
        week: u32,
        record: CompletionRecord,
    ) {
        let key = completion_key(lift, cycle, week);
        self.update(json!({"sessionCompletion": {key: record}}));
    }

    // --- readiness & deferred actions ---

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Buffer a mutation that arrived before the session was ready. The
    /// caller is expected to also apply an immediate visual-only effect;
    /// the post-drain resync corrects any divergence from authoritative
    /// state.
    pub fn queue_action(&self, action: PendingAction) {
        self.queue.queue_action(action);
    }

    #[must_use]
    pub fn pending_action_count(&self) -> usize {
        self.queue.len()
    }

    pub async fn process_pending(&self) {
        self.queue.process_pending().await;
    }

    // --- sync surface ---

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.presenter.sync_status()
    }

    pub async fn trigger_manual_sync(&self) -> Result<(), SyncError> {
        self.presenter.trigger_manual_sync().await
    }

    /// Immediate, non-debounced local persist (app shutdown).
    pub fn flush_local(&self) {
        self.gateway.flush_local();
    }

    // --- identity & lifecycle notifications ---

    pub async fn handle_app_resume(&self) {
        self.gateway.handle_app_resume().await;
    }

    pub async fn handle_signed_in(&self, principal: Principal) {
        self.gateway.handle_signed_in(principal).await;
    }

    pub fn handle_signed_out(&self) {
        self.gateway.handle_signed_out();
    }
}
