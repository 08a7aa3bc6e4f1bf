//! Offline-first state and synchronization core for a single-user
//! fitness-program tracker.
//!
//! The crate is usable instantly from the local cache before any network or
//! identity check completes, reconciles against a remote data service when
//! one becomes available, and defers user actions that arrive before the
//! bootstrap sequence has finished.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod container;
pub mod gateway;
pub mod identity;
pub mod model;
pub mod presenter;
pub mod readiness;
pub mod remote;
pub mod store;
pub mod testing;

use std::time::Duration;

use thiserror::Error;

#[cfg(not(target_arch = "wasm32"))]
pub use cache::SqliteCache;
pub use cache::{CacheError, LocalCache, MemoryCache, Snapshot};
pub use container::{StateContainer, SubscriptionId};
pub use gateway::{BootstrapPhase, PersistenceGateway, SyncError};
pub use identity::{IdentityProvider, Principal};
pub use model::{ApplicationState, CompletionRecord, CycleSettings, SyncMeta, UnixTimeMs};
pub use presenter::{StoreSignal, SyncStatus, SyncStatusPresenter};
pub use readiness::{boxed_action, PendingAction, PendingActionQueue, ReadinessGate};
pub use remote::{CycleProgressRecord, RemoteError, RemoteService, SessionCompletionRow};
pub use store::CoreStore;

/// Local-cache key under which the state snapshot is persisted.
pub const SNAPSHOT_KEY: &str = "ironcycle_state_v1";

/// Upper bound on the wait for the identity provider's initial check.
/// If the signal never arrives the session proceeds unauthenticated.
pub const IDENTITY_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Window for collapsing bursts of local mutations into one cache write.
pub const LOCAL_WRITE_DEBOUNCE: Duration = Duration::from_millis(400);

/// Capacity of the broadcast channel carrying [`StoreSignal`]s.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("remote service error: {0}")]
    Remote(#[from] RemoteError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
