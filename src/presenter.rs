//! Thin consumer surfacing sync state to the UI and triggering manual
//! remote saves. Status is derived purely from `syncMeta`; a failed
//! manual sync is terminal for that attempt (the user may retry).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::error;

use crate::container::StateContainer;
use crate::gateway::{PersistenceGateway, SyncError};
use crate::model::UnixTimeMs;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Offline,
    Pending,
    InSync,
    Syncing,
    SyncFailed,
}

/// Broadcast signals any component may listen for without coupling to the
/// gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreSignal {
    ReloadingStarted,
    FullyReady,
    SyncStatusChanged(SyncStatus),
}

/// Derive the resting sync status from the state tree's `syncMeta`.
#[must_use]
pub fn derive_sync_status(tree: &Value) -> SyncStatus {
    let signed_in = tree
        .get("identity")
        .is_some_and(|v| !v.is_null());
    if !signed_in {
        return SyncStatus::Offline;
    }

    let at = |pointer: &str| -> Option<UnixTimeMs> {
        tree.pointer(pointer)
            .and_then(Value::as_u64)
            .map(UnixTimeMs)
    };
    let local = at("/syncMeta/lastLocalChangeAt");
    let remote = at("/syncMeta/lastRemoteSyncAt");

    match (local, remote) {
        (Some(_), None) => SyncStatus::Pending,
        (Some(local), Some(remote)) if local.is_after(remote) => SyncStatus::Pending,
        _ => SyncStatus::InSync,
    }
}

pub struct SyncStatusPresenter {
    container: Arc<StateContainer>,
    gateway: Arc<PersistenceGateway>,
    signals: broadcast::Sender<StoreSignal>,
}

impl SyncStatusPresenter {
    #[must_use]
    pub fn new(
        container: Arc<StateContainer>,
        gateway: Arc<PersistenceGateway>,
        signals: broadcast::Sender<StoreSignal>,
    ) -> Self {
        Self {
            container,
            gateway,
            signals,
        }
    }

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        derive_sync_status(&self.container.get())
    }

    /// Push everything to the remote service, reporting
    /// `Syncing -> InSync | SyncFailed` over the signal channel. No
    /// automatic retry: failure leaves the session `pending` and the
    /// caller decides whether to try again.
    pub async fn trigger_manual_sync(&self) -> Result<(), SyncError> {
        let _ = self
            .signals
            .send(StoreSignal::SyncStatusChanged(SyncStatus::Syncing));

        match self.gateway.persist_remote().await {
            Ok(()) => {
                let _ = self
                    .signals
                    .send(StoreSignal::SyncStatusChanged(SyncStatus::InSync));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "manual sync failed");
                let _ = self
                    .signals
                    .send(StoreSignal::SyncStatusChanged(SyncStatus::SyncFailed));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_is_offline_without_identity() {
        let tree = json!({"identity": null, "syncMeta": {"lastLocalChangeAt": 5}});
        assert_eq!(derive_sync_status(&tree), SyncStatus::Offline);
    }

    #[test]
    fn status_is_pending_when_local_newer_than_remote() {
        let tree = json!({
            "identity": {"uid": "u1"},
            "syncMeta": {"lastLocalChangeAt": 10, "lastRemoteSyncAt": 5}
        });
        assert_eq!(derive_sync_status(&tree), SyncStatus::Pending);

        let never_synced = json!({
            "identity": {"uid": "u1"},
            "syncMeta": {"lastLocalChangeAt": 10, "lastRemoteSyncAt": null}
        });
        assert_eq!(derive_sync_status(&never_synced), SyncStatus::Pending);
    }

    #[test]
    fn status_is_in_sync_otherwise() {
        let tree = json!({
            "identity": {"uid": "u1"},
            "syncMeta": {"lastLocalChangeAt": null, "lastRemoteSyncAt": 5}
        });
        assert_eq!(derive_sync_status(&tree), SyncStatus::InSync);

        let synced_after_change = json!({
            "identity": {"uid": "u1"},
            "syncMeta": {"lastLocalChangeAt": 5, "lastRemoteSyncAt": 9}
        });
        assert_eq!(derive_sync_status(&synced_after_change), SyncStatus::InSync);
    }
}
