use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use ironcycle::testing::{FailingCache, ScriptedRemote, StaticIdentity};
use ironcycle::{
    LocalCache, RemoteService,
    boxed_action, BootstrapPhase, CompletionRecord, CoreStore, CycleProgressRecord, MemoryCache,
    Principal, RemoteError, SessionCompletionRow, SNAPSHOT_KEY,
};
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn offline_bootstrap_is_ready_without_identity() {
    let store = CoreStore::new(
        Arc::new(MemoryCache::new()),
        Arc::new(ScriptedRemote::new()),
        Arc::new(StaticIdentity::anonymous()),
    );

    // Not ready before the container is wired up.
    assert!(!store.is_ready());

    store.bootstrap().await;

    assert!(store.is_ready());
    assert_eq!(store.phase(), BootstrapPhase::Ready);
    assert_eq!(
        store.get_path("syncMeta.isInitialLoadComplete"),
        Some(json!(true))
    );
    // No identity, no remote calls.
    assert_eq!(store.get_path("identity"), Some(json!(null)));
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_bootstrap_makes_no_remote_calls() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = CoreStore::new(
        Arc::new(MemoryCache::new()),
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::new(StaticIdentity::anonymous()),
    );
    store.bootstrap().await;
    assert!(remote.call_log().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn authenticated_bootstrap_loads_in_dependency_order() {
    let mut maxes = BTreeMap::new();
    maxes.insert("squat".to_string(), 315.0);
    let rows = vec![SessionCompletionRow {
        key: "squat_2_3".to_string(),
        record: CompletionRecord {
            main_sets: vec![true, true, false],
            supplemental_sets: vec![true],
            accessories: vec![],
        },
    }];
    let remote = Arc::new(
        ScriptedRemote::new()
            .with_training_maxes(maxes)
            .with_cycle_progress(CycleProgressRecord {
                ref_id: "cp-1".to_string(),
                cycle: 2,
                week: 3,
            })
            .with_session_completions(rows),
    );
    let store = CoreStore::new(
        Arc::new(MemoryCache::new()),
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::new(StaticIdentity::signed_in(Principal::new("user-1"))),
    );

    store.bootstrap().await;

    // Cycle progress resolves before the completion load because the
    // completion rows are filed under its ref.
    assert_eq!(
        remote.call_log(),
        vec![
            "load_training_maxes",
            "load_cycle_progress",
            "load_accessories",
            "load_session_completions",
        ]
    );

    assert_eq!(store.training_max("squat"), 315.0);
    // Lifts the remote record omits are seeded with 0.
    assert_eq!(store.training_max("deadlift"), 0.0);
    assert_eq!(store.cycle_settings().cycle, 2);
    assert_eq!(store.cycle_settings().week, 3);
    assert_eq!(
        store.get_path("syncMeta.remoteSessionRef"),
        Some(json!("cp-1"))
    );
    assert_eq!(
        store.session_completion("squat", 2, 3).main_sets,
        vec![true, true, false]
    );
    assert!(store
        .get_path("syncMeta.lastRemoteSyncAt")
        .is_some_and(|v| v.is_u64()));
    assert_eq!(
        store.get_path("syncMeta.lastLocalChangeAt"),
        Some(json!(null))
    );
    assert!(store.is_ready());
}

#[tokio::test(flavor = "multi_thread")]
async fn not_found_reads_mean_defaults_not_errors() {
    // Every read returns the not-found sentinel: a brand-new account.
    let remote = Arc::new(ScriptedRemote::new());
    let store = CoreStore::new(
        Arc::new(MemoryCache::new()),
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::new(StaticIdentity::signed_in(Principal::new("user-1"))),
    );

    store.bootstrap().await;

    assert!(store.is_ready());
    assert_eq!(store.training_max("squat"), 0.0);
    assert_eq!(store.cycle_settings().cycle, 1);
    assert!(store
        .get_path("syncMeta.lastRemoteSyncAt")
        .is_some_and(|v| v.is_u64()));
    // No cycle progress, so there was nothing to file completions under.
    assert_eq!(
        remote.call_log(),
        vec![
            "load_training_maxes",
            "load_cycle_progress",
            "load_accessories",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_error_aborts_remaining_reads_but_fails_open() {
    let remote = Arc::new(
        ScriptedRemote::new()
            .failing_cycle_progress(RemoteError::Network("connection reset".into())),
    );
    let store = CoreStore::new(
        Arc::new(MemoryCache::new()),
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::new(StaticIdentity::signed_in(Principal::new("user-1"))),
    );

    store.bootstrap().await;

    // Accessories and completions were never attempted.
    assert_eq!(
        remote.call_log(),
        vec!["load_training_maxes", "load_cycle_progress"]
    );
    // The session still completes its load and becomes usable.
    assert!(store.is_ready());
    assert_eq!(
        store.get_path("syncMeta.isInitialLoadComplete"),
        Some(json!(true))
    );
    assert_eq!(store.get_path("syncMeta.lastRemoteSyncAt"), Some(json!(null)));
}

#[tokio::test(flavor = "multi_thread")]
async fn unresponsive_identity_provider_times_out_to_offline() {
    let remote = Arc::new(ScriptedRemote::new());
    let store = CoreStore::new(
        Arc::new(MemoryCache::new()),
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::new(StaticIdentity::unresponsive()),
    );

    store.bootstrap().await;

    assert!(store.is_ready());
    assert_eq!(store.get_path("identity"), Some(json!(null)));
    assert!(remote.call_log().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_actions_replay_in_enqueue_order() {
    let store = CoreStore::new(
        Arc::new(MemoryCache::new()),
        Arc::new(ScriptedRemote::new()),
        Arc::new(StaticIdentity::anonymous()),
    );
    let log: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

    // Two interactions arrive before the system finished bootstrapping.
    assert!(!store.is_ready());
    let first = Arc::clone(&log);
    store.queue_action(boxed_action(move || async move {
        first.lock().unwrap().push(1);
        Ok(())
    }));
    let second = Arc::clone(&log);
    store.queue_action(boxed_action(move || async move {
        second.lock().unwrap().push(2);
        Ok(())
    }));
    assert_eq!(store.pending_action_count(), 2);

    store.bootstrap().await;

    assert_eq!(store.pending_action_count(), 0);
    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_snapshot_without_complete_flag_is_ignored() {
    let cache = Arc::new(MemoryCache::new());
    cache
        .set(
            SNAPSHOT_KEY,
            r#"{"trainingMaxes":{"squat":400.0},"isInitialLoadComplete":false}"#,
        )
        .unwrap();

    let store = CoreStore::new(
        Arc::clone(&cache) as Arc<dyn LocalCache>,
        Arc::new(ScriptedRemote::new()),
        Arc::new(StaticIdentity::anonymous()),
    );
    store.bootstrap().await;

    // The half-written record was not adopted.
    assert_eq!(store.training_max("squat"), 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_snapshot_is_swallowed() {
    let cache = Arc::new(MemoryCache::new());
    cache.set(SNAPSHOT_KEY, "{definitely not json").unwrap();

    let store = CoreStore::new(
        Arc::clone(&cache) as Arc<dyn LocalCache>,
        Arc::new(ScriptedRemote::new()),
        Arc::new(StaticIdentity::anonymous()),
    );
    store.bootstrap().await;

    assert!(store.is_ready());
    assert_eq!(store.training_max("squat"), 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_cache_never_interrupts_the_session() {
    let store = CoreStore::new(
        Arc::new(FailingCache),
        Arc::new(ScriptedRemote::new()),
        Arc::new(StaticIdentity::anonymous()),
    );
    store.bootstrap().await;
    assert!(store.is_ready());

    // Writes fail quota-exceeded underneath; the user never sees it.
    store.set_training_max("squat", 300);
    store.flush_local();
    assert_eq!(store.training_max("squat"), 300.0);
}

