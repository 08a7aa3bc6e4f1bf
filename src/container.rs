//! The canonical in-memory state tree and its mutation/notification
//! contract. This is the only component that mutates state directly;
//! everything else goes through [`StateContainer::update`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{error, warn};

use crate::model::{ApplicationState, USER_DATA_FIELDS};

type SubscriberCallback = Box<dyn FnMut(&Value, &Value) + Send>;

struct Subscriber {
    id: u64,
    callback: Arc<Mutex<SubscriberCallback>>,
}

/// Handle returned by [`StateContainer::subscribe`]; pass it back to
/// [`StateContainer::unsubscribe`] to deregister. Registrations persist
/// until explicitly removed.
#[derive(Clone, Debug)]
pub struct SubscriptionId {
    path: String,
    id: u64,
}

impl SubscriptionId {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

pub struct StateContainer {
    state: Mutex<Value>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_subscription: AtomicU64,
}

impl Default for StateContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateContainer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ApplicationState::initial().into_tree()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// A copy of the whole state tree.
    #[must_use]
    pub fn get(&self) -> Value {
        lock(&self.state).clone()
    }

    /// Walk a dot-delimited path into the tree. Absent segments yield
    /// `None`, never a panic.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let state = lock(&self.state);
        value_at(&state, path).cloned()
    }

    /// Merge `partial` into the state with one level of recursive object
    /// merge: per top-level key, when both the existing and the incoming
    /// value are plain objects their own keys merge (incoming wins);
    /// anything else — arrays included — replaces the field wholesale.
    ///
    /// Returns whether the update touched a user-data field, the signal
    /// the persistence layer uses to decide on a local-cache write.
    ///
    /// A `sessionCompletion` key arriving before the initial load has
    /// completed is bootstrap-time shaping of the completion arrays: it is
    /// applied to the live tree, bypasses notification, and is excluded
    /// from the user-data report so it cannot mark the session dirty.
    pub fn update(&self, partial: Value) -> bool {
        let Value::Object(partial) = partial else {
            warn!("update called with a non-object partial; ignoring");
            return false;
        };

        let mut touched_user_data = false;
        let (before, after) = {
            let mut state = lock(&self.state);
            let load_complete = state
                .pointer("/syncMeta/isInitialLoadComplete")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let mut before = state.clone();
            for (key, incoming) in partial {
                if key == "sessionCompletion" && !load_complete {
                    merge_field(&mut before, &key, incoming.clone());
                    merge_field(&mut state, &key, incoming);
                    continue;
                }
                if USER_DATA_FIELDS.contains(&key.as_str()) {
                    touched_user_data = true;
                }
                merge_field(&mut state, &key, incoming);
            }
            (before, state.clone())
        };

        self.notify(&before, &after);
        touched_user_data
    }

    /// Wholesale per-field assignment, short-circuiting the merge rule.
    /// Used when an external snapshot (local cache, remote load) is
    /// adopted; never reported as a persistable change.
    pub(crate) fn replace_fields(&self, partial: Value) {
        let Value::Object(partial) = partial else {
            return;
        };
        let (before, after) = {
            let mut state = lock(&self.state);
            let before = state.clone();
            if let Some(obj) = state.as_object_mut() {
                for (key, incoming) in partial {
                    obj.insert(key, incoming);
                }
            }
            (before, state.clone())
        };
        self.notify(&before, &after);
    }

    /// Register a callback for changes at `path`. The callback fires once
    /// immediately with `(current, current)` so new subscribers can
    /// initialize without a separate get.
    pub fn subscribe<F>(&self, path: &str, callback: F) -> SubscriptionId
    where
        F: FnMut(&Value, &Value) + Send + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1;
        let callback: Arc<Mutex<SubscriberCallback>> = Arc::new(Mutex::new(Box::new(callback)));
        lock(&self.subscribers)
            .entry(path.to_string())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::clone(&callback),
            });

        let current = self.get_path(path).unwrap_or(Value::Null);
        invoke(path, &callback, &current, &current);

        SubscriptionId {
            path: path.to_string(),
            id,
        }
    }

    pub fn unsubscribe(&self, subscription: &SubscriptionId) {
        let mut subscribers = lock(&self.subscribers);
        if let Some(list) = subscribers.get_mut(&subscription.path) {
            list.retain(|s| s.id != subscription.id);
        }
    }

    /// Restore defaults while preserving `identity`.
    pub fn reset(&self) {
        let (before, after) = {
            let mut state = lock(&self.state);
            let before = state.clone();
            let identity = before.get("identity").cloned().unwrap_or(Value::Null);
            let mut fresh = ApplicationState::initial().into_tree();
            if let Some(obj) = fresh.as_object_mut() {
                obj.insert("identity".to_string(), identity);
            }
            *state = fresh;
            (before, state.clone())
        };
        self.notify(&before, &after);
    }

    /// Invoke subscribers whose path value structurally changed between
    /// the two trees. No lock is held while callbacks run, so a callback
    /// may freely read from or update the container.
    fn notify(&self, before: &Value, after: &Value) {
        let interested: Vec<(String, Vec<Arc<Mutex<SubscriberCallback>>>)> = {
            let subscribers = lock(&self.subscribers);
            subscribers
                .iter()
                .filter(|(_, list)| !list.is_empty())
                .map(|(path, list)| {
                    (
                        path.clone(),
                        list.iter().map(|s| Arc::clone(&s.callback)).collect(),
                    )
                })
                .collect()
        };

        for (path, callbacks) in interested {
            let old = value_at(before, &path);
            let new = value_at(after, &path);
            // Structural comparison: two instances with identical content
            // must not notify.
            if old == new {
                continue;
            }
            let old = old.cloned().unwrap_or(Value::Null);
            let new = new.cloned().unwrap_or(Value::Null);
            for callback in callbacks {
                invoke(&path, &callback, &new, &old);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A panicking subscriber must not stop notification of the rest.
fn invoke(path: &str, callback: &Arc<Mutex<SubscriberCallback>>, new: &Value, old: &Value) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut guard = callback.lock().unwrap_or_else(PoisonError::into_inner);
        (*guard)(new, old);
    }));
    if outcome.is_err() {
        error!(path, "subscriber panicked during notification; continuing");
    }
}

fn merge_field(tree: &mut Value, key: &str, incoming: Value) {
    let Some(obj) = tree.as_object_mut() else {
        return;
    };
    if let Value::Object(incoming_map) = incoming {
        if let Some(Value::Object(existing)) = obj.get_mut(key) {
            for (k, v) in incoming_map {
                existing.insert(k, v);
            }
            return;
        }
        obj.insert(key.to_string(), Value::Object(incoming_map));
        return;
    }
    obj.insert(key.to_string(), incoming);
}

fn value_at<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = tree;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
