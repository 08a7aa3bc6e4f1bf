//! Domain model for the program tracker: training maxes, cycle position,
//! accessory lists and per-session completion records, plus the sync
//! metadata the persistence layer maintains.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Principal;

/// Lift ids the tracker always knows about. `trainingMaxes` carries an
/// entry for each of these; a missing lift reads as 0.
pub const KNOWN_LIFTS: [&str; 4] = ["squat", "bench", "deadlift", "press"];

/// Top-level state-tree fields that count as user data. Touching one of
/// these in an update is what warrants a local-cache write.
pub const USER_DATA_FIELDS: [&str; 4] = [
    "trainingMaxes",
    "cycleSettings",
    "accessories",
    "sessionCompletion",
];

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_after(self, other: Self) -> bool {
        self.0 > other.0
    }
}

/// Position within the running program. Range validity beyond "positive"
/// is a presentation concern; this layer enforces no upper bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSettings {
    pub cycle: u32,
    pub week: u32,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self { cycle: 1, week: 1 }
    }
}

impl CycleSettings {
    #[must_use]
    pub fn new(cycle: u32, week: u32) -> Self {
        Self {
            cycle: cycle.max(1),
            week: week.max(1),
        }
    }
}

/// Per (lift, cycle, week) record of which sets were checked off.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    #[serde(default)]
    pub main_sets: Vec<bool>,
    #[serde(default)]
    pub supplemental_sets: Vec<bool>,
    #[serde(default)]
    pub accessories: Vec<bool>,
}

/// Composite key under which a [`CompletionRecord`] is filed.
///
/// Stale keys from past cycles are retained indefinitely; history is cheap
/// and never purged.
#[must_use]
pub fn completion_key(lift: &str, cycle: u32, week: u32) -> String {
    format!("{lift}_{cycle}_{week}")
}

/// Sync bookkeeping. Not user data: changes here never mark the session
/// dirty on their own.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    pub last_local_change_at: Option<UnixTimeMs>,
    pub last_remote_sync_at: Option<UnixTimeMs>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub is_initial_load_complete: bool,
    pub remote_session_ref: Option<String>,
}

/// The canonical application state. One instance per session, constructed
/// with defaults, overwritten by the local cache and then field-by-field by
/// remote loads. Mutation goes exclusively through
/// [`StateContainer::update`](crate::container::StateContainer::update).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    #[serde(default)]
    pub training_maxes: BTreeMap<String, f64>,
    #[serde(default)]
    pub cycle_settings: CycleSettings,
    #[serde(default)]
    pub accessories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub session_completion: BTreeMap<String, CompletionRecord>,
    #[serde(default)]
    pub identity: Option<Principal>,
    #[serde(default)]
    pub sync_meta: SyncMeta,
}

impl ApplicationState {
    /// All-default state: every known lift present with a zero max and an
    /// empty accessory list.
    #[must_use]
    pub fn initial() -> Self {
        let mut training_maxes = BTreeMap::new();
        let mut accessories = BTreeMap::new();
        for lift in KNOWN_LIFTS {
            training_maxes.insert(lift.to_string(), 0.0);
            accessories.insert(lift.to_string(), Vec::new());
        }
        Self {
            training_maxes,
            cycle_settings: CycleSettings::default(),
            accessories,
            session_completion: BTreeMap::new(),
            identity: None,
            sync_meta: SyncMeta::default(),
        }
    }

    /// The state as a JSON tree with camelCase keys, the shape the
    /// container, subscriptions and the persisted snapshot all share.
    #[must_use]
    pub fn into_tree(self) -> Value {
        // A tree of maps, vectors and numbers cannot fail to serialize.
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    pub fn from_tree(tree: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(tree.clone())
    }
}

/// Seed a loaded max map so every known lift has an entry.
#[must_use]
pub fn seed_known_lifts(mut maxes: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    for lift in KNOWN_LIFTS {
        maxes.entry(lift.to_string()).or_insert(0.0);
    }
    maxes
}

/// Default accessory lists: an empty sequence per known lift.
#[must_use]
pub fn default_accessories() -> BTreeMap<String, Vec<String>> {
    KNOWN_LIFTS
        .iter()
        .map(|lift| ((*lift).to_string(), Vec::new()))
        .collect()
}

/// Coerce a user-supplied training-max value to a stored number.
///
/// Numbers pass through, numeric strings parse, everything else (including
/// non-finite values) stores as 0.
#[must_use]
pub fn coerce_training_max(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_seeds_every_known_lift() {
        let state = ApplicationState::initial();
        for lift in KNOWN_LIFTS {
            assert_eq!(state.training_maxes.get(lift), Some(&0.0));
            assert_eq!(state.accessories.get(lift), Some(&Vec::new()));
        }
        assert_eq!(state.cycle_settings, CycleSettings { cycle: 1, week: 1 });
        assert!(state.session_completion.is_empty());
        assert!(state.identity.is_none());
    }

    #[test]
    fn completion_key_format() {
        assert_eq!(completion_key("squat", 2, 3), "squat_2_3");
    }

    #[test]
    fn coerce_accepts_numbers_and_numeric_strings() {
        assert_eq!(coerce_training_max(&serde_json::json!(300)), 300.0);
        assert_eq!(coerce_training_max(&serde_json::json!(287.5)), 287.5);
        assert_eq!(coerce_training_max(&serde_json::json!("350")), 350.0);
        assert_eq!(coerce_training_max(&serde_json::json!(" 225 ")), 225.0);
    }

    #[test]
    fn coerce_rejects_garbage_as_zero() {
        assert_eq!(coerce_training_max(&serde_json::json!("abc")), 0.0);
        assert_eq!(coerce_training_max(&serde_json::json!(null)), 0.0);
        assert_eq!(coerce_training_max(&serde_json::json!(true)), 0.0);
        assert_eq!(coerce_training_max(&serde_json::json!({"a": 1})), 0.0);
        assert_eq!(coerce_training_max(&serde_json::json!("NaN")), 0.0);
    }

    #[test]
    fn tree_roundtrip_preserves_state() {
        let mut state = ApplicationState::initial();
        state.training_maxes.insert("squat".into(), 315.0);
        state
            .session_completion
            .insert(completion_key("squat", 1, 1), CompletionRecord {
                main_sets: vec![true, false],
                supplemental_sets: vec![],
                accessories: vec![true],
            });
        let tree = state.clone().into_tree();
        assert_eq!(tree["trainingMaxes"]["squat"], serde_json::json!(315.0));
        let back = ApplicationState::from_tree(&tree).expect("roundtrip");
        assert_eq!(back, state);
    }

    #[test]
    fn cycle_settings_clamp_to_positive() {
        assert_eq!(CycleSettings::new(0, 0), CycleSettings { cycle: 1, week: 1 });
    }
}
