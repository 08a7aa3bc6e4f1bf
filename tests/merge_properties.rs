use ironcycle::StateContainer;
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::{json, Value};

proptest! {
    // For object-valued top-level fields, an update yields the shallow
    // merge of the prior value and the partial (new values win per-key).
    #[test]
    fn object_valued_fields_shallow_merge(
        prior in btree_map("[a-z]{1,8}", 0u32..1000, 0..8),
        partial in btree_map("[a-z]{1,8}", 0u32..1000, 0..8),
    ) {
        let container = StateContainer::new();
        container.update(json!({"trainingMaxes": prior}));
        let before = container.get_path("trainingMaxes").unwrap();

        container.update(json!({"trainingMaxes": partial.clone()}));
        let after = container.get_path("trainingMaxes").unwrap();

        // Independent restatement of the merge rule.
        let mut expected = before.as_object().unwrap().clone();
        for (key, value) in &partial {
            expected.insert(key.clone(), json!(value));
        }
        prop_assert_eq!(after, Value::Object(expected));
    }

    // Array-valued fields replace exactly, never merge element-wise.
    #[test]
    fn array_valued_fields_replace_exactly(
        first in vec("[a-z ]{0,12}", 0..6),
        second in vec("[a-z ]{0,12}", 0..6),
    ) {
        let container = StateContainer::new();
        container.update(json!({"accessories": {"squat": first}}));
        container.update(json!({"accessories": {"squat": second.clone()}}));
        prop_assert_eq!(
            container.get_path("accessories.squat"),
            Some(json!(second))
        );
    }

    // Primitive fields inside a merged object also replace wholesale.
    #[test]
    fn primitive_fields_replace_wholesale(
        cycle in 1u32..50,
        week in 1u32..10,
    ) {
        let container = StateContainer::new();
        container.update(json!({"cycleSettings": {"cycle": cycle, "week": week}}));
        prop_assert_eq!(container.get_path("cycleSettings.cycle"), Some(json!(cycle)));
        prop_assert_eq!(container.get_path("cycleSettings.week"), Some(json!(week)));
    }
}
