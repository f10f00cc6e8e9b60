//! Property tests for normalization and fingerprint determinism.
//!
//! - Fingerprinting the same input twice yields the same composite.
//! - Reordering keys or list entries never changes canonical bytes.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use ua_fingerprint::{normalize, FingerprintEngine, SegmentName};

fn module_list() -> impl Strategy<Value = Vec<(String, bool)>> {
    prop::collection::btree_map("[A-Za-z][A-Za-z0-9]{0,10}", any::<bool>(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn flag_map() -> impl Strategy<Value = BTreeMap<String, bool>> {
    prop::collection::btree_map("[a-z_]{1,12}", any::<bool>(), 0..8)
}

fn registry_json(modules: &[(String, bool)]) -> Value {
    let entries: Vec<_> = modules
        .iter()
        .map(|(name, required)| json!({"name": name, "required": required}))
        .collect();
    json!({ "modules": entries })
}

fn raw_segments(modules: &[(String, bool)], flags: &BTreeMap<String, bool>, directness: u8) -> BTreeMap<SegmentName, Value> {
    BTreeMap::from([
        (SegmentName::PersonaTone, json!({"traits": {"directness": directness}})),
        (SegmentName::ModuleRegistry, registry_json(modules)),
        (SegmentName::StyleTokens, json!({"colors": {"primary": "#A0B0C0"}})),
        (SegmentName::FeatureFlags, json!({ "flags": flags })),
        (SegmentName::MigrationPlan, json!({"steps": []})),
        (SegmentName::SecurityPolicy, json!({})),
        (SegmentName::DependencyLock, json!({"dependencies": []})),
    ])
}

proptest! {
    #[test]
    fn fingerprint_is_deterministic(modules in module_list(), flags in flag_map(), directness in any::<u8>()) {
        let raw = raw_segments(&modules, &flags, directness);
        let (a, _) = FingerprintEngine::compute_verified("1.0.0", &raw, 1).unwrap();
        let (b, _) = FingerprintEngine::compute_verified("1.0.0", &raw, 2).unwrap();
        prop_assert_eq!(a.composite_hash, b.composite_hash);
        prop_assert_eq!(a.segment_hashes, b.segment_hashes);
    }

    #[test]
    fn module_order_is_not_semantic(modules in module_list()) {
        let forward = registry_json(&modules);
        let mut reversed_modules = modules.clone();
        reversed_modules.reverse();
        let reversed = registry_json(&reversed_modules);
        prop_assert_eq!(
            normalize(SegmentName::ModuleRegistry, &forward).unwrap(),
            normalize(SegmentName::ModuleRegistry, &reversed).unwrap()
        );
    }

    #[test]
    fn key_order_is_not_semantic(flags in flag_map()) {
        // Build the object twice with opposite insertion orders.
        let mut forward = Map::new();
        for (k, v) in &flags {
            forward.insert(k.clone(), json!({"default": v}));
        }
        let mut backward = Map::new();
        for (k, v) in flags.iter().rev() {
            backward.insert(k.clone(), json!({"description": "x", "default": v}));
        }
        prop_assert_eq!(
            normalize(SegmentName::FeatureFlags, &json!({"flags": forward})).unwrap(),
            normalize(SegmentName::FeatureFlags, &json!({"flags": backward})).unwrap()
        );
    }
}

#[test]
fn reformatted_module_list_hashes_identically() {
    let compact = r#"{"modules":[{"name":"GoalAligner","required":true,"version":"1.0.0"},{"name":"MoodOrb","required":false}]}"#;
    let pretty = r#"
        {
            "modules": [
                { "required": false, "name": "MoodOrb" },
                { "version": "1.0.0", "required": true, "name": "GoalAligner" }
            ]
        }
    "#;
    let a = normalize(SegmentName::ModuleRegistry, &serde_json::from_str(compact).unwrap()).unwrap();
    let b = normalize(SegmentName::ModuleRegistry, &serde_json::from_str(pretty).unwrap()).unwrap();
    assert_eq!(a, b);
    assert_eq!(
        ua_fingerprint::ContentHash::compute(a.as_bytes()),
        ua_fingerprint::ContentHash::compute(b.as_bytes())
    );
}
