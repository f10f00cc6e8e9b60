//! Testing utilities for the upgrade audit workspace
//!
//! Shared segment fixtures and builders for drift scenarios.

#![allow(missing_docs)]

use serde_json::{json, Value};
use std::collections::BTreeMap;
use ua_fingerprint::{FingerprintEngine, ReleaseFingerprint, SegmentName, SegmentSet};

/// Fixed seed for deterministic test signing keys
pub const TEST_KEY_SEED: [u8; 32] = [7u8; 32];

/// Raw segment values for one release, with mutation helpers
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFixture {
    raw: BTreeMap<SegmentName, Value>,
}

impl SegmentFixture {
    /// A realistic accepted release: two required modules, one optional
    pub fn baseline() -> Self {
        let raw = BTreeMap::from([
            (
                SegmentName::PersonaTone,
                json!({
                    "traits": {"directness": 0.6, "warmth": 0.8, "humor": "dry"},
                    "templates": {"greeting": "Hey, it's me."},
                    "generated_at": "2026-10-01T00:00:00Z"
                }),
            ),
            (
                SegmentName::ModuleRegistry,
                json!({"modules": [
                    {"name": "GoalAligner", "required": true, "version": "1.0.0"},
                    {"name": "MemoryCore", "required": true},
                    {"name": "MoodOrb", "required": false}
                ]}),
            ),
            (
                SegmentName::StyleTokens,
                json!({
                    "colors": {"primary": "#6A5ACD", "background": "#FFFFFF"},
                    "typography": {"body": "Inter"}
                }),
            ),
            (
                SegmentName::FeatureFlags,
                json!({"flags": {
                    "voice_wake": {"default": false, "description": "Wake word listening"},
                    "smart_home": {"default": true}
                }}),
            ),
            (
                SegmentName::MigrationPlan,
                json!({"steps": [
                    {"id": 1, "reversible": true, "description": "create tables"},
                    {"id": 2, "reversible": true}
                ]}),
            ),
            (
                SegmentName::SecurityPolicy,
                json!({"tls": "required", "data_export": "user_only", "session_timeout_secs": 900}),
            ),
            (
                SegmentName::DependencyLock,
                json!({"dependencies": [
                    {"name": "tokio", "version": "1.43.0"},
                    {"name": "sqlite", "version": "1.9.0"},
                    {"name": "criterion", "version": "0.5.1", "dev": true}
                ]}),
            ),
        ]);
        Self { raw }
    }

    pub fn raw(&self) -> &BTreeMap<SegmentName, Value> {
        &self.raw
    }

    pub fn into_raw(self) -> BTreeMap<SegmentName, Value> {
        self.raw
    }

    /// Replace one segment wholesale
    pub fn with_segment(mut self, name: SegmentName, value: Value) -> Self {
        self.raw.insert(name, value);
        self
    }

    fn segment_mut(&mut self, name: SegmentName) -> &mut Value {
        self.raw.entry(name).or_insert_with(|| json!({}))
    }

    fn modules_mut(&mut self) -> &mut Vec<Value> {
        let registry = self.segment_mut(SegmentName::ModuleRegistry);
        if !registry["modules"].is_array() {
            registry["modules"] = json!([]);
        }
        match registry["modules"].as_array_mut() {
            Some(modules) => modules,
            None => unreachable!("modules was just set to an array"),
        }
    }

    pub fn without_module(mut self, name: &str) -> Self {
        self.modules_mut().retain(|m| m["name"] != name);
        self
    }

    pub fn with_module(mut self, name: &str, required: bool) -> Self {
        self.modules_mut().push(json!({"name": name, "required": required}));
        self
    }

    pub fn with_trait(mut self, key: &str, value: Value) -> Self {
        self.segment_mut(SegmentName::PersonaTone)["traits"][key] = value;
        self
    }

    pub fn with_color(mut self, token: &str, hex: &str) -> Self {
        self.segment_mut(SegmentName::StyleTokens)["colors"][token] = json!(hex);
        self
    }

    pub fn with_flag(mut self, name: &str, default: bool) -> Self {
        self.segment_mut(SegmentName::FeatureFlags)["flags"][name] = json!({"default": default});
        self
    }

    pub fn with_security_rule(mut self, key: &str, value: Value) -> Self {
        self.segment_mut(SegmentName::SecurityPolicy)[key] = value;
        self
    }

    /// Set (or add) a locked dependency version
    pub fn with_dependency(mut self, name: &str, version: &str) -> Self {
        let lock = self.segment_mut(SegmentName::DependencyLock);
        if !lock["dependencies"].is_array() {
            lock["dependencies"] = json!([]);
        }
        if let Some(deps) = lock["dependencies"].as_array_mut() {
            match deps.iter_mut().find(|d| d["name"] == name) {
                Some(dep) => dep["version"] = json!(version),
                None => deps.push(json!({"name": name, "version": version})),
            }
        }
        self
    }

    /// Replace the migration plan with reversible steps `ids`
    pub fn with_migration_steps(self, ids: &[u64]) -> Self {
        let steps: Vec<_> = ids.iter().map(|id| json!({"id": id, "reversible": true})).collect();
        self.with_segment(SegmentName::MigrationPlan, json!({ "steps": steps }))
    }

    /// Replace the migration plan with explicit `(id, reversible)` steps
    pub fn with_migration_plan(self, steps: &[(u64, bool)]) -> Self {
        let steps: Vec<_> = steps
            .iter()
            .map(|(id, reversible)| json!({"id": id, "reversible": reversible}))
            .collect();
        self.with_segment(SegmentName::MigrationPlan, json!({ "steps": steps }))
    }

    /// Change a build stamp only; no tracked content moves
    pub fn with_bugfix_build(mut self, build_id: &str) -> Self {
        self.segment_mut(SegmentName::PersonaTone)["generated_at"] = json!(build_id);
        self.segment_mut(SegmentName::ModuleRegistry)["build_id"] = json!(build_id);
        self
    }

    /// Verified fingerprint and canonical segments
    pub fn fingerprint(&self, version: &str) -> (ReleaseFingerprint, SegmentSet) {
        FingerprintEngine::compute_verified(version, &self.raw, 1_760_000_000)
            .unwrap_or_else(|e| panic!("fixture must fingerprint cleanly: {e}"))
    }
}
