//! Segment normalizer
//!
//! Maps a raw segment value to canonical bytes. Each domain has its own rule:
//!
//! | Segment | Rule |
//! |---|---|
//! | `persona_tone` | trim string traits, sort keys |
//! | `module_registry` | trim names, sort by name |
//! | `style_tokens` | lowercase and expand hex colors |
//! | `feature_flags` | keep only `name -> default` |
//! | `migration_plan` | sort steps by id, drop descriptions |
//! | `security_policy` | sorted canonical JSON |
//! | `dependency_lock` | drop dev-only entries, sort by name |
//!
//! Volatile build stamps are stripped from every segment. Normalization is
//! pure: no I/O, no clock, no randomness.

use crate::canonical::canonical_json;
use crate::error::MalformedSegmentError;
use crate::segment::{normalize_hex_color, Segment, SegmentName};
use rayon::prelude::*;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Canonical byte encoding of one segment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Raw bytes
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the underlying buffer
    #[inline]
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Wrap bytes previously produced by [`normalize`]
    #[inline]
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// View as UTF-8 canonical JSON
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Always produced from a String.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Normalize one segment
///
/// # Errors
/// Returns [`MalformedSegmentError`] naming the segment if schema validation fails
pub fn normalize(name: SegmentName, raw: &JsonValue) -> Result<CanonicalBytes, MalformedSegmentError> {
    let segment = Segment::validate(name, raw)?;
    Ok(canonical_bytes(&segment))
}

/// Canonical bytes of an already validated segment
#[must_use]
pub fn canonical_bytes(segment: &Segment) -> CanonicalBytes {
    CanonicalBytes(canonical_json(&canonical_value(segment)).into_bytes())
}

/// Normalize every tracked segment in parallel
///
/// All segments in [`SegmentName::CANONICAL_ORDER`] must be present; a
/// missing or malformed segment fails the whole batch. Segments are
/// independent, so they are processed concurrently and joined before return.
///
/// # Errors
/// Returns the first [`MalformedSegmentError`] in canonical order
pub fn normalize_all(
    raw: &BTreeMap<SegmentName, JsonValue>,
) -> Result<BTreeMap<SegmentName, CanonicalBytes>, MalformedSegmentError> {
    let results: Vec<_> = SegmentName::CANONICAL_ORDER
        .par_iter()
        .map(|name| {
            let value = raw.get(name).ok_or_else(|| MalformedSegmentError::missing(*name))?;
            normalize(*name, value).map(|bytes| (*name, bytes))
        })
        .collect();

    // Collected in canonical order, so the reported error is deterministic.
    results.into_iter().collect()
}

/// Canonical JSON value of a validated segment
#[must_use]
pub fn canonical_value(segment: &Segment) -> JsonValue {
    match segment {
        Segment::PersonaTone(persona) => {
            // keys were trimmed and checked for collisions during validation
            let traits: Map<String, JsonValue> = persona
                .traits
                .iter()
                .map(|(k, v)| (k.clone(), trim_scalar(v)))
                .collect();
            let mut out = Map::new();
            out.insert("traits".into(), JsonValue::Object(traits));
            if !persona.templates.is_empty() {
                out.insert("templates".into(), json!(persona.templates));
            }
            JsonValue::Object(out)
        }
        Segment::ModuleRegistry(registry) => {
            let mut modules: Vec<_> = registry
                .modules
                .iter()
                .map(|m| {
                    let mut entry = Map::new();
                    entry.insert("name".into(), json!(m.name.trim()));
                    entry.insert("required".into(), json!(m.required));
                    if let Some(version) = &m.version {
                        entry.insert("version".into(), json!(version.trim()));
                    }
                    (m.name.trim().to_string(), JsonValue::Object(entry))
                })
                .collect();
            modules.sort_by(|a, b| a.0.cmp(&b.0));
            json!({ "modules": modules.into_iter().map(|(_, v)| v).collect::<Vec<_>>() })
        }
        Segment::StyleTokens(style) => {
            let colors: Map<String, JsonValue> = style
                .colors
                .iter()
                .map(|(token, color)| {
                    let normalized = normalize_hex_color(color).unwrap_or_else(|| color.clone());
                    (token.clone(), JsonValue::String(normalized))
                })
                .collect();
            let mut out = Map::new();
            out.insert("colors".into(), JsonValue::Object(colors));
            if !style.spacing.is_empty() {
                out.insert("spacing".into(), json!(style.spacing));
            }
            if !style.typography.is_empty() {
                out.insert("typography".into(), json!(style.typography));
            }
            JsonValue::Object(out)
        }
        Segment::FeatureFlags(flags) => json!({ "flags": flags.flags }),
        Segment::MigrationPlan(plan) => {
            let mut steps = plan.steps.clone();
            steps.sort_by_key(|s| s.id);
            let steps: Vec<_> = steps
                .iter()
                .map(|s| json!({ "id": s.id, "reversible": s.reversible }))
                .collect();
            match plan.last_applied {
                Some(last) => json!({ "last_applied": last, "steps": steps }),
                None => json!({ "steps": steps }),
            }
        }
        Segment::SecurityPolicy(policy) => JsonValue::Object(policy.rules.clone()),
        Segment::DependencyLock(lock) => {
            let mut deps: Vec<_> = lock
                .dependencies
                .iter()
                .filter(|d| !d.dev)
                .map(|d| (d.name.trim(), d.version.trim()))
                .collect();
            deps.sort_unstable();
            let deps: Vec<_> = deps
                .into_iter()
                .map(|(name, version)| json!({ "name": name, "version": version }))
                .collect();
            json!({ "dependencies": deps })
        }
    }
}

fn trim_scalar(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(s.trim().to_string()),
        other => other.clone(),
    }
}
