//! Release configuration segments
//!
//! Every configuration domain that defines user-facing behavior is a
//! [`Segment`] with an explicit schema. Raw values arrive as loosely-typed
//! JSON; [`Segment::validate`] turns them into typed values or fails with a
//! [`MalformedSegmentError`] naming the segment.

use crate::canonical::strip_volatile;
use crate::error::MalformedSegmentError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Name of a tracked configuration domain
///
/// Declaration order is the canonical order used for composite hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentName {
    /// Persona and tone parameters
    PersonaTone,
    /// Module registry (which modules ship, which are required)
    ModuleRegistry,
    /// Visual style tokens
    StyleTokens,
    /// Feature flag defaults
    FeatureFlags,
    /// Ordered data migration steps
    MigrationPlan,
    /// Security policy document
    SecurityPolicy,
    /// Locked runtime dependencies
    DependencyLock,
}

impl SegmentName {
    /// Fixed order in which segment hashes are concatenated
    pub const CANONICAL_ORDER: [SegmentName; 7] = [
        SegmentName::PersonaTone,
        SegmentName::ModuleRegistry,
        SegmentName::StyleTokens,
        SegmentName::FeatureFlags,
        SegmentName::MigrationPlan,
        SegmentName::SecurityPolicy,
        SegmentName::DependencyLock,
    ];

    /// Stable snake_case identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SegmentName::PersonaTone => "persona_tone",
            SegmentName::ModuleRegistry => "module_registry",
            SegmentName::StyleTokens => "style_tokens",
            SegmentName::FeatureFlags => "feature_flags",
            SegmentName::MigrationPlan => "migration_plan",
            SegmentName::SecurityPolicy => "security_policy",
            SegmentName::DependencyLock => "dependency_lock",
        }
    }
}

impl Display for SegmentName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentName {
    type Err = UnknownSegmentName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SegmentName::CANONICAL_ORDER
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownSegmentName(s.to_string()))
    }
}

/// A segment name that is not one of the tracked domains
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown segment name: {0}")]
pub struct UnknownSegmentName(pub String);

/// Persona and tone parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaTone {
    /// Scalar tone traits (e.g. `directness`, `warmth`)
    pub traits: BTreeMap<String, JsonValue>,
    /// Response templates keyed by situation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, JsonValue>,
}

/// One entry of the module registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
    /// Unique module name
    pub name: String,
    /// Whether the module must be present in every release
    #[serde(default)]
    pub required: bool,
    /// Module version string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Module registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleRegistry {
    /// Registered modules
    pub modules: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    /// Names of modules marked required
    #[must_use]
    pub fn required_names(&self) -> BTreeSet<&str> {
        self.modules
            .iter()
            .filter(|m| m.required)
            .map(|m| m.name.as_str())
            .collect()
    }

    /// Look up a module by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Visual style tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyleTokens {
    /// Color tokens as `#rrggbb` hex strings
    pub colors: BTreeMap<String, String>,
    /// Typography tokens
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub typography: BTreeMap<String, JsonValue>,
    /// Spacing tokens
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spacing: BTreeMap<String, JsonValue>,
}

/// Feature flag defaults
///
/// Accepts `{"flags": {"name": {"default": bool}}}`, `{"flags": {"name": bool}}`
/// or the shorthand `{"name": bool}`. Only the default value is semantic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Flag name to default value
    pub flags: BTreeMap<String, bool>,
}

/// One migration step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationStep {
    /// Sequential step id
    pub id: u64,
    /// Whether the step can be undone by restoring a snapshot
    pub reversible: bool,
    /// Free-form description, not part of the fingerprint
    #[serde(default, skip_serializing)]
    pub description: Option<String>,
}

/// Ordered migration plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationPlan {
    /// Last step already applied by the release that ships this plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<u64>,
    /// Steps, sorted by id after validation
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Highest step id in the plan
    #[must_use]
    pub fn last_step(&self) -> Option<u64> {
        self.steps.iter().map(|s| s.id).max()
    }

    /// The point a later release must continue from
    #[must_use]
    pub fn high_water_mark(&self) -> Option<u64> {
        self.last_step().max(self.last_applied)
    }
}

/// Security policy, an arbitrary JSON object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecurityPolicy {
    /// Policy document
    pub rules: Map<String, JsonValue>,
}

/// One locked dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockedDependency {
    /// Package name
    pub name: String,
    /// Locked semver version
    pub version: String,
    /// Development-only dependencies are not part of the fingerprint
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dev: bool,
}

impl LockedDependency {
    /// Parsed `(major, minor, patch)`
    #[must_use]
    pub fn semver(&self) -> Option<(u64, u64, u64)> {
        parse_semver(&self.version)
    }
}

/// Locked dependency set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyLock {
    /// Locked dependencies
    pub dependencies: Vec<LockedDependency>,
}

impl DependencyLock {
    /// Look up a dependency by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&LockedDependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

/// A validated configuration segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    PersonaTone(PersonaTone),
    ModuleRegistry(ModuleRegistry),
    StyleTokens(StyleTokens),
    FeatureFlags(FeatureFlags),
    MigrationPlan(MigrationPlan),
    SecurityPolicy(SecurityPolicy),
    DependencyLock(DependencyLock),
}

impl Segment {
    /// Validate a raw value against the schema of `name`
    ///
    /// Volatile fields are removed before validation so that build stamps
    /// never cause schema failures or hash drift.
    ///
    /// # Errors
    /// Returns [`MalformedSegmentError`] if the value does not match the schema
    pub fn validate(name: SegmentName, raw: &JsonValue) -> Result<Self, MalformedSegmentError> {
        let mut value = raw.clone();
        strip_volatile(&mut value);

        let segment = match name {
            SegmentName::PersonaTone => {
                let mut persona: PersonaTone = typed(name, value)?;
                persona.traits = trim_keys(name, "trait", persona.traits)?;
                for (key, trait_value) in &persona.traits {
                    if trait_value.is_object() || trait_value.is_array() || trait_value.is_null() {
                        return Err(MalformedSegmentError::new(
                            name,
                            format!("trait `{key}` must be a string, number or boolean"),
                        ));
                    }
                }
                Segment::PersonaTone(persona)
            }
            SegmentName::ModuleRegistry => {
                let registry: ModuleRegistry = typed(name, value)?;
                let mut seen = BTreeSet::new();
                for module in &registry.modules {
                    let trimmed = module.name.trim();
                    if trimmed.is_empty() {
                        return Err(MalformedSegmentError::new(name, "module name is empty"));
                    }
                    if !seen.insert(trimmed.to_string()) {
                        return Err(MalformedSegmentError::new(
                            name,
                            format!("duplicate module `{trimmed}`"),
                        ));
                    }
                }
                Segment::ModuleRegistry(registry)
            }
            SegmentName::StyleTokens => {
                let style: StyleTokens = typed(name, value)?;
                for (token, color) in &style.colors {
                    if normalize_hex_color(color).is_none() {
                        return Err(MalformedSegmentError::new(
                            name,
                            format!("color `{token}` is not a hex color"),
                        ));
                    }
                }
                Segment::StyleTokens(style)
            }
            SegmentName::FeatureFlags => Segment::FeatureFlags(parse_flags(value)?),
            SegmentName::MigrationPlan => {
                let plan: MigrationPlan = typed(name, value)?;
                let mut seen = BTreeSet::new();
                for step in &plan.steps {
                    if !seen.insert(step.id) {
                        return Err(MalformedSegmentError::new(
                            name,
                            format!("duplicate migration step {}", step.id),
                        ));
                    }
                }
                Segment::MigrationPlan(plan)
            }
            SegmentName::SecurityPolicy => match value {
                JsonValue::Object(rules) => Segment::SecurityPolicy(SecurityPolicy { rules }),
                _ => return Err(MalformedSegmentError::new(name, "expected object")),
            },
            SegmentName::DependencyLock => {
                let mut lock: DependencyLock = typed(name, value)?;
                for dep in &mut lock.dependencies {
                    dep.name = dep.name.trim().to_string();
                }
                let mut seen = BTreeSet::new();
                for dep in &lock.dependencies {
                    if dep.semver().is_none() {
                        return Err(MalformedSegmentError::new(
                            name,
                            format!("dependency `{}` has invalid version `{}`", dep.name, dep.version),
                        ));
                    }
                    if !dep.dev && !seen.insert(dep.name.as_str()) {
                        return Err(MalformedSegmentError::new(
                            name,
                            format!("duplicate dependency `{}`", dep.name),
                        ));
                    }
                }
                Segment::DependencyLock(lock)
            }
        };
        Ok(segment)
    }

    /// Re-parse canonical bytes produced by [`crate::normalize`]
    ///
    /// # Errors
    /// Returns [`MalformedSegmentError`] if the bytes are not valid canonical content
    pub fn from_canonical(name: SegmentName, bytes: &[u8]) -> Result<Self, MalformedSegmentError> {
        let value: JsonValue = serde_json::from_slice(bytes)
            .map_err(|e| MalformedSegmentError::new(name, format!("invalid JSON: {e}")))?;
        Self::validate(name, &value)
    }

    /// Domain of this segment
    #[must_use]
    pub fn name(&self) -> SegmentName {
        match self {
            Segment::PersonaTone(_) => SegmentName::PersonaTone,
            Segment::ModuleRegistry(_) => SegmentName::ModuleRegistry,
            Segment::StyleTokens(_) => SegmentName::StyleTokens,
            Segment::FeatureFlags(_) => SegmentName::FeatureFlags,
            Segment::MigrationPlan(_) => SegmentName::MigrationPlan,
            Segment::SecurityPolicy(_) => SegmentName::SecurityPolicy,
            Segment::DependencyLock(_) => SegmentName::DependencyLock,
        }
    }
}

fn typed<T: DeserializeOwned>(name: SegmentName, value: JsonValue) -> Result<T, MalformedSegmentError> {
    serde_json::from_value(value).map_err(|e| MalformedSegmentError::new(name, e.to_string()))
}

fn parse_flags(value: JsonValue) -> Result<FeatureFlags, MalformedSegmentError> {
    let name = SegmentName::FeatureFlags;
    let JsonValue::Object(mut top) = value else {
        return Err(MalformedSegmentError::new(name, "expected object"));
    };

    let entries = match top.remove("flags") {
        Some(JsonValue::Object(inner)) if top.is_empty() => inner,
        Some(other) => {
            // A flag literally called "flags" in shorthand form.
            top.insert("flags".to_string(), other);
            top
        }
        None => top,
    };

    let mut flags = BTreeMap::new();
    for (flag, entry) in entries {
        let default = match entry {
            JsonValue::Bool(b) => b,
            JsonValue::Object(obj) => {
                if let Some(extra) = obj.keys().find(|k| *k != "default" && *k != "description") {
                    return Err(MalformedSegmentError::new(
                        name,
                        format!("flag `{flag}` has unknown field `{extra}`"),
                    ));
                }
                match obj.get("default") {
                    Some(JsonValue::Bool(b)) => *b,
                    _ => {
                        return Err(MalformedSegmentError::new(
                            name,
                            format!("flag `{flag}` needs a boolean `default`"),
                        ))
                    }
                }
            }
            _ => {
                return Err(MalformedSegmentError::new(
                    name,
                    format!("flag `{flag}` must be a boolean or an object"),
                ))
            }
        };
        let trimmed = flag.trim();
        if flags.insert(trimmed.to_string(), default).is_some() {
            return Err(MalformedSegmentError::new(
                name,
                format!("flag `{trimmed}` is defined more than once"),
            ));
        }
    }
    Ok(FeatureFlags { flags })
}

/// Trim map keys, rejecting keys that only differ by surrounding whitespace
fn trim_keys<V>(
    name: SegmentName,
    what: &str,
    map: BTreeMap<String, V>,
) -> Result<BTreeMap<String, V>, MalformedSegmentError> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        let trimmed = key.trim().to_string();
        if out.contains_key(&trimmed) {
            return Err(MalformedSegmentError::new(
                name,
                format!("{what} `{trimmed}` is defined more than once"),
            ));
        }
        out.insert(trimmed, value);
    }
    Ok(out)
}

/// Parse `MAJOR.MINOR.PATCH`, ignoring any `-pre` or `+build` suffix
#[must_use]
pub fn parse_semver(version: &str) -> Option<(u64, u64, u64)> {
    let core = version
        .trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// Lowercase a `#rgb` / `#rrggbb` color and expand the short form
#[must_use]
pub fn normalize_hex_color(color: &str) -> Option<String> {
    let hex = color.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let lower = hex.to_ascii_lowercase();
    match lower.len() {
        3 => Some(format!(
            "#{}",
            lower.chars().flat_map(|c| [c, c]).collect::<String>()
        )),
        6 => Some(format!("#{lower}")),
        _ => None,
    }
}
