//! Diff classifier
//!
//! Compares a candidate against the last accepted release. Segment hashes
//! decide *whether* a domain changed; a structural diff of the canonical
//! content decides *how*, so that e.g. adding an optional module and removing
//! a required one land in different categories.
//!
//! Summaries carry only names and minimal descriptors, never raw persona or
//! content values.

use crate::category::ChangeCategory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use ua_fingerprint::{
    DependencyLock, FeatureFlags, MalformedSegmentError, MigrationPlan, ModuleRegistry,
    PersonaTone, ReleaseFingerprint, SecurityPolicy, Segment, SegmentName, SegmentSet,
    StyleTokens,
};

/// Category-scoped description of a diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Minimal descriptors per category (module names, trait names, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub descriptors: BTreeMap<ChangeCategory, Vec<String>>,
    /// Changes that map to no category (e.g. optional module removed)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub untracked: Vec<String>,
}

impl DiffSummary {
    fn push(&mut self, category: ChangeCategory, descriptor: impl Into<String>) {
        self.descriptors.entry(category).or_default().push(descriptor.into());
    }

    fn mark(&mut self, category: ChangeCategory) {
        self.descriptors.entry(category).or_default();
    }

    /// Descriptors recorded for `category`
    #[must_use]
    pub fn for_category(&self, category: ChangeCategory) -> &[String] {
        self.descriptors.get(&category).map_or(&[], Vec::as_slice)
    }
}

/// Classifier output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Full set of categories; `{NONE}` when nothing tracked changed
    pub categories: BTreeSet<ChangeCategory>,
    /// Segments whose hash differs from the baseline
    pub changed_segments: Vec<SegmentName>,
    /// Descriptors per category
    pub summary: DiffSummary,
}

impl Classification {
    /// Whether nothing tracked changed
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.categories.len() == 1 && self.categories.contains(&ChangeCategory::None)
    }

    /// Whether `category` is present
    #[must_use]
    pub fn contains(&self, category: ChangeCategory) -> bool {
        self.categories.contains(&category)
    }
}

/// Structural diff classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffClassifier;

impl DiffClassifier {
    /// Create new classifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify a candidate against the previous accepted release
    ///
    /// # Errors
    /// Returns [`MalformedSegmentError`] if a changed segment's canonical
    /// content is missing or cannot be re-parsed
    pub fn classify(
        &self,
        previous: &ReleaseFingerprint,
        candidate: &ReleaseFingerprint,
        previous_segments: &SegmentSet,
        candidate_segments: &SegmentSet,
    ) -> Result<Classification, MalformedSegmentError> {
        let changed_segments = candidate.changed_segments(previous);
        let mut summary = DiffSummary::default();

        for name in &changed_segments {
            let before = load(*name, previous_segments)?;
            let after = load(*name, candidate_segments)?;
            debug!(segment = %name, "classifying changed segment");

            match (&before, &after) {
                (Segment::PersonaTone(a), Segment::PersonaTone(b)) => diff_persona(a, b, &mut summary),
                (Segment::ModuleRegistry(a), Segment::ModuleRegistry(b)) => diff_modules(a, b, &mut summary),
                (Segment::StyleTokens(a), Segment::StyleTokens(b)) => diff_style(a, b, &mut summary),
                (Segment::FeatureFlags(a), Segment::FeatureFlags(b)) => diff_flags(a, b, &mut summary),
                (Segment::MigrationPlan(a), Segment::MigrationPlan(b)) => {
                    check_migration_plan(Some(a), b, &mut summary)?;
                }
                (Segment::SecurityPolicy(a), Segment::SecurityPolicy(b)) => diff_security(a, b, &mut summary),
                (Segment::DependencyLock(a), Segment::DependencyLock(b)) => diff_dependencies(a, b, &mut summary),
                _ => {
                    return Err(MalformedSegmentError::new(*name, "segment kind mismatch"));
                }
            }
        }

        Ok(finish(changed_segments, summary))
    }

    /// Classify the first release, which has no baseline
    ///
    /// Only the migration plan is checked: with nothing applied yet, its
    /// steps must start at 1 and run without holes.
    ///
    /// # Errors
    /// Returns [`MalformedSegmentError`] if the candidate migration plan is invalid
    pub fn classify_initial(
        &self,
        candidate_segments: &SegmentSet,
    ) -> Result<Classification, MalformedSegmentError> {
        let mut summary = DiffSummary::default();
        if let Segment::MigrationPlan(plan) = load(SegmentName::MigrationPlan, candidate_segments)? {
            check_migration_plan(None, &plan, &mut summary)?;
        }
        Ok(finish(Vec::new(), summary))
    }
}

fn finish(changed_segments: Vec<SegmentName>, summary: DiffSummary) -> Classification {
    let mut categories: BTreeSet<_> = summary.descriptors.keys().copied().collect();
    if categories.is_empty() {
        categories.insert(ChangeCategory::None);
    }
    Classification {
        categories,
        changed_segments,
        summary,
    }
}

fn load(name: SegmentName, segments: &SegmentSet) -> Result<Segment, MalformedSegmentError> {
    let bytes = segments
        .get(&name)
        .ok_or_else(|| MalformedSegmentError::missing(name))?;
    Segment::from_canonical(name, bytes.as_bytes())
}

fn changed_keys<'a, V: PartialEq>(
    before: &'a BTreeMap<String, V>,
    after: &'a BTreeMap<String, V>,
) -> BTreeSet<&'a str> {
    before
        .keys()
        .chain(after.keys())
        .filter(|k| before.get(*k) != after.get(*k))
        .map(String::as_str)
        .collect()
}

fn diff_persona(before: &PersonaTone, after: &PersonaTone, summary: &mut DiffSummary) {
    summary.mark(ChangeCategory::PersonaToneDrift);
    for key in changed_keys(&before.traits, &after.traits) {
        summary.push(ChangeCategory::PersonaToneDrift, format!("trait:{key}"));
    }
    for key in changed_keys(&before.templates, &after.templates) {
        summary.push(ChangeCategory::PersonaToneDrift, format!("template:{key}"));
    }
}

fn diff_modules(before: &ModuleRegistry, after: &ModuleRegistry, summary: &mut DiffSummary) {
    for module in &before.modules {
        match after.get(&module.name) {
            None if module.required => {
                summary.push(ChangeCategory::ModuleRemove, format!("{} (required, removed)", module.name));
            }
            None => summary.untracked.push(format!("module {} removed (optional)", module.name)),
            Some(next) if module.required && !next.required => {
                summary.push(ChangeCategory::ModuleRemove, format!("{} (no longer required)", module.name));
            }
            Some(next) if next.version != module.version => {
                summary.untracked.push(format!("module {} version changed", module.name));
            }
            Some(_) => {}
        }
    }
    for module in &after.modules {
        if before.get(&module.name).is_none() {
            let kind = if module.required { "required" } else { "optional" };
            summary.push(ChangeCategory::ModuleAdd, format!("{} ({kind})", module.name));
        }
    }
}

fn diff_style(before: &StyleTokens, after: &StyleTokens, summary: &mut DiffSummary) {
    summary.mark(ChangeCategory::StyleVariation);
    for key in changed_keys(&before.colors, &after.colors) {
        summary.push(ChangeCategory::StyleVariation, format!("color:{key}"));
    }
    for key in changed_keys(&before.typography, &after.typography) {
        summary.push(ChangeCategory::StyleVariation, format!("typography:{key}"));
    }
    for key in changed_keys(&before.spacing, &after.spacing) {
        summary.push(ChangeCategory::StyleVariation, format!("spacing:{key}"));
    }
}

fn diff_flags(before: &FeatureFlags, after: &FeatureFlags, summary: &mut DiffSummary) {
    let on_off = |b: bool| if b { "on" } else { "off" };
    for name in changed_keys(&before.flags, &after.flags) {
        let descriptor = match (before.flags.get(name), after.flags.get(name)) {
            (Some(a), Some(b)) => format!("{name}: {}->{}", on_off(*a), on_off(*b)),
            (None, Some(b)) => format!("{name}: added ({})", on_off(*b)),
            (Some(a), None) => format!("{name}: removed (was {})", on_off(*a)),
            (None, None) => continue,
        };
        summary.push(ChangeCategory::FeatureFlagsChange, descriptor);
    }
}

fn diff_security(before: &SecurityPolicy, after: &SecurityPolicy, summary: &mut DiffSummary) {
    summary.mark(ChangeCategory::SecurityPolicyChange);
    let keys: BTreeSet<&str> = before
        .rules
        .keys()
        .chain(after.rules.keys())
        .filter(|k| before.rules.get(*k) != after.rules.get(*k))
        .map(String::as_str)
        .collect();
    for key in keys {
        summary.push(ChangeCategory::SecurityPolicyChange, key.to_string());
    }
}

fn diff_dependencies(before: &DependencyLock, after: &DependencyLock, summary: &mut DiffSummary) {
    for dep in &after.dependencies {
        let Some(prev) = before.get(&dep.name) else {
            continue;
        };
        if let (Some((old_major, ..)), Some((new_major, ..))) = (prev.semver(), dep.semver()) {
            if old_major != new_major {
                summary.push(
                    ChangeCategory::DependencyMajorBump,
                    format!("{}: {old_major}->{new_major}", dep.name),
                );
            }
        }
    }
}

/// Verify the candidate's new steps continue from the baseline without holes
///
/// The starting point is the previous plan's high-water mark, or 0 when
/// nothing was applied before; a `last_applied` declared by the candidate
/// never moves it.
fn check_migration_plan(
    before: Option<&MigrationPlan>,
    after: &MigrationPlan,
    summary: &mut DiffSummary,
) -> Result<(), MalformedSegmentError> {
    let overflow = || MalformedSegmentError::new(SegmentName::MigrationPlan, "step id out of range");
    let applied = before.and_then(MigrationPlan::high_water_mark).unwrap_or(0);
    let mut expected = applied.checked_add(1).ok_or_else(overflow)?;

    let mut ids: Vec<u64> = after.steps.iter().map(|s| s.id).filter(|id| *id > applied).collect();
    ids.sort_unstable();

    for id in ids {
        if id != expected {
            let missing = if id - 1 == expected {
                format!("step {expected} missing")
            } else {
                format!("steps {expected}..{} missing", id - 1)
            };
            summary.push(ChangeCategory::MigrationPlanGap, missing);
        }
        expected = id.checked_add(1).ok_or_else(overflow)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_fingerprint::MigrationStep;

    fn plan(last_applied: Option<u64>, ids: &[u64]) -> MigrationPlan {
        MigrationPlan {
            last_applied,
            steps: ids
                .iter()
                .map(|id| MigrationStep { id: *id, reversible: true, description: None })
                .collect(),
        }
    }

    #[test]
    fn contiguous_plan_has_no_gap() {
        let mut summary = DiffSummary::default();
        check_migration_plan(Some(&plan(None, &[1, 2])), &plan(None, &[1, 2, 3, 4]), &mut summary).unwrap();
        assert!(summary.descriptors.is_empty());
    }

    #[test]
    fn skipped_step_is_a_gap() {
        let mut summary = DiffSummary::default();
        check_migration_plan(Some(&plan(None, &[1, 2])), &plan(None, &[1, 2, 4]), &mut summary).unwrap();
        assert_eq!(summary.for_category(ChangeCategory::MigrationPlanGap), ["step 3 missing"]);
    }

    #[test]
    fn pruned_history_is_not_a_gap() {
        let mut summary = DiffSummary::default();
        check_migration_plan(Some(&plan(Some(5), &[])), &plan(None, &[6, 7]), &mut summary).unwrap();
        assert!(summary.descriptors.is_empty());
    }

    #[test]
    fn initial_plan_must_start_at_one() {
        let mut summary = DiffSummary::default();
        check_migration_plan(None, &plan(None, &[3, 4]), &mut summary).unwrap();
        assert_eq!(summary.for_category(ChangeCategory::MigrationPlanGap), ["steps 1..2 missing"]);
    }

    #[test]
    fn candidate_cannot_declare_its_own_starting_point() {
        let mut summary = DiffSummary::default();
        check_migration_plan(Some(&plan(None, &[])), &plan(Some(5), &[6]), &mut summary).unwrap();
        assert_eq!(summary.for_category(ChangeCategory::MigrationPlanGap), ["steps 1..5 missing"]);

        let mut initial = DiffSummary::default();
        check_migration_plan(None, &plan(Some(5), &[6, 7]), &mut initial).unwrap();
        assert_eq!(initial.for_category(ChangeCategory::MigrationPlanGap), ["steps 1..5 missing"]);
    }

    #[test]
    fn step_id_at_u64_max_is_malformed() {
        let mut summary = DiffSummary::default();
        let err = check_migration_plan(Some(&plan(None, &[1])), &plan(None, &[1, u64::MAX]), &mut summary)
            .unwrap_err();
        assert_eq!(err.segment, SegmentName::MigrationPlan);

        let mut summary = DiffSummary::default();
        assert!(check_migration_plan(Some(&plan(Some(u64::MAX), &[])), &plan(None, &[]), &mut summary).is_err());
    }

    #[test]
    fn finish_defaults_to_none() {
        let classification = finish(Vec::new(), DiffSummary::default());
        assert!(classification.is_none());
    }
}
