//! Classification completeness and decision precedence.
//!
//! Each trigger is constructed on its own against the shared baseline fixture;
//! the classifier must report exactly that category and the decision matrix
//! must map it to the documented action.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use ua_policy::{decide, ChangeCategory, DiffClassifier, PolicyDecision, PolicyEngine};
use ua_test_utils::SegmentFixture;

fn classify(candidate: SegmentFixture) -> ua_policy::Classification {
    let (base_fp, base_segs) = SegmentFixture::baseline().fingerprint("1.0.0");
    let (cand_fp, cand_segs) = candidate.fingerprint("1.1.0");
    DiffClassifier::new()
        .classify(&base_fp, &cand_fp, &base_segs, &cand_segs)
        .unwrap()
}

fn only(category: ChangeCategory) -> BTreeSet<ChangeCategory> {
    BTreeSet::from([category])
}

#[test]
fn bugfix_build_is_none_and_auto_accepts() {
    let result = classify(SegmentFixture::baseline().with_bugfix_build("build-2026-10-17"));
    assert_eq!(result.categories, only(ChangeCategory::None));
    assert!(result.changed_segments.is_empty());
    assert_eq!(decide(&result.categories), PolicyDecision::AutoAccept);
}

#[test]
fn removing_required_module_is_rejected() {
    let result = classify(SegmentFixture::baseline().without_module("GoalAligner"));
    assert_eq!(result.categories, only(ChangeCategory::ModuleRemove));
    assert_eq!(
        result.summary.for_category(ChangeCategory::ModuleRemove),
        ["GoalAligner (required, removed)"]
    );
    assert_eq!(decide(&result.categories), PolicyDecision::Reject);
}

#[test]
fn demoting_required_module_is_removal() {
    let candidate = SegmentFixture::baseline()
        .without_module("MemoryCore")
        .with_module("MemoryCore", false);
    let result = classify(candidate);
    assert_eq!(result.categories, only(ChangeCategory::ModuleRemove));
}

#[test]
fn adding_optional_module_notifies() {
    let result = classify(SegmentFixture::baseline().with_module("Journal", false));
    assert_eq!(result.categories, only(ChangeCategory::ModuleAdd));
    assert_eq!(decide(&result.categories), PolicyDecision::SoftNotify);
}

#[test]
fn removing_optional_module_is_untracked() {
    let result = classify(SegmentFixture::baseline().without_module("MoodOrb"));
    assert_eq!(result.categories, only(ChangeCategory::None));
    assert_eq!(result.summary.untracked, vec!["module MoodOrb removed (optional)".to_string()]);
}

#[test]
fn tone_change_is_persona_drift() {
    let result = classify(SegmentFixture::baseline().with_trait("directness", json!(0.9)));
    assert_eq!(result.categories, only(ChangeCategory::PersonaToneDrift));
    assert_eq!(
        result.summary.for_category(ChangeCategory::PersonaToneDrift),
        ["trait:directness"]
    );
    assert_eq!(decide(&result.categories), PolicyDecision::RequireConsent);
}

#[test]
fn summary_never_contains_raw_persona_text() {
    let result = classify(SegmentFixture::baseline().with_trait("humor", json!("sarcastic and biting")));
    let rendered = serde_json::to_string(&result.summary).unwrap();
    assert!(!rendered.contains("sarcastic"));
    assert!(!rendered.contains("dry"));
}

#[test]
fn color_change_is_style_variation() {
    let result = classify(SegmentFixture::baseline().with_color("primary", "#FF0000"));
    assert_eq!(result.categories, only(ChangeCategory::StyleVariation));
    assert_eq!(decide(&result.categories), PolicyDecision::RequireConsent);
}

#[test]
fn color_case_change_is_not_a_variation() {
    let result = classify(SegmentFixture::baseline().with_color("primary", "#6a5acd"));
    assert_eq!(result.categories, only(ChangeCategory::None));
}

#[test]
fn security_rule_change_is_detected() {
    let result = classify(SegmentFixture::baseline().with_security_rule("session_timeout_secs", json!(3600)));
    assert_eq!(result.categories, only(ChangeCategory::SecurityPolicyChange));
    assert_eq!(
        result.summary.for_category(ChangeCategory::SecurityPolicyChange),
        ["session_timeout_secs"]
    );
}

#[test]
fn flag_flip_off_to_on_is_reported() {
    let result = classify(SegmentFixture::baseline().with_flag("voice_wake", true));
    assert_eq!(result.categories, only(ChangeCategory::FeatureFlagsChange));
    assert_eq!(
        result.summary.for_category(ChangeCategory::FeatureFlagsChange),
        ["voice_wake: off->on"]
    );
    assert_eq!(decide(&result.categories), PolicyDecision::RequireConsent);
}

#[test]
fn dependency_major_bump_is_detected() {
    let result = classify(SegmentFixture::baseline().with_dependency("sqlite", "2.0.0"));
    assert_eq!(result.categories, only(ChangeCategory::DependencyMajorBump));
    assert_eq!(
        result.summary.for_category(ChangeCategory::DependencyMajorBump),
        ["sqlite: 1->2"]
    );
    let verdict = PolicyEngine::default().evaluate(&result);
    assert_eq!(verdict.decision, PolicyDecision::RequireConsent);
    assert_eq!(verdict.approval_required, only(ChangeCategory::DependencyMajorBump));
}

#[test]
fn dependency_minor_bump_is_not_a_category() {
    let result = classify(SegmentFixture::baseline().with_dependency("sqlite", "1.10.2"));
    assert_eq!(result.categories, only(ChangeCategory::None));
    assert_eq!(result.changed_segments.len(), 1);
}

#[test]
fn migration_gap_is_rejected() {
    let result = classify(SegmentFixture::baseline().with_migration_steps(&[1, 2, 4]));
    assert_eq!(result.categories, only(ChangeCategory::MigrationPlanGap));
    assert_eq!(decide(&result.categories), PolicyDecision::Reject);
}

#[test]
fn contiguous_migration_is_accepted() {
    let result = classify(SegmentFixture::baseline().with_migration_steps(&[1, 2, 3]));
    assert_eq!(result.categories, only(ChangeCategory::None));
}

#[test]
fn co_occurring_categories_are_all_returned() {
    let candidate = SegmentFixture::baseline()
        .without_module("GoalAligner")
        .with_trait("directness", json!(0.1))
        .with_color("background", "#000000");
    let result = classify(candidate);
    assert_eq!(
        result.categories,
        BTreeSet::from([
            ChangeCategory::ModuleRemove,
            ChangeCategory::PersonaToneDrift,
            ChangeCategory::StyleVariation,
        ])
    );
    assert_eq!(decide(&result.categories), PolicyDecision::Reject);
}

#[test]
fn initial_release_checks_migration_contiguity() {
    let (_, segments) = SegmentFixture::baseline().fingerprint("1.0.0");
    let result = DiffClassifier::new().classify_initial(&segments).unwrap();
    assert!(result.is_none());

    let (_, gapped) = SegmentFixture::baseline().with_migration_steps(&[1, 3]).fingerprint("1.0.0");
    let result = DiffClassifier::new().classify_initial(&gapped).unwrap();
    assert!(result.contains(ChangeCategory::MigrationPlanGap));
}

#[test]
fn declared_last_applied_does_not_skip_unrun_steps() {
    let empty_plan = SegmentFixture::baseline().with_segment(
        ua_fingerprint::SegmentName::MigrationPlan,
        json!({"steps": []}),
    );
    let (base_fp, base_segs) = empty_plan.fingerprint("1.0.0");
    let candidate = SegmentFixture::baseline().with_segment(
        ua_fingerprint::SegmentName::MigrationPlan,
        json!({"last_applied": 5, "steps": [{"id": 6, "reversible": true}]}),
    );
    let (cand_fp, cand_segs) = candidate.fingerprint("1.1.0");

    let result = DiffClassifier::new()
        .classify(&base_fp, &cand_fp, &base_segs, &cand_segs)
        .unwrap();
    assert_eq!(result.categories, only(ChangeCategory::MigrationPlanGap));
    assert_eq!(
        result.summary.for_category(ChangeCategory::MigrationPlanGap),
        ["steps 1..5 missing"]
    );

    let first_install = DiffClassifier::new().classify_initial(&cand_segs).unwrap();
    assert!(first_install.contains(ChangeCategory::MigrationPlanGap));
}

#[test]
fn overflowing_step_id_is_malformed() {
    let (base_fp, base_segs) = SegmentFixture::baseline().fingerprint("1.0.0");
    let candidate = SegmentFixture::baseline().with_segment(
        ua_fingerprint::SegmentName::MigrationPlan,
        json!({"steps": [{"id": 1, "reversible": true}, {"id": 2, "reversible": true}, {"id": u64::MAX, "reversible": true}]}),
    );
    let (cand_fp, cand_segs) = candidate.fingerprint("1.1.0");
    let err = DiffClassifier::new()
        .classify(&base_fp, &cand_fp, &base_segs, &cand_segs)
        .unwrap_err();
    assert_eq!(err.segment, ua_fingerprint::SegmentName::MigrationPlan);
}

fn category() -> impl Strategy<Value = ChangeCategory> {
    prop::sample::select(ChangeCategory::ALL.to_vec())
}

proptest! {
    #[test]
    fn reject_tier_always_wins(
        others in prop::collection::btree_set(category(), 0..9),
        hard in prop::sample::select(vec![ChangeCategory::ModuleRemove, ChangeCategory::MigrationPlanGap]),
        consent in prop::sample::select(vec![
            ChangeCategory::PersonaToneDrift,
            ChangeCategory::StyleVariation,
            ChangeCategory::SecurityPolicyChange,
            ChangeCategory::FeatureFlagsChange,
            ChangeCategory::DependencyMajorBump,
        ]),
    ) {
        let mut set = others;
        set.insert(hard);
        set.insert(consent);
        prop_assert_eq!(decide(&set), PolicyDecision::Reject);
    }

    #[test]
    fn decision_is_max_tier(set in prop::collection::btree_set(category(), 1..9)) {
        let expected = set.iter().map(|c| c.tier()).max().unwrap();
        prop_assert_eq!(decide(&set), expected);
    }
}
