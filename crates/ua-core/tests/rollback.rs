//! Snapshot restore on migration failure, health failure and operator rollback.

mod common;

use common::{append_step, failing_step, initial_image, registry, release, Harness, Switch, Unreachable};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use ua_core::{
    AlwaysHealthy, ApplyError, CrashLoopDetector, ErrorClass, PipelineConfig, Supervision,
    UpgradeError, UpgradeOutcome, UpgradeRequest,
};
use ua_policy::{ChangeCategory, PolicyDecision, Verdict};
use ua_test_utils::SegmentFixture;

fn request(fixture: SegmentFixture, version: &str) -> UpgradeRequest {
    UpgradeRequest::new(version, fixture.into_raw())
}

#[tokio::test]
async fn failed_migration_restores_snapshot() {
    let h = Harness::accepted(registry([append_step(3, ";v3"), failing_step(4)]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);

    let outcome = pipeline
        .run(request(SegmentFixture::baseline().with_migration_steps(&[1, 2, 3, 4]), "1.1.0"))
        .await
        .unwrap();

    let UpgradeOutcome::RolledBack { version, cause } = outcome else {
        panic!("expected a rollback, got {outcome:?}");
    };
    assert_eq!(version, "1.1.0");
    assert_eq!(cause, "migration step 4 failed: disk full");

    assert_eq!(h.state.image(), initial_image());
    assert_eq!(h.active_version().as_deref(), Some("1.0.0"));

    let entries = h.entries();
    let kinds: Vec<_> = entries.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["attempt", "rollback"]);
    assert_eq!(entries[1].payload.to_version.as_deref(), Some("1.0.0"));
    assert_eq!(entries[1].payload.cause.as_deref(), Some(cause.as_str()));
    assert_eq!(h.events.names(), ["upgrade_attempt", "rollback"]);
    assert_eq!(h.controller.snapshot_count(), 0);
}

#[tokio::test]
async fn failure_after_irreversible_step_is_fatal() {
    let h = Harness::accepted(registry([append_step(3, ";v3").irreversible(), failing_step(4)]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);

    let candidate = SegmentFixture::baseline().with_migration_plan(&[(1, true), (2, true), (3, false), (4, true)]);
    let err = pipeline.run(request(candidate, "1.1.0")).await.unwrap_err();

    assert!(matches!(
        err,
        UpgradeError::Apply(ApplyError::IrreversibleMigration { ref steps, .. }) if steps == &[3]
    ));
    assert_eq!(err.class(), ErrorClass::Irreversible);
    assert!(err.is_fatal());
    assert!(!err.is_retryable());

    // step 3 stays applied; nothing pretends to have undone it
    assert_eq!(h.state.image().data, b"rows=10;v3".to_vec());
    let entries = h.entries();
    let kinds: Vec<_> = entries.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["attempt", "failed"]);
    assert_eq!(entries[1].payload.failed_step, Some(4));
    assert_eq!(entries[1].payload.irreversible_steps, [3]);
    assert_eq!(h.events.names(), ["upgrade_attempt", "upgrade_failed"]);
    assert!(h.controller.log().is_valid());

    // the pre-migration image is kept for the operator, but is not a live application
    let snapshots = h.controller.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].failed_at.is_some());
    assert_eq!(snapshots[0].image, initial_image());
    assert!(matches!(h.controller.rollback("operator request"), Err(ApplyError::NothingToRollBack)));
    assert_eq!(h.active_version().as_deref(), Some("1.0.0"));
}

#[test]
fn apply_ignores_a_decision_made_elsewhere() {
    let h = Harness::accepted(registry([append_step(4, ";v4")]));
    let forged = Verdict {
        decision: PolicyDecision::AutoAccept,
        rejecting: BTreeSet::new(),
        consent_required: BTreeSet::new(),
        approval_required: BTreeSet::new(),
    };

    let removal = release(&SegmentFixture::baseline().without_module("GoalAligner"), "1.1.0");
    // classified as if nothing had been accepted yet
    let stale = removal.classify_against(None).unwrap();
    h.controller.record_attempt(&removal, &stale, &forged).unwrap();
    let err = h.controller.apply(&removal, None, true).unwrap_err();
    assert!(matches!(
        err,
        ApplyError::Rejected { ref categories, .. }
            if categories == &BTreeSet::from([ChangeCategory::ModuleRemove])
    ));

    let gap = release(&SegmentFixture::baseline().with_migration_steps(&[1, 2, 4]), "1.2.0");
    assert!(matches!(
        h.controller.apply(&gap, None, true),
        Err(ApplyError::Rejected { ref categories, .. }) if categories.contains(&ChangeCategory::MigrationPlanGap)
    ));

    assert_eq!(h.active_version().as_deref(), Some("1.0.0"));
    assert_eq!(h.state.image(), initial_image());
    assert_eq!(h.controller.snapshot_count(), 0);
    let kinds: Vec<_> = h.entries().iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["attempt"]);
}

#[tokio::test]
async fn rollback_refused_after_irreversible_application() {
    let h = Harness::accepted(registry([append_step(3, ";v3").irreversible()]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);

    let candidate = SegmentFixture::baseline().with_migration_plan(&[(1, true), (2, true), (3, false)]);
    let outcome = pipeline.run(request(candidate, "1.1.0")).await.unwrap();
    assert!(outcome.is_active());

    let err = h.controller.rollback("operator request").unwrap_err();
    assert!(matches!(err, ApplyError::IrreversibleMigration { ref version, .. } if version == "1.1.0"));
    assert_eq!(h.active_version().as_deref(), Some("1.1.0"));
}

#[tokio::test]
async fn failed_smoke_check_rolls_back_and_disables_new_modules() {
    let h = Harness::accepted(registry([]));
    let crashes = CrashLoopDetector::new(1);
    crashes.record_crash();
    let pipeline = h.pipeline(Unreachable, crashes);

    let outcome = pipeline
        .run(request(SegmentFixture::baseline().with_module("Weather", false), "1.1.0"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        UpgradeOutcome::RolledBack { ref cause, .. } if cause.contains("crash loop")
    ));
    assert_eq!(h.active_version().as_deref(), Some("1.0.0"));
    assert!(h.state.disabled_modules().contains("Weather"));
    let kinds: Vec<_> = h.entries().iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["attempt", "applied", "rollback"]);
    assert!(h.controller.log().is_valid());
}

#[tokio::test]
async fn manual_rollback_restores_previous_release() {
    let h = Harness::accepted(registry([append_step(3, ";v3")]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);

    pipeline
        .run(request(SegmentFixture::baseline().with_migration_steps(&[1, 2, 3]), "1.1.0"))
        .await
        .unwrap();
    assert_eq!(h.state.image().data, b"rows=10;v3".to_vec());

    let result = h.controller.rollback("user reported regressions").unwrap();
    assert_eq!(result.from_version, "1.1.0");
    assert_eq!(result.to_version.as_deref(), Some("1.0.0"));
    assert_eq!(h.state.image(), initial_image());
    assert_eq!(h.active_version().as_deref(), Some("1.0.0"));

    assert!(matches!(
        h.controller.rollback("again"),
        Err(ApplyError::NothingToRollBack)
    ));
}

#[tokio::test]
async fn reintroduced_module_is_enabled_again() {
    let h = Harness::accepted(registry([]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);
    let with_weather = SegmentFixture::baseline().with_module("Weather", false);

    pipeline.run(request(with_weather.clone(), "1.1.0")).await.unwrap();
    h.controller.rollback("operator request").unwrap();
    assert!(h.state.disabled_modules().contains("Weather"));

    let outcome = pipeline.run(request(with_weather, "1.1.0")).await.unwrap();
    assert!(outcome.is_active());
    assert!(h.state.disabled_modules().is_empty());
    let kinds: Vec<_> = h.entries().iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["attempt", "applied", "rollback", "attempt", "applied"]);
}

#[tokio::test]
async fn rollback_of_a_superseded_release_is_refused() {
    let h = Harness::accepted(registry([]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);

    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-42"), "1.0.1"))
        .await
        .unwrap();
    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-43"), "1.0.2"))
        .await
        .unwrap();

    let err = h.controller.rollback_version("1.0.1", "late health failure").unwrap_err();
    assert!(matches!(
        err,
        ApplyError::Superseded { ref expected, ref live } if expected == "1.0.1" && live.as_deref() == Some("1.0.2")
    ));
    assert_eq!(h.active_version().as_deref(), Some("1.0.2"));
    assert!(h.entries().iter().all(|e| e.event_type.as_str() != "rollback"));
}

fn supervised_config() -> PipelineConfig {
    PipelineConfig::new().with_health_window(Duration::from_secs(10), Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn grace_window_failure_rolls_back_once() {
    let h = Harness::accepted(registry([]));
    let health = Arc::new(Switch::default());
    let pipeline = h.pipeline_with(supervised_config(), Arc::new(Unreachable), health.clone());

    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-42"), "1.0.1"))
        .await
        .unwrap();
    health.fail();

    let Supervision::RolledBack(result) = pipeline.supervise().await.unwrap() else {
        panic!("expected a rollback");
    };
    assert_eq!(result.from_version, "1.0.1");
    assert_eq!(result.to_version.as_deref(), Some("1.0.0"));
    assert!(result.cause.contains("stopped responding"));

    // the restored release has no live application left to revert
    let err = pipeline.supervise().await.unwrap_err();
    assert!(matches!(err, UpgradeError::Apply(ApplyError::NothingToRollBack)));
    let rollbacks = h.entries().iter().filter(|e| e.event_type.as_str() == "rollback").count();
    assert_eq!(rollbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn supervision_stops_when_a_newer_release_lands() {
    let h = Harness::accepted(registry([]));
    let health = Arc::new(Switch::default());
    let pipeline = Arc::new(h.pipeline_with(supervised_config(), Arc::new(Unreachable), health.clone()));

    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-42"), "1.0.1"))
        .await
        .unwrap();
    let watcher = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.supervise().await }
    });
    // let the watcher take its first look at 1.0.1
    tokio::time::sleep(Duration::from_millis(500)).await;

    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-43"), "1.0.2"))
        .await
        .unwrap();
    health.fail();

    let supervision = watcher.await.unwrap().unwrap();
    assert_eq!(
        supervision,
        Supervision::Superseded {
            version: "1.0.1".into(),
            live: Some("1.0.2".into()),
        }
    );
    assert_eq!(h.active_version().as_deref(), Some("1.0.2"));
    assert!(h.entries().iter().all(|e| e.event_type.as_str() != "rollback"));
}

#[tokio::test(start_paused = true)]
async fn healthy_release_outlives_grace_window() {
    let h = Harness::accepted(registry([]));
    let pipeline = h.pipeline_with(supervised_config(), Arc::new(Unreachable), Arc::new(AlwaysHealthy));

    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-42"), "1.0.1"))
        .await
        .unwrap();

    assert_eq!(pipeline.supervise().await.unwrap(), Supervision::Stable);
    assert_eq!(h.active_version().as_deref(), Some("1.0.1"));
}

#[tokio::test]
async fn nothing_to_supervise_without_a_release() {
    let h = Harness::fresh(registry([]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);
    assert_eq!(pipeline.supervise().await.unwrap(), Supervision::Idle);
}

#[tokio::test]
async fn snapshots_pruned_after_retention() {
    let h = Harness::accepted(registry([]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);

    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-42"), "1.0.1"))
        .await
        .unwrap();
    let now = chrono::Utc::now().timestamp();
    assert_eq!(h.controller.snapshot_count(), 1);
    assert_eq!(h.controller.prune_snapshots(now), 0);
    assert_eq!(h.controller.prune_snapshots(now + 3_601), 1);
    assert_eq!(h.controller.snapshot_count(), 0);
}

#[tokio::test]
async fn revoked_snapshots_pruned_immediately() {
    let h = Harness::accepted(registry([]));
    let pipeline = h.pipeline(Unreachable, AlwaysHealthy);

    pipeline
        .run(request(SegmentFixture::baseline().with_bugfix_build("b-42"), "1.0.1"))
        .await
        .unwrap();
    h.controller.rollback("operator request").unwrap();

    assert_eq!(h.controller.prune_snapshots(chrono::Utc::now().timestamp()), 1);
}
