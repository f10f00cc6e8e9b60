//! In-memory pipeline harness shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ua_core::{
    ApplyController, ConsentError, ConsentPrompt, ConsentRequest, ConsentResponse, FnMigration,
    HealthCheck, HealthStatus, MemoryBaselineStore, MemoryEventSink, MemoryStateStore,
    MigrationFailure, MigrationRegistry, PipelineConfig, Release, StateImage, UpgradePipeline,
};
use ua_fingerprint::ReleaseFingerprint;
use ua_ledger::{AuditLog, LocalKeyProvider, LogEntry, MemoryLogStore};
use ua_test_utils::{SegmentFixture, TEST_KEY_SEED};

pub type Controller = ApplyController<MemoryLogStore>;

pub fn initial_image() -> StateImage {
    StateImage {
        data: b"rows=10".to_vec(),
        assets: BTreeMap::from([("theme/primary.svg".to_string(), b"<svg/>".to_vec())]),
    }
}

/// Appends `tag` to the data export
pub fn append_step(id: u64, tag: &'static str) -> FnMigration {
    FnMigration::new(id, move |state: &mut StateImage| {
        state.data.extend_from_slice(tag.as_bytes());
        Ok(())
    })
}

/// Mutates the data, then fails
pub fn failing_step(id: u64) -> FnMigration {
    FnMigration::new(id, |state: &mut StateImage| {
        state.data.extend_from_slice(b";half-written");
        Err(MigrationFailure("disk full".into()))
    })
}

/// Steps 1..=2 of the fixture plan plus `extra`
pub fn registry(extra: impl IntoIterator<Item = FnMigration>) -> MigrationRegistry {
    let mut registry = MigrationRegistry::new()
        .with(append_step(1, ";v1"))
        .with(append_step(2, ";v2"));
    for step in extra {
        registry.register(Arc::new(step));
    }
    registry
}

pub fn release(fixture: &SegmentFixture, version: &str) -> Release {
    Release::prepare(version, fixture.raw(), 1_760_000_000).unwrap()
}

pub struct Harness {
    pub state: Arc<MemoryStateStore>,
    pub baseline: Arc<MemoryBaselineStore>,
    pub events: Arc<MemoryEventSink>,
    pub controller: Arc<Controller>,
}

impl Harness {
    /// Fixture baseline accepted as 1.0.0, migrations 1..=2 already applied
    pub fn accepted(migrations: MigrationRegistry) -> Self {
        let baseline = MemoryBaselineStore::with_release(release(&SegmentFixture::baseline(), "1.0.0"));
        Self::build(baseline, migrations)
    }

    /// Nothing accepted yet
    pub fn fresh(migrations: MigrationRegistry) -> Self {
        Self::build(MemoryBaselineStore::new(), migrations)
    }

    fn build(baseline: MemoryBaselineStore, migrations: MigrationRegistry) -> Self {
        let state = Arc::new(MemoryStateStore::new(initial_image()));
        let baseline = Arc::new(baseline);
        let events = Arc::new(MemoryEventSink::new());
        let log = AuditLog::open(MemoryLogStore::new(), Arc::new(LocalKeyProvider::from_seed(&TEST_KEY_SEED)))
            .unwrap();
        let controller = Arc::new(
            ApplyController::new(state.clone(), baseline.clone(), Arc::new(log), migrations, events.clone())
                .with_retention(Duration::from_secs(3600)),
        );
        Self {
            state,
            baseline,
            events,
            controller,
        }
    }

    pub fn pipeline(
        &self,
        prompt: impl ConsentPrompt + 'static,
        health: impl HealthCheck + 'static,
    ) -> UpgradePipeline<MemoryLogStore> {
        self.pipeline_with(PipelineConfig::new(), Arc::new(prompt), Arc::new(health))
    }

    pub fn pipeline_with(
        &self,
        config: PipelineConfig,
        prompt: Arc<dyn ConsentPrompt>,
        health: Arc<dyn HealthCheck>,
    ) -> UpgradePipeline<MemoryLogStore> {
        UpgradePipeline::new(config, self.controller.clone(), prompt, health)
    }

    pub fn active_version(&self) -> Option<String> {
        self.controller
            .active()
            .unwrap()
            .map(|r| r.version().to_string())
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.controller.log().entries().unwrap()
    }

    /// `(version, event_type)` of every log entry
    pub fn trail(&self) -> Vec<(String, &'static str)> {
        self.entries()
            .into_iter()
            .map(|e| (e.version, e.event_type.as_str()))
            .collect()
    }
}

/// Prompt that never answers
pub struct Silent;

#[async_trait]
impl ConsentPrompt for Silent {
    async fn ask(&self, _request: &ConsentRequest) -> Result<ConsentResponse, ConsentError> {
        std::future::pending().await
    }
}

/// Prompt that fails if it is ever shown
pub struct Unreachable;

#[async_trait]
impl ConsentPrompt for Unreachable {
    async fn ask(&self, request: &ConsentRequest) -> Result<ConsentResponse, ConsentError> {
        panic!("unexpected consent prompt for {}", request.version)
    }
}

/// Health that flips to failing on demand
#[derive(Default)]
pub struct Switch {
    failing: AtomicBool,
}

impl Switch {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthCheck for Switch {
    async fn check(&self, release: &ReleaseFingerprint) -> HealthStatus {
        if self.failing.load(Ordering::SeqCst) {
            HealthStatus::Unhealthy(format!("{} stopped responding", release.version))
        } else {
            HealthStatus::Healthy
        }
    }
}
