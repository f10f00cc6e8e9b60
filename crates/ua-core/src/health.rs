//! Post-apply health checks

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use ua_fingerprint::ReleaseFingerprint;

/// Result of one health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Release is behaving
    Healthy,
    /// Release is failing; the reason becomes the rollback cause
    Unhealthy(String),
}

impl HealthStatus {
    /// Whether the check passed
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Smoke check run against the active release
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Probe the active release
    async fn check(&self, release: &ReleaseFingerprint) -> HealthStatus;
}

/// Check that always passes
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn check(&self, _release: &ReleaseFingerprint) -> HealthStatus {
        HealthStatus::Healthy
    }
}

/// Unhealthy once the host reports `threshold` crashes of the active release
#[derive(Debug)]
pub struct CrashLoopDetector {
    threshold: u32,
    crashes: AtomicU32,
}

impl CrashLoopDetector {
    /// Detector tripping at `threshold` crashes
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            crashes: AtomicU32::new(0),
        }
    }

    /// Record one crash
    pub fn record_crash(&self) {
        self.crashes.fetch_add(1, Ordering::SeqCst);
    }

    /// Forget recorded crashes, e.g. after a new release activates
    pub fn reset(&self) {
        self.crashes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthCheck for CrashLoopDetector {
    async fn check(&self, release: &ReleaseFingerprint) -> HealthStatus {
        let crashes = self.crashes.load(Ordering::SeqCst);
        if crashes >= self.threshold {
            HealthStatus::Unhealthy(format!("crash loop: {crashes} crashes of {}", release.version))
        } else {
            HealthStatus::Healthy
        }
    }
}
