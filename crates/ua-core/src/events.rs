//! Integration events
//!
//! Payloads carry category-level metadata only.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;
use ua_fingerprint::{ContentHash, SegmentName};
use ua_policy::ChangeCategory;

/// Upgrade lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UpgradeEvent {
    /// Candidate classified
    #[serde(rename_all = "camelCase")]
    UpgradeAttempt {
        version: String,
        classifications: BTreeSet<ChangeCategory>,
        requires_consent: bool,
        ts: i64,
    },
    /// Consent answered, declined or timed out
    #[serde(rename_all = "camelCase")]
    UpgradeConsent { version: String, granted: bool, ts: i64 },
    /// Candidate activated
    #[serde(rename_all = "camelCase")]
    UpgradeApplied {
        version: String,
        fingerprint: ContentHash,
        segments_changed: Vec<SegmentName>,
        ts: i64,
    },
    /// Active release reverted
    #[serde(rename_all = "camelCase")]
    Rollback {
        from_version: String,
        to_version: Option<String>,
        cause: String,
        ts: i64,
    },
    /// Apply failed and could not be undone
    #[serde(rename_all = "camelCase")]
    UpgradeFailed {
        version: String,
        failed_step: Option<u64>,
        irreversible_steps: Vec<u64>,
        cause: String,
        ts: i64,
    },
}

impl UpgradeEvent {
    /// Event name as serialized in the `event` tag
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            UpgradeEvent::UpgradeAttempt { .. } => "upgrade_attempt",
            UpgradeEvent::UpgradeConsent { .. } => "upgrade_consent",
            UpgradeEvent::UpgradeApplied { .. } => "upgrade_applied",
            UpgradeEvent::Rollback { .. } => "rollback",
            UpgradeEvent::UpgradeFailed { .. } => "upgrade_failed",
        }
    }
}

/// Receiver of upgrade events
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: &UpgradeEvent);
}

/// Logs each event as a structured `tracing` record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &UpgradeEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(target: "ua::events", event = event.name(), %payload, "upgrade event");
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<UpgradeEvent>>,
}

impl MemoryEventSink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far
    #[must_use]
    pub fn events(&self) -> Vec<UpgradeEvent> {
        self.events.lock().clone()
    }

    /// Names of events received so far
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(UpgradeEvent::name).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &UpgradeEvent) {
        self.events.lock().push(event.clone());
    }
}
