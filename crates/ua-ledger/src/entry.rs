//! Log entries
//!
//! One JSON object per line. `signature` covers the canonical JSON of every
//! other field, and `prevHash` links each entry to the one before it.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use ua_fingerprint::{canonical_json, ContentHash, SegmentName};
use ua_policy::{ChangeCategory, DiffSummary};

/// Release lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Preflight classified a candidate
    Attempt,
    /// User answered (or timed out on) a consent request
    Consent,
    /// Candidate became the active release
    Applied,
    /// Candidate was refused by policy
    Rejected,
    /// An applied release was reverted
    Rollback,
    /// Apply failed and the state could not be restored
    Failed,
}

impl EventType {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::Attempt => "attempt",
            EventType::Consent => "consent",
            EventType::Applied => "applied",
            EventType::Rejected => "rejected",
            EventType::Rollback => "rollback",
            EventType::Failed => "failed",
        }
    }

    /// Whether `self` may follow `previous` for the same version
    ///
    /// `previous` is `None` for a version's first entry. A rollback may also
    /// follow an attempt or consent when a migration failed part way.
    #[must_use]
    pub fn may_follow(self, previous: Option<EventType>) -> bool {
        match self {
            EventType::Attempt => previous != Some(EventType::Applied),
            EventType::Consent => previous == Some(EventType::Attempt),
            EventType::Applied | EventType::Rejected => {
                matches!(previous, Some(EventType::Attempt | EventType::Consent))
            }
            EventType::Rollback => matches!(
                previous,
                Some(EventType::Attempt | EventType::Consent | EventType::Applied)
            ),
            EventType::Failed => matches!(previous, Some(EventType::Attempt | EventType::Consent)),
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-level payload; never carries raw persona or content text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    /// Change categories of the candidate
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub classifications: BTreeSet<ChangeCategory>,
    /// Minimal descriptors per category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DiffSummary>,
    /// Whether the consent gate applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_consent: Option<bool>,
    /// Consent outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted: Option<bool>,
    /// Maintainer approval flag for approval-gated categories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer_approved: Option<bool>,
    /// Segments whose hash changed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments_changed: Vec<SegmentName>,
    /// Failure or rollback cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Version reinstated by a rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
    /// Migration step that failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<u64>,
    /// Irreversible steps that already ran
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub irreversible_steps: Vec<u64>,
}

impl LogPayload {
    /// Payload carrying a category set
    #[must_use]
    pub fn with_classifications(mut self, categories: BTreeSet<ChangeCategory>) -> Self {
        self.classifications = categories;
        self
    }

    /// Attach a diff summary
    #[must_use]
    pub fn with_summary(mut self, summary: DiffSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Set the consent flag
    #[must_use]
    pub fn with_requires_consent(mut self, requires: bool) -> Self {
        self.requires_consent = Some(requires);
        self
    }

    /// Set the consent outcome
    #[must_use]
    pub fn with_granted(mut self, granted: bool) -> Self {
        self.granted = Some(granted);
        self
    }

    /// Set the maintainer approval flag
    #[must_use]
    pub fn with_maintainer_approved(mut self, approved: bool) -> Self {
        self.maintainer_approved = Some(approved);
        self
    }

    /// Set the changed segments
    #[must_use]
    pub fn with_segments_changed(mut self, segments: Vec<SegmentName>) -> Self {
        self.segments_changed = segments;
        self
    }

    /// Set the cause
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Set the reinstated version
    #[must_use]
    pub fn with_to_version(mut self, version: impl Into<String>) -> Self {
        self.to_version = Some(version.into());
        self
    }

    /// Record a failed step and the irreversible steps before it
    #[must_use]
    pub fn with_failure(mut self, step: Option<u64>, irreversible: Vec<u64>) -> Self {
        self.failed_step = step;
        self.irreversible_steps = irreversible;
        self
    }
}

/// Entry contents before sequencing and signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    /// Release version
    pub version: String,
    /// Composite fingerprint, when known
    pub fingerprint: Option<ContentHash>,
    /// Lifecycle event
    pub event_type: EventType,
    /// Category-level payload
    pub payload: LogPayload,
    /// Unix seconds
    pub ts: i64,
}

impl EntryDraft {
    /// Draft stamped with the current time
    #[must_use]
    pub fn new(version: impl Into<String>, event_type: EventType) -> Self {
        Self {
            version: version.into(),
            fingerprint: None,
            event_type,
            payload: LogPayload::default(),
            ts: chrono::Utc::now().timestamp(),
        }
    }

    /// Attach the candidate fingerprint
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: ContentHash) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Replace the payload
    #[must_use]
    pub fn with_payload(mut self, payload: LogPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Override the timestamp
    #[must_use]
    pub fn at(mut self, ts: i64) -> Self {
        self.ts = ts;
        self
    }
}

/// One immutable, signed log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Logical sequence number, strictly increasing from 1
    pub seq: u64,
    /// Release version
    pub version: String,
    /// Composite fingerprint (hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<ContentHash>,
    /// Lifecycle event
    pub event_type: EventType,
    /// Category-level payload
    pub payload: LogPayload,
    /// Unix seconds
    pub ts: i64,
    /// Hash of the previous entry's signed bytes; zero for the first entry
    pub prev_hash: ContentHash,
    /// `ed25519:<base64>`
    pub signature: String,
}

impl LogEntry {
    pub(crate) fn unsigned(seq: u64, prev_hash: ContentHash, draft: EntryDraft) -> Self {
        Self {
            seq,
            version: draft.version,
            fingerprint: draft.fingerprint,
            event_type: draft.event_type,
            payload: draft.payload,
            ts: draft.ts,
            prev_hash,
            signature: String::new(),
        }
    }

    /// Canonical JSON of every field except `signature`
    ///
    /// # Errors
    /// Fails only if the entry cannot be represented as JSON
    pub fn signed_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("signature");
        }
        Ok(canonical_json(&value).into_bytes())
    }

    /// Chain link for the entry that follows this one
    ///
    /// # Errors
    /// See [`LogEntry::signed_bytes`]
    pub fn chain_hash(&self) -> Result<ContentHash, LedgerError> {
        Ok(ContentHash::compute(&self.signed_bytes()?))
    }

    /// One JSON Lines record, without the trailing newline
    ///
    /// # Errors
    /// Fails only if the entry cannot be represented as JSON
    pub fn to_line(&self) -> Result<String, LedgerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one JSON Lines record
    ///
    /// # Errors
    /// Returns [`LedgerError::Serialization`] on malformed input
    pub fn from_line(line: &str) -> Result<Self, LedgerError> {
        Ok(serde_json::from_str(line)?)
    }
}
