//! Ledger error types

use crate::entry::EventType;
use std::collections::BTreeSet;
use ua_policy::ChangeCategory;

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Entry sequence number does not advance past the last entry
    #[error("out-of-order entry: seq {seq} is not greater than last seq {last}")]
    OutOfOrder { seq: u64, last: u64 },

    /// `prev_hash` does not match the preceding entry
    #[error("hash chain broken at seq {seq}")]
    ChainBroken { seq: u64 },

    /// Signature does not match the entry's signed bytes
    #[error("invalid signature at seq {seq}")]
    InvalidSignature { seq: u64 },

    /// Signature field is not `ed25519:<base64>`
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Lifecycle event appended out of order for a version
    #[error("lifecycle violation for version {version}: {event} after {previous}")]
    LifecycleOrder {
        version: String,
        event: EventType,
        previous: String,
    },

    /// An approval-gated category was applied without maintainer approval
    #[error("maintainer approval required for {}", ua_policy::labels(.categories).join(", "))]
    MissingApproval { categories: BTreeSet<ChangeCategory> },

    /// A stored line could not be decoded
    #[error("corrupt log at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// Key material could not be loaded
    #[error("key error: {0}")]
    Key(String),

    /// Entry serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying storage failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Integrity failures: tampering or a broken chain
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::OutOfOrder { .. }
                | Self::ChainBroken { .. }
                | Self::InvalidSignature { .. }
                | Self::MalformedSignature(_)
                | Self::Corrupt { .. }
        )
    }

    /// Policy refusals that need a corrected candidate
    #[must_use]
    pub fn is_policy_failure(&self) -> bool {
        matches!(self, Self::MissingApproval { .. } | Self::LifecycleOrder { .. })
    }
}
