//! Error types for fingerprinting

use crate::hash::ContentHash;
use crate::segment::SegmentName;

/// A segment's raw configuration failed schema validation
///
/// Aborts the preflight before any hashing occurs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed segment `{segment}`: {reason}")]
pub struct MalformedSegmentError {
    /// Offending segment
    pub segment: SegmentName,
    /// Human-readable validation failure
    pub reason: String,
}

impl MalformedSegmentError {
    /// Create a new error for `segment`
    #[inline]
    pub fn new(segment: SegmentName, reason: impl Into<String>) -> Self {
        Self {
            segment,
            reason: reason.into(),
        }
    }

    /// A segment that was expected but not supplied
    #[inline]
    #[must_use]
    pub fn missing(segment: SegmentName) -> Self {
        Self::new(segment, "segment is missing")
    }
}

/// Fingerprint engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    /// Input failed schema validation
    #[error(transparent)]
    MalformedSegment(#[from] MalformedSegmentError),

    /// Two runs over identical input produced different composites
    #[error("non-deterministic fingerprint: first run {first}, second run {second}")]
    NonDeterministic {
        first: ContentHash,
        second: ContentHash,
    },

    /// Stored composite does not match its segment hashes
    #[error("composite hash mismatch: recorded {recorded}, recomputed {recomputed}")]
    CompositeMismatch {
        recorded: ContentHash,
        recomputed: ContentHash,
    },
}

impl FingerprintError {
    /// Integrity failures block the pipeline until investigated
    #[inline]
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::NonDeterministic { .. } | Self::CompositeMismatch { .. }
        )
    }
}
