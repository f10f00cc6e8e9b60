//! Composite release fingerprints
//!
//! Each canonical segment is hashed independently; the per-segment digests
//! are concatenated in [`SegmentName::CANONICAL_ORDER`] (never input order)
//! and hashed again into the composite.

use crate::error::{FingerprintError, MalformedSegmentError};
use crate::hash::ContentHash;
use crate::normalize::{normalize_all, CanonicalBytes};
use crate::segment::SegmentName;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Canonical bytes for every tracked segment
pub type SegmentSet = BTreeMap<SegmentName, CanonicalBytes>;

/// Composite fingerprint of one release candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFingerprint {
    /// Release version label
    pub version: String,
    /// SHA-256 of each canonical segment
    pub segment_hashes: BTreeMap<SegmentName, ContentHash>,
    /// SHA-256 over the segment hashes in canonical order
    pub composite_hash: ContentHash,
    /// Generation time (unix seconds), not part of any hash
    pub timestamp: i64,
}

impl ReleaseFingerprint {
    /// Segments whose hash differs from `other`
    #[must_use]
    pub fn changed_segments(&self, other: &ReleaseFingerprint) -> Vec<SegmentName> {
        SegmentName::CANONICAL_ORDER
            .into_iter()
            .filter(|name| self.segment_hashes.get(name) != other.segment_hashes.get(name))
            .collect()
    }

    /// Whether every tracked segment hashes the same as `other`
    #[inline]
    #[must_use]
    pub fn same_content(&self, other: &ReleaseFingerprint) -> bool {
        self.composite_hash == other.composite_hash
    }

    /// Recompute the composite from the recorded segment hashes
    ///
    /// # Errors
    /// Returns [`FingerprintError::CompositeMismatch`] if the record was altered,
    /// or a missing-segment error if a segment hash is absent
    pub fn verify_composite(&self) -> Result<(), FingerprintError> {
        let recomputed = FingerprintEngine::composite(&self.segment_hashes)?;
        if recomputed != self.composite_hash {
            return Err(FingerprintError::CompositeMismatch {
                recorded: self.composite_hash,
                recomputed,
            });
        }
        Ok(())
    }
}

/// Stateless fingerprint computation
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintEngine;

impl FingerprintEngine {
    /// Hash canonical segments into a fingerprint
    ///
    /// # Errors
    /// Fails if any tracked segment is absent from `segments`
    pub fn compute(
        version: &str,
        segments: &SegmentSet,
        timestamp: i64,
    ) -> Result<ReleaseFingerprint, FingerprintError> {
        let hashed: Result<Vec<_>, MalformedSegmentError> = SegmentName::CANONICAL_ORDER
            .par_iter()
            .map(|name| {
                let bytes = segments.get(name).ok_or_else(|| MalformedSegmentError::missing(*name))?;
                Ok((*name, ContentHash::compute(bytes.as_bytes())))
            })
            .collect();
        let segment_hashes: BTreeMap<_, _> = hashed?.into_iter().collect();
        let composite_hash = Self::composite(&segment_hashes)?;

        Ok(ReleaseFingerprint {
            version: version.to_string(),
            segment_hashes,
            composite_hash,
            timestamp,
        })
    }

    /// `H(h_1 || ... || h_n)` in canonical segment order
    ///
    /// # Errors
    /// Fails if any tracked segment hash is absent
    pub fn composite(
        segment_hashes: &BTreeMap<SegmentName, ContentHash>,
    ) -> Result<ContentHash, MalformedSegmentError> {
        let ordered = SegmentName::CANONICAL_ORDER
            .into_iter()
            .map(|name| {
                segment_hashes
                    .get(&name)
                    .map(|h| h.as_bytes().as_slice())
                    .ok_or_else(|| MalformedSegmentError::missing(name))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ContentHash::compute_parts(ordered))
    }

    /// Normalize and fingerprint raw segments twice, failing on divergence
    ///
    /// The second run starts again from the raw values so any hidden
    /// nondeterminism in normalization or hashing surfaces here instead of in
    /// a shipped release.
    ///
    /// # Errors
    /// - [`FingerprintError::MalformedSegment`] if any segment fails validation
    /// - [`FingerprintError::NonDeterministic`] if the two composites differ
    pub fn compute_verified(
        version: &str,
        raw: &BTreeMap<SegmentName, JsonValue>,
        timestamp: i64,
    ) -> Result<(ReleaseFingerprint, SegmentSet), FingerprintError> {
        let first_segments = normalize_all(raw)?;
        let first = Self::compute(version, &first_segments, timestamp)?;

        let second_segments = normalize_all(raw)?;
        let second = Self::compute(version, &second_segments, timestamp)?;

        Self::ensure_reproducible(&first, &second)?;
        Ok((first, first_segments))
    }

    /// Compare two independent runs
    ///
    /// # Errors
    /// Returns [`FingerprintError::NonDeterministic`] if the composites differ
    pub fn ensure_reproducible(
        first: &ReleaseFingerprint,
        second: &ReleaseFingerprint,
    ) -> Result<(), FingerprintError> {
        if first.composite_hash != second.composite_hash {
            return Err(FingerprintError::NonDeterministic {
                first: first.composite_hash,
                second: second.composite_hash,
            });
        }
        Ok(())
    }
}
