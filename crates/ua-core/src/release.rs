//! Releases: a fingerprint plus the canonical segments it was computed from

use crate::segments::RawSegments;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use ua_fingerprint::{
    CanonicalBytes, ContentHash, FingerprintEngine, FingerprintError, MalformedSegmentError,
    MigrationPlan, ModuleRegistry, ReleaseFingerprint, Segment, SegmentName, SegmentSet,
};
use ua_policy::{Classification, DiffClassifier};

/// A fingerprinted release candidate or accepted release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Composite fingerprint
    pub fingerprint: ReleaseFingerprint,
    /// Canonical segment content
    #[serde(serialize_with = "serialize_segments", deserialize_with = "deserialize_segments")]
    pub segments: SegmentSet,
}

impl Release {
    /// Normalize and fingerprint raw segments (twice, verified)
    ///
    /// # Errors
    /// Malformed segments or a non-deterministic fingerprint
    pub fn prepare(version: &str, raw: &RawSegments, timestamp: i64) -> Result<Self, FingerprintError> {
        let (fingerprint, segments) = FingerprintEngine::compute_verified(version, raw, timestamp)?;
        Ok(Self { fingerprint, segments })
    }

    /// Release version
    #[must_use]
    pub fn version(&self) -> &str {
        &self.fingerprint.version
    }

    /// Composite hash
    #[must_use]
    pub fn composite(&self) -> ContentHash {
        self.fingerprint.composite_hash
    }

    /// Check the stored segments still hash to the stored fingerprint
    ///
    /// # Errors
    /// [`FingerprintError::CompositeMismatch`] on any difference
    pub fn verify(&self) -> Result<(), FingerprintError> {
        self.fingerprint.verify_composite()?;
        let recomputed = FingerprintEngine::compute(
            &self.fingerprint.version,
            &self.segments,
            self.fingerprint.timestamp,
        )?;
        if recomputed.segment_hashes != self.fingerprint.segment_hashes {
            return Err(FingerprintError::CompositeMismatch {
                recorded: self.fingerprint.composite_hash,
                recomputed: recomputed.composite_hash,
            });
        }
        Ok(())
    }

    fn segment(&self, name: SegmentName) -> Result<Segment, MalformedSegmentError> {
        let bytes = self
            .segments
            .get(&name)
            .ok_or_else(|| MalformedSegmentError::missing(name))?;
        Segment::from_canonical(name, bytes.as_bytes())
    }

    /// Module registry
    ///
    /// # Errors
    /// If the stored segment cannot be re-parsed
    pub fn modules(&self) -> Result<ModuleRegistry, MalformedSegmentError> {
        match self.segment(SegmentName::ModuleRegistry)? {
            Segment::ModuleRegistry(registry) => Ok(registry),
            _ => Err(MalformedSegmentError::new(SegmentName::ModuleRegistry, "segment kind mismatch")),
        }
    }

    /// Migration plan
    ///
    /// # Errors
    /// If the stored segment cannot be re-parsed
    pub fn migration_plan(&self) -> Result<MigrationPlan, MalformedSegmentError> {
        match self.segment(SegmentName::MigrationPlan)? {
            Segment::MigrationPlan(plan) => Ok(plan),
            _ => Err(MalformedSegmentError::new(SegmentName::MigrationPlan, "segment kind mismatch")),
        }
    }

    /// Classify against `previous`, or as a first install when there is none
    ///
    /// # Errors
    /// If a changed segment cannot be re-parsed or the plan is malformed
    pub fn classify_against(&self, previous: Option<&Release>) -> Result<Classification, MalformedSegmentError> {
        let classifier = DiffClassifier::new();
        match previous {
            Some(accepted) => classifier.classify(
                &accepted.fingerprint,
                &self.fingerprint,
                &accepted.segments,
                &self.segments,
            ),
            None => classifier.classify_initial(&self.segments),
        }
    }

    /// Module names present here but not in `previous`
    ///
    /// # Errors
    /// If either module registry cannot be re-parsed
    pub fn introduced_modules(&self, previous: Option<&Release>) -> Result<Vec<String>, MalformedSegmentError> {
        let before: BTreeSet<String> = match previous {
            Some(p) => p.modules()?.modules.into_iter().map(|m| m.name).collect(),
            None => BTreeSet::new(),
        };
        Ok(self
            .modules()?
            .modules
            .into_iter()
            .map(|m| m.name)
            .filter(|name| !before.contains(name))
            .collect())
    }
}

fn serialize_segments<S: Serializer>(segments: &SegmentSet, serializer: S) -> Result<S::Ok, S::Error> {
    let as_text: BTreeMap<&SegmentName, &str> = segments.iter().map(|(k, v)| (k, v.as_str())).collect();
    as_text.serialize(serializer)
}

fn deserialize_segments<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SegmentSet, D::Error> {
    let as_text = BTreeMap::<SegmentName, String>::deserialize(deserializer)?;
    Ok(as_text
        .into_iter()
        .map(|(k, v)| (k, CanonicalBytes::from_vec(v.into_bytes())))
        .collect())
}
