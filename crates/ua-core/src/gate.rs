//! CI gate
//!
//! Compares a candidate fingerprint with the accepted baseline and reports
//! the policy decision. With segment files for both sides the diff is
//! classified structurally. Hash-only input can still classify segments whose
//! change alone determines the category; module, migration and dependency
//! changes need the segments.

use crate::error::UpgradeError;
use crate::release::Release;
use crate::segments::RawSegments;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;
use ua_fingerprint::{ReleaseFingerprint, SegmentName};
use ua_policy::{decide, ChangeCategory, Classification, DiffClassifier, DiffSummary, PolicyDecision};

/// Gate verdict for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    /// Candidate version
    pub version: String,
    /// Overall decision
    pub decision: PolicyDecision,
    /// Classified categories
    pub categories: BTreeSet<ChangeCategory>,
    /// Segments whose hash differs
    pub changed_segments: Vec<SegmentName>,
    /// Category descriptors
    pub summary: DiffSummary,
}

impl GateReport {
    fn from_classification(version: &str, classification: Classification) -> Self {
        Self {
            version: version.to_string(),
            decision: decide(&classification.categories),
            categories: classification.categories,
            changed_segments: classification.changed_segments,
            summary: classification.summary,
        }
    }

    /// Whether CI must fail
    #[must_use]
    pub fn blocks(&self) -> bool {
        self.decision == PolicyDecision::Reject
    }

    /// REJECT-tier categories
    #[must_use]
    pub fn rejecting(&self) -> BTreeSet<ChangeCategory> {
        self.categories
            .iter()
            .copied()
            .filter(|c| c.tier() == PolicyDecision::Reject)
            .collect()
    }
}

/// Segment that decides its category from the hash alone
fn hash_only_category(name: SegmentName) -> Option<ChangeCategory> {
    match name {
        SegmentName::PersonaTone => Some(ChangeCategory::PersonaToneDrift),
        SegmentName::StyleTokens => Some(ChangeCategory::StyleVariation),
        SegmentName::FeatureFlags => Some(ChangeCategory::FeatureFlagsChange),
        SegmentName::SecurityPolicy => Some(ChangeCategory::SecurityPolicyChange),
        SegmentName::ModuleRegistry | SegmentName::MigrationPlan | SegmentName::DependencyLock => None,
    }
}

/// Recompute `raw` and check it produces `fingerprint`
fn matching_release(fingerprint: &ReleaseFingerprint, raw: &RawSegments) -> Result<Release, UpgradeError> {
    let release = Release::prepare(&fingerprint.version, raw, fingerprint.timestamp)?;
    if release.composite() != fingerprint.composite_hash {
        return Err(UpgradeError::FingerprintMismatch {
            version: fingerprint.version.clone(),
        });
    }
    Ok(release)
}

/// Run the gate
///
/// `segments` holds the raw `(candidate, baseline)` segments when available.
///
/// # Errors
/// - integrity failures if either fingerprint's composite was altered
/// - [`UpgradeError::FingerprintMismatch`] if segments do not produce their fingerprint
/// - [`UpgradeError::SegmentsRequired`] for hash-only input that needs a structural diff
pub fn gate(
    candidate: &ReleaseFingerprint,
    baseline: &ReleaseFingerprint,
    segments: Option<(&RawSegments, &RawSegments)>,
) -> Result<GateReport, UpgradeError> {
    candidate.verify_composite()?;
    baseline.verify_composite()?;

    if let Some((candidate_raw, baseline_raw)) = segments {
        let candidate_release = matching_release(candidate, candidate_raw)?;
        let baseline_release = matching_release(baseline, baseline_raw)?;
        let classification = DiffClassifier::new().classify(
            &baseline_release.fingerprint,
            &candidate_release.fingerprint,
            &baseline_release.segments,
            &candidate_release.segments,
        )?;
        return Ok(GateReport::from_classification(&candidate.version, classification));
    }

    let changed_segments = candidate.changed_segments(baseline);
    let unclassifiable: Vec<_> = changed_segments
        .iter()
        .copied()
        .filter(|name| hash_only_category(*name).is_none())
        .collect();
    if !unclassifiable.is_empty() {
        return Err(UpgradeError::SegmentsRequired {
            segments: unclassifiable,
        });
    }

    let mut summary = DiffSummary::default();
    for name in &changed_segments {
        if let Some(category) = hash_only_category(*name) {
            debug!(segment = %name, %category, "hash-only classification");
            summary
                .descriptors
                .entry(category)
                .or_default()
                .push(format!("{name} changed"));
        }
    }
    let mut categories: BTreeSet<_> = summary.descriptors.keys().copied().collect();
    if categories.is_empty() {
        categories.insert(ChangeCategory::None);
    }
    Ok(GateReport::from_classification(
        &candidate.version,
        Classification {
            categories,
            changed_segments,
            summary,
        },
    ))
}
