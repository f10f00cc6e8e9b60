//! Decision matrix
//!
//! Maps a category set to the single action required before a candidate may
//! be applied. Precedence is total: `REJECT > REQUIRE_CONSENT > SOFT_NOTIFY >
//! AUTO_ACCEPT`, so the decision for a set is the maximum tier of its members.

use crate::category::{ChangeCategory, PolicyDecision};
use crate::classify::Classification;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Decide the action for a category set
///
/// An empty set is treated as `{NONE}`.
#[must_use]
pub fn decide(categories: &BTreeSet<ChangeCategory>) -> PolicyDecision {
    categories
        .iter()
        .map(|c| c.tier())
        .max()
        .unwrap_or(PolicyDecision::AutoAccept)
}

/// Tunable parts of the policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Categories that additionally need a maintainer approval flag
    pub approval_required: BTreeSet<ChangeCategory>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            approval_required: BTreeSet::from([ChangeCategory::DependencyMajorBump]),
        }
    }
}

/// Everything the release operator and consent layer need about a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Overall decision
    pub decision: PolicyDecision,
    /// Categories that caused a rejection
    pub rejecting: BTreeSet<ChangeCategory>,
    /// Categories the user must consent to
    pub consent_required: BTreeSet<ChangeCategory>,
    /// Categories that need a maintainer approval flag
    pub approval_required: BTreeSet<ChangeCategory>,
}

impl Verdict {
    /// Whether the candidate may proceed at all
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.decision == PolicyDecision::Reject
    }

    /// Whether the consent gate applies
    #[inline]
    #[must_use]
    pub fn needs_consent(&self) -> bool {
        self.decision == PolicyDecision::RequireConsent
    }
}

/// Policy engine
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policy: Policy,
}

impl PolicyEngine {
    /// Create engine with a policy
    #[inline]
    #[must_use]
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// Active policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Evaluate a classification
    #[must_use]
    pub fn evaluate(&self, classification: &Classification) -> Verdict {
        let categories = &classification.categories;
        let of_tier = |tier: PolicyDecision| -> BTreeSet<ChangeCategory> {
            categories.iter().copied().filter(|c| c.tier() == tier).collect()
        };

        Verdict {
            decision: decide(categories),
            rejecting: of_tier(PolicyDecision::Reject),
            consent_required: of_tier(PolicyDecision::RequireConsent),
            approval_required: categories
                .intersection(&self.policy.approval_required)
                .copied()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::DiffSummary;

    fn set(items: &[ChangeCategory]) -> BTreeSet<ChangeCategory> {
        items.iter().copied().collect()
    }

    #[test]
    fn documented_mapping() {
        use ChangeCategory::*;
        assert_eq!(decide(&set(&[None])), PolicyDecision::AutoAccept);
        assert_eq!(decide(&set(&[ModuleAdd])), PolicyDecision::SoftNotify);
        for c in [PersonaToneDrift, StyleVariation, SecurityPolicyChange, FeatureFlagsChange, DependencyMajorBump] {
            assert_eq!(decide(&set(&[c])), PolicyDecision::RequireConsent, "{c}");
        }
        assert_eq!(decide(&set(&[ModuleRemove])), PolicyDecision::Reject);
        assert_eq!(decide(&set(&[MigrationPlanGap])), PolicyDecision::Reject);
    }

    #[test]
    fn empty_set_auto_accepts() {
        assert_eq!(decide(&BTreeSet::new()), PolicyDecision::AutoAccept);
    }

    #[test]
    fn verdict_splits_tiers() {
        let classification = Classification {
            categories: set(&[
                ChangeCategory::ModuleRemove,
                ChangeCategory::PersonaToneDrift,
                ChangeCategory::DependencyMajorBump,
            ]),
            changed_segments: Vec::new(),
            summary: DiffSummary::default(),
        };
        let verdict = PolicyEngine::default().evaluate(&classification);
        assert!(verdict.is_rejected());
        assert_eq!(verdict.rejecting, set(&[ChangeCategory::ModuleRemove]));
        assert_eq!(
            verdict.consent_required,
            set(&[ChangeCategory::PersonaToneDrift, ChangeCategory::DependencyMajorBump])
        );
        assert_eq!(verdict.approval_required, set(&[ChangeCategory::DependencyMajorBump]));
    }
}
