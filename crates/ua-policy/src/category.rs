//! Change categories and policy decisions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

/// Typed kind of drift between two releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeCategory {
    /// No tracked segment changed
    None,
    /// A module was added
    ModuleAdd,
    /// A required module disappeared or lost its required flag
    ModuleRemove,
    /// Persona or tone parameters changed
    PersonaToneDrift,
    /// Visual style tokens changed
    StyleVariation,
    /// Security policy changed
    SecurityPolicyChange,
    /// Feature flag defaults changed
    FeatureFlagsChange,
    /// A locked dependency changed its semver major component
    DependencyMajorBump,
    /// Migration steps do not continue from the last applied step
    MigrationPlanGap,
}

impl ChangeCategory {
    /// Every category, in declaration order
    pub const ALL: [ChangeCategory; 9] = [
        ChangeCategory::None,
        ChangeCategory::ModuleAdd,
        ChangeCategory::ModuleRemove,
        ChangeCategory::PersonaToneDrift,
        ChangeCategory::StyleVariation,
        ChangeCategory::SecurityPolicyChange,
        ChangeCategory::FeatureFlagsChange,
        ChangeCategory::DependencyMajorBump,
        ChangeCategory::MigrationPlanGap,
    ];

    /// Wire label, e.g. `MODULE_REMOVE`
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ChangeCategory::None => "NONE",
            ChangeCategory::ModuleAdd => "MODULE_ADD",
            ChangeCategory::ModuleRemove => "MODULE_REMOVE",
            ChangeCategory::PersonaToneDrift => "PERSONA_TONE_DRIFT",
            ChangeCategory::StyleVariation => "STYLE_VARIATION",
            ChangeCategory::SecurityPolicyChange => "SECURITY_POLICY_CHANGE",
            ChangeCategory::FeatureFlagsChange => "FEATURE_FLAGS_CHANGE",
            ChangeCategory::DependencyMajorBump => "DEPENDENCY_MAJOR_BUMP",
            ChangeCategory::MigrationPlanGap => "MIGRATION_PLAN_GAP",
        }
    }

    /// Decision this category forces on its own
    #[must_use]
    pub const fn tier(self) -> PolicyDecision {
        match self {
            ChangeCategory::None => PolicyDecision::AutoAccept,
            ChangeCategory::ModuleAdd => PolicyDecision::SoftNotify,
            ChangeCategory::PersonaToneDrift
            | ChangeCategory::StyleVariation
            | ChangeCategory::SecurityPolicyChange
            | ChangeCategory::FeatureFlagsChange
            | ChangeCategory::DependencyMajorBump => PolicyDecision::RequireConsent,
            ChangeCategory::ModuleRemove | ChangeCategory::MigrationPlanGap => {
                PolicyDecision::Reject
            }
        }
    }

    /// Categories that can never be applied
    #[inline]
    #[must_use]
    pub const fn is_hard_fail(self) -> bool {
        matches!(self.tier(), PolicyDecision::Reject)
    }
}

impl Display for ChangeCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Required action for a candidate release
///
/// Ordered by precedence: the highest variant present wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    /// Apply without interaction
    AutoAccept,
    /// Apply and inform the user
    SoftNotify,
    /// Apply only after explicit user consent
    RequireConsent,
    /// Never apply
    Reject,
}

impl PolicyDecision {
    /// Wire label, e.g. `REQUIRE_CONSENT`
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            PolicyDecision::AutoAccept => "AUTO_ACCEPT",
            PolicyDecision::SoftNotify => "SOFT_NOTIFY",
            PolicyDecision::RequireConsent => "REQUIRE_CONSENT",
            PolicyDecision::Reject => "REJECT",
        }
    }
}

impl Display for PolicyDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Render a category set as wire labels
#[must_use]
pub fn labels(categories: &BTreeSet<ChangeCategory>) -> Vec<&'static str> {
    categories.iter().map(|c| c.label()).collect()
}
