//! Error types for the upgrade pipeline
//!
//! Every failure maps to an [`ErrorClass`], which decides retry behavior and
//! the CLI exit code, and to a stable machine-readable [`UpgradeError::code`].

use std::collections::BTreeSet;
use std::path::PathBuf;
use ua_fingerprint::{FingerprintError, MalformedSegmentError, SegmentName};
use ua_ledger::LedgerError;
use ua_policy::{labels, ChangeCategory};

/// Broad failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad configuration or segment input
    Input,
    /// Non-determinism, tampering or a broken chain
    Integrity,
    /// Rejected candidate or missing approval
    Policy,
    /// Consent gate could not be entered
    Consent,
    /// Apply-time failure, recovered by rollback
    Apply,
    /// Rollback impossible; needs manual intervention
    Irreversible,
    /// Storage or runtime failure
    Internal,
}

impl ErrorClass {
    /// Process exit code for the `ua` binary
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Input => 2,
            ErrorClass::Integrity => 3,
            ErrorClass::Policy => 4,
            ErrorClass::Consent => 5,
            ErrorClass::Apply => 6,
            ErrorClass::Irreversible => 7,
            ErrorClass::Internal => 1,
        }
    }
}

/// Segment file loading errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// File could not be read
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File is not valid JSON or YAML
    #[error("cannot parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    /// File name or key does not name a tracked segment
    #[error("unknown segment `{name}` in {}", .path.display())]
    UnknownSegment { path: PathBuf, name: String },

    /// The same segment was supplied twice
    #[error("segment `{segment}` supplied more than once in {}", .path.display())]
    Duplicate { path: PathBuf, segment: SegmentName },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config is not valid TOML for [`crate::PipelineConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Consent gate errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsentError {
    /// Another candidate is already awaiting consent
    #[error("a consent request is already pending")]
    AlreadyPending,

    /// The user-facing layer failed to render or collect a response
    #[error("consent prompt failed: {0}")]
    Prompt(String),
}

/// State store errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying I/O failure
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored state could not be decoded
    #[error("corrupt state: {0}")]
    Corrupt(String),
}

/// Baseline store errors
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    /// Underlying I/O failure
    #[error("baseline io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored baseline could not be decoded
    #[error("corrupt baseline: {0}")]
    Corrupt(String),

    /// Stored segments no longer hash to the stored fingerprint
    #[error("baseline integrity failure: {0}")]
    Integrity(#[from] FingerprintError),
}

/// Apply/rollback controller errors
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Candidate was classified `REJECT`
    #[error("candidate {version} rejected: {}", labels(.categories).join(", "))]
    Rejected {
        version: String,
        categories: BTreeSet<ChangeCategory>,
    },

    /// Consent is required and no granted record covers these categories
    #[error("consent required for {}", labels(.missing).join(", "))]
    ConsentRequired { missing: BTreeSet<ChangeCategory> },

    /// Approval-gated categories without a maintainer approval flag
    #[error("maintainer approval required for {}", labels(.categories).join(", "))]
    MissingApproval { categories: BTreeSet<ChangeCategory> },

    /// Candidate segments could not be classified
    #[error(transparent)]
    Malformed(#[from] MalformedSegmentError),

    /// A planned migration step has no implementation registered
    #[error("no migration registered for step {id}")]
    UnknownMigration { id: u64 },

    /// A migration step failed; state was restored from the snapshot
    #[error("migration step {id} failed: {reason}")]
    MigrationFailed { id: u64, reason: String },

    /// Rollback requested after an irreversible migration step
    #[error("irreversible migration in {version}: steps {steps:?} cannot be rolled back")]
    IrreversibleMigration { version: String, steps: Vec<u64> },

    /// No applied release is available to roll back
    #[error("nothing to roll back")]
    NothingToRollBack,

    /// A rollback named a release that is no longer the live one
    #[error("cannot roll back {expected}: live release is {}", .live.as_deref().unwrap_or("none"))]
    Superseded { expected: String, live: Option<String> },

    /// State store failure
    #[error(transparent)]
    State(#[from] StateError),

    /// Baseline store failure
    #[error(transparent)]
    Baseline(#[from] BaselineError),

    /// Audit log refused or failed to write
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ApplyError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Rejected { .. } | Self::ConsentRequired { .. } | Self::MissingApproval { .. } => {
                ErrorClass::Policy
            }
            Self::Malformed(_) | Self::UnknownMigration { .. } => ErrorClass::Input,
            Self::MigrationFailed { .. } | Self::NothingToRollBack | Self::Superseded { .. } => ErrorClass::Apply,
            Self::IrreversibleMigration { .. } => ErrorClass::Irreversible,
            Self::State(_) => ErrorClass::Internal,
            Self::Baseline(e) => baseline_class(e),
            Self::Ledger(e) => ledger_class(e),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "E_POLICY_REJECT",
            Self::ConsentRequired { .. } => "E_CONSENT_REQUIRED",
            Self::MissingApproval { .. } => "E_MISSING_APPROVAL",
            Self::Malformed(_) => "E_MALFORMED_SEGMENT",
            Self::UnknownMigration { .. } => "E_UNKNOWN_MIGRATION",
            Self::MigrationFailed { .. } => "E_MIGRATION_FAILED",
            Self::IrreversibleMigration { .. } => "E_IRREVERSIBLE_MIGRATION",
            Self::NothingToRollBack => "E_NOTHING_TO_ROLL_BACK",
            Self::Superseded { .. } => "E_SUPERSEDED",
            Self::State(_) => "E_STATE",
            Self::Baseline(e) => baseline_code(e),
            Self::Ledger(e) => ledger_code(e),
        }
    }
}

fn baseline_class(e: &BaselineError) -> ErrorClass {
    match e {
        BaselineError::Io(_) => ErrorClass::Internal,
        BaselineError::Corrupt(_) | BaselineError::Integrity(_) => ErrorClass::Integrity,
    }
}

fn baseline_code(e: &BaselineError) -> &'static str {
    match e {
        BaselineError::Io(_) => "E_IO",
        BaselineError::Corrupt(_) | BaselineError::Integrity(_) => "E_BASELINE_INTEGRITY",
    }
}

fn ledger_class(e: &LedgerError) -> ErrorClass {
    if e.is_integrity_failure() {
        ErrorClass::Integrity
    } else if e.is_policy_failure() {
        ErrorClass::Policy
    } else if matches!(e, LedgerError::Key(_)) {
        ErrorClass::Input
    } else {
        ErrorClass::Internal
    }
}

fn ledger_code(e: &LedgerError) -> &'static str {
    match e {
        LedgerError::MissingApproval { .. } => "E_MISSING_APPROVAL",
        LedgerError::LifecycleOrder { .. } => "E_LIFECYCLE_ORDER",
        LedgerError::Key(_) => "E_KEY",
        LedgerError::Io(_) | LedgerError::Serialization(_) => "E_IO",
        _ => "E_LOG_INTEGRITY",
    }
}

/// Top-level pipeline error
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// Segment failed schema validation
    #[error(transparent)]
    MalformedSegment(#[from] MalformedSegmentError),

    /// Fingerprint computation failed
    #[error(transparent)]
    Fingerprint(FingerprintError),

    /// Segment files could not be loaded
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Configuration invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Consent gate unavailable
    #[error(transparent)]
    Consent(#[from] ConsentError),

    /// Apply or rollback failed
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Audit log failure outside apply
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Baseline failure outside apply
    #[error(transparent)]
    Baseline(#[from] BaselineError),

    /// A fingerprint file does not match its segments
    #[error("fingerprint for {version} does not match the supplied segments")]
    FingerprintMismatch { version: String },

    /// Hash-only gate cannot classify these segments
    #[error("segments required to classify changes in: {}", .segments.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    SegmentsRequired { segments: Vec<SegmentName> },

    /// Another preflight holds the baseline
    #[error("another upgrade preflight is in progress")]
    PreflightInProgress,
}

impl From<FingerprintError> for UpgradeError {
    fn from(value: FingerprintError) -> Self {
        match value {
            FingerprintError::MalformedSegment(e) => Self::MalformedSegment(e),
            other => Self::Fingerprint(other),
        }
    }
}

impl UpgradeError {
    /// Failure class
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedSegment(_)
            | Self::Load(_)
            | Self::Config(_)
            | Self::SegmentsRequired { .. } => ErrorClass::Input,
            Self::Fingerprint(_) | Self::FingerprintMismatch { .. } => ErrorClass::Integrity,
            Self::Consent(_) | Self::PreflightInProgress => ErrorClass::Consent,
            Self::Apply(e) => e.class(),
            Self::Ledger(e) => ledger_class(e),
            Self::Baseline(e) => baseline_class(e),
        }
    }

    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedSegment(_) => "E_MALFORMED_SEGMENT",
            Self::Fingerprint(FingerprintError::NonDeterministic { .. }) => "E_NON_DETERMINISTIC",
            Self::Fingerprint(_) => "E_COMPOSITE_MISMATCH",
            Self::Load(_) => "E_SEGMENT_LOAD",
            Self::Config(_) => "E_CONFIG",
            Self::Consent(ConsentError::AlreadyPending) => "E_CONSENT_PENDING",
            Self::Consent(ConsentError::Prompt(_)) => "E_CONSENT_PROMPT",
            Self::Apply(e) => e.code(),
            Self::Ledger(e) => ledger_code(e),
            Self::Baseline(e) => baseline_code(e),
            Self::FingerprintMismatch { .. } => "E_FINGERPRINT_MISMATCH",
            Self::SegmentsRequired { .. } => "E_SEGMENTS_REQUIRED",
            Self::PreflightInProgress => "E_PREFLIGHT_IN_PROGRESS",
        }
    }

    /// Fatal errors block the pipeline until investigated
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Integrity | ErrorClass::Irreversible)
    }

    /// Only contention errors may be retried; validation and integrity never are
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PreflightInProgress | Self::Consent(ConsentError::AlreadyPending)
        )
    }

    /// JSON object printed by the CLI on failure
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        })
    }
}
