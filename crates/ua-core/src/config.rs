//! Pipeline configuration
//!
//! Loaded from TOML. Every field has a default, so a config file only needs
//! the values it changes.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use ua_policy::{ChangeCategory, Policy};

/// Upgrade pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// How long to wait for a consent answer before failing closed
    pub consent_timeout_secs: u64,
    /// Post-apply health grace window
    pub health_grace_secs: u64,
    /// Interval between health checks inside the grace window
    pub health_poll_interval_ms: u64,
    /// How long snapshots of successful applications are kept
    pub snapshot_retention_secs: u64,
    /// Categories that need a maintainer approval flag
    pub approval_required: BTreeSet<ChangeCategory>,
    /// Audit log (JSON Lines)
    pub log_path: PathBuf,
    /// Last accepted release
    pub baseline_path: PathBuf,
    /// Maintainer signing key seed (hex)
    pub key_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            consent_timeout_secs: 300,
            health_grace_secs: 86_400,
            health_poll_interval_ms: 1_000,
            snapshot_retention_secs: 7 * 86_400,
            approval_required: Policy::default().approval_required,
            log_path: PathBuf::from("upgrade-audit.jsonl"),
            baseline_path: PathBuf::from("accepted-release.json"),
            key_path: PathBuf::from("maintainer.key"),
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Unreadable file, invalid TOML or out-of-range values
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Invalid TOML or out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Fails only if a value cannot be represented in TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "health_poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(hard) = self.approval_required.iter().find(|c| c.is_hard_fail()) {
            return Err(ConfigError::Invalid {
                field: "approval_required",
                reason: format!("{hard} is always rejected and cannot be approved"),
            });
        }
        Ok(())
    }

    /// With consent timeout
    #[inline]
    #[must_use]
    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout_secs = timeout.as_secs();
        self
    }

    /// With health grace window and poll interval
    #[inline]
    #[must_use]
    pub fn with_health_window(mut self, grace: Duration, poll: Duration) -> Self {
        self.health_grace_secs = grace.as_secs();
        self.health_poll_interval_ms = u64::try_from(poll.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With snapshot retention
    #[inline]
    #[must_use]
    pub fn with_snapshot_retention(mut self, retention: Duration) -> Self {
        self.snapshot_retention_secs = retention.as_secs();
        self
    }

    /// With approval-gated categories
    #[inline]
    #[must_use]
    pub fn with_approval_required(mut self, categories: BTreeSet<ChangeCategory>) -> Self {
        self.approval_required = categories;
        self
    }

    /// With all storage paths under `dir`
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.log_path = dir.join("upgrade-audit.jsonl");
        self.baseline_path = dir.join("accepted-release.json");
        self.key_path = dir.join("maintainer.key");
        self
    }

    /// Consent timeout
    #[must_use]
    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    /// Health grace window
    #[must_use]
    pub fn health_grace(&self) -> Duration {
        Duration::from_secs(self.health_grace_secs)
    }

    /// Health poll interval
    #[must_use]
    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    /// Snapshot retention in seconds
    #[must_use]
    pub fn snapshot_retention(&self) -> Duration {
        Duration::from_secs(self.snapshot_retention_secs)
    }

    /// Policy derived from this config
    #[must_use]
    pub fn policy(&self) -> Policy {
        Policy {
            approval_required: self.approval_required.clone(),
        }
    }
}
