//! Upgrade pipeline
//!
//! preflight → classify → decide → `attempt` → [reject | approval] → consent
//! → apply → smoke check. Runs are single-flight: a second run while one is
//! in progress fails instead of classifying against a baseline that is about
//! to change.

use crate::config::PipelineConfig;
use crate::consent::{ConsentCoordinator, ConsentPrompt, ConsentRecord};
use crate::controller::{ApplyController, RollbackResult};
use crate::error::{ApplyError, UpgradeError};
use crate::health::{HealthCheck, HealthStatus};
use crate::release::Release;
use crate::segments::RawSegments;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use ua_ledger::LogStore;
use ua_policy::{ChangeCategory, PolicyDecision};

/// A candidate build submitted for upgrade
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Candidate version label
    pub version: String,
    /// Raw segment values
    pub segments: RawSegments,
    /// Maintainer approval flag for approval-gated categories
    pub maintainer_approved: bool,
}

impl UpgradeRequest {
    /// Request without maintainer approval
    #[must_use]
    pub fn new(version: impl Into<String>, segments: RawSegments) -> Self {
        Self {
            version: version.into(),
            segments,
            maintainer_approved: false,
        }
    }

    /// Set the maintainer approval flag
    #[must_use]
    pub fn approved(mut self) -> Self {
        self.maintainer_approved = true;
        self
    }
}

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpgradeOutcome {
    /// `{NONE}`: applied without interaction
    AutoAccepted { version: String },
    /// Applied after notification or consent
    Applied {
        version: String,
        decision: PolicyDecision,
        categories: BTreeSet<ChangeCategory>,
    },
    /// Apply failed or the smoke check failed; previous release restored
    RolledBack { version: String, cause: String },
    /// User declined or did not answer; nothing changed
    ConsentDeclined { version: String, record: ConsentRecord },
    /// Policy refused the candidate; nothing changed
    Rejected {
        version: String,
        categories: BTreeSet<ChangeCategory>,
    },
}

impl UpgradeOutcome {
    /// Whether the candidate is now the active release
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::AutoAccepted { .. } | Self::Applied { .. })
    }
}

/// Result of watching an applied release through its grace window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Supervision {
    /// Grace window elapsed without a failed check
    Stable,
    /// A check failed and the release was rolled back
    RolledBack(RollbackResult),
    /// Nothing applied to supervise
    Idle,
    /// Another release went live before the window closed
    Superseded { version: String, live: Option<String> },
}

/// Single-flight upgrade pipeline
pub struct UpgradePipeline<L: LogStore> {
    config: PipelineConfig,
    consent: ConsentCoordinator,
    controller: Arc<ApplyController<L>>,
    health: Arc<dyn HealthCheck>,
    flight: tokio::sync::Mutex<()>,
}

impl<L: LogStore> UpgradePipeline<L> {
    /// Assemble a pipeline
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        controller: Arc<ApplyController<L>>,
        prompt: Arc<dyn ConsentPrompt>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        let consent = ConsentCoordinator::new(prompt, config.consent_timeout());
        if controller.policy().policy() != &config.policy() {
            warn!("pipeline config policy differs from the controller's; the controller's policy applies");
        }
        Self {
            config,
            consent,
            controller,
            health,
            flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Controller (baseline, log, snapshots)
    #[must_use]
    pub fn controller(&self) -> &Arc<ApplyController<L>> {
        &self.controller
    }

    /// Run one candidate through the pipeline
    ///
    /// # Errors
    /// - [`UpgradeError::PreflightInProgress`] if another run holds the baseline
    /// - input and integrity errors from preflight; nothing is logged for these
    /// - [`ApplyError::MissingApproval`] after a `rejected` entry is logged
    /// - [`ApplyError::IrreversibleMigration`] and storage failures from apply
    pub async fn run(&self, request: UpgradeRequest) -> Result<UpgradeOutcome, UpgradeError> {
        let _flight = self
            .flight
            .try_lock()
            .map_err(|_| UpgradeError::PreflightInProgress)?;

        let candidate = Release::prepare(&request.version, &request.segments, chrono::Utc::now().timestamp())?;
        let version = candidate.version().to_string();
        debug!(%version, composite = %candidate.composite(), "candidate fingerprinted");

        let baseline = self.controller.active()?;
        let classification = candidate.classify_against(baseline.as_ref())?;
        let verdict = self.controller.policy().evaluate(&classification);
        info!(
            %version,
            decision = %verdict.decision,
            categories = ?ua_policy::labels(&classification.categories),
            "candidate classified"
        );

        self.controller.record_attempt(&candidate, &classification, &verdict)?;

        if verdict.is_rejected() {
            let cause = format!("policy reject: {}", ua_policy::labels(&verdict.rejecting).join(", "));
            self.controller.record_rejection(&candidate, &verdict.rejecting, &cause)?;
            return Ok(UpgradeOutcome::Rejected {
                version,
                categories: verdict.rejecting,
            });
        }

        if !verdict.approval_required.is_empty() && !request.maintainer_approved {
            let cause = format!(
                "maintainer approval missing for {}",
                ua_policy::labels(&verdict.approval_required).join(", ")
            );
            self.controller
                .record_rejection(&candidate, &verdict.approval_required, &cause)?;
            return Err(ApplyError::MissingApproval {
                categories: verdict.approval_required,
            }
            .into());
        }

        let consent = if verdict.needs_consent() {
            let record = self
                .consent
                .request_consent(&version, verdict.consent_required.clone(), classification.summary.clone())
                .await?;
            self.controller.record_consent(&candidate, &record)?;
            if !record.granted {
                return Ok(UpgradeOutcome::ConsentDeclined { version, record });
            }
            Some(record)
        } else {
            None
        };

        let applied = match self
            .controller
            .apply(&candidate, consent.as_ref(), request.maintainer_approved)
        {
            Ok(result) => result,
            Err(e @ ApplyError::MigrationFailed { .. }) => {
                return Ok(UpgradeOutcome::RolledBack {
                    version,
                    cause: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        debug!(%version, steps = ?applied.steps, "apply finished");

        if let HealthStatus::Unhealthy(reason) = self.health.check(&candidate.fingerprint).await {
            let cause = format!("post-apply health check failed: {reason}");
            self.controller.rollback_version(&version, &cause)?;
            return Ok(UpgradeOutcome::RolledBack { version, cause });
        }

        Ok(match applied.decision {
            PolicyDecision::AutoAccept => UpgradeOutcome::AutoAccepted { version },
            decision => UpgradeOutcome::Applied {
                version,
                decision,
                categories: applied.categories,
            },
        })
    }

    /// Watch the active release for the configured grace window
    ///
    /// Polls the health check at the configured interval and rolls back at
    /// most once, on the first failed check. Supervision ends early when a
    /// different release goes live; only the release it started with is ever
    /// reverted.
    ///
    /// # Errors
    /// Baseline failures, or rollback failures such as an irreversible migration
    pub async fn supervise(&self) -> Result<Supervision, UpgradeError> {
        let Some(active) = self.controller.active()? else {
            return Ok(Supervision::Idle);
        };
        let version = active.version().to_string();
        let deadline = tokio::time::Instant::now() + self.config.health_grace();
        let mut ticker = tokio::time::interval(self.config.health_poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let live = self.controller.active()?;
            let unchanged = live
                .as_ref()
                .is_some_and(|r| r.version() == version && r.composite() == active.composite());
            if !unchanged {
                let live = live.map(|r| r.version().to_string());
                info!(%version, ?live, "supervised release superseded");
                return Ok(Supervision::Superseded { version, live });
            }
            if tokio::time::Instant::now() >= deadline {
                info!(%version, "grace window passed");
                return Ok(Supervision::Stable);
            }
            if let HealthStatus::Unhealthy(reason) = self.health.check(&active.fingerprint).await {
                warn!(%version, %reason, "health check failed inside grace window");
                let cause = format!("health check failed inside grace window: {reason}");
                return match self.controller.rollback_version(&version, &cause) {
                    Ok(result) => Ok(Supervision::RolledBack(result)),
                    Err(ApplyError::Superseded { live, .. }) => Ok(Supervision::Superseded { version, live }),
                    Err(e) => Err(e.into()),
                };
            }
        }
    }
}

impl<L: LogStore> std::fmt::Debug for UpgradePipeline<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradePipeline")
            .field("config", &self.config)
            .field("consent", &self.consent)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
