//! Apply/rollback controller
//!
//! Sole writer of the accepted baseline and the audit log. Every mutation
//! runs under one `parking_lot` mutex; nothing async happens while it is
//! held.
//!
//! Apply: classify the candidate against the release loaded under the lock,
//! snapshot, run pending migrations in order (restoring the snapshot on the
//! first failure), activate the candidate, append `applied`.
//! Rollback: disable introduced modules, restore the snapshot, reinstate the
//! prior release, append `rollback`.

use crate::baseline::BaselineStore;
use crate::consent::ConsentRecord;
use crate::error::{ApplyError, BaselineError};
use crate::events::{EventSink, UpgradeEvent};
use crate::migration::{MigrationRegistry, PendingStep};
use crate::release::Release;
use crate::snapshot::{Snapshot, StateStore};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use ua_ledger::{AuditLog, EntryDraft, EventType, LogPayload, LogStore};
use ua_policy::{ChangeCategory, Classification, Policy, PolicyDecision, PolicyEngine, Verdict};

/// Successful application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    /// Activated version
    pub version: String,
    /// Version it replaced
    pub previous_version: Option<String>,
    /// Decision the candidate was applied under
    pub decision: PolicyDecision,
    /// Categories of the applied diff
    pub categories: BTreeSet<ChangeCategory>,
    /// Migration steps that ran
    pub steps: Vec<u64>,
    /// Snapshot guarding this application
    pub snapshot_id: u64,
}

/// Completed rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackResult {
    /// Version that was reverted
    pub from_version: String,
    /// Version active again, `None` after reverting a first install
    pub to_version: Option<String>,
    /// Recorded cause
    pub cause: String,
}

#[derive(Debug, Default)]
struct Inner {
    snapshots: Vec<Snapshot>,
    next_snapshot: u64,
}

/// Apply/rollback controller
pub struct ApplyController<L: LogStore> {
    state: Arc<dyn StateStore>,
    baseline: Arc<dyn BaselineStore>,
    log: Arc<AuditLog<L>>,
    migrations: MigrationRegistry,
    events: Arc<dyn EventSink>,
    policy: PolicyEngine,
    retention: Duration,
    inner: Mutex<Inner>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl<L: LogStore> ApplyController<L> {
    /// Create controller
    #[must_use]
    pub fn new(
        state: Arc<dyn StateStore>,
        baseline: Arc<dyn BaselineStore>,
        log: Arc<AuditLog<L>>,
        migrations: MigrationRegistry,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state,
            baseline,
            log,
            migrations,
            events,
            policy: PolicyEngine::default(),
            retention: Duration::from_secs(7 * 86_400),
            inner: Mutex::new(Inner {
                snapshots: Vec::new(),
                next_snapshot: 1,
            }),
        }
    }

    /// With snapshot retention window
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// With the policy every apply is checked against
    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = PolicyEngine::new(policy);
        self
    }

    /// Policy engine
    #[must_use]
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Audit log
    pub fn log(&self) -> &AuditLog<L> {
        &self.log
    }

    /// Currently accepted release
    ///
    /// # Errors
    /// Baseline storage or integrity failures
    pub fn active(&self) -> Result<Option<Release>, BaselineError> {
        self.baseline.load()
    }

    /// Number of retained snapshots
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().snapshots.len()
    }

    /// Retained snapshots, oldest first
    #[must_use]
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.inner.lock().snapshots.clone()
    }

    /// Log a classified candidate
    ///
    /// # Errors
    /// Audit log refusal or failure
    pub fn record_attempt(
        &self,
        candidate: &Release,
        classification: &Classification,
        verdict: &Verdict,
    ) -> Result<(), ApplyError> {
        let _guard = self.inner.lock();
        let payload = LogPayload::default()
            .with_classifications(classification.categories.clone())
            .with_summary(classification.summary.clone())
            .with_requires_consent(verdict.needs_consent())
            .with_segments_changed(classification.changed_segments.clone());
        let entry = self.log.append(
            EntryDraft::new(candidate.version(), EventType::Attempt)
                .with_fingerprint(candidate.composite())
                .with_payload(payload),
        )?;
        self.events.emit(&UpgradeEvent::UpgradeAttempt {
            version: entry.version,
            classifications: classification.categories.clone(),
            requires_consent: verdict.needs_consent(),
            ts: entry.ts,
        });
        Ok(())
    }

    /// Log a consent outcome
    ///
    /// # Errors
    /// Audit log refusal or failure
    pub fn record_consent(&self, candidate: &Release, record: &ConsentRecord) -> Result<(), ApplyError> {
        let _guard = self.inner.lock();
        let mut payload = LogPayload::default()
            .with_classifications(record.categories_requiring_consent.clone())
            .with_granted(record.granted);
        if !record.granted {
            payload = payload.with_cause(format!("{:?}", record.resolution).to_lowercase());
        }
        let entry = self.log.append(
            EntryDraft::new(candidate.version(), EventType::Consent)
                .with_fingerprint(candidate.composite())
                .with_payload(payload),
        )?;
        self.events.emit(&UpgradeEvent::UpgradeConsent {
            version: entry.version,
            granted: record.granted,
            ts: entry.ts,
        });
        Ok(())
    }

    /// Log a policy refusal
    ///
    /// # Errors
    /// Audit log refusal or failure
    pub fn record_rejection(
        &self,
        candidate: &Release,
        categories: &BTreeSet<ChangeCategory>,
        cause: &str,
    ) -> Result<(), ApplyError> {
        let _guard = self.inner.lock();
        self.log.append(
            EntryDraft::new(candidate.version(), EventType::Rejected)
                .with_fingerprint(candidate.composite())
                .with_payload(
                    LogPayload::default()
                        .with_classifications(categories.clone())
                        .with_cause(cause),
                ),
        )?;
        warn!(version = candidate.version(), cause, "candidate rejected");
        Ok(())
    }

    /// Check apply preconditions without touching any state
    ///
    /// # Errors
    /// [`ApplyError::Rejected`], [`ApplyError::ConsentRequired`] or [`ApplyError::MissingApproval`]
    pub fn check_preconditions(
        candidate: &Release,
        verdict: &Verdict,
        consent: Option<&ConsentRecord>,
        maintainer_approved: bool,
    ) -> Result<(), ApplyError> {
        if verdict.is_rejected() {
            return Err(ApplyError::Rejected {
                version: candidate.version().to_string(),
                categories: verdict.rejecting.clone(),
            });
        }
        if verdict.needs_consent() {
            let missing = match consent {
                Some(record) if record.version == candidate.version() => record.missing(&verdict.consent_required),
                _ => verdict.consent_required.clone(),
            };
            if !missing.is_empty() {
                return Err(ApplyError::ConsentRequired { missing });
            }
        }
        if !verdict.approval_required.is_empty() && !maintainer_approved {
            return Err(ApplyError::MissingApproval {
                categories: verdict.approval_required.clone(),
            });
        }
        Ok(())
    }

    /// Apply `candidate`
    ///
    /// The decision is recomputed against the release loaded under the
    /// controller lock.
    ///
    /// # Errors
    /// - precondition failures, before any state is touched
    /// - [`ApplyError::UnknownMigration`] before the snapshot is taken
    /// - [`ApplyError::MigrationFailed`] after the snapshot was restored and `rollback` logged
    /// - [`ApplyError::IrreversibleMigration`] if a failed run already passed an irreversible step
    pub fn apply(
        &self,
        candidate: &Release,
        consent: Option<&ConsentRecord>,
        maintainer_approved: bool,
    ) -> Result<ApplyResult, ApplyError> {
        let mut inner = self.inner.lock();
        let prior = self.baseline.load()?;
        let classification = candidate.classify_against(prior.as_ref())?;
        let verdict = self.policy.evaluate(&classification);
        Self::check_preconditions(candidate, &verdict, consent, maintainer_approved)?;

        let applied_through = match &prior {
            Some(release) => release.migration_plan().map_err(corrupt_segment)?.high_water_mark(),
            None => None,
        };
        let plan = candidate.migration_plan()?;
        let pending = self.migrations.resolve(&plan, applied_through)?;
        let introduced_modules = candidate.introduced_modules(prior.as_ref()).map_err(corrupt_segment)?;
        let modules: Vec<String> = candidate.modules()?.modules.into_iter().map(|m| m.name).collect();

        let id = inner.next_snapshot;
        inner.next_snapshot += 1;
        let mut snapshot = Snapshot {
            id,
            version: candidate.version().to_string(),
            image: self.state.export()?,
            prior,
            introduced_modules,
            steps: Vec::new(),
            taken_at: now(),
            applied_at: None,
            failed_at: None,
            revoked: false,
        };
        info!(version = candidate.version(), snapshot = id, steps = pending.len(), "snapshot taken");

        if let Err(failure) = self.run_migrations(&mut snapshot, &pending) {
            return Err(self.abort(&mut inner, snapshot, failure));
        }

        let mut reenabled = Vec::new();
        let activated = self
            .state
            .enable_modules(&modules)
            .map_err(ApplyError::from)
            .and_then(|names| {
                reenabled = names;
                self.baseline.store(candidate).map_err(ApplyError::from)
            })
            .and_then(|()| {
                self.log
                    .append(
                        EntryDraft::new(candidate.version(), EventType::Applied)
                            .with_fingerprint(candidate.composite())
                            .with_payload(
                                LogPayload::default()
                                    .with_classifications(classification.categories.clone())
                                    .with_segments_changed(classification.changed_segments.clone())
                                    .with_maintainer_approved(maintainer_approved),
                            ),
                    )
                    .map_err(ApplyError::from)
            });
        let entry = match activated {
            Ok(entry) => entry,
            Err(e) => {
                error!(version = candidate.version(), error = %e, "activation failed; restoring snapshot");
                self.state.disable_modules(&reenabled)?;
                self.state.restore(&snapshot.image)?;
                match &snapshot.prior {
                    Some(release) => self.baseline.store(release)?,
                    None => self.baseline.clear()?,
                }
                return Err(e);
            }
        };
        if !reenabled.is_empty() {
            info!(version = candidate.version(), modules = ?reenabled, "modules re-enabled");
        }

        snapshot.applied_at = Some(entry.ts);
        let result = ApplyResult {
            version: entry.version.clone(),
            previous_version: snapshot.prior.as_ref().map(|p| p.version().to_string()),
            decision: verdict.decision,
            categories: classification.categories.clone(),
            steps: pending.iter().map(|p| p.id).collect(),
            snapshot_id: id,
        };
        inner.snapshots.push(snapshot);

        self.events.emit(&UpgradeEvent::UpgradeApplied {
            version: entry.version,
            fingerprint: candidate.composite(),
            segments_changed: classification.changed_segments,
            ts: entry.ts,
        });
        info!(version = candidate.version(), seq = entry.seq, "release applied");
        Ok(result)
    }

    /// Run `pending` against a working copy, committing after each step
    fn run_migrations(&self, snapshot: &mut Snapshot, pending: &[PendingStep]) -> Result<(), ApplyError> {
        let mut working = snapshot.image.clone();
        for step in pending {
            step.migration
                .apply(&mut working)
                .map_err(|e| ApplyError::MigrationFailed {
                    id: step.id,
                    reason: e.0,
                })?;
            self.state.restore(&working)?;
            snapshot.steps.push((step.id, step.reversible));
        }
        Ok(())
    }

    /// Undo a failed migration run from its snapshot
    ///
    /// Past an irreversible step nothing is restored: the failure is logged
    /// best-effort and the snapshot is kept for inspection.
    fn abort(&self, inner: &mut Inner, mut snapshot: Snapshot, failure: ApplyError) -> ApplyError {
        let irreversible = snapshot.irreversible_steps();
        if !irreversible.is_empty() {
            error!(
                version = %snapshot.version,
                steps = ?irreversible,
                error = %failure,
                "migration failed after irreversible steps; manual intervention required"
            );
            let failed_step = match &failure {
                ApplyError::MigrationFailed { id, .. } => Some(*id),
                _ => None,
            };
            let cause = failure.to_string();
            let logged = self.log.append(
                EntryDraft::new(&snapshot.version, EventType::Failed).with_payload(
                    LogPayload::default()
                        .with_cause(&cause)
                        .with_failure(failed_step, irreversible.clone()),
                ),
            );
            let ts = match logged {
                Ok(entry) => entry.ts,
                Err(e) => {
                    warn!(version = %snapshot.version, error = %e, "could not log failed apply");
                    now()
                }
            };
            self.events.emit(&UpgradeEvent::UpgradeFailed {
                version: snapshot.version.clone(),
                failed_step,
                irreversible_steps: irreversible.clone(),
                cause,
                ts,
            });
            let version = snapshot.version.clone();
            snapshot.failed_at = Some(ts);
            inner.snapshots.push(snapshot);
            return ApplyError::IrreversibleMigration {
                version,
                steps: irreversible,
            };
        }

        if let Err(e) = self.state.restore(&snapshot.image) {
            return e.into();
        }
        let prior_version = snapshot.prior.as_ref().map(|p| p.version().to_string());
        let cause = failure.to_string();
        warn!(version = %snapshot.version, %cause, "migration failed; snapshot restored");
        if let Err(e) = self.append_rollback(&snapshot.version, prior_version.clone(), &cause) {
            return e;
        }
        self.events.emit(&UpgradeEvent::Rollback {
            from_version: snapshot.version,
            to_version: prior_version,
            cause,
            ts: now(),
        });
        failure
    }

    fn append_rollback(&self, version: &str, to_version: Option<String>, cause: &str) -> Result<(), ApplyError> {
        let mut payload = LogPayload::default().with_cause(cause);
        if let Some(to) = to_version {
            payload = payload.with_to_version(to);
        }
        self.log
            .append(EntryDraft::new(version, EventType::Rollback).with_payload(payload))?;
        Ok(())
    }

    /// Revert the most recent live application
    ///
    /// # Errors
    /// - [`ApplyError::NothingToRollBack`] if no application is live
    /// - [`ApplyError::IrreversibleMigration`] if the application ran an irreversible step
    pub fn rollback(&self, cause: &str) -> Result<RollbackResult, ApplyError> {
        self.revert(None, cause)
    }

    /// Revert `version`, only while it is still the live application
    ///
    /// # Errors
    /// As [`rollback`](Self::rollback), plus [`ApplyError::Superseded`] when a
    /// newer release went live in the meantime
    pub fn rollback_version(&self, version: &str, cause: &str) -> Result<RollbackResult, ApplyError> {
        self.revert(Some(version), cause)
    }

    fn revert(&self, expected: Option<&str>, cause: &str) -> Result<RollbackResult, ApplyError> {
        let mut inner = self.inner.lock();
        let snapshot = inner
            .snapshots
            .iter_mut()
            .rev()
            .find(|s| s.applied_at.is_some() && !s.revoked)
            .ok_or(ApplyError::NothingToRollBack)?;
        if let Some(expected) = expected {
            if snapshot.version != expected {
                warn!(expected, live = %snapshot.version, "rollback target superseded");
                return Err(ApplyError::Superseded {
                    expected: expected.to_string(),
                    live: Some(snapshot.version.clone()),
                });
            }
        }

        let irreversible = snapshot.irreversible_steps();
        if !irreversible.is_empty() {
            error!(version = %snapshot.version, steps = ?irreversible, "rollback refused: irreversible migration");
            return Err(ApplyError::IrreversibleMigration {
                version: snapshot.version.clone(),
                steps: irreversible,
            });
        }

        self.state.disable_modules(&snapshot.introduced_modules)?;
        self.state.restore(&snapshot.image)?;
        match &snapshot.prior {
            Some(release) => self.baseline.store(release)?,
            None => self.baseline.clear()?,
        }
        snapshot.revoked = true;

        let from_version = snapshot.version.clone();
        let to_version = snapshot.prior.as_ref().map(|p| p.version().to_string());
        self.append_rollback(&from_version, to_version.clone(), cause)?;
        self.events.emit(&UpgradeEvent::Rollback {
            from_version: from_version.clone(),
            to_version: to_version.clone(),
            cause: cause.to_string(),
            ts: now(),
        });
        warn!(%from_version, ?to_version, cause, "release rolled back");

        Ok(RollbackResult {
            from_version,
            to_version,
            cause: cause.to_string(),
        })
    }

    /// Drop snapshots past the retention window, and restored ones
    ///
    /// The snapshot guarding the live application is kept until it expires.
    pub fn prune_snapshots(&self, now: i64) -> usize {
        let retention = i64::try_from(self.retention.as_secs()).unwrap_or(i64::MAX);
        let mut inner = self.inner.lock();
        let before = inner.snapshots.len();
        inner.snapshots.retain(|s| !s.expired(now, retention));
        let pruned = before - inner.snapshots.len();
        if pruned > 0 {
            info!(pruned, retained = inner.snapshots.len(), "snapshots pruned");
        }
        pruned
    }
}

fn corrupt_segment(e: ua_fingerprint::MalformedSegmentError) -> ApplyError {
    ApplyError::Baseline(BaselineError::Corrupt(e.to_string()))
}

impl<L: LogStore> std::fmt::Debug for ApplyController<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyController")
            .field("migrations", &self.migrations)
            .field("retention", &self.retention)
            .field("snapshots", &self.snapshot_count())
            .finish_non_exhaustive()
    }
}
