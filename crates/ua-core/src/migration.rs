//! Migration steps
//!
//! Each step of a release's migration plan is backed by a registered
//! [`Migration`] that transforms the exported state image.

use crate::error::ApplyError;
use crate::snapshot::StateImage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use ua_fingerprint::MigrationPlan;

/// A single migration step failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MigrationFailure(pub String);

/// One executable migration step
pub trait Migration: Send + Sync {
    /// Plan step id this migration implements
    fn id(&self) -> u64;

    /// Whether a snapshot restore can undo this step
    fn reversible(&self) -> bool {
        true
    }

    /// Transform `state` in place
    ///
    /// # Errors
    /// Any failure aborts the whole migration run
    fn apply(&self, state: &mut StateImage) -> Result<(), MigrationFailure>;
}

type ApplyFn = dyn Fn(&mut StateImage) -> Result<(), MigrationFailure> + Send + Sync;

/// Migration built from a closure
pub struct FnMigration {
    id: u64,
    reversible: bool,
    apply: Box<ApplyFn>,
}

impl FnMigration {
    /// Reversible step
    pub fn new<F>(id: u64, apply: F) -> Self
    where
        F: Fn(&mut StateImage) -> Result<(), MigrationFailure> + Send + Sync + 'static,
    {
        Self {
            id,
            reversible: true,
            apply: Box::new(apply),
        }
    }

    /// Mark the step irreversible
    #[must_use]
    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }
}

impl fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration")
            .field("id", &self.id)
            .field("reversible", &self.reversible)
            .finish_non_exhaustive()
    }
}

impl Migration for FnMigration {
    fn id(&self) -> u64 {
        self.id
    }

    fn reversible(&self) -> bool {
        self.reversible
    }

    fn apply(&self, state: &mut StateImage) -> Result<(), MigrationFailure> {
        (self.apply)(state)
    }
}

/// A resolved step ready to run
#[derive(Clone)]
pub struct PendingStep {
    /// Step id
    pub id: u64,
    /// Reversible according to both the plan and the implementation
    pub reversible: bool,
    /// Implementation
    pub migration: Arc<dyn Migration>,
}

impl fmt::Debug for PendingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingStep")
            .field("id", &self.id)
            .field("reversible", &self.reversible)
            .finish_non_exhaustive()
    }
}

/// Registered migration implementations by step id
#[derive(Default, Clone)]
pub struct MigrationRegistry {
    migrations: BTreeMap<u64, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `migration` under its id, replacing any previous one
    #[must_use]
    pub fn with(mut self, migration: impl Migration + 'static) -> Self {
        self.register(Arc::new(migration));
        self
    }

    /// Register a shared migration
    pub fn register(&mut self, migration: Arc<dyn Migration>) {
        self.migrations.insert(migration.id(), migration);
    }

    /// Number of registered steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether no steps are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Steps of `plan` newer than `applied_through`, in id order
    ///
    /// # Errors
    /// [`ApplyError::UnknownMigration`] for a planned step without an implementation
    pub fn resolve(&self, plan: &MigrationPlan, applied_through: Option<u64>) -> Result<Vec<PendingStep>, ApplyError> {
        let mut steps: Vec<_> = plan
            .steps
            .iter()
            .filter(|s| applied_through.map_or(true, |done| s.id > done))
            .collect();
        steps.sort_by_key(|s| s.id);
        steps
            .into_iter()
            .map(|step| {
                let migration = self
                    .migrations
                    .get(&step.id)
                    .cloned()
                    .ok_or(ApplyError::UnknownMigration { id: step.id })?;
                Ok(PendingStep {
                    id: step.id,
                    reversible: step.reversible && migration.reversible(),
                    migration,
                })
            })
            .collect()
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("steps", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}
