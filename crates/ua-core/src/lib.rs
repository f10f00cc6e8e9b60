//! Upgrade audit core
//!
//! Drives a candidate release from fingerprinting to activation:
//! - classifies it against the accepted baseline and decides the action
//! - gathers user consent for flagged categories
//! - applies it under a snapshot and rolls back on failure
//! - records every step in the signed audit log
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ua_core::prelude::*;
//!
//! # async fn example(controller: Arc<ApplyController<ua_ledger::MemoryLogStore>>) -> Result<(), UpgradeError> {
//! let pipeline = UpgradePipeline::new(
//!     PipelineConfig::new(),
//!     controller,
//!     Arc::new(StaticPrompt::accept()),
//!     Arc::new(AlwaysHealthy),
//! );
//! let segments = load_segments("release/segments")?;
//! let outcome = pipeline.run(UpgradeRequest::new("1.4.0", segments)).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod baseline;
pub mod config;
pub mod consent;
pub mod controller;
pub mod error;
pub mod events;
pub mod gate;
pub mod health;
pub mod migration;
pub mod pipeline;
pub mod release;
pub mod segments;
pub mod snapshot;

pub use baseline::{BaselineStore, JsonFileBaselineStore, MemoryBaselineStore};
pub use config::PipelineConfig;
pub use consent::{
    ConsentCoordinator, ConsentPrompt, ConsentRecord, ConsentRequest, ConsentResolution,
    ConsentResponse, StaticPrompt,
};
pub use controller::{ApplyController, ApplyResult, RollbackResult};
pub use error::{
    ApplyError, BaselineError, ConfigError, ConsentError, ErrorClass, LoadError, StateError,
    UpgradeError,
};
pub use events::{EventSink, MemoryEventSink, TracingEventSink, UpgradeEvent};
pub use gate::{gate, GateReport};
pub use health::{AlwaysHealthy, CrashLoopDetector, HealthCheck, HealthStatus};
pub use migration::{FnMigration, Migration, MigrationFailure, MigrationRegistry, PendingStep};
pub use pipeline::{Supervision, UpgradeOutcome, UpgradePipeline, UpgradeRequest};
pub use release::Release;
pub use segments::{load_fingerprint, load_segments, RawSegments};
pub use snapshot::{DirStateStore, MemoryStateStore, Snapshot, StateImage, StateStore};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving an upgrade
    pub use crate::{
        load_segments, AlwaysHealthy, ApplyController, MemoryBaselineStore, MemoryStateStore,
        MigrationRegistry, PipelineConfig, StaticPrompt, TracingEventSink, UpgradeError,
        UpgradeOutcome, UpgradePipeline, UpgradeRequest,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
