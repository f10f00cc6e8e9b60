//! Drift Policy
//!
//! Classifies the difference between two release fingerprints into typed
//! [`ChangeCategory`] values and maps them to a [`PolicyDecision`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ua_policy::{DiffClassifier, PolicyEngine};
//!
//! let classification = DiffClassifier::new().classify(&baseline, &candidate, &base_segs, &cand_segs)?;
//! let verdict = PolicyEngine::default().evaluate(&classification);
//! if verdict.is_rejected() {
//!     eprintln!("blocked by {:?}", verdict.rejecting);
//! }
//! ```

#![warn(unreachable_pub)]

mod category;
mod classify;
mod decision;

pub use category::{labels, ChangeCategory, PolicyDecision};
pub use classify::{Classification, DiffClassifier, DiffSummary};
pub use decision::{decide, Policy, PolicyEngine, Verdict};
