//! Release Fingerprints
//!
//! Deterministic, content-addressed identity for release configuration.
//!
//! # Core Concepts
//!
//! - [`SegmentName`] / [`Segment`]: one schema-validated configuration domain
//! - [`normalize`]: raw JSON to canonical bytes, per-segment rules
//! - [`FingerprintEngine`]: per-segment SHA-256 plus ordered composite
//! - [`ReleaseFingerprint`]: the composite identity of a release candidate
//!
//! # Example
//!
//! ```rust,ignore
//! use ua_fingerprint::{FingerprintEngine, SegmentName};
//!
//! let (fingerprint, canonical) = FingerprintEngine::compute_verified("1.4.0", &raw, now)?;
//! println!("composite: {}", fingerprint.composite_hash);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod canonical;
mod error;
mod fingerprint;
mod hash;
mod normalize;
mod segment;

pub use canonical::{canonical_json, strip_volatile, VOLATILE_FIELDS};
pub use error::{FingerprintError, MalformedSegmentError};
pub use fingerprint::{FingerprintEngine, ReleaseFingerprint, SegmentSet};
pub use hash::{ContentHash, HashError};
pub use normalize::{canonical_bytes, canonical_value, normalize, normalize_all, CanonicalBytes};
pub use segment::{
    normalize_hex_color, parse_semver, DependencyLock, FeatureFlags, LockedDependency,
    MigrationPlan, MigrationStep, ModuleEntry, ModuleRegistry, PersonaTone, SecurityPolicy,
    Segment, SegmentName, StyleTokens, UnknownSegmentName,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
