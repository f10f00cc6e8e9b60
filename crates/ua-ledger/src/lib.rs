//! Signed Audit Log
//!
//! Append-only history of release lifecycle events. Every entry carries a
//! logical sequence number, the hash of its predecessor and an Ed25519
//! signature over its canonical JSON, so reordering, deletion or edits are
//! detected by replay.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ua_ledger::{AuditLog, EntryDraft, EventType, JsonlFileStore, LocalKeyProvider};
//!
//! let signer = Arc::new(LocalKeyProvider::from_seed_file("maintainer.key")?);
//! let log = AuditLog::open(JsonlFileStore::new("audit.jsonl"), signer)?;
//! log.append(EntryDraft::new("1.4.0", EventType::Attempt))?;
//! assert!(log.is_valid());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod entry;
mod error;
mod log;
mod signing;
mod store;

pub use entry::{EntryDraft, EventType, LogEntry, LogPayload};
pub use error::LedgerError;
pub use log::{verify_entries, AuditLog, VerifyReport};
pub use signing::{
    decode_signature, encode_signature, parse_public_key, public_key_hex, signature_matches,
    KeyProvider, LocalKeyProvider,
};
pub use store::{JsonlFileStore, LogStore, MemoryLogStore};
