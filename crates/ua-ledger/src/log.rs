//! Signed audit log
//!
//! Every append is serialized under one lock: the entry is sequenced, chained
//! to its predecessor, signed and written before the lock is released.
//! Verification replays the whole chain from storage.

use crate::entry::{EntryDraft, EventType, LogEntry};
use crate::error::LedgerError;
use crate::signing::{encode_signature, signature_matches, KeyProvider};
use crate::store::LogStore;
use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use ua_fingerprint::ContentHash;
use ua_policy::{ChangeCategory, Policy};

/// Result of a successful chain replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    /// Number of entries checked
    pub entries: usize,
    /// Sequence number of the last entry, 0 for an empty log
    pub last_seq: u64,
    /// Chain hash of the last entry
    pub head: ContentHash,
}

/// Tail of the chain plus per-version lifecycle position
#[derive(Debug, Default)]
struct ChainState {
    last_seq: u64,
    head: ContentHash,
    stages: BTreeMap<String, EventType>,
}

impl ChainState {
    fn check_next(&self, entry: &LogEntry) -> Result<(), LedgerError> {
        if entry.seq <= self.last_seq {
            return Err(LedgerError::OutOfOrder {
                seq: entry.seq,
                last: self.last_seq,
            });
        }
        if entry.prev_hash != self.head {
            return Err(LedgerError::ChainBroken { seq: entry.seq });
        }
        self.check_lifecycle(&entry.version, entry.event_type)
    }

    fn check_lifecycle(&self, version: &str, event: EventType) -> Result<(), LedgerError> {
        let previous = self.stages.get(version).copied();
        if event.may_follow(previous) {
            Ok(())
        } else {
            Err(LedgerError::LifecycleOrder {
                version: version.to_string(),
                event,
                previous: previous.map_or_else(|| "nothing".to_string(), |p| p.to_string()),
            })
        }
    }

    fn advance(&mut self, entry: &LogEntry, head: ContentHash) {
        self.last_seq = entry.seq;
        self.head = head;
        self.stages.insert(entry.version.clone(), entry.event_type);
    }
}

/// Replay `entries` and check ordering, chain links, lifecycle and signatures
///
/// # Errors
/// The first violation found, in log order
pub fn verify_entries(entries: &[LogEntry], key: &VerifyingKey) -> Result<VerifyReport, LedgerError> {
    let mut state = ChainState::default();
    for entry in entries {
        state.check_next(entry)?;
        let signed = entry.signed_bytes()?;
        if !signature_matches(key, &signed, &entry.signature) {
            return Err(LedgerError::InvalidSignature { seq: entry.seq });
        }
        state.advance(entry, ContentHash::compute(&signed));
    }
    Ok(VerifyReport {
        entries: entries.len(),
        last_seq: state.last_seq,
        head: state.head,
    })
}

/// Append-only, signed, hash-chained audit log
pub struct AuditLog<S: LogStore> {
    store: S,
    signer: Arc<dyn KeyProvider>,
    approval_required: BTreeSet<ChangeCategory>,
    state: Mutex<ChainState>,
}

impl<S: LogStore> AuditLog<S> {
    /// Open a log over `store`, replaying and verifying existing entries
    ///
    /// # Errors
    /// Any integrity failure in the stored chain
    pub fn open(store: S, signer: Arc<dyn KeyProvider>) -> Result<Self, LedgerError> {
        let entries = store.read_all()?;
        let key = signer.verifying_key();
        verify_entries(&entries, &key)?;

        let mut state = ChainState::default();
        for entry in &entries {
            state.advance(entry, entry.chain_hash()?);
        }
        debug!(entries = entries.len(), last_seq = state.last_seq, "audit log opened");

        Ok(Self {
            store,
            signer,
            approval_required: Policy::default().approval_required,
            state: Mutex::new(state),
        })
    }

    /// Categories whose `applied` entries need `maintainerApproved`
    #[must_use]
    pub fn with_approval_required(mut self, categories: BTreeSet<ChangeCategory>) -> Self {
        self.approval_required = categories;
        self
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Public key entries are verified against
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signer.verifying_key()
    }

    /// Sequence number of the last appended entry
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.state.lock().last_seq
    }

    /// Sequence, chain, sign and persist a new entry
    ///
    /// # Errors
    /// - [`LedgerError::LifecycleOrder`] if the event is out of order for its version
    /// - [`LedgerError::MissingApproval`] for an unapproved `applied` entry
    /// - storage failures
    pub fn append(&self, draft: EntryDraft) -> Result<LogEntry, LedgerError> {
        let mut state = self.state.lock();
        let mut entry = LogEntry::unsigned(state.last_seq + 1, state.head, draft);
        state.check_lifecycle(&entry.version, entry.event_type)?;
        self.check_approval(&entry)?;

        let signed = entry.signed_bytes()?;
        entry.signature = encode_signature(&self.signer.sign(&signed));
        self.store.append(&entry)?;
        state.advance(&entry, ContentHash::compute(&signed));

        info!(
            seq = entry.seq,
            version = %entry.version,
            event = %entry.event_type,
            "audit entry appended"
        );
        Ok(entry)
    }

    /// Append an already signed entry
    ///
    /// # Errors
    /// - [`LedgerError::OutOfOrder`] if `entry.seq` does not exceed the last seq
    /// - [`LedgerError::ChainBroken`] or [`LedgerError::InvalidSignature`] on a bad link or signature
    /// - the same lifecycle and approval refusals as [`AuditLog::append`]
    pub fn append_entry(&self, entry: LogEntry) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        if let Err(e) = state.check_next(&entry) {
            warn!(seq = entry.seq, error = %e, "rejected external audit entry");
            return Err(e);
        }
        self.check_approval(&entry)?;
        let signed = entry.signed_bytes()?;
        if !signature_matches(&self.signer.verifying_key(), &signed, &entry.signature) {
            return Err(LedgerError::InvalidSignature { seq: entry.seq });
        }

        self.store.append(&entry)?;
        state.advance(&entry, ContentHash::compute(&signed));
        Ok(())
    }

    /// All stored entries
    ///
    /// # Errors
    /// Storage failures
    pub fn entries(&self) -> Result<Vec<LogEntry>, LedgerError> {
        self.store.read_all()
    }

    /// Entries for one version, in order
    ///
    /// # Errors
    /// Storage failures
    pub fn entries_for(&self, version: &str) -> Result<Vec<LogEntry>, LedgerError> {
        Ok(self
            .store
            .read_all()?
            .into_iter()
            .filter(|e| e.version == version)
            .collect())
    }

    /// Replay the stored chain
    ///
    /// # Errors
    /// The first integrity violation found
    pub fn verify(&self) -> Result<VerifyReport, LedgerError> {
        let entries = self.store.read_all()?;
        verify_entries(&entries, &self.signer.verifying_key())
    }

    /// Whether [`AuditLog::verify`] succeeds
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.verify() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "audit log verification failed");
                false
            }
        }
    }

    fn check_approval(&self, entry: &LogEntry) -> Result<(), LedgerError> {
        if entry.event_type != EventType::Applied || entry.payload.maintainer_approved == Some(true) {
            return Ok(());
        }
        let categories: BTreeSet<ChangeCategory> = entry
            .payload
            .classifications
            .intersection(&self.approval_required)
            .copied()
            .collect();
        if categories.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::MissingApproval { categories })
        }
    }
}

impl<S: LogStore + std::fmt::Debug> std::fmt::Debug for AuditLog<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("store", &self.store)
            .field("last_seq", &self.last_seq())
            .finish_non_exhaustive()
    }
}
