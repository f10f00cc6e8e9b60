//! Log storage
//!
//! Stores only ever append; no operation rewrites or truncates an existing
//! record.

use crate::entry::LogEntry;
use crate::error::LedgerError;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Append-only entry storage
pub trait LogStore: Send + Sync {
    /// Persist one entry after all existing ones
    ///
    /// # Errors
    /// Storage failures
    fn append(&self, entry: &LogEntry) -> Result<(), LedgerError>;

    /// Every stored entry in append order
    ///
    /// # Errors
    /// Storage failures or undecodable records
    fn read_all(&self) -> Result<Vec<LogEntry>, LedgerError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `entries`, e.g. an imported or altered log
    #[must_use]
    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, entry: &LogEntry) -> Result<(), LedgerError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogEntry>, LedgerError> {
        Ok(self.entries.lock().clone())
    }
}

/// JSON Lines file store
///
/// Each append takes an exclusive advisory lock, writes one line in append
/// mode and syncs before releasing the lock.
#[derive(Debug, Clone)]
pub struct JsonlFileStore {
    path: PathBuf,
}

impl JsonlFileStore {
    /// Store backed by `path`; the file is created on first append
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_append(&self) -> Result<File, LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new().create(true).append(true).open(&self.path)?)
    }
}

impl LogStore for JsonlFileStore {
    fn append(&self, entry: &LogEntry) -> Result<(), LedgerError> {
        let mut line = entry.to_line()?;
        line.push('\n');

        let mut file = self.open_for_append()?;
        FileExt::lock_exclusive(&file)?;
        let written = file
            .write_all(line.as_bytes())
            .and_then(|()| file.sync_data());
        FileExt::unlock(&file)?;
        written?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogEntry>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        FileExt::lock_shared(&file)?;
        let lines: Result<Vec<String>, _> = BufReader::new(&file).lines().collect();
        FileExt::unlock(&file)?;

        let mut entries = Vec::new();
        for (idx, line) in lines?.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = LogEntry::from_line(line).map_err(|e| LedgerError::Corrupt {
                line: idx + 1,
                reason: e.to_string(),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryDraft, EventType};
    use ua_fingerprint::ContentHash;

    fn entry(seq: u64) -> LogEntry {
        LogEntry::unsigned(seq, ContentHash::default(), EntryDraft::new("1.0.0", EventType::Attempt).at(10))
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlFileStore::new(dir.path().join("audit.jsonl"));
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let store = JsonlFileStore::new(&path);
        store.append(&entry(1)).unwrap();
        store.append(&entry(2)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
        let seqs: Vec<u64> = store.read_all().unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn existing_lines_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        JsonlFileStore::new(&path).append(&entry(1)).unwrap();
        let first = fs::read_to_string(&path).unwrap();

        JsonlFileStore::new(&path).append(&entry(2)).unwrap();
        let both = fs::read_to_string(&path).unwrap();
        assert!(both.starts_with(&first));
    }

    #[test]
    fn corrupt_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = JsonlFileStore::new(&path);
        store.append(&entry(1)).unwrap();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{not json}\n")
            .unwrap();
        match store.read_all().unwrap_err() {
            LedgerError::Corrupt { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
