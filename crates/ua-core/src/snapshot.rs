//! Mutable state and pre-migration snapshots
//!
//! A [`StateImage`] is everything a migration may change: the data store
//! export and the asset bundle. A [`Snapshot`] pairs the image taken right
//! before a migration with the release that was active at that moment.

use crate::error::StateError;
use crate::release::Release;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Exported mutable state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateImage {
    /// Data store export
    pub data: Vec<u8>,
    /// Asset bundle by relative path
    pub assets: BTreeMap<String, Vec<u8>>,
}

/// Host state the controller snapshots and restores
pub trait StateStore: Send + Sync {
    /// Capture the current state
    ///
    /// # Errors
    /// Storage failures
    fn export(&self) -> Result<StateImage, StateError>;

    /// Replace the current state with `image`
    ///
    /// # Errors
    /// Storage failures
    fn restore(&self, image: &StateImage) -> Result<(), StateError>;

    /// Disable modules introduced by a release being rolled back
    ///
    /// # Errors
    /// Storage failures
    fn disable_modules(&self, names: &[String]) -> Result<(), StateError>;

    /// Clear `names` from the disabled set; returns the ones that were disabled
    ///
    /// # Errors
    /// Storage failures
    fn enable_modules(&self, names: &[String]) -> Result<Vec<String>, StateError>;
}

/// In-memory state
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    image: Mutex<StateImage>,
    disabled: Mutex<BTreeSet<String>>,
}

impl MemoryStateStore {
    /// Store holding `image`
    #[must_use]
    pub fn new(image: StateImage) -> Self {
        Self {
            image: Mutex::new(image),
            disabled: Mutex::default(),
        }
    }

    /// Current image
    #[must_use]
    pub fn image(&self) -> StateImage {
        self.image.lock().clone()
    }

    /// Modules disabled so far
    #[must_use]
    pub fn disabled_modules(&self) -> BTreeSet<String> {
        self.disabled.lock().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn export(&self) -> Result<StateImage, StateError> {
        Ok(self.image())
    }

    fn restore(&self, image: &StateImage) -> Result<(), StateError> {
        *self.image.lock() = image.clone();
        Ok(())
    }

    fn disable_modules(&self, names: &[String]) -> Result<(), StateError> {
        self.disabled.lock().extend(names.iter().cloned());
        Ok(())
    }

    fn enable_modules(&self, names: &[String]) -> Result<Vec<String>, StateError> {
        let mut disabled = self.disabled.lock();
        Ok(names.iter().filter(|name| disabled.remove(*name)).cloned().collect())
    }
}

/// State kept in a directory: `data.bin`, an `assets/` tree and
/// `disabled-modules.json`
#[derive(Debug, Clone)]
pub struct DirStateStore {
    root: PathBuf,
}

impl DirStateStore {
    const DATA: &'static str = "data.bin";
    const ASSETS: &'static str = "assets";
    const DISABLED: &'static str = "disabled-modules.json";

    /// Store rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn assets_dir(&self) -> PathBuf {
        self.root.join(Self::ASSETS)
    }

    /// Modules disabled so far
    ///
    /// # Errors
    /// Unreadable or corrupt list
    pub fn disabled_modules(&self) -> Result<BTreeSet<String>, StateError> {
        match fs::read(self.root.join(Self::DISABLED)) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StateError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_disabled(&self, disabled: &BTreeSet<String>) -> Result<(), StateError> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_vec(disabled).map_err(|e| StateError::Corrupt(e.to_string()))?;
        fs::write(self.root.join(Self::DISABLED), json)?;
        Ok(())
    }
}

fn collect_assets(base: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) -> Result<(), StateError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_assets(base, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(base)
                .map_err(|e| StateError::Corrupt(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.insert(rel, fs::read(&path)?);
        }
    }
    Ok(())
}

impl StateStore for DirStateStore {
    fn export(&self) -> Result<StateImage, StateError> {
        let data = match fs::read(self.root.join(Self::DATA)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut assets = BTreeMap::new();
        let dir = self.assets_dir();
        if dir.is_dir() {
            collect_assets(&dir, &dir, &mut assets)?;
        }
        Ok(StateImage { data, assets })
    }

    fn restore(&self, image: &StateImage) -> Result<(), StateError> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join(Self::DATA), &image.data)?;
        let dir = self.assets_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        for (rel, bytes) in &image.assets {
            if rel.split('/').any(|part| part == ".." || part.is_empty()) {
                return Err(StateError::Corrupt(format!("invalid asset path `{rel}`")));
            }
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes)?;
        }
        Ok(())
    }

    fn disable_modules(&self, names: &[String]) -> Result<(), StateError> {
        let mut disabled = self.disabled_modules()?;
        disabled.extend(names.iter().cloned());
        self.write_disabled(&disabled)
    }

    fn enable_modules(&self, names: &[String]) -> Result<Vec<String>, StateError> {
        let mut disabled = self.disabled_modules()?;
        let enabled: Vec<String> = names.iter().filter(|name| disabled.remove(*name)).cloned().collect();
        if !enabled.is_empty() {
            self.write_disabled(&disabled)?;
        }
        Ok(enabled)
    }
}

/// Pre-migration capture owned by the controller
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Monotonic snapshot id
    pub id: u64,
    /// Candidate version the snapshot guards
    pub version: String,
    /// State before the first migration step
    pub image: StateImage,
    /// Release active before the candidate
    pub prior: Option<Release>,
    /// Modules the candidate introduced
    pub introduced_modules: Vec<String>,
    /// Migration steps that ran, with their reversibility
    pub steps: Vec<(u64, bool)>,
    /// Capture time (unix seconds)
    pub taken_at: i64,
    /// Set once the candidate became active
    pub applied_at: Option<i64>,
    /// Set when apply failed past an irreversible step
    pub failed_at: Option<i64>,
    /// Set once the snapshot was restored
    pub revoked: bool,
}

impl Snapshot {
    /// Steps that cannot be undone
    #[must_use]
    pub fn irreversible_steps(&self) -> Vec<u64> {
        self.steps.iter().filter(|(_, reversible)| !reversible).map(|(id, _)| *id).collect()
    }

    /// Whether this snapshot can be discarded at `now`
    #[must_use]
    pub fn expired(&self, now: i64, retention_secs: i64) -> bool {
        if self.revoked {
            return true;
        }
        self.applied_at
            .or(self.failed_at)
            .is_some_and(|since| now.saturating_sub(since) >= retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> StateImage {
        StateImage {
            data: b"rows=3".to_vec(),
            assets: BTreeMap::from([
                ("theme/colors.json".to_string(), b"{}".to_vec()),
                ("icon.svg".to_string(), b"<svg/>".to_vec()),
            ]),
        }
    }

    #[test]
    fn dir_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStateStore::new(dir.path());
        store.restore(&image()).unwrap();
        assert_eq!(store.export().unwrap(), image());

        let smaller = StateImage {
            data: b"rows=1".to_vec(),
            assets: BTreeMap::new(),
        };
        store.restore(&smaller).unwrap();
        assert_eq!(store.export().unwrap(), smaller);
    }

    #[test]
    fn dir_store_refuses_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStateStore::new(dir.path());
        let bad = StateImage {
            data: Vec::new(),
            assets: BTreeMap::from([("../outside".to_string(), Vec::new())]),
        };
        assert!(matches!(store.restore(&bad), Err(StateError::Corrupt(_))));
    }

    #[test]
    fn disabled_modules_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStateStore::new(dir.path());
        store.disable_modules(&["Journal".into()]).unwrap();
        store.disable_modules(&["MoodOrb".into()]).unwrap();
        assert_eq!(store.disabled_modules().unwrap().len(), 2);
    }

    #[test]
    fn enabling_reports_only_disabled_modules() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStateStore::new(dir.path());
        store.disable_modules(&["Journal".into(), "MoodOrb".into()]).unwrap();

        let enabled = store.enable_modules(&["Journal".into(), "GoalAligner".into()]).unwrap();
        assert_eq!(enabled, vec!["Journal".to_string()]);
        assert_eq!(store.disabled_modules().unwrap(), BTreeSet::from(["MoodOrb".to_string()]));

        let memory = MemoryStateStore::default();
        memory.disable_modules(&["Weather".into()]).unwrap();
        assert_eq!(memory.enable_modules(&["Weather".into()]).unwrap(), vec!["Weather".to_string()]);
        assert!(memory.disabled_modules().is_empty());
    }

    #[test]
    fn expiry_rules() {
        let mut snapshot = Snapshot {
            id: 1,
            version: "1.1.0".into(),
            image: StateImage::default(),
            prior: None,
            introduced_modules: Vec::new(),
            steps: vec![(3, true), (4, false)],
            taken_at: 100,
            applied_at: None,
            failed_at: None,
            revoked: false,
        };
        assert_eq!(snapshot.irreversible_steps(), vec![4]);
        assert!(!snapshot.expired(10_000, 60));
        snapshot.applied_at = Some(100);
        assert!(!snapshot.expired(159, 60));
        assert!(snapshot.expired(160, 60));

        snapshot.applied_at = None;
        snapshot.failed_at = Some(200);
        assert!(!snapshot.expired(259, 60));
        assert!(snapshot.expired(260, 60));
    }
}
