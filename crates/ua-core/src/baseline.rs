//! Last accepted release storage
//!
//! The accepted release is the baseline every candidate is classified against.
//! Only the apply/rollback controller writes it.

use crate::error::BaselineError;
use crate::release::Release;
use parking_lot::RwLock;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Storage for the last accepted release
pub trait BaselineStore: Send + Sync {
    /// Current accepted release, `None` before the first install
    ///
    /// # Errors
    /// Storage failures or a baseline that fails verification
    fn load(&self) -> Result<Option<Release>, BaselineError>;

    /// Replace the accepted release
    ///
    /// # Errors
    /// Storage failures
    fn store(&self, release: &Release) -> Result<(), BaselineError>;

    /// Forget the accepted release (rollback of a first install)
    ///
    /// # Errors
    /// Storage failures
    fn clear(&self) -> Result<(), BaselineError>;
}

/// In-memory baseline
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    current: RwLock<Option<Release>>,
}

impl MemoryBaselineStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `release`
    #[must_use]
    pub fn with_release(release: Release) -> Self {
        Self {
            current: RwLock::new(Some(release)),
        }
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self) -> Result<Option<Release>, BaselineError> {
        Ok(self.current.read().clone())
    }

    fn store(&self, release: &Release) -> Result<(), BaselineError> {
        *self.current.write() = Some(release.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), BaselineError> {
        *self.current.write() = None;
        Ok(())
    }
}

/// JSON file baseline, replaced atomically via rename
#[derive(Debug, Clone)]
pub struct JsonFileBaselineStore {
    path: PathBuf,
}

impl JsonFileBaselineStore {
    /// Store backed by `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl BaselineStore for JsonFileBaselineStore {
    fn load(&self) -> Result<Option<Release>, BaselineError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let release: Release =
            serde_json::from_str(&text).map_err(|e| BaselineError::Corrupt(e.to_string()))?;
        release.verify()?;
        Ok(Some(release))
    }

    fn store(&self, release: &Release) -> Result<(), BaselineError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(release).map_err(|e| BaselineError::Corrupt(e.to_string()))?;
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), BaselineError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
