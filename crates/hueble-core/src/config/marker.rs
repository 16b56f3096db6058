//! Liveness marker for a running daemon.
//!
//! The marker only records that a daemon believes itself running; probing
//! the listening port is the real liveness check.

use std::path::{Path, PathBuf};

use crate::Result;

pub trait LivenessMarker: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the marker cannot be written.
    fn write(&self, token: &str) -> Result<()>;

    fn exists(&self) -> bool;

    /// Remove the marker. Removing an absent marker succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be removed.
    fn remove(&self) -> Result<()>;
}

/// PID file marker
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token written by the last daemon, if the file is present.
    #[must_use]
    pub fn read_token(&self) -> Option<String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
    }
}

impl LivenessMarker for PidFile {
    fn write(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)?;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
