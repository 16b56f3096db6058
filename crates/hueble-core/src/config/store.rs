//! Last-known peripheral identity, persisted between runs.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use hueble_types::PeripheralId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::Result;

/// Where the connection manager remembers the last bulb it reached.
pub trait IdentityStore: Send + Sync {
    fn load_last_identity(&self) -> Option<PeripheralId>;

    /// # Errors
    ///
    /// Returns an error if the identity cannot be persisted.
    fn save_last_identity(&self, identity: &PeripheralId) -> Result<()>;
}

/// On-disk config file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_address: Option<PeripheralId>,

    /// Keys this version does not know about, written back untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// Load settings from file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save settings to file, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// JSON file backed identity store
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for ConfigStore {
    fn load_last_identity(&self) -> Option<PeripheralId> {
        match Settings::load(&self.path) {
            Ok(settings) => settings.last_address,
            Err(e) => {
                warn!("Ignoring unreadable config {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn save_last_identity(&self, identity: &PeripheralId) -> Result<()> {
        let mut settings = Settings::load(&self.path).unwrap_or_else(|e| {
            warn!("Replacing unreadable config {:?}: {}", self.path, e);
            Settings::default()
        });

        if settings.last_address.as_ref() == Some(identity) {
            return Ok(());
        }

        settings.last_address = Some(identity.clone());
        settings.save(&self.path)?;
        debug!("Saved last address {} to {:?}", identity, self.path);
        Ok(())
    }
}

/// In-memory identity store, for one-off connections and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    last: Mutex<Option<PeripheralId>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identity(identity: impl Into<PeripheralId>) -> Self {
        Self {
            last: Mutex::new(Some(identity.into())),
        }
    }
}

impl IdentityStore for MemoryStore {
    fn load_last_identity(&self) -> Option<PeripheralId> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save_last_identity(&self, identity: &PeripheralId) -> Result<()> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        Ok(())
    }
}
