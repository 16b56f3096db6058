use directories::ProjectDirs;
use std::path::PathBuf;

use crate::{Error, Result};

/// Application paths following platform conventions
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/hueble)
    pub config: PathBuf,

    /// Runtime directory for the daemon PID file
    pub runtime: PathBuf,

    /// Config file holding the last-known bulb address
    pub config_file: PathBuf,

    /// Daemon liveness marker
    pub pid_file: PathBuf,
}

impl Directories {
    /// Resolve the standard paths for the current user.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no home directory can be determined.
    pub fn new() -> Result<Self> {
        let project = ProjectDirs::from("", "", "hueble")
            .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))?;

        let config = project.config_dir().to_path_buf();
        let runtime = project
            .runtime_dir()
            .map_or_else(|| project.data_local_dir().to_path_buf(), PathBuf::from);

        Ok(Self {
            config_file: config.join("config.json"),
            pid_file: runtime.join("daemon.pid"),
            config,
            runtime,
        })
    }

    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.json"),
            pid_file: base.join("daemon.pid"),
            config: base.clone(),
            runtime: base,
        }
    }

    /// Ensure all directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.runtime)?;
        Ok(())
    }
}
