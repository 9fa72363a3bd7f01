//! Server configuration
//!
//! Read from the file named by `THESIS_CONFIG`, otherwise from
//! `config.toml` in the platform config directory. Absent keys take their
//! defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "THESIS_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_port: u16,
    pub database_path: PathBuf,
    pub busy_timeout_ms: u64,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let database_path = project_dirs()
            .map(|dirs| dirs.data_dir().join("thesis.db"))
            .unwrap_or_else(|| PathBuf::from("thesis.db"));

        Self {
            listen_port: thesis_net::DEFAULT_PORT,
            database_path,
            busy_timeout_ms: 5000,
            max_connections: thesis_net::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    /// Resolve the configuration for this process
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let dirs = project_dirs().ok_or(Error::NoProjectDir("config"))?;
        let path = dirs.config_dir().join("config.toml");
        if path.exists() {
            Self::from_file(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Read an explicit config file; it must exist
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("edu", "thesis", "thesis-server")
}
