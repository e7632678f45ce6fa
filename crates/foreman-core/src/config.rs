//! Master process configuration and working directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default HTTP port of the control API.
pub const DEFAULT_PORT: u16 = 8010;

/// Default per-consumer capacity of the message bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Top-level Foreman master configuration.
///
/// This is the process-level configuration (where things live, which port to
/// listen on). The reloadable part, services, builders and schedulers, lives
/// in the master configuration file at `config_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// HTTP control API port.
    pub port: u16,
    /// Master configuration file (`master.json`).
    pub config_file: PathBuf,
    /// Base directory builds run in (`workdir/`).
    pub workdir: PathBuf,
    /// Bounded capacity of each message bus consumer.
    pub event_capacity: usize,
}

impl MasterConfig {
    /// Create configuration from the process environment and defaults.
    pub fn from_env() -> std::io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// Creates the build working directory if needed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::io::Result<Self> {
        let port = lookup("FOREMAN_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let config_file = lookup("FOREMAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("master.json"));

        let workdir = lookup("FOREMAN_WORKDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("workdir"));

        let event_capacity = lookup("FOREMAN_EVENT_CAPACITY")
            .and_then(|c| c.parse().ok())
            .filter(|c: &usize| *c > 0)
            .unwrap_or(DEFAULT_EVENT_CAPACITY);

        let config = Self {
            port,
            config_file,
            workdir,
            event_capacity,
        };
        config.ensure_dirs()?;
        Ok(config)
    }

    /// Configuration rooted at `base`, for embedding a master in tests or tools.
    pub fn in_dir(base: impl AsRef<Path>) -> std::io::Result<Self> {
        let base = base.as_ref();
        let config = Self {
            port: DEFAULT_PORT,
            config_file: base.join("master.json"),
            workdir: base.join("workdir"),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        };
        config.ensure_dirs()?;
        Ok(config)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.workdir)
    }
}
