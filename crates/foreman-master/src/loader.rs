//! Master configuration loading.
//!
//! A loader turns whatever describes the desired configuration into a
//! [`MasterSnapshot`]. The reload count is the loader's own state: a load
//! describes the next generation, and only becomes a reload once the master
//! has applied it and calls [`ConfigLoader::commit`].

use std::path::{Path, PathBuf};

use foreman_core::{Error, Result};
use foreman_service::{ConfigSnapshot, ServiceDescriptor};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Placeholder in service arguments replaced by the reload count.
pub const RELOAD_PLACEHOLDER: &str = "${reload}";

/// Builders and schedulers of one configuration generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub builders: Vec<BuilderConfig>,
    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
}

impl BuildConfig {
    pub fn builder(&self, name: &str) -> Option<&BuilderConfig> {
        self.builders.iter().find(|b| b.name == name)
    }

    pub fn scheduler(&self, name: &str) -> Option<&SchedulerConfig> {
        self.schedulers.iter().find(|s| s.name == name)
    }
}

/// Snapshot type the master applies.
pub type MasterSnapshot = ConfigSnapshot<BuildConfig>;

/// A named sequence of build steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub name: String,
    #[serde(default)]
    pub workers: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// One build step.
///
/// Service names in steps are resolved when the step runs, not when the
/// build is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepConfig {
    /// Run a shell command.
    Shell {
        command: String,
        /// Properties service whose entries become environment variables.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<String>,
        /// Workdir service the command runs in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workdir: Option<String>,
    },
    /// Record the current state of a named service.
    ServiceSummary { service: String },
}

impl StepConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Shell { .. } => "shell",
            Self::ServiceSummary { .. } => "service-summary",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Starts builds only when asked through the control API.
    #[default]
    Force,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: SchedulerKind,
    #[serde(rename = "builderNames")]
    pub builder_names: Vec<String>,
}

/// Produces one configuration snapshot per reload.
pub trait ConfigLoader: Send {
    fn load(&mut self) -> Result<MasterSnapshot>;

    /// The snapshot from the last `load` was applied.
    fn commit(&mut self) {}
}

impl<F> ConfigLoader for F
where
    F: FnMut() -> Result<MasterSnapshot> + Send,
{
    fn load(&mut self) -> Result<MasterSnapshot> {
        self()
    }
}

/// On-disk layout of `master.json`.
#[derive(Debug, Deserialize)]
struct MasterFile {
    #[serde(default)]
    services: Vec<ServiceDescriptor>,
    #[serde(flatten)]
    build: BuildConfig,
}

/// Loads the master configuration from a JSON file on every reload.
pub struct FileConfigLoader {
    path: PathBuf,
    reloads: u64,
}

impl FileConfigLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reloads: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of applied reloads so far.
    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    /// Parse the file as the next generation would see it.
    pub fn check(&self) -> Result<MasterSnapshot> {
        parse_master_file(&self.path, self.reloads + 1)
    }
}

impl ConfigLoader for FileConfigLoader {
    /// Loading again without a commit yields the same generation.
    fn load(&mut self) -> Result<MasterSnapshot> {
        let snapshot = self.check()?;
        debug!(
            "Loaded {} (generation {}): {} services, {} builders",
            self.path.display(),
            snapshot.generation,
            snapshot.services.len(),
            snapshot.extra.builders.len()
        );
        Ok(snapshot)
    }

    fn commit(&mut self) {
        self.reloads += 1;
    }
}

fn parse_master_file(path: &Path, generation: u64) -> Result<MasterSnapshot> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Config(format!("{} not found", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    let file: MasterFile = serde_json::from_str(&data)?;

    let services = file
        .services
        .into_iter()
        .map(|mut s| {
            substitute_reload(&mut s.args, generation);
            s
        })
        .collect();

    Ok(MasterSnapshot::with_extra(generation, services, file.build))
}

/// Replace every string value equal to [`RELOAD_PLACEHOLDER`] with `reload`.
fn substitute_reload(value: &mut serde_json::Value, reload: u64) {
    if value.as_str() == Some(RELOAD_PLACEHOLDER) {
        *value = serde_json::Value::from(reload);
        return;
    }
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_reload(item, reload);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute_reload(item, reload);
            }
        }
        _ => {}
    }
}
