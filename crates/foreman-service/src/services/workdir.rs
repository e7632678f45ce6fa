//! Workdir service: a directory builds can run in.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::service::ReconfigurableService;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkdirArgs {
    pub path: PathBuf,
    /// Remove the directory when the service is stopped.
    #[serde(default)]
    pub clean_on_stop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkdirState {
    pub path: PathBuf,
    pub clean_on_stop: bool,
}

pub struct WorkdirService {
    name: String,
    initial: PathBuf,
}

impl WorkdirService {
    /// Directory created at startup.
    pub fn initial_path(&self) -> &Path {
        &self.initial
    }
}

impl ReconfigurableService for WorkdirService {
    type Args = WorkdirArgs;
    type State = WorkdirState;

    fn construct(name: &str, args: &WorkdirArgs) -> Result<Self, ServiceError> {
        if args.path.as_os_str().is_empty() {
            return Err(ServiceError::Construction("workdir path is empty".into()));
        }
        Ok(Self {
            name: name.to_string(),
            initial: args.path.clone(),
        })
    }

    fn start(&self) -> Result<(), ServiceError> {
        std::fs::create_dir_all(&self.initial).map_err(|e| {
            ServiceError::Startup(format!("cannot create {}: {}", self.initial.display(), e))
        })?;
        info!("Workdir '{}' ready at {}", self.name, self.initial.display());
        Ok(())
    }

    fn reconfigure(
        &self,
        current: Option<&WorkdirState>,
        args: WorkdirArgs,
    ) -> Result<WorkdirState, ServiceError> {
        let moved = current.map_or(true, |s| s.path != args.path);
        if moved {
            std::fs::create_dir_all(&args.path).map_err(|e| {
                ServiceError::Reconfigure(format!("cannot create {}: {}", args.path.display(), e))
            })?;
            debug!("Workdir '{}' now at {}", self.name, args.path.display());
        }
        Ok(WorkdirState {
            path: args.path,
            clean_on_stop: args.clean_on_stop,
        })
    }

    fn stop(&self, last: Option<&WorkdirState>) -> Result<(), ServiceError> {
        let Some(state) = last else {
            return Ok(());
        };
        if state.clean_on_stop {
            std::fs::remove_dir_all(&state.path).map_err(|e| {
                ServiceError::Stop(format!("cannot remove {}: {}", state.path.display(), e))
            })?;
            info!("Workdir '{}' removed {}", self.name, state.path.display());
        }
        Ok(())
    }
}
