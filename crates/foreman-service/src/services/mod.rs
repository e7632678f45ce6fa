//! Built-in service variants and the typed union over them.

pub mod counter;
pub mod properties;
pub mod workdir;

pub use counter::{CounterArgs, CounterService, CounterState};
pub use properties::{PropertiesArgs, PropertiesService, PropertiesState};
pub use workdir::{WorkdirArgs, WorkdirService, WorkdirState};

use std::sync::Arc;

use crate::error::ServiceError;
use crate::generation::GenerationClock;
use crate::service::ServiceCell;
use crate::snapshot::{ServiceDescriptor, ServiceKind};

/// State of one service as it was committed in a given generation.
#[derive(Debug, Clone)]
pub enum ServiceState {
    Counter(Arc<CounterState>),
    Properties(Arc<PropertiesState>),
    Workdir(Arc<WorkdirState>),
}

impl ServiceState {
    pub fn as_counter(&self) -> Option<&Arc<CounterState>> {
        match self {
            Self::Counter(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_properties(&self) -> Option<&Arc<PropertiesState>> {
        match self {
            Self::Properties(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_workdir(&self) -> Option<&Arc<WorkdirState>> {
        match self {
            Self::Workdir(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Counter(s) => serde_json::to_value(&**s).ok(),
            Self::Properties(s) => serde_json::to_value(&**s).ok(),
            Self::Workdir(s) => serde_json::to_value(&**s).ok(),
        }
    }
}

/// A named service, one variant per [`ServiceKind`].
pub enum NamedService {
    Counter(ServiceCell<CounterService>),
    Properties(ServiceCell<PropertiesService>),
    Workdir(ServiceCell<WorkdirService>),
}

impl NamedService {
    pub(crate) fn construct(
        descriptor: &ServiceDescriptor,
        clock: &GenerationClock,
    ) -> Result<Self, ServiceError> {
        let name = descriptor.name.as_str();
        let args = &descriptor.args;
        Ok(match descriptor.kind {
            ServiceKind::Counter => Self::Counter(ServiceCell::construct(name, args, clock)?),
            ServiceKind::Properties => {
                Self::Properties(ServiceCell::construct(name, args, clock)?)
            }
            ServiceKind::Workdir => Self::Workdir(ServiceCell::construct(name, args, clock)?),
        })
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::Counter(_) => ServiceKind::Counter,
            Self::Properties(_) => ServiceKind::Properties,
            Self::Workdir(_) => ServiceKind::Workdir,
        }
    }

    pub fn as_counter(&self) -> Option<&ServiceCell<CounterService>> {
        match self {
            Self::Counter(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn as_properties(&self) -> Option<&ServiceCell<PropertiesService>> {
        match self {
            Self::Properties(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn as_workdir(&self) -> Option<&ServiceCell<WorkdirService>> {
        match self {
            Self::Workdir(cell) => Some(cell),
            _ => None,
        }
    }

    /// Committed state rendered as JSON, for status output.
    pub fn state_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Counter(cell) => cell.state_json(),
            Self::Properties(cell) => cell.state_json(),
            Self::Workdir(cell) => cell.state_json(),
        }
    }

    /// State produced by the most recent reconfigure, before or after its
    /// commit.
    pub(crate) fn latest_state(&self) -> Option<ServiceState> {
        match self {
            Self::Counter(cell) => cell.latest_state().map(ServiceState::Counter),
            Self::Properties(cell) => cell.latest_state().map(ServiceState::Properties),
            Self::Workdir(cell) => cell.latest_state().map(ServiceState::Workdir),
        }
    }

    pub(crate) fn start(&self) -> Result<(), ServiceError> {
        match self {
            Self::Counter(cell) => cell.start(),
            Self::Properties(cell) => cell.start(),
            Self::Workdir(cell) => cell.start(),
        }
    }

    pub(crate) fn reconfigure(
        &self,
        generation: u64,
        args: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        match self {
            Self::Counter(cell) => cell.reconfigure(generation, args),
            Self::Properties(cell) => cell.reconfigure(generation, args),
            Self::Workdir(cell) => cell.reconfigure(generation, args),
        }
    }

    pub(crate) fn stop(&self) -> Result<(), ServiceError> {
        match self {
            Self::Counter(cell) => cell.stop(),
            Self::Properties(cell) => cell.stop(),
            Self::Workdir(cell) => cell.stop(),
        }
    }
}
