//! The reconfigurable service contract.
//!
//! A service is constructed from its descriptor's arguments, started once,
//! reconfigured on every reload that keeps its name (including the reload
//! that introduced it), and stopped once when its name disappears.
//!
//! Services never hold their reconfigurable state themselves. `reconfigure`
//! returns the new state and [`ServiceCell`] stages it against the pass's
//! generation, so a failed reconfigure leaves the previous state untouched
//! and a successful one is only observed after the registry commits.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ServiceError;
use crate::generation::{GenerationClock, Staged};

/// Lifecycle position of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Unstarted,
    Running,
    Stopped,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Trait implemented by every pluggable service variant.
///
/// All hooks run synchronously on the reconciling thread and may block.
pub trait ReconfigurableService: Send + Sync + Sized + 'static {
    /// Typed constructor arguments.
    type Args: DeserializeOwned;
    /// State produced by `reconfigure`.
    type State: Serialize + Send + Sync + 'static;

    /// Build the service from its initial arguments.
    fn construct(name: &str, args: &Self::Args) -> Result<Self, ServiceError>;

    /// Called once after construction, before the first reconfigure.
    fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Compute the state for `args`, given the currently visible state.
    fn reconfigure(
        &self,
        current: Option<&Self::State>,
        args: Self::Args,
    ) -> Result<Self::State, ServiceError>;

    /// Called once when the service leaves the configuration.
    fn stop(&self, _last: Option<&Self::State>) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// A service together with its generation-staged state.
pub struct ServiceCell<S: ReconfigurableService> {
    service: S,
    state: Staged<S::State>,
}

impl<S: ReconfigurableService> ServiceCell<S> {
    pub(crate) fn construct(
        name: &str,
        args: &serde_json::Value,
        clock: &GenerationClock,
    ) -> Result<Self, ServiceError> {
        let args = parse_args::<S::Args>(args).map_err(ServiceError::Construction)?;
        let service = S::construct(name, &args)?;
        Ok(Self {
            service,
            state: Staged::new(clock.clone()),
        })
    }

    /// The service object itself.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// State as of the committed generation. `None` before the first commit.
    pub fn state(&self) -> Option<Arc<S::State>> {
        self.state.get()
    }

    pub(crate) fn latest_state(&self) -> Option<Arc<S::State>> {
        self.state.latest()
    }

    pub(crate) fn start(&self) -> Result<(), ServiceError> {
        self.service.start()
    }

    pub(crate) fn reconfigure(
        &self,
        generation: u64,
        args: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let args = parse_args::<S::Args>(args).map_err(ServiceError::Reconfigure)?;
        let current = self.state.get();
        let next = self.service.reconfigure(current.as_deref(), args)?;
        self.state.stage(generation, next);
        Ok(())
    }

    pub(crate) fn stop(&self) -> Result<(), ServiceError> {
        let last = self.state.get();
        self.service.stop(last.as_deref())
    }

    pub(crate) fn state_json(&self) -> Option<serde_json::Value> {
        self.state
            .get()
            .and_then(|s| serde_json::to_value(&*s).ok())
    }
}

fn parse_args<A: DeserializeOwned>(args: &serde_json::Value) -> Result<A, String> {
    // Services without arguments may be declared without an `args` key.
    let args = if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args.clone()
    };
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))
}
