//! Service instances: the identity that survives reconfiguration.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ServiceError;
use crate::generation::GenerationClock;
use crate::service::Lifecycle;
use crate::services::{CounterState, NamedService, PropertiesState, ServiceState, WorkdirState};
use crate::snapshot::{ServiceDescriptor, ServiceKind};

/// One live named service.
///
/// Instances are shared as `Arc<ServiceInstance>`; pointer identity is the
/// service's identity. The registry mutates an instance in place for as long
/// as its name (and kind) stays in the configuration.
pub struct ServiceInstance {
    name: String,
    created_generation: u64,
    service: NamedService,
    lifecycle: Mutex<Lifecycle>,
}

/// Point-in-time view of an instance, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub kind: ServiceKind,
    pub lifecycle: Lifecycle,
    #[serde(rename = "createdGeneration")]
    pub created_generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl ServiceInstance {
    pub(crate) fn construct(
        descriptor: &ServiceDescriptor,
        generation: u64,
        clock: &GenerationClock,
    ) -> Result<Self, ServiceError> {
        let service = NamedService::construct(descriptor, clock)?;
        Ok(Self {
            name: descriptor.name.clone(),
            created_generation: generation,
            service,
            lifecycle: Mutex::new(Lifecycle::Unstarted),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ServiceKind {
        self.service.kind()
    }

    pub fn service(&self) -> &NamedService {
        &self.service
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    /// Generation of the pass that created this instance.
    pub fn created_generation(&self) -> u64 {
        self.created_generation
    }

    /// Committed counter state, if this is a counter service.
    pub fn counter(&self) -> Option<Arc<CounterState>> {
        self.service.as_counter().and_then(|c| c.state())
    }

    /// Committed properties, if this is a properties service.
    pub fn properties(&self) -> Option<Arc<PropertiesState>> {
        self.service.as_properties().and_then(|c| c.state())
    }

    /// Committed workdir state, if this is a workdir service.
    pub fn workdir(&self) -> Option<Arc<WorkdirState>> {
        self.service.as_workdir().and_then(|c| c.state())
    }

    pub fn status(&self) -> ServiceStatus {
        self.status_with(self.service.state_json())
    }

    /// Status carrying the state committed in a particular generation.
    pub(crate) fn status_at(&self, state: Option<&ServiceState>) -> ServiceStatus {
        self.status_with(state.and_then(ServiceState::to_json))
    }

    fn status_with(&self, state: Option<serde_json::Value>) -> ServiceStatus {
        ServiceStatus {
            name: self.name.clone(),
            kind: self.kind(),
            lifecycle: self.lifecycle(),
            created_generation: self.created_generation,
            state,
        }
    }

    pub(crate) fn latest_state(&self) -> Option<ServiceState> {
        self.service.latest_state()
    }

    pub(crate) fn start(&self) -> Result<(), ServiceError> {
        let current = self.lifecycle();
        if current != Lifecycle::Unstarted {
            return Err(ServiceError::Startup(format!(
                "'{}' is already {}",
                self.name, current
            )));
        }
        self.service.start()?;
        *self.lifecycle.lock() = Lifecycle::Running;
        Ok(())
    }

    pub(crate) fn reconfigure(
        &self,
        generation: u64,
        args: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let current = self.lifecycle();
        if current != Lifecycle::Running {
            return Err(ServiceError::Reconfigure(format!(
                "'{}' is {}",
                self.name, current
            )));
        }
        self.service.reconfigure(generation, args)
    }

    /// Stop the service. The instance is `Stopped` afterwards even if the
    /// service's own stop hook failed.
    pub(crate) fn stop(&self) -> Result<(), ServiceError> {
        let current = self.lifecycle();
        if current != Lifecycle::Running {
            return Err(ServiceError::Stop(format!("'{}' is {}", self.name, current)));
        }
        let result = self.service.stop();
        *self.lifecycle.lock() = Lifecycle::Stopped;
        result
    }
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("lifecycle", &self.lifecycle())
            .field("created_generation", &self.created_generation)
            .finish()
    }
}
