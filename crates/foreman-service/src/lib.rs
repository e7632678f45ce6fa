//! Reconfigurable named services and live reconfiguration.
//!
//! The [`ServiceRegistry`] holds the named services of the running master.
//! Applying a [`ConfigSnapshot`] runs one reconcile pass: surviving services
//! are reconfigured in place, new ones are constructed and started, dropped
//! ones are stopped, and the result is committed in a single swap. Readers
//! resolve services by name at the moment of use and always observe one
//! complete generation.

pub mod error;
pub mod generation;
pub mod instance;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod services;
pub mod snapshot;

pub use error::{FailureKind, ReconcileError, ServiceError};
pub use generation::GenerationClock;
pub use instance::{ServiceInstance, ServiceStatus};
pub use reconcile::{Outcome, ReconcileEntry, ReconcilePlan, ReconcileReport};
pub use registry::{Committed, ServiceRegistry};
pub use service::{Lifecycle, ReconfigurableService, ServiceCell};
pub use services::{NamedService, ServiceState};
pub use snapshot::{ConfigSnapshot, ServiceDescriptor, ServiceKind};
