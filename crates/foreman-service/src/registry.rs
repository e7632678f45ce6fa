//! Service registry: the committed set of named services.
//!
//! Readers look services up by name at any time. The visible mapping is an
//! `Arc` swapped under a write lock held only for the swap itself; the slow
//! per-service work of a reconcile pass happens before that, without any
//! registry-wide lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{ReconcileError, ServiceError};
use crate::generation::GenerationClock;
use crate::instance::{ServiceInstance, ServiceStatus};
use crate::reconcile::{self, ReconcileReport};
use crate::services::{CounterState, PropertiesState, ServiceState, WorkdirState};
use crate::snapshot::ConfigSnapshot;

/// The services of one committed generation.
///
/// Besides the instances, a `Committed` keeps the state every service had
/// when this generation was committed. Reads through [`state`](Self::state)
/// and the typed accessors stay on this generation however long the value is
/// held, while the accessors on [`ServiceInstance`] follow later commits.
#[derive(Debug, Default)]
pub struct Committed {
    generation: u64,
    by_name: HashMap<String, Arc<ServiceInstance>>,
    states: HashMap<String, ServiceState>,
    order: Vec<String>,
}

impl Committed {
    /// Capture a pass's result. Must run before the pass is published, while
    /// each instance's latest state is the one this pass produced.
    pub(crate) fn new(
        generation: u64,
        by_name: HashMap<String, Arc<ServiceInstance>>,
        order: Vec<String>,
    ) -> Self {
        let states = by_name
            .iter()
            .filter_map(|(name, instance)| {
                instance.latest_state().map(|state| (name.clone(), state))
            })
            .collect();
        Self {
            generation,
            by_name,
            states,
            order,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceInstance>> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// State of `name` as of this generation.
    pub fn state(&self, name: &str) -> Option<&ServiceState> {
        self.states.get(name)
    }

    pub fn counter(&self, name: &str) -> Option<Arc<CounterState>> {
        self.state(name).and_then(ServiceState::as_counter).cloned()
    }

    pub fn properties(&self, name: &str) -> Option<Arc<PropertiesState>> {
        self.state(name).and_then(ServiceState::as_properties).cloned()
    }

    pub fn workdir(&self, name: &str) -> Option<Arc<WorkdirState>> {
        self.state(name).and_then(ServiceState::as_workdir).cloned()
    }

    /// Status of every service with its state as of this generation.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.instances()
            .map(|i| i.status_at(self.state(i.name())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Names in the order of the snapshot that produced them.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Instances in the order of the snapshot that produced them.
    pub fn instances(&self) -> impl Iterator<Item = &Arc<ServiceInstance>> {
        self.order.iter().filter_map(|n| self.by_name.get(n))
    }
}

/// Holds the currently active named services.
pub struct ServiceRegistry {
    clock: GenerationClock,
    committed: RwLock<Arc<Committed>>,
    /// Serializes reconcile passes.
    pass: Mutex<()>,
}

impl ServiceRegistry {
    /// Create an empty registry at generation 0.
    pub fn new() -> Self {
        Self {
            clock: GenerationClock::new(),
            committed: RwLock::new(Arc::new(Committed::default())),
            pass: Mutex::new(()),
        }
    }

    /// Resolve a named service in the committed generation.
    pub fn lookup(&self, name: &str) -> Option<Arc<ServiceInstance>> {
        self.committed.read().get(name).cloned()
    }

    /// Like [`lookup`](Self::lookup), with absence as an error.
    pub fn require(&self, name: &str) -> Result<Arc<ServiceInstance>, ServiceError> {
        self.lookup(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.committed.read().contains(name)
    }

    /// Names of all active services.
    pub fn snapshot_names(&self) -> BTreeSet<String> {
        self.committed.read().by_name.keys().cloned().collect()
    }

    /// The whole committed generation. State reads through the returned
    /// value all come from that one generation.
    pub fn view(&self) -> Arc<Committed> {
        self.committed.read().clone()
    }

    /// Status of every active service, in configuration order.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.view().statuses()
    }

    /// The most recently committed generation.
    pub fn generation(&self) -> u64 {
        self.clock.committed()
    }

    /// Apply `snapshot`, waiting for any pass already in progress.
    pub fn reconfigure<E>(
        &self,
        snapshot: &ConfigSnapshot<E>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let _pass = self.pass.lock();
        reconcile::run(self, snapshot)
    }

    /// Apply `snapshot`, or fail with [`ReconcileError::InProgress`] if
    /// another pass is running.
    pub fn try_reconfigure<E>(
        &self,
        snapshot: &ConfigSnapshot<E>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let Some(_pass) = self.pass.try_lock() else {
            return Err(ReconcileError::InProgress);
        };
        reconcile::run(self, snapshot)
    }

    /// Stop and remove every service.
    pub fn shutdown(&self) -> Result<ReconcileReport, ReconcileError> {
        self.reconfigure(&ConfigSnapshot::empty(0))
    }

    pub(crate) fn clock(&self) -> &GenerationClock {
        &self.clock
    }

    /// Publish the result of a pass. Readers see the old generation until
    /// this returns, then the new one in full.
    pub(crate) fn apply(&self, next: Committed) {
        let generation = next.generation;
        let mut committed = self.committed.write();
        *committed = Arc::new(next);
        self.clock.publish(generation);
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
