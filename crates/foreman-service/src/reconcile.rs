//! Reconcile engine: diff a snapshot against the registry and apply it.
//!
//! One pass runs in four steps:
//!
//! 1. reconfigure surviving services in place, in descriptor order;
//! 2. construct, start and reconfigure new services, in descriptor order;
//! 3. stop services that left the configuration;
//! 4. commit the new mapping in a single swap.
//!
//! Per-service failures are collected in the report and never abort the
//! pass. Stops run last so services being updated or created can still
//! resolve a service that is on its way out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{FailureKind, ReconcileError, ServiceError};
use crate::generation::GenerationClock;
use crate::instance::ServiceInstance;
use crate::registry::{Committed, ServiceRegistry};
use crate::snapshot::{ConfigSnapshot, ServiceDescriptor};

/// A service to create during step 2.
#[derive(Debug, Clone, Copy)]
pub struct Creation<'a> {
    pub descriptor: &'a ServiceDescriptor,
    /// The name is active with a different kind; the old instance is
    /// retired once the new one is up.
    pub replaces: bool,
}

/// The actions one pass will take, by name.
#[derive(Debug, Default)]
pub struct ReconcilePlan<'a> {
    pub to_update: Vec<&'a ServiceDescriptor>,
    pub to_create: Vec<Creation<'a>>,
    pub to_remove: Vec<String>,
}

impl<'a> ReconcilePlan<'a> {
    /// Diff `services` against the committed generation.
    ///
    /// Fails without side effects if the snapshot has a blank or duplicate
    /// service name.
    pub fn compute(
        current: &Committed,
        services: &'a [ServiceDescriptor],
    ) -> Result<Self, ReconcileError> {
        let mut seen = HashSet::with_capacity(services.len());
        for descriptor in services {
            if descriptor.name.trim().is_empty() {
                return Err(ReconcileError::Aborted("service with blank name".into()));
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(ReconcileError::Aborted(format!(
                    "duplicate service name '{}'",
                    descriptor.name
                )));
            }
        }

        let mut plan = Self::default();
        for descriptor in services {
            match current.get(&descriptor.name) {
                Some(existing) if existing.kind() == descriptor.kind => {
                    plan.to_update.push(descriptor)
                }
                Some(_) => plan.to_create.push(Creation {
                    descriptor,
                    replaces: true,
                }),
                None => plan.to_create.push(Creation {
                    descriptor,
                    replaces: false,
                }),
            }
        }
        plan.to_remove = current
            .names()
            .iter()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect();

        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.to_update.is_empty() && self.to_create.is_empty() && self.to_remove.is_empty()
    }
}

/// What happened to one name during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Created,
    Updated,
    /// A new instance of a different kind took over the name.
    Replaced {
        #[serde(rename = "stopError", skip_serializing_if = "Option::is_none")]
        stop_error: Option<String>,
    },
    /// The service left the configuration.
    Removed,
    /// For `stop` failures the name has still been removed.
    Failed { kind: FailureKind, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileEntry {
    pub name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Per-name results of one pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Registry generation committed by this pass.
    pub generation: u64,
    /// Generation number of the applied snapshot.
    #[serde(rename = "configGeneration")]
    pub config_generation: u64,
    pub entries: Vec<ReconcileEntry>,
}

impl ReconcileReport {
    fn new(generation: u64, config_generation: u64) -> Self {
        Self {
            generation,
            config_generation,
            entries: Vec::new(),
        }
    }

    fn record(&mut self, name: &str, outcome: Outcome) {
        self.entries.push(ReconcileEntry {
            name: name.to_string(),
            outcome,
        });
    }

    fn fail(&mut self, name: &str, error: &ServiceError) {
        self.record(
            name,
            Outcome::Failed {
                kind: error.kind(),
                error: error.to_string(),
            },
        );
    }

    /// Outcome for `name`, if the pass touched it.
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.outcome)
    }

    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.names_where(|o| matches!(o, Outcome::Created))
    }

    pub fn updated(&self) -> impl Iterator<Item = &str> {
        self.names_where(|o| matches!(o, Outcome::Updated))
    }

    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.names_where(|o| matches!(o, Outcome::Removed))
    }

    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.names_where(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    fn names_where(&self, pred: impl Fn(&Outcome) -> bool) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |e| pred(&e.outcome))
            .map(|e| e.name.as_str())
    }
}

/// Run one pass. The caller holds the registry's pass lock.
pub(crate) fn run<E>(
    registry: &ServiceRegistry,
    snapshot: &ConfigSnapshot<E>,
) -> Result<ReconcileReport, ReconcileError> {
    let current = registry.view();
    let generation = current.generation() + 1;
    let plan = ReconcilePlan::compute(&current, &snapshot.services)?;

    info!(
        "Reconcile pass {} (config generation {}): {} to update, {} to create, {} to remove",
        generation,
        snapshot.generation,
        plan.to_update.len(),
        plan.to_create.len(),
        plan.to_remove.len()
    );

    let mut report = ReconcileReport::new(generation, snapshot.generation);
    let mut next: HashMap<String, Arc<ServiceInstance>> =
        HashMap::with_capacity(snapshot.services.len());
    let mut retired: Vec<Arc<ServiceInstance>> = Vec::new();

    // 1. Survivors
    for descriptor in &plan.to_update {
        let Some(instance) = current.get(&descriptor.name).cloned() else {
            continue;
        };
        match instance.reconfigure(generation, &descriptor.args) {
            Ok(()) => {
                debug!("Updated service '{}'", descriptor.name);
                report.record(&descriptor.name, Outcome::Updated);
            }
            Err(e) => {
                warn!("Service '{}' kept its previous configuration: {}", descriptor.name, e);
                report.fail(&descriptor.name, &e);
            }
        }
        next.insert(descriptor.name.clone(), instance);
    }

    // 2. New services
    let mut replaced = Vec::new();
    for creation in &plan.to_create {
        let descriptor = creation.descriptor;
        let previous = current.get(&descriptor.name).filter(|_| creation.replaces);
        match create(descriptor, generation, registry.clock()) {
            Ok(instance) => {
                if let Some(previous) = previous {
                    debug!(
                        "Service '{}' changed kind {} -> {}",
                        descriptor.name,
                        previous.kind(),
                        descriptor.kind
                    );
                    retired.push(previous.clone());
                    replaced.push(descriptor.name.clone());
                } else {
                    debug!("Created service '{}' ({})", descriptor.name, descriptor.kind);
                    report.record(&descriptor.name, Outcome::Created);
                }
                next.insert(descriptor.name.clone(), instance);
            }
            Err(e) => {
                warn!("Service '{}' not started: {}", descriptor.name, e);
                report.fail(&descriptor.name, &e);
                // A failed replacement leaves the old instance serving the name
                if let Some(previous) = previous {
                    next.insert(descriptor.name.clone(), previous.clone());
                }
            }
        }
    }

    // 3. Stops, last
    retired.extend(
        plan.to_remove
            .iter()
            .filter_map(|name| current.get(name).cloned()),
    );
    for instance in retired {
        let name = instance.name().to_string();
        let result = instance.stop();
        if let Err(e) = &result {
            warn!("Service '{}' did not stop cleanly: {}", name, e);
        }
        if replaced.contains(&name) {
            report.record(
                &name,
                Outcome::Replaced {
                    stop_error: result.err().map(|e| e.to_string()),
                },
            );
        } else {
            match result {
                Ok(()) => {
                    debug!("Removed service '{}'", name);
                    report.record(&name, Outcome::Removed);
                }
                Err(e) => report.fail(&name, &e),
            }
        }
    }

    // 4. Commit
    let order = snapshot
        .services
        .iter()
        .filter(|d| next.contains_key(&d.name))
        .map(|d| d.name.clone())
        .collect();
    registry.apply(Committed::new(generation, next, order));

    info!(
        "Reconcile pass {} committed: {} created, {} updated, {} removed, {} failed",
        generation,
        report.created().count(),
        report.updated().count(),
        report.removed().count(),
        report.failed().count()
    );

    Ok(report)
}

/// Construct, start and initially configure one service.
fn create(
    descriptor: &ServiceDescriptor,
    generation: u64,
    clock: &GenerationClock,
) -> Result<Arc<ServiceInstance>, ServiceError> {
    let instance = ServiceInstance::construct(descriptor, generation, clock)?;
    instance.start()?;
    if let Err(e) = instance.reconfigure(generation, &descriptor.args) {
        if let Err(stop_err) = instance.stop() {
            warn!(
                "Service '{}' failed to stop after its initial reconfigure failed: {}",
                descriptor.name, stop_err
            );
        }
        return Err(e);
    }
    Ok(Arc::new(instance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ServiceKind;

    fn counter(name: &str, n: u64) -> ServiceDescriptor {
        ServiceDescriptor::new(
            name,
            ServiceKind::Counter,
            serde_json::json!({ "num_reconfig": n }),
        )
    }

    fn properties(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name, ServiceKind::Properties, serde_json::json!({}))
    }

    #[test]
    fn test_plan_partitions_names() {
        let registry = ServiceRegistry::new();
        registry
            .reconfigure(&ConfigSnapshot::new(
                1,
                vec![counter("keep", 1), counter("drop", 1), counter("morph", 1)],
            ))
            .unwrap();

        let services = vec![counter("new", 2), properties("morph"), counter("keep", 2)];
        let plan = ReconcilePlan::compute(&registry.view(), &services).unwrap();

        let updates: Vec<_> = plan.to_update.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(updates, ["keep"]);
        let creates: Vec<_> = plan
            .to_create
            .iter()
            .map(|c| (c.descriptor.name.as_str(), c.replaces))
            .collect();
        assert_eq!(creates, [("new", false), ("morph", true)]);
        assert_eq!(plan.to_remove, ["drop"]);
    }

    #[test]
    fn test_plan_rejects_duplicates() {
        let current = Committed::default();
        let services = vec![counter("a", 1), counter("a", 2)];
        let err = ReconcilePlan::compute(&current, &services).unwrap_err();
        assert!(matches!(err, ReconcileError::Aborted(_)));

        let services = vec![counter(" ", 1)];
        assert!(ReconcilePlan::compute(&current, &services).is_err());
    }

    #[test]
    fn test_plan_empty_for_empty_inputs() {
        let plan = ReconcilePlan::compute(&Committed::default(), &[]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_aborted_pass_changes_nothing() {
        let registry = ServiceRegistry::new();
        registry
            .reconfigure(&ConfigSnapshot::new(1, vec![counter("a", 1)]))
            .unwrap();
        let before = registry.lookup("a").unwrap();

        let err = registry
            .reconfigure(&ConfigSnapshot::new(2, vec![counter("a", 2), counter("a", 3)]))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Aborted(_)));
        assert_eq!(registry.generation(), 1);
        assert_eq!(before.counter().unwrap().num_reconfig, 1);
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let registry = ServiceRegistry::new();
        let report = registry
            .reconfigure(&ConfigSnapshot::new(
                7,
                vec![
                    counter("ok", 1),
                    ServiceDescriptor::new(
                        "bad",
                        ServiceKind::Counter,
                        serde_json::json!({ "num_reconfig": -1 }),
                    ),
                ],
            ))
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["generation"], 1);
        assert_eq!(json["configGeneration"], 7);
        assert_eq!(json["entries"][0]["name"], "ok");
        assert_eq!(json["entries"][0]["status"], "created");
        assert_eq!(json["entries"][1]["status"], "failed");
        assert_eq!(json["entries"][1]["kind"], "construction");
    }

    #[test]
    fn test_failed_initial_reconfigure_discards_instance() {
        let registry = ServiceRegistry::new();
        let report = registry
            .reconfigure(&ConfigSnapshot::new(
                1,
                vec![ServiceDescriptor::new(
                    "props",
                    ServiceKind::Properties,
                    serde_json::json!({ "properties": { "": "blank" } }),
                )],
            ))
            .unwrap();

        assert!(matches!(
            report.outcome("props"),
            Some(Outcome::Failed {
                kind: FailureKind::Reconfigure,
                ..
            })
        ));
        assert!(registry.lookup("props").is_none());
    }
}
