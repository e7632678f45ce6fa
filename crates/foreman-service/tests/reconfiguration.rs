//! Live reconfiguration behavior of the service registry, driven through
//! the public API only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use foreman_service::{
    ConfigSnapshot, FailureKind, Lifecycle, Outcome, ServiceDescriptor, ServiceKind,
    ServiceRegistry,
};

fn counter(name: &str, n: u64) -> ServiceDescriptor {
    ServiceDescriptor::new(
        name,
        ServiceKind::Counter,
        serde_json::json!({ "num_reconfig": n }),
    )
}

fn workdir(name: &str, path: &std::path::Path, clean_on_stop: bool) -> ServiceDescriptor {
    ServiceDescriptor::new(
        name,
        ServiceKind::Workdir,
        serde_json::json!({ "path": path, "clean_on_stop": clean_on_stop }),
    )
}

fn count(registry: &ServiceRegistry, name: &str) -> u64 {
    registry
        .lookup(name)
        .and_then(|s| s.counter())
        .map(|c| c.num_reconfig)
        .unwrap()
}

/// Four reloads: S1 updated every time, S2 only present in the third.
#[test]
fn test_reload_sequence() {
    let registry = ServiceRegistry::new();

    let report = registry
        .reconfigure(&ConfigSnapshot::new(1, vec![counter("S1", 1)]))
        .unwrap();
    assert_eq!(report.outcome("S1"), Some(&Outcome::Created));
    let s1 = registry.lookup("S1").unwrap();
    assert_eq!(s1.counter().unwrap().num_reconfig, 1);

    let report = registry
        .reconfigure(&ConfigSnapshot::new(2, vec![counter("S1", 2)]))
        .unwrap();
    assert_eq!(report.outcome("S1"), Some(&Outcome::Updated));
    assert!(Arc::ptr_eq(&s1, &registry.lookup("S1").unwrap()));
    assert_eq!(s1.counter().unwrap().num_reconfig, 2);

    registry
        .reconfigure(&ConfigSnapshot::new(3, vec![counter("S1", 3), counter("S2", 3)]))
        .unwrap();
    let s2 = registry.lookup("S2").unwrap();
    assert_eq!(s1.counter().unwrap().num_reconfig, 3);
    assert_eq!(s2.counter().unwrap().num_reconfig, 3);

    let report = registry
        .reconfigure(&ConfigSnapshot::new(4, vec![counter("S1", 4)]))
        .unwrap();
    assert_eq!(report.outcome("S2"), Some(&Outcome::Removed));
    assert!(registry.lookup("S2").is_none());
    assert_eq!(s2.counter().unwrap().num_reconfig, 3);
    assert_eq!(s2.lifecycle(), Lifecycle::Stopped);
    assert_eq!(s1.counter().unwrap().num_reconfig, 4);
    assert_eq!(s1.counter().unwrap().applied, 4);
    assert_eq!(registry.generation(), 4);
}

#[test]
fn test_reintroduced_name_gets_fresh_instance() {
    let registry = ServiceRegistry::new();
    registry
        .reconfigure(&ConfigSnapshot::new(1, vec![counter("a", 1)]))
        .unwrap();
    let old = registry.lookup("a").unwrap();

    registry.reconfigure(&ConfigSnapshot::empty(2)).unwrap();
    assert!(registry.lookup("a").is_none());

    registry
        .reconfigure(&ConfigSnapshot::new(3, vec![counter("a", 3)]))
        .unwrap();
    let new = registry.lookup("a").unwrap();

    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.counter().unwrap().applied, 1);
    assert_eq!(new.created_generation(), 3);
    // The retired instance never sees the new configuration
    assert_eq!(old.counter().unwrap().num_reconfig, 1);
    assert_eq!(old.lifecycle(), Lifecycle::Stopped);
}

#[test]
fn test_failed_update_is_isolated() {
    let registry = ServiceRegistry::new();
    registry
        .reconfigure(&ConfigSnapshot::new(1, vec![counter("A", 1), counter("B", 1)]))
        .unwrap();

    let report = registry
        .reconfigure(&ConfigSnapshot::new(
            2,
            vec![
                counter("A", 2),
                ServiceDescriptor::new(
                    "B",
                    ServiceKind::Counter,
                    serde_json::json!({ "num_reconfig": "two" }),
                ),
                counter("C", 2),
            ],
        ))
        .unwrap();

    assert_eq!(report.outcome("A"), Some(&Outcome::Updated));
    assert_eq!(report.outcome("C"), Some(&Outcome::Created));
    assert!(matches!(
        report.outcome("B"),
        Some(Outcome::Failed {
            kind: FailureKind::Reconfigure,
            ..
        })
    ));
    assert!(report.has_failures());

    assert_eq!(count(&registry, "A"), 2);
    assert_eq!(count(&registry, "B"), 1);
    assert_eq!(count(&registry, "C"), 2);
    assert_eq!(registry.lookup("B").unwrap().lifecycle(), Lifecycle::Running);
}

#[test]
fn test_failed_create_is_retried_next_reload() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let registry = ServiceRegistry::new();
    let report = registry
        .reconfigure(&ConfigSnapshot::new(
            1,
            vec![counter("a", 1), workdir("work", &blocker.join("sub"), false)],
        ))
        .unwrap();
    assert!(matches!(
        report.outcome("work"),
        Some(Outcome::Failed {
            kind: FailureKind::Startup,
            ..
        })
    ));
    assert!(registry.lookup("work").is_none());
    assert_eq!(count(&registry, "a"), 1);

    let good = dir.path().join("work");
    let report = registry
        .reconfigure(&ConfigSnapshot::new(
            2,
            vec![counter("a", 2), workdir("work", &good, false)],
        ))
        .unwrap();
    assert_eq!(report.outcome("work"), Some(&Outcome::Created));
    assert_eq!(registry.lookup("work").unwrap().workdir().unwrap().path, good);
}

#[test]
fn test_stop_failure_still_removes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scratch");

    let registry = ServiceRegistry::new();
    registry
        .reconfigure(&ConfigSnapshot::new(1, vec![workdir("work", &path, true)]))
        .unwrap();
    let work = registry.lookup("work").unwrap();

    // Make the clean-on-stop removal fail
    std::fs::remove_dir_all(&path).unwrap();

    let report = registry.reconfigure(&ConfigSnapshot::empty(2)).unwrap();
    assert!(matches!(
        report.outcome("work"),
        Some(Outcome::Failed {
            kind: FailureKind::Stop,
            ..
        })
    ));
    assert!(registry.lookup("work").is_none());
    assert_eq!(work.lifecycle(), Lifecycle::Stopped);
}

#[test]
fn test_kind_change_replaces_instance() {
    let registry = ServiceRegistry::new();
    registry
        .reconfigure(&ConfigSnapshot::new(1, vec![counter("svc", 1)]))
        .unwrap();
    let old = registry.lookup("svc").unwrap();

    let report = registry
        .reconfigure(&ConfigSnapshot::new(
            2,
            vec![ServiceDescriptor::new(
                "svc",
                ServiceKind::Properties,
                serde_json::json!({ "properties": { "branch": "main" } }),
            )],
        ))
        .unwrap();

    assert_eq!(
        report.outcome("svc"),
        Some(&Outcome::Replaced { stop_error: None })
    );
    let new = registry.lookup("svc").unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.kind(), ServiceKind::Properties);
    assert_eq!(new.properties().unwrap().get("branch"), Some("main"));
    assert_eq!(old.lifecycle(), Lifecycle::Stopped);
}

#[test]
fn test_failed_replacement_keeps_old_instance() {
    let registry = ServiceRegistry::new();
    registry
        .reconfigure(&ConfigSnapshot::new(1, vec![counter("svc", 1)]))
        .unwrap();
    let old = registry.lookup("svc").unwrap();

    let report = registry
        .reconfigure(&ConfigSnapshot::new(
            2,
            vec![ServiceDescriptor::new(
                "svc",
                ServiceKind::Workdir,
                serde_json::json!({ "path": "" }),
            )],
        ))
        .unwrap();

    assert!(matches!(
        report.outcome("svc"),
        Some(Outcome::Failed {
            kind: FailureKind::Construction,
            ..
        })
    ));
    assert!(Arc::ptr_eq(&old, &registry.lookup("svc").unwrap()));
    assert_eq!(old.lifecycle(), Lifecycle::Running);
}

#[test]
fn test_view_stays_on_its_generation() {
    let registry = ServiceRegistry::new();
    registry
        .reconfigure(&ConfigSnapshot::new(1, vec![counter("a", 1), counter("b", 1)]))
        .unwrap();

    let view = registry.view();
    let a = view.counter("a").unwrap();

    registry
        .reconfigure(&ConfigSnapshot::new(2, vec![counter("a", 2), counter("b", 2)]))
        .unwrap();
    let b = view.counter("b").unwrap();

    assert_eq!(view.generation(), 1);
    assert_eq!((a.num_reconfig, b.num_reconfig), (1, 1));
    assert_eq!(view.statuses()[1].state.as_ref().unwrap()["num_reconfig"], 1);

    // Same identities, newer state through the instance and a fresh view
    assert!(Arc::ptr_eq(view.get("b").unwrap(), &registry.lookup("b").unwrap()));
    assert_eq!(count(&registry, "b"), 2);
    assert_eq!(registry.view().counter("b").unwrap().num_reconfig, 2);
}

#[test]
fn test_view_keeps_state_of_failed_update() {
    let registry = ServiceRegistry::new();
    registry
        .reconfigure(&ConfigSnapshot::new(1, vec![counter("a", 1)]))
        .unwrap();
    registry
        .reconfigure(&ConfigSnapshot::new(
            2,
            vec![ServiceDescriptor::new(
                "a",
                ServiceKind::Counter,
                serde_json::json!({ "num_reconfig": -1 }),
            )],
        ))
        .unwrap();

    let view = registry.view();
    assert_eq!(view.generation(), 2);
    assert_eq!(view.counter("a").unwrap().num_reconfig, 1);
    assert!(view.properties("a").is_none());
}

/// Readers hammering lookups during reloads never see two generations at once.
#[test]
fn test_readers_see_whole_generations() {
    let registry = Arc::new(ServiceRegistry::new());
    let names = ["a", "b", "c"];
    registry
        .reconfigure(&ConfigSnapshot::new(
            1,
            names.iter().map(|n| counter(n, 1)).collect(),
        ))
        .unwrap();

    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut consistent_reads = 0u64;
                while !done.load(Ordering::Acquire) {
                    let before = registry.generation();
                    let counts: Vec<u64> = names.iter().map(|n| count(&registry, n)).collect();
                    let after = registry.generation();
                    if before == after {
                        assert!(counts.iter().all(|c| *c == before), "mixed generations: {:?}", counts);
                        consistent_reads += 1;
                    }
                }
                consistent_reads
            });
        }

        for generation in 2..=200u64 {
            registry
                .reconfigure(&ConfigSnapshot::new(
                    generation,
                    names.iter().map(|n| counter(n, generation)).collect(),
                ))
                .unwrap();
        }
        done.store(true, Ordering::Release);
    });

    assert_eq!(count(&registry, "a"), 200);
}

#[test]
fn test_concurrent_reloads_are_serialized() {
    let registry = Arc::new(ServiceRegistry::new());
    std::thread::scope(|scope| {
        for t in 0..4u64 {
            let registry = registry.clone();
            scope.spawn(move || {
                for i in 0..25u64 {
                    let n = t * 100 + i;
                    registry
                        .reconfigure(&ConfigSnapshot::new(n, vec![counter("shared", n)]))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(registry.generation(), 100);
    let shared = registry.lookup("shared").unwrap();
    assert_eq!(shared.counter().unwrap().applied, 100);
    assert_eq!(registry.snapshot_names().len(), 1);
}
