//! The master process: owns the registry, the loader and the build runner.

use std::sync::Arc;

use foreman_core::{Error, MasterConfig, Result};
use foreman_service::{ReconcileError, ReconcileReport, ServiceInstance, ServiceRegistry};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::builds::{BuildRecord, BuildRunner};
use crate::loader::{BuildConfig, ConfigLoader};
use crate::mq::MessageBus;

pub struct MasterProcess {
    config: MasterConfig,
    registry: Arc<ServiceRegistry>,
    /// Held for the whole of a reload, which serializes reloads.
    loader: tokio::sync::Mutex<Box<dyn ConfigLoader>>,
    build_config: Arc<RwLock<Arc<BuildConfig>>>,
    mq: MessageBus,
    builds: Arc<BuildRunner>,
}

impl MasterProcess {
    pub fn new(config: MasterConfig, loader: impl ConfigLoader + 'static) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let mq = MessageBus::new(config.event_capacity);
        let builds = Arc::new(BuildRunner::new(
            registry.clone(),
            mq.clone(),
            config.workdir.clone(),
        ));
        Self {
            config,
            registry,
            loader: tokio::sync::Mutex::new(Box::new(loader)),
            build_config: Arc::new(RwLock::new(Arc::new(BuildConfig::default()))),
            mq,
            builds,
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn mq(&self) -> &MessageBus {
        &self.mq
    }

    /// Builders and schedulers of the last successful reload.
    pub fn build_config(&self) -> Arc<BuildConfig> {
        self.build_config.read().clone()
    }

    /// Reload the configuration, waiting for a reload already in progress.
    pub async fn reconfig(&self) -> Result<ReconcileReport> {
        let mut loader = self.loader.lock().await;
        self.reload(&mut loader).await
    }

    /// Reload the configuration unless a reload is already in progress.
    pub async fn try_reconfig(&self) -> Result<ReconcileReport> {
        let Ok(mut loader) = self.loader.try_lock() else {
            return Err(Error::Reconfig(ReconcileError::InProgress.to_string()));
        };
        self.reload(&mut loader).await
    }

    async fn reload(&self, loader: &mut Box<dyn ConfigLoader>) -> Result<ReconcileReport> {
        let snapshot = loader.load().map_err(|e| {
            warn!("Configuration load failed, keeping current services: {}", e);
            e
        })?;

        let registry = self.registry.clone();
        let build_config = self.build_config.clone();
        let report = tokio::task::spawn_blocking(move || {
            let report = registry.reconfigure(&snapshot)?;
            // Builds forced between these two lines pair the new services with
            // the previous builders, as if scheduled just before the reload.
            // Steps resolve services when they run, so nothing else differs.
            *build_config.write() = Arc::new(snapshot.extra);
            Ok::<_, ReconcileError>(report)
        })
        .await
        .map_err(|e| Error::Internal(format!("reconcile task failed: {}", e)))?
        .map_err(|e| {
            warn!("Reconfiguration aborted, keeping current services: {}", e);
            Error::Reconfig(e.to_string())
        })?;
        loader.commit();

        info!(
            "Reconfigured to generation {} (config {}): {} created, {} updated, {} removed, {} failed",
            report.generation,
            report.config_generation,
            report.created().count(),
            report.updated().count(),
            report.removed().count(),
            report.failed().count()
        );
        Ok(report)
    }

    /// Resolve a named service in the committed generation.
    pub fn named_service(&self, name: &str) -> Option<Arc<ServiceInstance>> {
        self.registry.lookup(name)
    }

    /// Start one build per builder of the named force scheduler.
    pub fn force(&self, scheduler: &str) -> Result<Vec<u64>> {
        let config = self.build_config();
        let scheduler = config
            .scheduler(scheduler)
            .ok_or_else(|| Error::NotFound(format!("scheduler '{}'", scheduler)))?;

        let builders = scheduler
            .builder_names
            .iter()
            .map(|name| {
                config.builder(name).ok_or_else(|| {
                    Error::Config(format!(
                        "scheduler '{}' names unknown builder '{}'",
                        scheduler.name, name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let ids = builders
            .into_iter()
            .map(|b| self.builds.start_build(b))
            .collect::<Vec<_>>();
        info!("Scheduler '{}' forced builds {:?}", scheduler.name, ids);
        Ok(ids)
    }

    pub fn build(&self, buildid: u64) -> Option<BuildRecord> {
        self.builds.get(buildid)
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.builds.list()
    }

    /// Stop every running service.
    pub async fn shutdown(&self) -> Result<ReconcileReport> {
        let _loader = self.loader.lock().await;
        let registry = self.registry.clone();
        let report = tokio::task::spawn_blocking(move || registry.shutdown())
            .await
            .map_err(|e| Error::Internal(format!("shutdown task failed: {}", e)))?
            .map_err(|e| Error::Reconfig(e.to_string()))?;
        *self.build_config.write() = Arc::new(BuildConfig::default());
        info!("Master stopped {} services", report.removed().count());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{BuilderConfig, MasterSnapshot};
    use foreman_service::{Lifecycle, ServiceDescriptor, ServiceKind};

    fn counter(name: &str, n: u64) -> ServiceDescriptor {
        ServiceDescriptor::new(
            name,
            ServiceKind::Counter,
            serde_json::json!({ "num_reconfig": n }),
        )
    }

    fn scripted(snapshots: Vec<Vec<ServiceDescriptor>>) -> impl ConfigLoader {
        let mut remaining = snapshots.into_iter();
        let mut generation = 0;
        move || -> Result<MasterSnapshot> {
            generation += 1;
            let services = remaining
                .next()
                .ok_or_else(|| Error::Config("no more snapshots".into()))?;
            Ok(MasterSnapshot::with_extra(
                generation,
                services,
                BuildConfig::default(),
            ))
        }
    }

    #[tokio::test]
    async fn test_reconfig_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let master = MasterProcess::new(
            MasterConfig::in_dir(dir.path()).unwrap(),
            scripted(vec![vec![counter("a", 1)], vec![counter("a", 2)]]),
        );

        master.reconfig().await.unwrap();
        let a = master.named_service("a").unwrap();
        master.reconfig().await.unwrap();
        assert_eq!(a.counter().unwrap().num_reconfig, 2);

        // Loader exhausted: nothing changes
        assert!(matches!(master.reconfig().await, Err(Error::Config(_))));
        assert_eq!(master.registry().generation(), 2);

        let report = master.shutdown().await.unwrap();
        assert_eq!(report.removed().collect::<Vec<_>>(), ["a"]);
        assert_eq!(a.lifecycle(), Lifecycle::Stopped);
        assert!(master.named_service("a").is_none());
    }

    #[tokio::test]
    async fn test_try_reconfig_while_reloading() {
        let dir = tempfile::tempdir().unwrap();
        let master = MasterProcess::new(
            MasterConfig::in_dir(dir.path()).unwrap(),
            scripted(vec![vec![counter("a", 1)]]),
        );

        let held = master.loader.lock().await;
        assert!(matches!(master.try_reconfig().await, Err(Error::Reconfig(_))));
        drop(held);
        master.try_reconfig().await.unwrap();
        assert!(master.named_service("a").is_some());
    }

    #[tokio::test]
    async fn test_builders_swap_with_services() {
        let dir = tempfile::tempdir().unwrap();
        let mut generation = 0;
        let loader = move || -> Result<MasterSnapshot> {
            generation += 1;
            let builders = vec![BuilderConfig {
                name: format!("b{}", generation),
                workers: Vec::new(),
                steps: Vec::new(),
            }];
            Ok(MasterSnapshot::with_extra(
                generation,
                vec![counter("a", generation)],
                BuildConfig {
                    builders,
                    schedulers: Vec::new(),
                },
            ))
        };
        let master = MasterProcess::new(MasterConfig::in_dir(dir.path()).unwrap(), loader);

        master.reconfig().await.unwrap();
        assert!(master.build_config().builder("b1").is_some());

        master.reconfig().await.unwrap();
        let config = master.build_config();
        assert!(config.builder("b1").is_none());
        assert!(config.builder("b2").is_some());
        assert_eq!(
            master.named_service("a").unwrap().counter().unwrap().num_reconfig,
            2
        );
    }

    #[tokio::test]
    async fn test_force_unknown_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let master = MasterProcess::new(
            MasterConfig::in_dir(dir.path()).unwrap(),
            scripted(vec![vec![]]),
        );
        master.reconfig().await.unwrap();
        assert!(matches!(master.force("force"), Err(Error::NotFound(_))));
    }
}
