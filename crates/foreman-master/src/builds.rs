//! Build execution.
//!
//! A build runs the steps of one builder on a background task. Steps that
//! reference named services resolve them through the registry when the step
//! starts, so a build always sees the services of the generation committed
//! at that moment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use foreman_service::{NamedService, ServiceRegistry};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::loader::{BuilderConfig, StepConfig};
use crate::mq::MessageBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Pending,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub number: usize,
    pub name: String,
    pub state_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BuildResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildRecord {
    pub buildid: u64,
    pub builder: String,
    pub state: BuildState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BuildResult>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_at: Option<String>,
    pub steps: Vec<StepRecord>,
}

impl BuildRecord {
    pub fn is_finished(&self) -> bool {
        self.state == BuildState::Finished
    }
}

/// Runs builds and keeps their records.
pub struct BuildRunner {
    registry: Arc<ServiceRegistry>,
    mq: MessageBus,
    builds: RwLock<BTreeMap<u64, BuildRecord>>,
    next_id: AtomicU64,
    workdir: PathBuf,
}

impl BuildRunner {
    pub fn new(registry: Arc<ServiceRegistry>, mq: MessageBus, workdir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            mq,
            builds: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            workdir: workdir.into(),
        }
    }

    /// Record a new build of `builder` and run it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_build(self: &Arc<Self>, builder: &BuilderConfig) -> u64 {
        let buildid = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = BuildRecord {
            buildid,
            builder: builder.name.clone(),
            state: BuildState::Pending,
            results: None,
            started_at: chrono::Utc::now().to_rfc3339(),
            complete_at: None,
            steps: Vec::new(),
        };
        self.builds.write().insert(buildid, record);

        let runner = self.clone();
        let builder = builder.clone();
        tokio::spawn(async move {
            runner.run(buildid, builder).await;
        });
        buildid
    }

    pub fn get(&self, buildid: u64) -> Option<BuildRecord> {
        self.builds.read().get(&buildid).cloned()
    }

    pub fn list(&self) -> Vec<BuildRecord> {
        self.builds.read().values().cloned().collect()
    }

    async fn run(&self, buildid: u64, builder: BuilderConfig) {
        let id = buildid.to_string();
        if let Some(record) = self.update(buildid, |b| b.state = BuildState::Running) {
            self.mq.publish(&["builds", &id, "new"], to_json(&record)).await;
        }
        info!("Build {} of '{}' started", buildid, builder.name);

        let mut results = BuildResult::Success;
        for (index, step) in builder.steps.iter().enumerate() {
            let outcome = match step {
                StepConfig::ServiceSummary { service } => self.service_summary(service),
                StepConfig::Shell {
                    command,
                    properties,
                    workdir,
                } => {
                    self.shell(&builder.name, command, properties.as_deref(), workdir.as_deref())
                        .await
                }
            };

            let (state_string, log, step_results) = match outcome {
                Ok((state_string, log)) => (state_string, log, BuildResult::Success),
                Err(state_string) => (state_string, None, BuildResult::Failure),
            };
            self.update(buildid, |b| {
                b.steps.push(StepRecord {
                    number: index,
                    name: step.name().to_string(),
                    state_string,
                    results: Some(step_results),
                    log,
                })
            });

            if step_results == BuildResult::Failure {
                warn!("Build {} step {} ({}) failed", buildid, index, step.name());
                results = BuildResult::Failure;
                break;
            }
        }

        let finished = self.update(buildid, |b| {
            b.state = BuildState::Finished;
            b.results = Some(results);
            b.complete_at = Some(chrono::Utc::now().to_rfc3339());
        });
        info!("Build {} of '{}' finished: {:?}", buildid, builder.name, results);
        if let Some(record) = finished {
            self.mq
                .publish(&["builds", &id, "finished"], to_json(&record))
                .await;
        }
    }

    /// Describe the named service as it is right now.
    fn service_summary(&self, name: &str) -> Result<(String, Option<String>), String> {
        let instance = self
            .registry
            .lookup(name)
            .ok_or_else(|| format!("service '{}' not found", name))?;

        let summary = match instance.service() {
            NamedService::Counter(_) => instance
                .counter()
                .map(|c| format!("num reconfig: {}", c.num_reconfig)),
            NamedService::Properties(_) => instance.properties().map(|p| {
                let pairs: Vec<String> = p
                    .properties
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                format!("properties: {}", pairs.join(", "))
            }),
            NamedService::Workdir(_) => instance
                .workdir()
                .map(|w| format!("workdir: {}", w.path.display())),
        };
        summary
            .map(|s| (s, None))
            .ok_or_else(|| format!("service '{}' has no state", name))
    }

    async fn shell(
        &self,
        builder: &str,
        command: &str,
        properties: Option<&str>,
        workdir: Option<&str>,
    ) -> Result<(String, Option<String>), String> {
        let cwd = match workdir {
            Some(name) => self
                .registry
                .lookup(name)
                .and_then(|s| s.workdir())
                .map(|w| w.path.clone())
                .ok_or_else(|| format!("workdir service '{}' not found", name))?,
            None => {
                let dir = self.workdir.join(builder);
                std::fs::create_dir_all(&dir)
                    .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
                dir
            }
        };

        let env: BTreeMap<String, String> = match properties {
            Some(name) => self
                .registry
                .lookup(name)
                .and_then(|s| s.properties())
                .map(|p| p.properties.clone())
                .ok_or_else(|| format!("properties service '{}' not found", name))?,
            None => BTreeMap::new(),
        };

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .envs(&env)
            .output()
            .await
            .map_err(|e| format!("'{}' could not run: {}", command, e))?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        let log = (!log.is_empty()).then_some(log);

        if output.status.success() {
            Ok((format!("'{}'", command), log))
        } else {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Err(format!("'{}' (exit {})", command, code))
        }
    }

    fn update(&self, buildid: u64, f: impl FnOnce(&mut BuildRecord)) -> Option<BuildRecord> {
        let mut builds = self.builds.write();
        let record = builds.get_mut(&buildid)?;
        f(record);
        Some(record.clone())
    }
}

fn to_json(record: &BuildRecord) -> serde_json::Value {
    serde_json::to_value(record).unwrap_or(serde_json::Value::Null)
}
