//! Foreman: orchestrator master with live reconfiguration.

use std::path::PathBuf;
use std::sync::Arc;

use foreman_core::MasterConfig;
use foreman_master::{routes, FileConfigLoader, MasterProcess};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--check" | "check" => {
                let path = args
                    .get(2)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("master.json"));
                match FileConfigLoader::new(&path).check() {
                    Ok(snapshot) => {
                        println!(
                            "{}: {} services, {} builders, {} schedulers",
                            path.display(),
                            snapshot.services.len(),
                            snapshot.extra.builders.len(),
                            snapshot.extra.schedulers.len()
                        );
                        std::process::exit(0);
                    }
                    Err(e) => {
                        eprintln!("{}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                }
            }
            "--help" | "-h" | "help" => {
                println!("Foreman - orchestrator master with live reconfiguration");
                println!();
                println!("Usage: foreman [command]");
                println!();
                println!("Commands:");
                println!("  (none)                   Start the master");
                println!("  check [master.json]      Validate a configuration file");
                println!("  help                     Show this help message");
                println!();
                println!("Environment: FOREMAN_PORT, FOREMAN_CONFIG, FOREMAN_WORKDIR,");
                println!("             FOREMAN_EVENT_CAPACITY, RUST_LOG");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'foreman help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    let config = MasterConfig::from_env()?;
    let port = config.port;
    info!("Configuration file: {}", config.config_file.display());
    info!("Build directory: {}", config.workdir.display());

    let loader = FileConfigLoader::new(&config.config_file);
    let master = Arc::new(MasterProcess::new(config, loader));

    let report = master
        .reconfig()
        .await
        .map_err(|e| anyhow::anyhow!("Initial configuration failed: {}", e))?;
    if report.has_failures() {
        warn!(
            "Started with failed services: {:?}",
            report.failed().collect::<Vec<_>>()
        );
    }

    spawn_reload_on_hangup(master.clone());

    let app = routes::build_router(master.clone());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Foreman master listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    master.shutdown().await?;
    Ok(())
}

/// Reload the configuration on SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_hangup(master: Arc<MasterProcess>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!("SIGHUP reload disabled: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reconfiguring");
            if let Err(e) = master.reconfig().await {
                error!("Reconfiguration failed: {}", e);
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_master: Arc<MasterProcess>) {}
