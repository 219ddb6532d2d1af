use proxysync::config::Config;
use proxysync::docker::{DockerRuntime, SharedDockerRuntime};
use proxysync::reconciler::{Reconciler, ReconcilerSettings};
use proxysync::store::FileDocumentStore;
use proxysync::{PKG_NAME, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("proxysync=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("proxysync.toml"));

    let config = if config_path.exists() {
        Config::load(&config_path).map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?
    } else {
        warn!(path = %config_path.display(), "Configuration file not found, using defaults");
        Config::default()
    };

    print_startup_banner(&config);

    let runtime: SharedDockerRuntime =
        Arc::new(DockerRuntime::new(config.docker.host.as_deref()).await?);

    let store = FileDocumentStore::new(&config.proxy.config_path);
    let store = if config.proxy.atomic_write {
        store
    } else {
        store.in_place()
    };

    let reconciler = Reconciler::new(
        runtime.clone(),
        runtime,
        Arc::new(store),
        ReconcilerSettings::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler_handle = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    let _ = shutdown_tx.send(true);

    // A cycle in flight gets a moment to finish its write and reload
    if tokio::time::timeout(Duration::from_secs(10), reconciler_handle)
        .await
        .is_err()
    {
        warn!("Reconciliation cycle did not finish in time");
    }

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting proxy config sync");
    info!(
        proxy = %config.proxy.container,
        fallback_network = ?config.proxy.network,
        config_path = %config.proxy.config_path.display(),
        reload_command = ?config.proxy.reload_command,
        atomic_write = config.proxy.atomic_write,
        "Proxy settings"
    );
    info!(
        interval_secs = config.watcher.interval_secs,
        ignore = ?config.proxy.ignore,
        docker_host = ?config.docker.host,
        "Watcher settings"
    );
}
