//! Reconciliation loop
//!
//! Periodically lists the containers on the proxy's network and makes sure
//! each one has a routing entry in the nginx configuration, reloading the
//! proxy after every change.
//!
//! Cycles never overlap: the loop awaits each cycle before taking the next
//! tick, and overdue ticks are skipped. The read-merge-write-reload sequence
//! for the document additionally runs under a lock, and the store refuses a
//! write when the file changed since it was read.

use crate::config::Config;
use crate::document::{is_valid_name, ConfigDocument};
use crate::entry::RoutingEntry;
use crate::error::{ErrorScope, Result, SyncError};
use crate::merge::{merge, MergeOutcome};
use crate::runtime::{ReloadTrigger, RuntimeFacts, ServiceContainer};
use crate::store::DocumentStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Settings the reconciler needs from the configuration
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Name or id of the proxy container
    pub proxy_container: String,
    /// Network used when the proxy reports no attachment
    pub fallback_network: Option<String>,
    pub reload_command: Vec<String>,
    pub interval: Duration,
    /// Container names never routed
    pub ignore: BTreeSet<String>,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            proxy_container: config.proxy.container.clone(),
            fallback_network: config.proxy.network.clone(),
            reload_command: config.proxy.reload_command.clone(),
            interval: config.watcher.interval(),
            ignore: config.proxy.ignore.iter().cloned().collect(),
        }
    }
}

/// What happened to one container during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    /// The configuration already routes this container
    Unchanged,
    /// Blocks were written for this container
    Added {
        upstream_inserted: bool,
        location_inserted: bool,
        reloaded: bool,
    },
}

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Network the cycle routed for
    pub network: String,
    pub added: Vec<String>,
    pub unchanged: Vec<String>,
    /// Containers skipped on purpose, with the reason
    pub skipped: Vec<(String, String)>,
    /// Containers whose update failed, with the error
    pub failed: Vec<(String, String)>,
    /// Containers written to the config whose reload failed
    pub reload_failures: Vec<String>,
}

impl CycleReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty()
    }

    fn log(&self) {
        if self.changed() || !self.failed.is_empty() {
            info!(
                network = %self.network,
                added = self.added.len(),
                unchanged = self.unchanged.len(),
                skipped = self.skipped.len(),
                failed = self.failed.len(),
                reload_failures = self.reload_failures.len(),
                "Reconciliation cycle finished"
            );
        } else {
            debug!(
                network = %self.network,
                unchanged = self.unchanged.len(),
                skipped = self.skipped.len(),
                "Reconciliation cycle finished, nothing to do"
            );
        }
    }
}

/// Drives the proxy configuration towards the set of running containers
pub struct Reconciler {
    facts: Arc<dyn RuntimeFacts>,
    reloader: Arc<dyn ReloadTrigger>,
    store: Arc<dyn DocumentStore>,
    settings: ReconcilerSettings,
    document_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        facts: Arc<dyn RuntimeFacts>,
        reloader: Arc<dyn ReloadTrigger>,
        store: Arc<dyn DocumentStore>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            facts,
            reloader,
            store,
            settings,
            document_lock: Mutex::new(()),
        }
    }

    /// Run cycles on the configured period until shutdown is signalled
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            proxy = %self.settings.proxy_container,
            "Reconciler started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => report.log(),
                        Err(e) => {
                            error!(code = e.code(), error = %e, "Reconciliation cycle aborted");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single reconciliation cycle
    ///
    /// Errors are cycle-scoped (discovery, no network). Per-container
    /// failures are recorded in the report and never abort the cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let network = self.resolve_network().await?;
        let containers = self.facts.list_running_containers().await?;

        debug!(network = %network, containers = containers.len(), "Listed running containers");

        let mut report = CycleReport {
            network: network.clone(),
            ..Default::default()
        };

        for container in &containers {
            if !container.is_routable_on(&network) {
                continue;
            }

            if self.settings.ignore.contains(&container.name) {
                debug!(container = %container.name, "Container is ignored");
                report
                    .skipped
                    .push((container.name.clone(), "ignored".to_string()));
                continue;
            }

            match self.sync_container(container, &network).await {
                Ok(ContainerOutcome::Unchanged) => {
                    report.unchanged.push(container.name.clone());
                }
                Ok(ContainerOutcome::Added { reloaded, .. }) => {
                    report.added.push(container.name.clone());
                    if !reloaded {
                        report.reload_failures.push(container.name.clone());
                    }
                }
                Err(e @ (SyncError::NoPortExposed(_) | SyncError::InvalidServiceName(_))) => {
                    info!(container = %container.name, reason = %e, "Skipping container");
                    report.skipped.push((container.name.clone(), e.to_string()));
                }
                Err(e) if e.scope() == ErrorScope::Cycle => return Err(e),
                Err(e) => {
                    warn!(
                        container = %container.name,
                        code = e.code(),
                        error = %e,
                        "Failed to update proxy config for container"
                    );
                    report.failed.push((container.name.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Network shared by the proxy and the containers it routes to
    async fn resolve_network(&self) -> Result<String> {
        let proxy = &self.settings.proxy_container;

        match self.facts.resolve_proxy_network(proxy).await? {
            Some(network) => Ok(network),
            None => match &self.settings.fallback_network {
                Some(network) => {
                    debug!(proxy = %proxy, network = %network, "Proxy has no network, using fallback");
                    Ok(network.clone())
                }
                None => Err(SyncError::NoNetworkAvailable(proxy.clone())),
            },
        }
    }

    /// Read, merge, write and reload for one container
    async fn sync_container(
        &self,
        container: &ServiceContainer,
        network: &str,
    ) -> Result<ContainerOutcome> {
        let port = container
            .routed_port()
            .ok_or_else(|| SyncError::NoPortExposed(container.name.clone()))?;

        if !is_valid_name(&container.name) {
            return Err(SyncError::InvalidServiceName(container.name.clone()));
        }

        let entry = RoutingEntry::new(&container.name, network, port);

        let _guard = self.document_lock.lock().await;

        let snapshot = self.store.load().await?;
        let document = ConfigDocument::parse(&snapshot.text);

        let (text, upstream_inserted, location_inserted) = match merge(&document, &entry) {
            MergeOutcome::Unchanged => {
                debug!(container = %entry.name, "Configuration already contains entry");
                return Ok(ContainerOutcome::Unchanged);
            }
            MergeOutcome::Updated {
                text,
                upstream_inserted,
                location_inserted,
            } => (text, upstream_inserted, location_inserted),
        };

        self.store.replace(&snapshot, &text).await?;

        info!(
            container = %entry.name,
            port = entry.port,
            network = %entry.network,
            upstream_inserted,
            location_inserted,
            "Proxy config updated with new route"
        );

        let reloaded = match self
            .reloader
            .reload(&self.settings.proxy_container, &self.settings.reload_command)
            .await
        {
            Ok(outcome) => {
                debug!(exit_code = ?outcome.exit_code, "Proxy reloaded");
                true
            }
            Err(e) => {
                // The written config stays; the next reload picks it up
                warn!(container = %entry.name, error = %e, "Proxy reload failed");
                false
            }
        };

        Ok(ContainerOutcome::Added {
            upstream_inserted,
            location_inserted,
            reloaded,
        })
    }
}
