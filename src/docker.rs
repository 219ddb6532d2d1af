//! Docker Engine implementation of the runtime boundary

use crate::error::{Result, SyncError};
use crate::runtime::{
    ExposedPort, PortProtocol, ReloadOutcome, ReloadTrigger, RuntimeFacts, ServiceContainer,
};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerSummary, PortTypeEnum};
use bollard::Docker;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Talks to the Docker daemon for container discovery and proxy reloads
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon
    ///
    /// An explicit `[docker] host` wins; otherwise bollard's local defaults
    /// apply (`DOCKER_HOST`, then the platform socket).
    pub async fn new(docker_host: Option<&str>) -> anyhow::Result<Self> {
        let client = match docker_host {
            Some(host) => Self::connect_to_host(host)?,
            None => Docker::connect_with_local_defaults()
                .map_err(|e| anyhow::anyhow!("Cannot connect to Docker daemon: {}", e))?,
        };

        client.ping().await.map_err(|e| {
            anyhow::anyhow!(
                "Docker daemon is not responding: {}. \
                 Mount /var/run/docker.sock into this container or set [docker] host.",
                e
            )
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { client })
    }

    fn connect_to_host(host: &str) -> anyhow::Result<Docker> {
        let client = if let Some(socket) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
        } else {
            anyhow::bail!("Unsupported docker host '{}', expected unix:// or tcp://", host)
        };

        client.map_err(|e| anyhow::anyhow!("Cannot connect to Docker at '{}': {}", host, e))
    }
}

#[async_trait]
impl RuntimeFacts for DockerRuntime {
    async fn resolve_proxy_network(&self, proxy: &str) -> Result<Option<String>> {
        let info = self
            .client
            .inspect_container(proxy, None::<InspectContainerOptions>)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => SyncError::Discovery(format!("proxy container '{}' not found", proxy)),
                e => SyncError::Discovery(format!(
                    "failed to inspect proxy container '{}': {}",
                    proxy, e
                )),
            })?;

        // Docker reports attachments as an unordered map; pick the smallest name
        // so the choice is stable across cycles
        let network = info
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| networks.into_keys().min());

        Ok(network)
    }

    async fn list_running_containers(&self) -> Result<Vec<ServiceContainer>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let summaries = self.client.list_containers(Some(options)).await?;
        Ok(summaries
            .into_iter()
            .filter_map(service_container_from_summary)
            .collect())
    }
}

#[async_trait]
impl ReloadTrigger for DockerRuntime {
    async fn reload(&self, proxy: &str, command: &[String]) -> Result<ReloadOutcome> {
        let exec = self
            .client
            .create_exec(
                proxy,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(command.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SyncError::Reload(format!("cannot create exec in '{}': {}", proxy, e)))?;

        let mut output = String::new();

        match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SyncError::Reload(format!("cannot start exec in '{}': {}", proxy, e)))?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(log) => forward_output(proxy, log, &mut output),
                        Err(e) => {
                            warn!(proxy, error = %e, "Error reading reload output");
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                debug!(proxy, "Reload exec started detached");
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SyncError::Reload(format!("cannot inspect exec in '{}': {}", proxy, e)))?;

        match inspect.exit_code {
            Some(code) if code != 0 => Err(SyncError::Reload(format!(
                "'{}' exited with code {}: {}",
                command.join(" "),
                code,
                output.trim()
            ))),
            exit_code => Ok(ReloadOutcome { output, exit_code }),
        }
    }
}

/// Log one chunk of reload output and append it to the captured text
fn forward_output(proxy: &str, log: LogOutput, captured: &mut String) {
    let (stream, message) = match log {
        LogOutput::StdOut { message } => ("stdout", message),
        LogOutput::StdErr { message } => ("stderr", message),
        LogOutput::Console { message } => ("console", message),
        LogOutput::StdIn { .. } => return,
    };

    let text = String::from_utf8_lossy(&message);
    for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        if stream == "stderr" {
            warn!(target: "proxy", proxy, stream, "{}", line);
        } else {
            info!(target: "proxy", proxy, stream, "{}", line);
        }
    }
    captured.push_str(&text);
}

/// Convert a container listing entry, dropping entries without a name
fn service_container_from_summary(summary: ContainerSummary) -> Option<ServiceContainer> {
    let name = summary
        .names?
        .into_iter()
        .next()?
        .trim_start_matches('/')
        .to_string();

    let running = summary
        .state
        .as_deref()
        .map_or(true, |state| state == "running");

    let networks = summary
        .network_settings
        .and_then(|settings| settings.networks)
        .map(|networks| networks.into_keys().collect())
        .unwrap_or_default();

    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|port| ExposedPort {
            private_port: port.private_port,
            protocol: match port.typ {
                Some(PortTypeEnum::UDP) => PortProtocol::Udp,
                Some(PortTypeEnum::SCTP) => PortProtocol::Sctp,
                _ => PortProtocol::Tcp,
            },
        })
        .collect();

    Some(ServiceContainer {
        name,
        running,
        networks,
        ports,
    })
}

/// Wrapper to share DockerRuntime across tasks
pub type SharedDockerRuntime = Arc<DockerRuntime>;
