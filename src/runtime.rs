//! Boundary to the container runtime
//!
//! The reconciler only sees these traits. `DockerRuntime` implements both
//! against the Docker Engine API; tests substitute fakes.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Transport protocol of an exposed port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposedPort {
    pub private_port: u16,
    pub protocol: PortProtocol,
}

/// A container as seen during one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContainer {
    /// Container name without Docker's leading `/`
    pub name: String,
    pub running: bool,
    pub networks: BTreeSet<String>,
    pub ports: Vec<ExposedPort>,
}

impl ServiceContainer {
    /// Create a running container with no networks or ports
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: true,
            networks: BTreeSet::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.networks.insert(network.into());
        self
    }

    pub fn with_port(self, private_port: u16) -> Self {
        self.with_exposed(private_port, PortProtocol::Tcp)
    }

    pub fn with_exposed(mut self, private_port: u16, protocol: PortProtocol) -> Self {
        self.ports.push(ExposedPort {
            private_port,
            protocol,
        });
        self
    }

    pub fn stopped(mut self) -> Self {
        self.running = false;
        self
    }

    /// Whether this container should be routed through the proxy on `network`
    pub fn is_routable_on(&self, network: &str) -> bool {
        self.running && self.networks.contains(network)
    }

    /// First non-zero TCP port; UDP and SCTP ports cannot carry HTTP
    pub fn routed_port(&self) -> Option<u16> {
        self.ports
            .iter()
            .filter(|p| p.protocol == PortProtocol::Tcp)
            .map(|p| p.private_port)
            .find(|&port| port > 0)
    }
}

/// Output of a successful reload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Combined stdout and stderr of the reload command
    pub output: String,
    pub exit_code: Option<i64>,
}

/// Answers questions about the proxy and the containers around it
#[async_trait]
pub trait RuntimeFacts: Send + Sync {
    /// Network the proxy container is attached to, `None` when it has none
    async fn resolve_proxy_network(&self, proxy: &str) -> Result<Option<String>>;

    /// Currently running containers, in listing order
    async fn list_running_containers(&self) -> Result<Vec<ServiceContainer>>;
}

/// Tells the proxy to pick up a changed configuration
#[async_trait]
pub trait ReloadTrigger: Send + Sync {
    async fn reload(&self, proxy: &str, command: &[String]) -> Result<ReloadOutcome>;
}
