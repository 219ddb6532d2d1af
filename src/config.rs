use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the sync daemon
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Reconciliation loop settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// The nginx container and its configuration file
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Docker daemon connection
    #[serde(default)]
    pub docker: DockerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Seconds between reconciliation cycles (default: 10)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl WatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Name or id of the nginx container
    #[serde(default = "default_proxy_container")]
    pub container: String,

    /// Network to use when the proxy container reports no attachment
    pub network: Option<String>,

    /// Path of the nginx configuration file as seen by this process
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Command executed inside the proxy container after each change
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,

    /// Replace the file via temporary file and rename (default: true)
    ///
    /// Disable when the file is a single-file bind mount into the proxy
    /// container; a rename is not visible through such a mount.
    #[serde(default = "default_atomic_write")]
    pub atomic_write: bool,

    /// Container names that are never routed (e.g. the proxy itself)
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            container: default_proxy_container(),
            network: None,
            config_path: default_config_path(),
            reload_command: default_reload_command(),
            atomic_write: default_atomic_write(),
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DockerConfig {
    /// Docker host URL (default: DOCKER_HOST, then common socket paths)
    pub host: Option<String>,
}

// Default value functions
fn default_interval() -> u64 {
    10
}

fn default_proxy_container() -> String {
    "dockerreverseproxy-nginx-1".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("./nginx.conf")
}

fn default_reload_command() -> Vec<String> {
    vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()]
}

fn default_atomic_write() -> bool {
    true
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.watcher.interval_secs == 0 {
            errors.push("watcher.interval_secs must be greater than 0".to_string());
        }

        if self.proxy.container.trim().is_empty() {
            errors.push("proxy.container must not be empty".to_string());
        }

        if self.proxy.reload_command.is_empty() {
            errors.push("proxy.reload_command must have at least one element".to_string());
        }

        if self.proxy.config_path.as_os_str().is_empty() {
            errors.push("proxy.config_path must not be empty".to_string());
        }

        if let Some(network) = &self.proxy.network {
            if network.trim().is_empty() {
                errors.push("proxy.network must not be empty when set".to_string());
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
