//! Configuration for replikv nodes
//!
//! Loaded from a TOML file (default `resources/config.toml`) with `REPLIKV__*`
//! environment overrides. A missing file yields the defaults, i.e. a node that
//! starts as a standalone cluster.
//!
//! ```toml
//! discovery.nodes = "10.0.0.1:5000,10.0.0.2:5000"
//!
//! [node]
//! data_dir = "logs"
//! retry_delay_ms = 5000
//! ```

use crate::common::{Error, PeerHandle, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cluster discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Node runtime settings
    #[serde(default)]
    pub node: NodeConfig,
}

/// Where a starting node looks for an existing cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Comma-separated `host:port` seed list, tried in order
    #[serde(default)]
    pub nodes: String,

    /// Read the cohort list from this node's directory instead of our own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
}

impl DiscoveryConfig {
    /// Seed addresses in configured order, blanks dropped.
    pub fn seeds(&self) -> Vec<String> {
        self.nodes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Master directory handle, when running as a follower.
    pub fn master_handle(&self) -> Result<Option<PeerHandle>> {
        self.master
            .as_deref()
            .map(crate::common::parse_seed)
            .transpose()
    }
}

/// Node runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the undo/redo snapshots and the trace log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Delay between commit/rollback attempts on a refusing cohort
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// TCP connect timeout for peer calls
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_retry_delay() -> u64 {
    5_000
}
fn default_connect_timeout() -> u64 {
    2_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retry_delay_ms: default_retry_delay(),
            connect_timeout_ms: default_connect_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Config {
    /// Load from `path` (optional) and the environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
        }
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("REPLIKV").separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(test)]
    fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.node.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "node.connect_timeout_ms must be positive".into(),
            ));
        }
        self.discovery.master_handle()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_seed_list() {
        let config =
            Config::from_toml_str("discovery.nodes = \"10.0.0.1:5000, 10.0.0.2:5001,,\"\n")
                .unwrap();
        assert_eq!(
            config.discovery.seeds(),
            vec!["10.0.0.1:5000".to_string(), "10.0.0.2:5001".to_string()]
        );
        assert_eq!(config.node.retry_delay(), Duration::from_secs(5));
        assert!(config.discovery.master.is_none());
    }

    #[test]
    fn test_node_section() {
        let config = Config::from_toml_str(
            "[node]\ndata_dir = \"/tmp/rkv\"\nretry_delay_ms = 250\n\n[discovery]\nmaster = \"10.0.0.9:7000\"\n",
        )
        .unwrap();
        assert_eq!(config.node.data_dir, PathBuf::from("/tmp/rkv"));
        assert_eq!(config.node.retry_delay(), Duration::from_millis(250));
        assert!(config.discovery.seeds().is_empty());
        assert_eq!(
            config.discovery.master_handle().unwrap(),
            Some(PeerHandle::new("http://10.0.0.9:7000"))
        );
    }

    #[test]
    fn test_bad_master_rejected() {
        assert!(Config::from_toml_str("discovery.master = \"nope\"\n").is_err());
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert!(config.discovery.seeds().is_empty());
        assert_eq!(config.node.data_dir, PathBuf::from("logs"));
    }
}
