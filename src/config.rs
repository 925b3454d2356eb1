//! Orchestrator Configuration
//!
//! Resolved configuration value object, loaded from YAML and validated
//! eagerly so that a bad category reference fails before any cluster
//! operation is issued.

use crate::classification::VmClassifier;
use crate::domain::ports::{ClusterRef, MigrationMode};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Configuration for a cluster power run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target cluster name
    pub cluster: String,
    /// Management API connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// VM category definitions
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Per-operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Host transition settings
    #[serde(default)]
    pub hosts: HostConfig,
}

impl Config {
    /// Create a configuration with defaults for the given cluster
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            connection: ConnectionConfig::default(),
            classification: ClassificationConfig::default(),
            timeouts: TimeoutConfig::default(),
            hosts: HostConfig::default(),
        }
    }

    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Cluster reference for this configuration
    pub fn cluster_ref(&self) -> ClusterRef {
        ClusterRef::new(self.cluster.clone())
    }

    /// Management API request timeout
    pub fn connection_timeout(&self) -> Duration {
        self.connection
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.timeouts.connection())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster.trim().is_empty() {
            return Err(Error::Configuration("cluster name must not be empty".into()));
        }
        if self.connection.timeout_secs == Some(0) {
            return Err(Error::Configuration("connection.timeout_secs must be > 0".into()));
        }
        self.timeouts.validate()?;
        // Resolving the classifier checks every category reference.
        VmClassifier::from_config(&self.classification)?;
        Ok(())
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Management API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Base URL of the cluster management API
    pub endpoint: Option<String>,
    /// Environment variable holding the pre-issued session token
    pub token_env: String,
    /// Request timeout; falls back to `timeouts.connection_secs`
    pub timeout_secs: Option<u64>,
    /// Accept self-signed certificates
    pub accept_invalid_certs: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: "CLUSTER_API_TOKEN".to_string(),
            timeout_secs: None,
            accept_invalid_certs: false,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// A tag-defined VM group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroupConfig {
    /// Group name, also its category id
    pub name: String,
    /// Tag key to inspect
    pub key: String,
    /// Tag value that selects this group
    pub value: String,
}

/// VM category definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Name prefix of platform-managed VMs that are never targeted
    pub infrastructure_prefix: String,
    /// VMs in the priority category, by exact name
    pub priority_vms: Vec<String>,
    /// Tag groups, listed in startup order
    pub tag_groups: Vec<TagGroupConfig>,
    /// Explicit startup order by category id (priority, other, or a group name)
    pub startup_order: Option<Vec<String>>,
    /// Explicit shutdown order by category id
    pub shutdown_order: Option<Vec<String>>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            infrastructure_prefix: "vCLS".to_string(),
            priority_vms: Vec::new(),
            tag_groups: Vec::new(),
            startup_order: None,
            shutdown_order: None,
        }
    }
}

// =============================================================================
// Timeouts
// =============================================================================

/// Per-operation timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Graceful VM shutdown convergence
    pub vm_shutdown_secs: u64,
    /// VM power-on convergence
    pub vm_startup_secs: u64,
    /// Convergence after a force-stop
    pub force_stop_secs: u64,
    /// Remote operation completion
    pub operation_secs: u64,
    /// Host maintenance entry/exit
    pub host_maintenance_secs: u64,
    /// Management API connection
    pub connection_secs: u64,
    /// Spacing between polls
    pub poll_interval_secs: u64,
    /// Boot settle time between startup categories
    pub startup_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            vm_shutdown_secs: 300,
            vm_startup_secs: 300,
            force_stop_secs: 60,
            operation_secs: 120,
            host_maintenance_secs: 600,
            connection_secs: 30,
            poll_interval_secs: 5,
            startup_grace_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn vm_shutdown(&self) -> Duration {
        Duration::from_secs(self.vm_shutdown_secs)
    }

    pub fn vm_startup(&self) -> Duration {
        Duration::from_secs(self.vm_startup_secs)
    }

    pub fn force_stop(&self) -> Duration {
        Duration::from_secs(self.force_stop_secs)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_secs(self.operation_secs)
    }

    pub fn host_maintenance(&self) -> Duration {
        Duration::from_secs(self.host_maintenance_secs)
    }

    pub fn connection(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("vm_shutdown_secs", self.vm_shutdown_secs),
            ("vm_startup_secs", self.vm_startup_secs),
            ("force_stop_secs", self.force_stop_secs),
            ("operation_secs", self.operation_secs),
            ("host_maintenance_secs", self.host_maintenance_secs),
            ("connection_secs", self.connection_secs),
            ("poll_interval_secs", self.poll_interval_secs),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(Error::Configuration(format!("timeouts.{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Hosts
// =============================================================================

/// Host transition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Storage data handling on maintenance entry
    pub migration_mode: MigrationMode,
    /// Power off hosts once they are in maintenance
    pub shutdown_hosts: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            migration_mode: MigrationMode::EnsureAccessibility,
            shutdown_hosts: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const SAMPLE: &str = r#"
cluster: prod-east
connection:
  endpoint: https://vcenter.example.net
classification:
  priority_vms: [vcsa-01]
  tag_groups:
    - { name: databases, key: tier, value: db }
    - { name: apps, key: tier, value: app }
timeouts:
  vm_shutdown_secs: 120
  startup_grace_secs: 0
hosts:
  migration_mode: no_data_migration
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.cluster, "prod-east");
        assert_eq!(config.classification.tag_groups.len(), 2);
        assert_eq!(config.classification.infrastructure_prefix, "vCLS");
        assert_eq!(config.timeouts.vm_shutdown(), Duration::from_secs(120));
        assert_eq!(config.timeouts.vm_startup(), Duration::from_secs(300));
        assert_eq!(config.hosts.migration_mode, MigrationMode::NoDataMigration);
        assert!(config.hosts.shutdown_hosts);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cluster_ref().name(), "prod-east");
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/cluster-power.yaml");
        assert_matches!(result, Err(Error::Io(_)));
    }

    #[test]
    fn test_unknown_order_reference_fails() {
        let raw = r#"
cluster: prod-east
classification:
  tag_groups:
    - { name: databases, key: tier, value: db }
  shutdown_order: [databases, caches, priority, other]
"#;
        assert_matches!(Config::from_yaml_str(raw), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::new("prod-east");
        config.timeouts.poll_interval_secs = 0;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_empty_cluster_rejected() {
        assert!(Config::new("  ").validate().is_err());
    }

    #[test]
    fn test_connection_timeout_key() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.connection_timeout(), Duration::from_secs(30));

        let raw = "cluster: lab\nconnection:\n  timeout_secs: 7\n";
        let config = Config::from_yaml_str(raw).unwrap();
        assert_eq!(config.connection.timeout_secs, Some(7));
        assert_eq!(config.connection_timeout(), Duration::from_secs(7));

        let raw = "cluster: lab\nconnection:\n  timeout_secs: 0\n";
        assert_matches!(Config::from_yaml_str(raw), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_bundled_demo_config() {
        let config = Config::from_yaml_str(include_str!("../demos/cluster-power.yaml")).unwrap();
        assert_eq!(config.cluster, "lab");
        assert_eq!(config.classification.priority_vms, vec!["vcsa-01"]);
    }
}
