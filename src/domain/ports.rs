//! Domain Ports - Core types and the cluster client trait
//!
//! These types describe the cluster as observed through the management API.
//! Everything here is a read-only snapshot: the cluster client owns the
//! authoritative state and adapters implement [`ClusterClient`] to expose it.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Cluster Reference
// =============================================================================

/// Identifies the target cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterRef(String);

impl ClusterRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClusterRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Host Types
// =============================================================================

/// Connection state of a hypervisor host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    NotResponding,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::NotResponding => write!(f, "not_responding"),
        }
    }
}

/// Placement mode of a hypervisor host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    Normal,
    Maintenance,
}

impl std::fmt::Display for PowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerMode::Normal => write!(f, "normal"),
            PowerMode::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Observed state of a hypervisor host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    pub connection_state: ConnectionState,
    pub power_mode: PowerMode,
}

impl HostInfo {
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    pub fn in_maintenance(&self) -> bool {
        self.power_mode == PowerMode::Maintenance
    }
}

/// Requested maintenance transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceTransition {
    Enter,
    Exit,
}

/// How cluster storage treats data on a host entering maintenance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Only ensure objects stay accessible while the host is down
    #[default]
    EnsureAccessibility,
    /// Evacuate all data off the host
    FullDataMigration,
    /// Leave data in place
    NoDataMigration,
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationMode::EnsureAccessibility => write!(f, "ensure_accessibility"),
            MigrationMode::FullDataMigration => write!(f, "full_data_migration"),
            MigrationMode::NoDataMigration => write!(f, "no_data_migration"),
        }
    }
}

// =============================================================================
// Virtual Machine Types
// =============================================================================

/// Power state of a virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmPowerState {
    On,
    Off,
    Suspended,
}

impl std::fmt::Display for VmPowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmPowerState::On => write!(f, "on"),
            VmPowerState::Off => write!(f, "off"),
            VmPowerState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Observed state of a virtual machine
///
/// The name is the only stable handle across asynchronous operations, so
/// callers re-fetch by name rather than holding on to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    pub name: String,
    pub power_state: VmPowerState,
    /// Classification tags (tag key -> tag value)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub host_name: String,
}

impl VmInfo {
    pub fn is_powered_on(&self) -> bool {
        self.power_state == VmPowerState::On
    }
}

// =============================================================================
// Operation Types
// =============================================================================

/// Power operation issued against a virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmOperation {
    Start,
    /// Cooperative shutdown through guest tools
    ShutdownGuest,
    /// Hard power-off without guest cooperation
    ForceStop,
}

/// Kind of a tracked remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    StartVm,
    ShutdownVmGuest,
    ForceStopVm,
    EnterMaintenance,
    ExitMaintenance,
    ShutdownHost,
}

impl From<VmOperation> for OperationKind {
    fn from(op: VmOperation) -> Self {
        match op {
            VmOperation::Start => OperationKind::StartVm,
            VmOperation::ShutdownGuest => OperationKind::ShutdownVmGuest,
            VmOperation::ForceStop => OperationKind::ForceStopVm,
        }
    }
}

impl From<MaintenanceTransition> for OperationKind {
    fn from(t: MaintenanceTransition) -> Self {
        match t {
            MaintenanceTransition::Enter => OperationKind::EnterMaintenance,
            MaintenanceTransition::Exit => OperationKind::ExitMaintenance,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::StartVm => write!(f, "start-vm"),
            OperationKind::ShutdownVmGuest => write!(f, "shutdown-vm-guest"),
            OperationKind::ForceStopVm => write!(f, "force-stop-vm"),
            OperationKind::EnterMaintenance => write!(f, "enter-maintenance"),
            OperationKind::ExitMaintenance => write!(f, "exit-maintenance"),
            OperationKind::ShutdownHost => write!(f, "shutdown-host"),
        }
    }
}

/// Opaque handle to a remote operation (task id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a remote operation as reported by the management API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum RemoteOperationState {
    Running,
    Succeeded,
    Failed(String),
}

impl RemoteOperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteOperationState::Running)
    }
}

// =============================================================================
// Power Direction
// =============================================================================

/// Direction of a cluster-wide power transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Shutdown,
    Startup,
}

impl Direction {
    /// Power state a targeted VM must reach
    pub fn desired_power_state(&self) -> VmPowerState {
        match self {
            Direction::Shutdown => VmPowerState::Off,
            Direction::Startup => VmPowerState::On,
        }
    }

    /// Power state that makes a VM a target for this direction
    pub fn source_power_state(&self) -> VmPowerState {
        match self {
            Direction::Shutdown => VmPowerState::On,
            Direction::Startup => VmPowerState::Off,
        }
    }

    /// Cooperative operation issued to each member
    pub fn graceful_operation(&self) -> VmOperation {
        match self {
            Direction::Shutdown => VmOperation::ShutdownGuest,
            Direction::Startup => VmOperation::Start,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Shutdown => write!(f, "shutdown"),
            Direction::Startup => write!(f, "startup"),
        }
    }
}

// =============================================================================
// Cluster Client Port
// =============================================================================

/// Port for the cluster management API
///
/// Adapters receive an already-authenticated session. Every call may fail
/// with a transport error (`Error::Connection`) or `Error::NotFound`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List hosts in the cluster. Fails with `ClusterNotFound` for an unknown cluster.
    async fn list_hosts(&self, cluster: &ClusterRef) -> Result<Vec<HostInfo>>;

    /// List virtual machines in the cluster, with their classification tags
    async fn list_vms(&self, cluster: &ClusterRef) -> Result<Vec<VmInfo>>;

    /// Fetch a single host by name
    async fn get_host(&self, name: &str) -> Result<HostInfo>;

    /// Issue a non-blocking power operation against a virtual machine
    async fn launch_vm_operation(&self, vm: &str, op: VmOperation) -> Result<OperationHandle>;

    /// Report the current state of a previously launched operation
    async fn poll_operation(&self, handle: &OperationHandle) -> Result<RemoteOperationState>;

    /// Request a maintenance transition for a host
    async fn set_host_maintenance(
        &self,
        host: &str,
        transition: MaintenanceTransition,
        migration: MigrationMode,
    ) -> Result<OperationHandle>;

    /// Request a host power-off
    async fn power_off_host(&self, host: &str) -> Result<OperationHandle>;

    /// Adapter name for logging
    fn client_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterClientRef = Arc<dyn ClusterClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_display() {
        assert_eq!(format!("{}", OperationKind::ShutdownVmGuest), "shutdown-vm-guest");
        assert_eq!(format!("{}", OperationKind::EnterMaintenance), "enter-maintenance");
        assert_eq!(
            OperationKind::from(VmOperation::ForceStop),
            OperationKind::ForceStopVm
        );
    }

    #[test]
    fn test_remote_state_wire_format() {
        let failed = RemoteOperationState::Failed("guest tools not running".into());
        let json = serde_json::to_string(&failed).unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"guest tools not running"}"#);

        let running: RemoteOperationState = serde_json::from_str(r#"{"state":"running"}"#).unwrap();
        assert!(!running.is_terminal());
    }
}
