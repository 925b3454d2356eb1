//! In-Memory Cluster Adapter
//!
//! A deterministic simulated cluster implementing [`ClusterClient`]. Remote
//! operations complete after configurable delays measured on the tokio
//! clock, so paused-time tests exercise real timeout paths.
//!
//! The simulation mirrors the platform rules the orchestrator relies on:
//! - infrastructure VMs power off when their host enters maintenance and
//!   power back on when it exits
//! - maintenance entry is refused while targeted VMs still run on the host
//! - a powered-off host stops responding

use crate::domain::ports::{
    ClusterClient, ClusterRef, ConnectionState, HostInfo, MaintenanceTransition, MigrationMode,
    OperationHandle, OperationKind, PowerMode, RemoteOperationState, VmInfo, VmOperation,
    VmPowerState,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

// =============================================================================
// Seed Types
// =============================================================================

/// How a simulated VM reacts to power operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmBehavior {
    /// Honors every request
    #[default]
    Cooperative,
    /// Accepts a guest shutdown but never powers off
    IgnoresGuestShutdown,
    /// Guest tools are not running; guest shutdown fails immediately
    NoGuestTools,
    /// Power-on fails
    FailsToStart,
}

/// How a simulated host reacts to maintenance requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostBehavior {
    #[default]
    Normal,
    /// Maintenance transitions never finish
    StuckMaintenance,
}

/// Completion delays for simulated operations, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationTiming {
    pub guest_shutdown_ms: u64,
    pub power_on_ms: u64,
    pub force_stop_ms: u64,
    pub maintenance_ms: u64,
    pub host_power_off_ms: u64,
}

impl Default for SimulationTiming {
    fn default() -> Self {
        Self {
            guest_shutdown_ms: 2_000,
            power_on_ms: 1_000,
            force_stop_ms: 200,
            maintenance_ms: 3_000,
            host_power_off_ms: 1_000,
        }
    }
}

/// Simulated host definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSeed {
    pub name: String,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub disconnected: bool,
    #[serde(default)]
    pub behavior: HostBehavior,
}

/// Simulated VM definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSeed {
    pub name: String,
    pub host: String,
    #[serde(default = "default_vm_power")]
    pub power_state: VmPowerState,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub behavior: VmBehavior,
}

fn default_vm_power() -> VmPowerState {
    VmPowerState::On
}

fn default_infrastructure_prefix() -> String {
    "vCLS".to_string()
}

/// Initial state of a simulated cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSeed {
    pub cluster: String,
    #[serde(default = "default_infrastructure_prefix")]
    pub infrastructure_prefix: String,
    #[serde(default)]
    pub timing: SimulationTiming,
    pub hosts: Vec<HostSeed>,
    #[serde(default)]
    pub vms: Vec<VmSeed>,
}

impl ClusterSeed {
    /// Load a seed from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Three hosts, one infrastructure VM per host, one priority VM,
    /// five `tier`-tagged VMs and two untagged VMs, all powered on
    pub fn demo(cluster: impl Into<String>) -> Self {
        let hosts = ["esx-01", "esx-02", "esx-03"];
        let mut vms: Vec<VmSeed> = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| VmSeed::on(&format!("vCLS-{:02}", i + 1), h))
            .collect();

        vms.push(VmSeed::on("vcsa-01", "esx-01"));
        vms.push(VmSeed::on("db-01", "esx-01").tagged("tier", "db"));
        vms.push(VmSeed::on("db-02", "esx-02").tagged("tier", "db"));
        vms.push(VmSeed::on("app-01", "esx-02").tagged("tier", "app"));
        vms.push(VmSeed::on("app-02", "esx-03").tagged("tier", "app"));
        vms.push(VmSeed::on("app-03", "esx-03").tagged("tier", "app"));
        vms.push(VmSeed::on("misc-01", "esx-01"));
        vms.push(VmSeed::on("misc-02", "esx-02"));

        Self {
            cluster: cluster.into(),
            infrastructure_prefix: default_infrastructure_prefix(),
            timing: SimulationTiming::default(),
            hosts: hosts
                .iter()
                .map(|h| HostSeed {
                    name: h.to_string(),
                    maintenance: false,
                    disconnected: false,
                    behavior: HostBehavior::Normal,
                })
                .collect(),
            vms,
        }
    }
}

impl VmSeed {
    /// A cooperative, powered-on VM
    pub fn on(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            power_state: VmPowerState::On,
            tags: BTreeMap::new(),
            behavior: VmBehavior::Cooperative,
        }
    }

    pub fn tagged(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

// =============================================================================
// Call Log
// =============================================================================

/// A mutating call accepted by the simulated API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCall {
    /// Position in the global call order
    pub seq: usize,
    pub kind: OperationKind,
    pub target: String,
}

// =============================================================================
// Simulation State
// =============================================================================

#[derive(Debug, Clone)]
struct SimHost {
    connection_state: ConnectionState,
    power_mode: PowerMode,
    behavior: HostBehavior,
}

#[derive(Debug, Clone)]
struct SimVm {
    power_state: VmPowerState,
    tags: BTreeMap<String, String>,
    host: String,
    behavior: VmBehavior,
}

#[derive(Debug, Clone)]
enum Effect {
    None,
    VmPower { vm: String, state: VmPowerState },
    HostMode { host: String, mode: PowerMode },
    HostPowerOff { host: String },
}

#[derive(Debug, Clone)]
struct SimTask {
    effect: Effect,
    /// `None` never completes
    completes_at: Option<Instant>,
    failure: Option<String>,
    done: bool,
}

#[derive(Debug)]
struct SimState {
    hosts: BTreeMap<String, SimHost>,
    vms: BTreeMap<String, SimVm>,
    tasks: HashMap<String, SimTask>,
    next_task: u64,
    unreachable: bool,
    /// Drop tasks once they finish, like APIs with short task retention
    purge_finished: bool,
    calls: Vec<ClusterCall>,
    violations: Vec<String>,
}

impl SimState {
    /// Apply every task whose completion time has passed
    fn settle(&mut self, prefix: &str) {
        let now = Instant::now();
        let mut due: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, t)| !t.done && t.completes_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();
        // Task ids are sequential; apply in issue order
        due.sort_by_key(|id| id.trim_start_matches("task-").parse::<u64>().unwrap_or(0));

        for id in due {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            task.done = true;
            if task.failure.is_some() {
                continue;
            }
            let effect = task.effect.clone();
            self.apply(effect, prefix);
        }
        if self.purge_finished {
            self.tasks.retain(|_, t| !t.done);
        }
    }

    fn apply(&mut self, effect: Effect, prefix: &str) {
        match effect {
            Effect::None => {}
            Effect::VmPower { vm, state } => {
                if let Some(v) = self.vms.get_mut(&vm) {
                    v.power_state = state;
                }
            }
            Effect::HostMode { host, mode } => {
                if let Some(h) = self.hosts.get_mut(&host) {
                    h.power_mode = mode;
                }
                // Platform agents follow their host's placement mode
                let agent_state = match mode {
                    PowerMode::Maintenance => VmPowerState::Off,
                    PowerMode::Normal => VmPowerState::On,
                };
                for (name, vm) in self.vms.iter_mut() {
                    if vm.host == host && name.starts_with(prefix) {
                        vm.power_state = agent_state;
                    }
                }
            }
            Effect::HostPowerOff { host } => {
                if let Some(h) = self.hosts.get_mut(&host) {
                    h.connection_state = ConnectionState::NotResponding;
                }
                for vm in self.vms.values_mut() {
                    if vm.host == host {
                        vm.power_state = VmPowerState::Off;
                    }
                }
            }
        }
    }

    fn record(&mut self, kind: OperationKind, target: &str) {
        let seq = self.calls.len();
        self.calls.push(ClusterCall {
            seq,
            kind,
            target: target.to_string(),
        });
    }

    fn spawn_task(&mut self, effect: Effect, delay: Option<Duration>, failure: Option<String>) -> OperationHandle {
        self.next_task += 1;
        let id = format!("task-{}", self.next_task);
        self.tasks.insert(
            id.clone(),
            SimTask {
                effect,
                completes_at: delay.map(|d| Instant::now() + d),
                failure,
                done: false,
            },
        );
        OperationHandle(id)
    }
}

// =============================================================================
// In-Memory Cluster
// =============================================================================

/// Simulated cluster management API
pub struct InMemoryCluster {
    cluster: ClusterRef,
    infrastructure_prefix: String,
    timing: SimulationTiming,
    state: Mutex<SimState>,
}

impl InMemoryCluster {
    /// Build a simulated cluster from a seed
    pub fn from_seed(seed: ClusterSeed) -> Self {
        let hosts = seed
            .hosts
            .into_iter()
            .map(|h| {
                let host = SimHost {
                    connection_state: if h.disconnected {
                        ConnectionState::Disconnected
                    } else {
                        ConnectionState::Connected
                    },
                    power_mode: if h.maintenance {
                        PowerMode::Maintenance
                    } else {
                        PowerMode::Normal
                    },
                    behavior: h.behavior,
                };
                (h.name, host)
            })
            .collect();

        let vms = seed
            .vms
            .into_iter()
            .map(|v| {
                let vm = SimVm {
                    power_state: v.power_state,
                    tags: v.tags,
                    host: v.host,
                    behavior: v.behavior,
                };
                (v.name, vm)
            })
            .collect();

        info!("Simulated cluster '{}' ready", seed.cluster);

        Self {
            cluster: ClusterRef::new(seed.cluster),
            infrastructure_prefix: seed.infrastructure_prefix,
            timing: seed.timing,
            state: Mutex::new(SimState {
                hosts,
                vms,
                tasks: HashMap::new(),
                next_task: 0,
                unreachable: false,
                purge_finished: false,
                calls: Vec::new(),
                violations: Vec::new(),
            }),
        }
    }

    /// Make every call fail with a connection error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Forget finished tasks; polling one afterwards fails with `NotFound`
    pub fn set_purge_finished_tasks(&self, purge: bool) {
        self.state.lock().purge_finished = purge;
    }

    pub fn set_vm_behavior(&self, vm: &str, behavior: VmBehavior) {
        if let Some(v) = self.state.lock().vms.get_mut(vm) {
            v.behavior = behavior;
        }
    }

    pub fn set_host_behavior(&self, host: &str, behavior: HostBehavior) {
        if let Some(h) = self.state.lock().hosts.get_mut(host) {
            h.behavior = behavior;
        }
    }

    /// Mutating calls accepted so far, in order
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().calls.clone()
    }

    /// Host power-offs issued while a safety precondition did not hold
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Current power state of a VM
    pub fn vm_power_state(&self, vm: &str) -> Option<VmPowerState> {
        let mut state = self.state.lock();
        state.settle(&self.infrastructure_prefix);
        state.vms.get(vm).map(|v| v.power_state)
    }

    fn check_reachable(&self, state: &SimState) -> Result<()> {
        if state.unreachable {
            return Err(Error::Connection(format!(
                "cannot reach management API for '{}'",
                self.cluster
            )));
        }
        Ok(())
    }

    fn check_cluster(&self, cluster: &ClusterRef) -> Result<()> {
        if cluster != &self.cluster {
            return Err(Error::ClusterNotFound {
                cluster: cluster.name().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_hosts(&self, cluster: &ClusterRef) -> Result<Vec<HostInfo>> {
        let mut state = self.state.lock();
        self.check_reachable(&state)?;
        self.check_cluster(cluster)?;
        state.settle(&self.infrastructure_prefix);

        Ok(state
            .hosts
            .iter()
            .map(|(name, h)| HostInfo {
                name: name.clone(),
                connection_state: h.connection_state,
                power_mode: h.power_mode,
            })
            .collect())
    }

    async fn list_vms(&self, cluster: &ClusterRef) -> Result<Vec<VmInfo>> {
        let mut state = self.state.lock();
        self.check_reachable(&state)?;
        self.check_cluster(cluster)?;
        state.settle(&self.infrastructure_prefix);

        Ok(state
            .vms
            .iter()
            .map(|(name, v)| VmInfo {
                name: name.clone(),
                power_state: v.power_state,
                tags: v.tags.clone(),
                host_name: v.host.clone(),
            })
            .collect())
    }

    async fn get_host(&self, name: &str) -> Result<HostInfo> {
        let mut state = self.state.lock();
        self.check_reachable(&state)?;
        state.settle(&self.infrastructure_prefix);

        state
            .hosts
            .get(name)
            .map(|h| HostInfo {
                name: name.to_string(),
                connection_state: h.connection_state,
                power_mode: h.power_mode,
            })
            .ok_or_else(|| Error::NotFound {
                kind: "HostSystem".into(),
                name: name.into(),
            })
    }

    async fn launch_vm_operation(&self, vm: &str, op: VmOperation) -> Result<OperationHandle> {
        let mut state = self.state.lock();
        self.check_reachable(&state)?;
        state.settle(&self.infrastructure_prefix);

        let sim = state.vms.get(vm).cloned().ok_or_else(|| Error::NotFound {
            kind: "VirtualMachine".into(),
            name: vm.into(),
        })?;
        let host_up = state
            .hosts
            .get(&sim.host)
            .is_some_and(|h| h.connection_state == ConnectionState::Connected);

        state.record(op.into(), vm);
        debug!("Simulated {:?} on {}", op, vm);

        let timing = &self.timing;
        let (effect, delay, failure) = if !host_up {
            (Effect::None, Some(Duration::ZERO), Some(format!("host {} is not responding", sim.host)))
        } else {
            match (op, sim.power_state) {
                (VmOperation::Start, VmPowerState::On) => {
                    (Effect::None, Some(Duration::ZERO), Some("VM is already powered on".to_string()))
                }
                (VmOperation::Start, _) if sim.behavior == VmBehavior::FailsToStart => (
                    Effect::None,
                    Some(Duration::from_millis(timing.power_on_ms)),
                    Some("insufficient resources to power on".to_string()),
                ),
                (VmOperation::Start, _) => (
                    Effect::VmPower {
                        vm: vm.to_string(),
                        state: VmPowerState::On,
                    },
                    Some(Duration::from_millis(timing.power_on_ms)),
                    None,
                ),
                (VmOperation::ShutdownGuest, VmPowerState::Off) => {
                    (Effect::None, Some(Duration::ZERO), Some("VM is already powered off".to_string()))
                }
                (VmOperation::ShutdownGuest, _) => match sim.behavior {
                    VmBehavior::NoGuestTools => (
                        Effect::None,
                        Some(Duration::ZERO),
                        Some("guest tools are not running".to_string()),
                    ),
                    // The request is accepted; the guest just never goes down
                    VmBehavior::IgnoresGuestShutdown => (Effect::None, Some(Duration::ZERO), None),
                    _ => (
                        Effect::VmPower {
                            vm: vm.to_string(),
                            state: VmPowerState::Off,
                        },
                        Some(Duration::from_millis(timing.guest_shutdown_ms)),
                        None,
                    ),
                },
                (VmOperation::ForceStop, VmPowerState::Off) => {
                    (Effect::None, Some(Duration::ZERO), Some("VM is already powered off".to_string()))
                }
                (VmOperation::ForceStop, _) => (
                    Effect::VmPower {
                        vm: vm.to_string(),
                        state: VmPowerState::Off,
                    },
                    Some(Duration::from_millis(timing.force_stop_ms)),
                    None,
                ),
            }
        };

        Ok(state.spawn_task(effect, delay, failure))
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<RemoteOperationState> {
        let mut state = self.state.lock();
        self.check_reachable(&state)?;
        state.settle(&self.infrastructure_prefix);

        let task = state.tasks.get(handle.as_str()).ok_or_else(|| Error::NotFound {
            kind: "Task".into(),
            name: handle.to_string(),
        })?;

        Ok(match (task.done, &task.failure) {
            (false, _) => RemoteOperationState::Running,
            (true, Some(reason)) => RemoteOperationState::Failed(reason.clone()),
            (true, None) => RemoteOperationState::Succeeded,
        })
    }

    async fn set_host_maintenance(
        &self,
        host: &str,
        transition: MaintenanceTransition,
        migration: MigrationMode,
    ) -> Result<OperationHandle> {
        let mut state = self.state.lock();
        self.check_reachable(&state)?;
        state.settle(&self.infrastructure_prefix);

        let sim = state.hosts.get(host).cloned().ok_or_else(|| Error::NotFound {
            kind: "HostSystem".into(),
            name: host.into(),
        })?;

        state.record(transition.into(), host);
        debug!("Simulated {:?} maintenance on {} ({})", transition, host, migration);

        let running: Vec<String> = state
            .vms
            .iter()
            .filter(|(name, vm)| {
                vm.host == host
                    && vm.power_state == VmPowerState::On
                    && !name.starts_with(&self.infrastructure_prefix)
            })
            .map(|(name, _)| name.clone())
            .collect();

        let mode = match transition {
            MaintenanceTransition::Enter => PowerMode::Maintenance,
            MaintenanceTransition::Exit => PowerMode::Normal,
        };
        let effect = Effect::HostMode {
            host: host.to_string(),
            mode,
        };

        let handle = if sim.connection_state != ConnectionState::Connected {
            state.spawn_task(Effect::None, Some(Duration::ZERO), Some("host is not connected".into()))
        } else if transition == MaintenanceTransition::Enter && !running.is_empty() {
            state.spawn_task(
                Effect::None,
                Some(Duration::ZERO),
                Some(format!("{} powered-on VMs still on host: {}", running.len(), running.join(", "))),
            )
        } else if sim.behavior == HostBehavior::StuckMaintenance {
            state.spawn_task(effect, None, None)
        } else {
            state.spawn_task(effect, Some(Duration::from_millis(self.timing.maintenance_ms)), None)
        };

        Ok(handle)
    }

    async fn power_off_host(&self, host: &str) -> Result<OperationHandle> {
        let mut state = self.state.lock();
        self.check_reachable(&state)?;
        state.settle(&self.infrastructure_prefix);

        let sim = state.hosts.get(host).cloned().ok_or_else(|| Error::NotFound {
            kind: "HostSystem".into(),
            name: host.into(),
        })?;

        state.record(OperationKind::ShutdownHost, host);

        if sim.power_mode != PowerMode::Maintenance {
            state
                .violations
                .push(format!("{} powered off outside maintenance", host));
        }
        let running = state.vms.iter().any(|(name, vm)| {
            vm.host == host
                && vm.power_state == VmPowerState::On
                && !name.starts_with(&self.infrastructure_prefix)
        });
        if running {
            state
                .violations
                .push(format!("{} powered off with VMs still running", host));
        }

        let effect = Effect::HostPowerOff {
            host: host.to_string(),
        };
        Ok(state.spawn_task(effect, Some(Duration::from_millis(self.timing.host_power_off_ms)), None))
    }

    fn client_name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> InMemoryCluster {
        InMemoryCluster::from_seed(ClusterSeed::demo("lab"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_shutdown_completes_after_delay() {
        let cluster = cluster();
        let handle = cluster
            .launch_vm_operation("db-01", VmOperation::ShutdownGuest)
            .await
            .unwrap();

        assert_eq!(
            cluster.poll_operation(&handle).await.unwrap(),
            RemoteOperationState::Running
        );
        assert_eq!(cluster.vm_power_state("db-01"), Some(VmPowerState::On));

        tokio::time::advance(Duration::from_millis(2_000)).await;

        assert_eq!(
            cluster.poll_operation(&handle).await.unwrap(),
            RemoteOperationState::Succeeded
        );
        assert_eq!(cluster.vm_power_state("db-01"), Some(VmPowerState::Off));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_guest_tools_fails() {
        let cluster = cluster();
        cluster.set_vm_behavior("app-01", VmBehavior::NoGuestTools);

        let handle = cluster
            .launch_vm_operation("app-01", VmOperation::ShutdownGuest)
            .await
            .unwrap();
        assert!(matches!(
            cluster.poll_operation(&handle).await.unwrap(),
            RemoteOperationState::Failed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_refused_with_running_vms() {
        let cluster = cluster();
        let handle = cluster
            .set_host_maintenance("esx-03", MaintenanceTransition::Enter, MigrationMode::default())
            .await
            .unwrap();

        let state = cluster.poll_operation(&handle).await.unwrap();
        assert!(matches!(state, RemoteOperationState::Failed(reason) if reason.contains("app-02")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_powers_off_agents() {
        let seed = ClusterSeed {
            vms: vec![VmSeed::on("vCLS-01", "esx-01")],
            ..ClusterSeed::demo("lab")
        };
        let cluster = InMemoryCluster::from_seed(seed);

        cluster
            .set_host_maintenance("esx-01", MaintenanceTransition::Enter, MigrationMode::default())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(3_000)).await;

        let host = cluster.get_host("esx-01").await.unwrap();
        assert!(host.in_maintenance());
        assert_eq!(cluster.vm_power_state("vCLS-01"), Some(VmPowerState::Off));
    }

    #[tokio::test]
    async fn test_power_off_outside_maintenance_is_recorded() {
        let cluster = cluster();
        cluster.power_off_host("esx-02").await.unwrap();

        let violations = cluster.violations();
        assert_eq!(violations.len(), 2);
        assert_eq!(cluster.calls().len(), 1);
        assert_eq!(cluster.calls()[0].kind, OperationKind::ShutdownHost);
    }

    #[tokio::test]
    async fn test_seed_from_yaml() {
        let raw = r#"
cluster: lab
hosts:
  - name: esx-01
    maintenance: true
vms:
  - name: web-01
    host: esx-01
    power_state: off
    tags: { tier: app }
    behavior: fails_to_start
"#;
        let seed: ClusterSeed = serde_yaml::from_str(raw).unwrap();
        assert_eq!(seed.infrastructure_prefix, "vCLS");
        assert_eq!(seed.vms[0].behavior, VmBehavior::FailsToStart);

        let cluster = InMemoryCluster::from_seed(seed);
        let hosts = cluster.list_hosts(&ClusterRef::new("lab")).await.unwrap();
        assert!(hosts[0].in_maintenance());
    }

    #[test]
    fn test_bundled_demo_seed() {
        let seed: ClusterSeed = serde_yaml::from_str(include_str!("../../demos/lab-seed.yaml")).unwrap();
        assert_eq!(seed.hosts.len(), 3);
        assert_eq!(seed.vms.len(), 11);
        assert!(seed
            .vms
            .iter()
            .any(|vm| vm.behavior == VmBehavior::IgnoresGuestShutdown));
    }
}
