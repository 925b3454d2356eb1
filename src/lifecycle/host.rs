//! Host State Controller
//!
//! Moves hosts in and out of maintenance and powers them off. Maintenance
//! transitions are issued and then confirmed by polling the host itself;
//! a power-off is only sent to a connected host that is in maintenance and
//! has no targeted VM still running on it.

use crate::classification::VmClassifier;
use crate::domain::ports::{
    ClusterClientRef, ClusterRef, HostInfo, MaintenanceTransition, MigrationMode,
    OperationHandle, PowerMode, RemoteOperationState,
};
use crate::error::{Error, Result};
use crate::lifecycle::poll::{wait_until, PollPolicy};
use crate::lifecycle::report::{HostAction, HostOutcome, HostStatus};
use tracing::{debug, info, warn};

/// Issues and confirms host transitions
pub struct HostStateController {
    client: ClusterClientRef,
    cluster: ClusterRef,
    classifier: VmClassifier,
    migration: MigrationMode,
    policy: PollPolicy,
}

impl HostStateController {
    pub fn new(
        client: ClusterClientRef,
        cluster: ClusterRef,
        classifier: VmClassifier,
        migration: MigrationMode,
        policy: PollPolicy,
    ) -> Self {
        Self {
            client,
            cluster,
            classifier,
            migration,
            policy,
        }
    }

    /// Put a host into maintenance; a no-op if it already is
    pub async fn enter_maintenance(&self, host: &str) -> Result<HostOutcome> {
        self.transition(host, MaintenanceTransition::Enter).await
    }

    /// Take a host out of maintenance; a no-op if it is not in it
    pub async fn exit_maintenance(&self, host: &str) -> Result<HostOutcome> {
        self.transition(host, MaintenanceTransition::Exit).await
    }

    async fn transition(&self, host: &str, transition: MaintenanceTransition) -> Result<HostOutcome> {
        let (action, target_mode) = match transition {
            MaintenanceTransition::Enter => (HostAction::EnterMaintenance, PowerMode::Maintenance),
            MaintenanceTransition::Exit => (HostAction::ExitMaintenance, PowerMode::Normal),
        };

        let info = match self.client.get_host(host).await {
            Ok(info) => info,
            Err(e) => return self.recover(host, action, e),
        };

        if info.power_mode == target_mode {
            debug!("Host {} already {}", host, target_mode);
            return Ok(HostOutcome::new(host, action, HostStatus::Skipped)
                .with_detail(format!("already {}", target_mode))
                .with_mode(info.power_mode));
        }

        if !info.is_connected() {
            // A host that cannot leave maintenance keeps its VMs down
            let status = match transition {
                MaintenanceTransition::Enter => HostStatus::Skipped,
                MaintenanceTransition::Exit => HostStatus::Failed,
            };
            warn!("Host {} is {}; skipping {}", host, info.connection_state, action);
            return Ok(HostOutcome::new(host, action, status)
                .with_detail(format!("host is {}", info.connection_state))
                .with_mode(info.power_mode));
        }

        info!("Host {}: {} (migration: {})", host, action, self.migration);
        let handle = match self
            .client
            .set_host_maintenance(host, transition, self.migration)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return self.recover(host, action, e),
        };

        let waited = wait_until(
            || self.observe(host, &handle, target_mode),
            |(info, op): &(HostInfo, RemoteOperationState)| {
                info.power_mode == target_mode || matches!(op, RemoteOperationState::Failed(_))
            },
            self.policy,
        )
        .await;
        let (info, op) = match waited {
            Ok(outcome) => outcome.state,
            Err(e) => return self.recover(host, action, e),
        };

        let outcome = if info.power_mode == target_mode {
            info!("Host {} is now {}", host, target_mode);
            HostOutcome::new(host, action, HostStatus::Succeeded)
        } else if let RemoteOperationState::Failed(reason) = op {
            warn!("Host {}: {} failed: {}", host, action, reason);
            HostOutcome::new(host, action, HostStatus::Failed).with_detail(reason)
        } else {
            warn!("Host {}: {} timed out", host, action);
            HostOutcome::new(host, action, HostStatus::TimedOut).with_detail(format!(
                "still {} after {:?}",
                info.power_mode, self.policy.timeout
            ))
        };

        Ok(outcome.with_mode(info.power_mode))
    }

    /// Request a host power-off without waiting for it. Refused unless the
    /// host is in maintenance with no targeted VM powered on.
    pub async fn shutdown_host(&self, host: &str) -> Result<HostOutcome> {
        let action = HostAction::Shutdown;

        let info = match self.client.get_host(host).await {
            Ok(info) => info,
            Err(e) => return self.recover(host, action, e),
        };

        if !info.is_connected() {
            return Ok(HostOutcome::new(host, action, HostStatus::Skipped)
                .with_detail(format!("host is {}", info.connection_state))
                .with_mode(info.power_mode));
        }

        if !info.in_maintenance() {
            warn!("Refusing to power off {}: not in maintenance", host);
            return Ok(HostOutcome::new(host, action, HostStatus::Refused)
                .with_detail("host is not in maintenance")
                .with_mode(info.power_mode));
        }

        let vms = match self.client.list_vms(&self.cluster).await {
            Ok(vms) => vms,
            Err(e) => return self.recover(host, action, e),
        };
        let running: Vec<&str> = vms
            .iter()
            .filter(|vm| {
                vm.host_name == host && vm.is_powered_on() && !self.classifier.is_excluded(&vm.name)
            })
            .map(|vm| vm.name.as_str())
            .collect();

        if !running.is_empty() {
            warn!(
                "Refusing to power off {}: {} VMs still running",
                host,
                running.len()
            );
            return Ok(HostOutcome::new(host, action, HostStatus::Refused)
                .with_detail(format!("VMs still powered on: {}", running.join(", ")))
                .with_mode(info.power_mode));
        }

        info!("Powering off host {}", host);
        match self.client.power_off_host(host).await {
            Ok(handle) => Ok(HostOutcome::new(host, action, HostStatus::Succeeded)
                .with_detail(format!("power-off requested ({})", handle))
                .with_mode(info.power_mode)),
            Err(e) => self.recover(host, action, e),
        }
    }

    /// The host's mode is authoritative. The task is only consulted while
    /// the host has not arrived, and an unreadable task counts as running.
    async fn observe(
        &self,
        host: &str,
        handle: &OperationHandle,
        target_mode: PowerMode,
    ) -> Result<(HostInfo, RemoteOperationState)> {
        let info = self.client.get_host(host).await?;
        if info.power_mode == target_mode {
            return Ok((info, RemoteOperationState::Succeeded));
        }

        let op = match self.client.poll_operation(handle).await {
            Ok(op) => op,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!("Host {}: task {} unreadable: {}", host, handle, e);
                RemoteOperationState::Running
            }
        };
        Ok((info, op))
    }

    /// Fatal errors abort with host context; anything else fails only this host
    fn recover(&self, host: &str, action: HostAction, error: Error) -> Result<HostOutcome> {
        if error.is_fatal() {
            return Err(error.during(format!("{} on host {}", action, host)));
        }
        warn!("Host {}: {} failed: {}", host, action, error);
        Ok(HostOutcome::new(host, action, HostStatus::Failed).with_detail(error.to_string()))
    }
}
