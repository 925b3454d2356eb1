//! Inventory Snapshot
//!
//! A pure read of the cluster's hosts and VMs. Snapshots are advisory: the
//! cluster client stays the source of truth, so callers take a fresh one
//! after every transition instead of trusting an old copy.

use crate::domain::ports::{ClusterClient, ClusterRef, HostInfo, VmInfo, VmPowerState};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Point-in-time view of a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub cluster: ClusterRef,
    pub hosts: Vec<HostInfo>,
    pub vms: Vec<VmInfo>,
    pub taken_at: DateTime<Utc>,
}

impl InventorySnapshot {
    /// Read hosts and VMs from the cluster client
    pub async fn capture(client: &dyn ClusterClient, cluster: &ClusterRef) -> Result<Self> {
        let (hosts, vms) = tokio::try_join!(client.list_hosts(cluster), client.list_vms(cluster))?;

        debug!(
            "Inventory snapshot of {}: {} hosts, {} VMs",
            cluster,
            hosts.len(),
            vms.len()
        );

        Ok(Self {
            cluster: cluster.clone(),
            hosts,
            vms,
            taken_at: Utc::now(),
        })
    }

    pub fn host(&self, name: &str) -> Option<&HostInfo> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn connected_hosts(&self) -> impl Iterator<Item = &HostInfo> {
        self.hosts.iter().filter(|h| h.is_connected())
    }

    pub fn hosts_in_maintenance(&self) -> impl Iterator<Item = &HostInfo> {
        self.hosts.iter().filter(|h| h.in_maintenance())
    }

    pub fn vms_in_state(&self, state: VmPowerState) -> impl Iterator<Item = &VmInfo> {
        self.vms.iter().filter(move |v| v.power_state == state)
    }

    pub fn vms_on_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a VmInfo> {
        self.vms.iter().filter(move |v| v.host_name == host)
    }

    /// Counts for status display
    pub fn summary(&self) -> InventorySummary {
        InventorySummary {
            hosts_total: self.hosts.len(),
            hosts_connected: self.connected_hosts().count(),
            hosts_in_maintenance: self.hosts_in_maintenance().count(),
            vms_total: self.vms.len(),
            vms_powered_on: self.vms_in_state(VmPowerState::On).count(),
            vms_powered_off: self.vms_in_state(VmPowerState::Off).count(),
            vms_suspended: self.vms_in_state(VmPowerState::Suspended).count(),
        }
    }
}

/// Aggregate inventory counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub hosts_total: usize,
    pub hosts_connected: usize,
    pub hosts_in_maintenance: usize,
    pub vms_total: usize,
    pub vms_powered_on: usize,
    pub vms_powered_off: usize,
    pub vms_suspended: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSeed, InMemoryCluster};
    use crate::error::Error;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_capture_and_summary() {
        let cluster = InMemoryCluster::from_seed(ClusterSeed::demo("lab"));
        let snapshot = InventorySnapshot::capture(&cluster, &ClusterRef::new("lab"))
            .await
            .unwrap();

        let summary = snapshot.summary();
        assert_eq!(summary.hosts_total, 3);
        assert_eq!(summary.hosts_connected, 3);
        assert_eq!(summary.hosts_in_maintenance, 0);
        assert_eq!(summary.vms_total, snapshot.vms.len());
        assert!(snapshot.host("esx-01").is_some());
        assert!(snapshot.vms_on_host("esx-01").count() > 0);
    }

    #[tokio::test]
    async fn test_unknown_cluster() {
        let cluster = InMemoryCluster::from_seed(ClusterSeed::demo("lab"));
        let result = InventorySnapshot::capture(&cluster, &ClusterRef::new("prod")).await;
        assert_matches!(result, Err(Error::ClusterNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let cluster = InMemoryCluster::from_seed(ClusterSeed::demo("lab"));
        cluster.set_unreachable(true);
        let result = InventorySnapshot::capture(&cluster, &ClusterRef::new("lab")).await;
        assert_matches!(result, Err(Error::Connection(_)));
    }
}
