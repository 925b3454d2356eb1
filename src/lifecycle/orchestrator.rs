//! Lifecycle Orchestrator
//!
//! Coordinates a cluster-wide shutdown or startup:
//! - Inventory snapshot and classification
//! - Strictly sequential phases, concurrent within a phase
//! - Host maintenance transitions and power-off
//! - Aggregate reporting and status events
//!
//! Member and host failures are recorded and the run carries on. Only a
//! fatal cluster client error ends a run early, and it surfaces as an
//! `Err` naming the stage it happened in.

use crate::classification::{Classification, VmCategory, VmClassifier};
use crate::config::Config;
use crate::domain::ports::{ClusterClientRef, ClusterRef, Direction, VmPowerState};
use crate::error::Result;
use crate::inventory::InventorySnapshot;
use crate::lifecycle::events::{EventSink, LifecycleEvent};
use crate::lifecycle::host::HostStateController;
use crate::lifecycle::phase::{PhaseExecutor, PhasePolicy};
use crate::lifecycle::poll::PollPolicy;
use crate::lifecycle::report::{
    HostAction, HostOutcome, LifecycleReport, PlannedHostAction, PlannedPhase, PowerPlan,
    Verification,
};
use chrono::Utc;
use futures::future::join_all;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs shutdown and startup against one cluster
pub struct LifecycleOrchestrator {
    client: ClusterClientRef,
    config: Config,
    cluster: ClusterRef,
    classifier: VmClassifier,
    events: EventSink,
    cancel: CancellationToken,
}

impl LifecycleOrchestrator {
    /// Create an orchestrator. The configuration is validated here so a bad
    /// category reference fails before anything is issued.
    pub fn new(client: ClusterClientRef, config: Config) -> Result<Self> {
        config.validate()?;
        let classifier = VmClassifier::from_config(&config.classification)?;

        info!(
            "Lifecycle orchestrator for cluster {} using the {} client",
            config.cluster,
            client.client_name()
        );

        Ok(Self {
            cluster: config.cluster_ref(),
            client,
            config,
            classifier,
            events: EventSink::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to status events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Token that stops a run at the next phase or host stage boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn classifier(&self) -> &VmClassifier {
        &self.classifier
    }

    /// Fresh inventory of the target cluster
    pub async fn snapshot(&self) -> Result<InventorySnapshot> {
        InventorySnapshot::capture(self.client.as_ref(), &self.cluster)
            .await
            .map_err(|e| e.during("inventory snapshot"))
    }

    // =========================================================================
    // Planning
    // =========================================================================

    pub async fn plan_shutdown(&self) -> Result<PowerPlan> {
        self.plan(Direction::Shutdown).await
    }

    pub async fn plan_startup(&self) -> Result<PowerPlan> {
        self.plan(Direction::Startup).await
    }

    /// Compute what a run would do, without issuing any operation
    pub async fn plan(&self, direction: Direction) -> Result<PowerPlan> {
        let snapshot = self.snapshot().await?;
        let classification = self.classify(&snapshot, direction);

        let phases = classification
            .groups
            .iter()
            .map(|(category, members)| PlannedPhase {
                category: category.clone(),
                members: members.iter().map(|vm| vm.name.clone()).collect(),
            })
            .collect();

        let planned = |host: &str, action| PlannedHostAction {
            host: host.to_string(),
            action,
        };
        let (hosts_before, hosts_after) = match direction {
            Direction::Startup => (
                snapshot
                    .hosts_in_maintenance()
                    .map(|h| planned(&h.name, HostAction::ExitMaintenance))
                    .collect(),
                Vec::new(),
            ),
            Direction::Shutdown => {
                let mut after: Vec<PlannedHostAction> = snapshot
                    .connected_hosts()
                    .filter(|h| !h.in_maintenance())
                    .map(|h| planned(&h.name, HostAction::EnterMaintenance))
                    .collect();
                if self.config.hosts.shutdown_hosts {
                    after.extend(
                        snapshot
                            .connected_hosts()
                            .map(|h| planned(&h.name, HostAction::Shutdown)),
                    );
                }
                (Vec::new(), after)
            }
        };

        Ok(PowerPlan {
            direction,
            cluster: self.cluster.to_string(),
            hosts_before,
            phases,
            hosts_after,
            excluded: self.excluded(&snapshot),
            taken_at: snapshot.taken_at,
        })
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Shut down every targeted VM by phase, then put hosts into maintenance
    /// and power off the ones confirmed there
    pub async fn shutdown_cluster(&self) -> Result<LifecycleReport> {
        let direction = Direction::Shutdown;
        let mut report = self.begin(direction);

        let snapshot = self.snapshot().await?;
        self.snapshot_taken(&snapshot);
        report.excluded = self.excluded(&snapshot);

        let classification = self.classify(&snapshot, direction);
        self.run_phases(&classification, &mut report, None).await?;

        if self.check_cancelled(&mut report, "host maintenance") {
            report.verification = Some(self.verify().await?);
            return Ok(self.complete(report));
        }

        // Hosts go down even after member failures; the power-off
        // precondition keeps it safe
        let hosts = self.host_controller();
        let entered = join_all(
            snapshot
                .hosts
                .iter()
                .map(|h| hosts.enter_maintenance(&h.name)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
        for outcome in &entered {
            self.record_host(&mut report, outcome.clone());
        }

        // Last point where the whole cluster is reliably observable
        report.verification = Some(self.verify().await?);

        if self.check_cancelled(&mut report, "host power-off") {
            return Ok(self.complete(report));
        }

        if self.config.hosts.shutdown_hosts {
            for outcome in entered.iter().filter(|o| o.confirmed_in_maintenance()) {
                let result = hosts.shutdown_host(&outcome.host).await?;
                self.record_host(&mut report, result);
            }
        } else {
            info!("Host power-off disabled; leaving hosts in maintenance");
        }

        Ok(self.complete(report))
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Take hosts out of maintenance, then start every targeted VM by
    /// phase with a settle delay between categories
    pub async fn startup_cluster(&self) -> Result<LifecycleReport> {
        let direction = Direction::Startup;
        let mut report = self.begin(direction);

        let mut snapshot = self.snapshot().await?;
        self.snapshot_taken(&snapshot);

        if self.check_cancelled(&mut report, "host maintenance exit") {
            report.excluded = self.excluded(&snapshot);
            report.verification = Some(self.verify().await?);
            return Ok(self.complete(report));
        }

        let hosts = self.host_controller();
        let exited = join_all(
            snapshot
                .hosts_in_maintenance()
                .map(|h| hosts.exit_maintenance(&h.name)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        if !exited.is_empty() {
            for outcome in exited {
                self.record_host(&mut report, outcome);
            }
            // Placement changed; classify against the hosts as they are now
            snapshot = self.snapshot().await?;
        }
        report.excluded = self.excluded(&snapshot);

        let classification = self.classify(&snapshot, direction);
        let grace = self.config.timeouts.startup_grace();
        self.run_phases(&classification, &mut report, Some(grace))
            .await?;

        report.verification = Some(self.verify().await?);
        Ok(self.complete(report))
    }

    // =========================================================================
    // Shared Steps
    // =========================================================================

    fn host_controller(&self) -> HostStateController {
        HostStateController::new(
            self.client.clone(),
            self.cluster.clone(),
            self.classifier.clone(),
            self.config.hosts.migration_mode,
            PollPolicy::new(
                self.config.timeouts.poll_interval(),
                self.config.timeouts.host_maintenance(),
            ),
        )
    }

    /// VMs in the direction's source power state, classified
    fn classify(&self, snapshot: &InventorySnapshot, direction: Direction) -> Classification {
        let source = direction.source_power_state();
        self.classifier
            .classify(snapshot.vms_in_state(source), direction)
    }

    fn excluded(&self, snapshot: &InventorySnapshot) -> Vec<String> {
        snapshot
            .vms
            .iter()
            .filter(|vm| self.classifier.is_excluded(&vm.name))
            .map(|vm| vm.name.clone())
            .collect()
    }

    /// Run every category in order; a phase starts only after the previous
    /// one is done
    async fn run_phases(
        &self,
        classification: &Classification,
        report: &mut LifecycleReport,
        grace: Option<Duration>,
    ) -> Result<()> {
        let direction = classification.direction;
        let executor = PhaseExecutor::new(
            self.client.clone(),
            self.cluster.clone(),
            self.events.clone(),
        );
        let policy = PhasePolicy::for_direction(&self.config.timeouts, direction);
        let last_populated = classification
            .groups
            .iter()
            .rposition(|(_, members)| !members.is_empty());

        info!(
            "{} of {}: {} targets in {} phases",
            direction,
            self.cluster,
            classification.target_count(),
            classification.groups.len()
        );

        for (index, (category, members)) in classification.groups.iter().enumerate() {
            if self.check_cancelled(report, &format!("phase '{}'", category)) {
                break;
            }

            let result = executor.run(direction, category, members, &policy).await?;
            report.phases.push(result);

            let more_to_come = last_populated.is_some_and(|last| index < last);
            match grace {
                Some(grace) if !members.is_empty() && more_to_come && !grace.is_zero() => {
                    self.grace_delay(category, grace).await;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Settle time after a category; cut short by cancellation
    async fn grace_delay(&self, after: &VmCategory, grace: Duration) {
        info!("Giving {} {:?} to settle", after, grace);
        self.events.emit(LifecycleEvent::GraceDelay {
            after: after.clone(),
            secs: grace.as_secs(),
        });

        tokio::select! {
            _ = tokio::time::sleep(grace) => {}
            _ = self.cancel.cancelled() => debug!("Grace delay after {} interrupted", after),
        }
    }

    async fn verify(&self) -> Result<Verification> {
        let snapshot = InventorySnapshot::capture(self.client.as_ref(), &self.cluster)
            .await
            .map_err(|e| e.during("verification snapshot"))?;

        let names_in = |state: VmPowerState| -> Vec<String> {
            snapshot
                .vms_in_state(state)
                .filter(|vm| !self.classifier.is_excluded(&vm.name))
                .map(|vm| vm.name.clone())
                .collect()
        };

        let verification = Verification {
            powered_on_targets: names_in(VmPowerState::On),
            powered_off_targets: names_in(VmPowerState::Off),
            hosts_in_maintenance: snapshot
                .hosts_in_maintenance()
                .map(|h| h.name.clone())
                .collect(),
        };

        debug!(
            "Verification: {} on, {} off, {} hosts in maintenance",
            verification.powered_on_targets.len(),
            verification.powered_off_targets.len(),
            verification.hosts_in_maintenance.len()
        );
        Ok(verification)
    }

    fn check_cancelled(&self, report: &mut LifecycleReport, next: &str) -> bool {
        if self.cancel.is_cancelled() && !report.cancelled {
            warn!("Run cancelled before {}", next);
            report.cancelled = true;
        }
        report.cancelled
    }

    fn record_host(&self, report: &mut LifecycleReport, outcome: HostOutcome) {
        self.events.emit(LifecycleEvent::HostTransition {
            outcome: outcome.clone(),
        });
        report.hosts.push(outcome);
    }

    fn begin(&self, direction: Direction) -> LifecycleReport {
        info!("Starting cluster {} of {}", direction, self.cluster);
        self.events.emit(LifecycleEvent::RunStarted {
            direction,
            cluster: self.cluster.to_string(),
        });
        LifecycleReport::new(direction, self.cluster.name())
    }

    fn snapshot_taken(&self, snapshot: &InventorySnapshot) {
        self.events.emit(LifecycleEvent::SnapshotTaken {
            hosts: snapshot.hosts.len(),
            vms: snapshot.vms.len(),
        });
    }

    fn complete(&self, mut report: LifecycleReport) -> LifecycleReport {
        report.finish();
        let success = report.is_success();

        if success {
            info!(
                "Cluster {} of {} complete: {} VMs, {} forced, took {}s",
                report.direction,
                self.cluster,
                report.total_attempted(),
                report.total_forced(),
                (Utc::now() - report.started_at).num_seconds()
            );
        } else {
            warn!(
                "Cluster {} of {} finished with {} failures{}",
                report.direction,
                self.cluster,
                report.failures().len(),
                if report.cancelled { " (cancelled)" } else { "" }
            );
        }

        self.events.emit(LifecycleEvent::RunCompleted {
            direction: report.direction,
            success,
            cancelled: report.cancelled,
        });
        report
    }
}
