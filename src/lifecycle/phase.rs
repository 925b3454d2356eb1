//! Phase Executor
//!
//! Drives one category through one direction:
//!
//! ```text
//! Idle -> Issuing -> Monitoring -> Converging -> [ForceFallback] -> Done
//! ```
//!
//! Every member's operation is issued before any waiting begins. Operation
//! completion and power-state convergence are tracked separately: an
//! accepted shutdown request says nothing about when the guest is off.
//! On shutdown, members that do not converge are force-stopped; on startup
//! they are reported and left alone. A phase never fails the run for a
//! member failure, only for a fatal client error.

use crate::classification::VmCategory;
use crate::config::TimeoutConfig;
use crate::domain::ports::{
    ClusterClient, ClusterClientRef, ClusterRef, Direction, VmInfo, VmOperation, VmPowerState,
};
use crate::error::Result;
use crate::lifecycle::events::{EventSink, LifecycleEvent};
use crate::lifecycle::poll::{wait_until, PollPolicy, WaitOutcome};
use crate::lifecycle::report::PhaseResult;
use crate::lifecycle::tracker::{OperationState, OperationTracker};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Power state of every VM in the cluster, by name
type PowerStates = HashMap<String, VmPowerState>;

// =============================================================================
// Phase State
// =============================================================================

/// Position of a phase in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Idle,
    Issuing,
    Monitoring,
    Converging,
    ForceFallback,
    Done,
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseState::Idle => write!(f, "idle"),
            PhaseState::Issuing => write!(f, "issuing"),
            PhaseState::Monitoring => write!(f, "monitoring"),
            PhaseState::Converging => write!(f, "converging"),
            PhaseState::ForceFallback => write!(f, "force_fallback"),
            PhaseState::Done => write!(f, "done"),
        }
    }
}

// =============================================================================
// Phase Policy
// =============================================================================

/// Timeouts applied to one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePolicy {
    pub poll_interval: Duration,
    /// Per-operation completion bound while monitoring
    pub operation_timeout: Duration,
    /// Bound on reaching the desired power state
    pub convergence_timeout: Duration,
    /// Bound on convergence after a force-stop
    pub force_timeout: Duration,
}

impl PhasePolicy {
    pub fn for_direction(timeouts: &TimeoutConfig, direction: Direction) -> Self {
        let convergence_timeout = match direction {
            Direction::Shutdown => timeouts.vm_shutdown(),
            Direction::Startup => timeouts.vm_startup(),
        };
        Self {
            poll_interval: timeouts.poll_interval(),
            operation_timeout: timeouts.operation(),
            convergence_timeout,
            force_timeout: timeouts.force_stop(),
        }
    }
}

// =============================================================================
// Phase Executor
// =============================================================================

/// Runs single phases against the cluster client
pub struct PhaseExecutor {
    client: ClusterClientRef,
    cluster: ClusterRef,
    events: EventSink,
}

impl PhaseExecutor {
    pub fn new(client: ClusterClientRef, cluster: ClusterRef, events: EventSink) -> Self {
        Self {
            client,
            cluster,
            events,
        }
    }

    /// Run one category to completion. Fatal client errors carry the phase
    /// as context; member failures land in the returned result.
    pub async fn run(
        &self,
        direction: Direction,
        category: &VmCategory,
        members: &[VmInfo],
        policy: &PhasePolicy,
    ) -> Result<PhaseResult> {
        self.execute(direction, category, members, policy)
            .await
            .map_err(|e| e.during(format!("{} phase '{}'", direction, category)))
    }

    async fn execute(
        &self,
        direction: Direction,
        category: &VmCategory,
        members: &[VmInfo],
        policy: &PhasePolicy,
    ) -> Result<PhaseResult> {
        let mut result = PhaseResult::new(category.clone(), direction, members.len());
        self.events.emit(LifecycleEvent::PhaseStarted {
            direction,
            category: category.clone(),
            members: members.len(),
        });

        if members.is_empty() {
            debug!("Phase {} has no members", category);
            return Ok(self.done(result));
        }

        let names: Vec<String> = members.iter().map(|vm| vm.name.clone()).collect();
        let desired = direction.desired_power_state();
        info!(
            "Starting {} phase {} with {} members",
            direction,
            category,
            names.len()
        );

        self.enter(category, PhaseState::Issuing);
        let mut tracker = OperationTracker::new(self.client.clone(), policy.poll_interval);
        tracker
            .launch_all(&names, direction.graceful_operation())
            .await?;

        self.enter(category, PhaseState::Monitoring);
        let op_errors = self.monitor(tracker, policy.operation_timeout).await?;

        self.enter(category, PhaseState::Converging);
        // Failed operations will not converge on their own
        let waiting: Vec<String> = names
            .iter()
            .filter(|n| !op_errors.contains_key(*n))
            .cloned()
            .collect();
        let outcome = self
            .converge(&waiting, desired, policy.convergence_timeout, policy.poll_interval)
            .await?;
        let mut states = outcome.state;
        if !outcome.satisfied {
            warn!(
                "Phase {} did not converge within {:?}",
                category, policy.convergence_timeout
            );
        }

        let mut force_errors = HashMap::new();
        let unconverged: Vec<String> = names
            .iter()
            .filter(|n| !is_settled(&states, n, desired))
            .cloned()
            .collect();

        if direction == Direction::Shutdown && !unconverged.is_empty() {
            self.enter(category, PhaseState::ForceFallback);
            warn!(
                "Force-stopping {} VMs in phase {}: {}",
                unconverged.len(),
                category,
                unconverged.join(", ")
            );
            result.forced_count = unconverged.len();
            self.events.emit(LifecycleEvent::ForceStopIssued {
                category: category.clone(),
                targets: unconverged.clone(),
            });

            let mut tracker = OperationTracker::new(self.client.clone(), policy.poll_interval);
            tracker.launch_all(&unconverged, VmOperation::ForceStop).await?;
            force_errors = self.monitor(tracker, policy.force_timeout).await?;

            let waiting: Vec<String> = unconverged
                .iter()
                .filter(|n| !force_errors.contains_key(*n))
                .cloned()
                .collect();
            states = self
                .converge(&waiting, desired, policy.force_timeout, policy.poll_interval)
                .await?
                .state;
        }

        for name in &names {
            match states.get(name) {
                None => result.record_failure(name, "VM no longer exists"),
                Some(state) if *state == desired => result.record_success(name),
                Some(state) => {
                    let reason = force_errors
                        .remove(name)
                        .map(|e| format!("force-stop failed: {}", e))
                        .or_else(|| {
                            (result.forced_count > 0)
                                .then(|| format!("still {} after force-stop", state))
                        })
                        .or_else(|| op_errors.get(name).cloned())
                        .unwrap_or_else(|| {
                            format!("still {} after {:?}", state, policy.convergence_timeout)
                        });
                    result.record_failure(name, reason);
                }
            }
        }

        Ok(self.done(result))
    }

    /// Consume a tracker's stream, returning the error of every failed operation
    async fn monitor(
        &self,
        tracker: OperationTracker,
        timeout: Duration,
    ) -> Result<HashMap<String, String>> {
        let mut failures = HashMap::new();
        let mut finished = tracker.observe(timeout);

        while let Some(op) = finished.next().await {
            let op = op?;
            self.events.emit(LifecycleEvent::OperationFinished {
                target: op.target.clone(),
                kind: op.kind,
                state: op.state,
                error: op.error.clone(),
            });

            match op.state {
                OperationState::Failed => {
                    let reason = op.error.unwrap_or_else(|| "operation failed".to_string());
                    warn!("{} on {} failed: {}", op.kind, op.target, reason);
                    failures.insert(op.target, reason);
                }
                OperationState::TimedOut => {
                    warn!(
                        "{} on {} still running after {:?}",
                        op.kind, op.target, timeout
                    );
                }
                _ => {}
            }
        }

        Ok(failures)
    }

    /// Wait until every waiting member reports the desired power state
    async fn converge(
        &self,
        waiting: &[String],
        desired: VmPowerState,
        timeout: Duration,
        interval: Duration,
    ) -> Result<WaitOutcome<PowerStates>> {
        wait_until(
            || power_states(self.client.as_ref(), &self.cluster),
            |states| waiting.iter().all(|n| is_settled(states, n, desired)),
            PollPolicy::new(interval, timeout),
        )
        .await
    }

    fn enter(&self, category: &VmCategory, state: PhaseState) {
        debug!("Phase {} -> {}", category, state);
        self.events.emit(LifecycleEvent::PhaseStateChanged {
            category: category.clone(),
            state,
        });
    }

    fn done(&self, mut result: PhaseResult) -> PhaseResult {
        self.enter(&result.category, PhaseState::Done);
        result.finish();

        if result.is_success() {
            info!(
                "Phase {} done: {}/{} converged ({} forced)",
                result.category, result.succeeded, result.attempted, result.forced_count
            );
        } else {
            warn!(
                "Phase {} done with failures: {}",
                result.category,
                result
                    .failed_names
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        self.events.emit(LifecycleEvent::PhaseCompleted {
            category: result.category.clone(),
            attempted: result.attempted,
            succeeded: result.succeeded,
            forced: result.forced_count,
            failed: result.failed_names.iter().cloned().collect(),
        });
        result
    }
}

async fn power_states(client: &dyn ClusterClient, cluster: &ClusterRef) -> Result<PowerStates> {
    Ok(client
        .list_vms(cluster)
        .await?
        .into_iter()
        .map(|vm| (vm.name, vm.power_state))
        .collect())
}

/// A member that no longer exists has nothing left to wait for
fn is_settled(states: &PowerStates, name: &str, desired: VmPowerState) -> bool {
    states.get(name).map_or(true, |state| *state == desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSeed, InMemoryCluster, VmBehavior, VmSeed};
    use crate::domain::ports::OperationKind;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn policy() -> PhasePolicy {
        PhasePolicy {
            poll_interval: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(30),
            convergence_timeout: Duration::from_secs(60),
            force_timeout: Duration::from_secs(10),
        }
    }

    async fn members(cluster: &InMemoryCluster, names: &[&str]) -> Vec<VmInfo> {
        cluster
            .list_vms(&ClusterRef::new("lab"))
            .await
            .unwrap()
            .into_iter()
            .filter(|vm| names.contains(&vm.name.as_str()))
            .collect()
    }

    fn executor(cluster: Arc<InMemoryCluster>) -> PhaseExecutor {
        PhaseExecutor::new(cluster, ClusterRef::new("lab"), EventSink::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_converges() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        let vms = members(&cluster, &["app-01", "app-02", "app-03"]).await;

        let result = executor(cluster.clone())
            .run(Direction::Shutdown, &VmCategory::TagGroup("app".into()), &vms, &policy())
            .await
            .unwrap();

        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.forced_count, 0);
        assert!(result.is_consistent());
        assert_eq!(cluster.vm_power_state("app-02"), Some(VmPowerState::Off));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_guest_is_force_stopped() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        cluster.set_vm_behavior("app-02", VmBehavior::IgnoresGuestShutdown);
        cluster.set_vm_behavior("app-03", VmBehavior::NoGuestTools);
        let vms = members(&cluster, &["app-01", "app-02", "app-03"]).await;

        let result = executor(cluster.clone())
            .run(Direction::Shutdown, &VmCategory::TagGroup("app".into()), &vms, &policy())
            .await
            .unwrap();

        assert_eq!(result.forced_count, 2);
        assert_eq!(result.succeeded, 3);
        assert!(result.is_consistent());

        let mut forced: Vec<_> = cluster
            .calls()
            .into_iter()
            .filter(|c| c.kind == OperationKind::ForceStopVm)
            .map(|c| c.target)
            .collect();
        forced.sort();
        assert_eq!(forced, vec!["app-02", "app-03"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_failure_is_recorded_without_force() {
        let mut seed = ClusterSeed::demo("lab");
        seed.vms = vec![
            VmSeed {
                power_state: VmPowerState::Off,
                ..VmSeed::on("web-01", "esx-01")
            },
            VmSeed {
                power_state: VmPowerState::Off,
                behavior: VmBehavior::FailsToStart,
                ..VmSeed::on("web-02", "esx-02")
            },
        ];
        let cluster = Arc::new(InMemoryCluster::from_seed(seed));
        let vms = members(&cluster, &["web-01", "web-02"]).await;

        let result = executor(cluster.clone())
            .run(Direction::Startup, &VmCategory::Other, &vms, &policy())
            .await
            .unwrap();

        assert_eq!(result.succeeded, 1);
        assert!(result.failed_names.contains("web-02"));
        assert!(result.failure_reasons["web-02"].contains("insufficient resources"));
        assert_eq!(result.forced_count, 0);
        assert!(result.is_consistent());
        assert!(cluster
            .calls()
            .iter()
            .all(|c| c.kind == OperationKind::StartVm));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_phase_issues_nothing() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        let result = executor(cluster.clone())
            .run(Direction::Shutdown, &VmCategory::Priority, &[], &policy())
            .await
            .unwrap();

        assert_eq!(result.attempted, 0);
        assert!(result.is_success());
        assert!(result.finished_at.is_some());
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_carries_phase_context() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        let vms = members(&cluster, &["db-01"]).await;
        cluster.set_unreachable(true);

        let err = executor(cluster)
            .run(Direction::Shutdown, &VmCategory::TagGroup("db".into()), &vms, &policy())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_matches!(&err, Error::Aborted { stage, .. } if stage == "shutdown phase 'db'");
        assert_matches!(err.root(), Error::Connection(_));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions_are_published() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        cluster.set_vm_behavior("db-01", VmBehavior::IgnoresGuestShutdown);
        let vms = members(&cluster, &["db-01"]).await;

        let events = EventSink::new();
        let mut rx = events.subscribe();
        let executor = PhaseExecutor::new(cluster, ClusterRef::new("lab"), events);
        executor
            .run(Direction::Shutdown, &VmCategory::TagGroup("db".into()), &vms, &policy())
            .await
            .unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LifecycleEvent::PhaseStateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                PhaseState::Issuing,
                PhaseState::Monitoring,
                PhaseState::Converging,
                PhaseState::ForceFallback,
                PhaseState::Done,
            ]
        );
    }
}
