//! Run Reports
//!
//! Structured results produced by a lifecycle run: one [`PhaseResult`] per
//! category, one [`HostOutcome`] per host transition, and the aggregate
//! [`LifecycleReport`] consumed by a presentation layer or exit-code mapper.

use crate::classification::VmCategory;
use crate::domain::ports::{Direction, PowerMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Phase Result
// =============================================================================

/// Outcome of one category on one direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub category: VmCategory,
    pub direction: Direction,
    pub attempted: usize,
    pub succeeded: usize,
    /// Members that needed a force-stop
    pub forced_count: usize,
    pub succeeded_names: BTreeSet<String>,
    pub failed_names: BTreeSet<String>,
    /// Why each failed member did not converge
    pub failure_reasons: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PhaseResult {
    pub fn new(category: VmCategory, direction: Direction, attempted: usize) -> Self {
        Self {
            category,
            direction,
            attempted,
            succeeded: 0,
            forced_count: 0,
            succeeded_names: BTreeSet::new(),
            failed_names: BTreeSet::new(),
            failure_reasons: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_success(&mut self, name: &str) {
        if self.succeeded_names.insert(name.to_string()) {
            self.succeeded += 1;
        }
    }

    pub fn record_failure(&mut self, name: &str, reason: impl Into<String>) {
        self.failed_names.insert(name.to_string());
        self.failure_reasons.insert(name.to_string(), reason.into());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.failed_names.is_empty()
    }

    /// Every attempted member is counted exactly once
    pub fn is_consistent(&self) -> bool {
        self.attempted == self.succeeded + self.failed_names.len()
            && self.succeeded_names.is_disjoint(&self.failed_names)
    }
}

// =============================================================================
// Host Outcomes
// =============================================================================

/// Host transition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    EnterMaintenance,
    ExitMaintenance,
    Shutdown,
}

impl std::fmt::Display for HostAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostAction::EnterMaintenance => write!(f, "enter-maintenance"),
            HostAction::ExitMaintenance => write!(f, "exit-maintenance"),
            HostAction::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Result of a host transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Succeeded,
    /// Already in the requested state, or not applicable
    Skipped,
    Failed,
    TimedOut,
    /// Not sent because a safety precondition did not hold
    Refused,
}

impl HostStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, HostStatus::Failed | HostStatus::TimedOut | HostStatus::Refused)
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Succeeded => write!(f, "succeeded"),
            HostStatus::Skipped => write!(f, "skipped"),
            HostStatus::Failed => write!(f, "failed"),
            HostStatus::TimedOut => write!(f, "timed_out"),
            HostStatus::Refused => write!(f, "refused"),
        }
    }
}

/// Outcome of one host transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOutcome {
    pub host: String,
    pub action: HostAction,
    pub status: HostStatus,
    pub detail: Option<String>,
    /// Placement mode last observed for the host
    pub observed_mode: Option<PowerMode>,
}

impl HostOutcome {
    pub fn new(host: &str, action: HostAction, status: HostStatus) -> Self {
        Self {
            host: host.to_string(),
            action,
            status,
            detail: None,
            observed_mode: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_mode(mut self, mode: PowerMode) -> Self {
        self.observed_mode = Some(mode);
        self
    }

    /// Host was last seen in maintenance
    pub fn confirmed_in_maintenance(&self) -> bool {
        self.observed_mode == Some(PowerMode::Maintenance)
    }
}

// =============================================================================
// Dry-run Plan
// =============================================================================

/// One category as it would run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPhase {
    pub category: VmCategory,
    pub members: Vec<String>,
}

/// A host transition a run would issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedHostAction {
    pub host: String,
    pub action: HostAction,
}

/// What a run would do against the current inventory, without doing it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerPlan {
    pub direction: Direction,
    pub cluster: String,
    /// Host transitions issued before the phases (startup)
    pub hosts_before: Vec<PlannedHostAction>,
    pub phases: Vec<PlannedPhase>,
    /// Host transitions issued after the phases (shutdown)
    pub hosts_after: Vec<PlannedHostAction>,
    pub excluded: Vec<String>,
    pub taken_at: DateTime<Utc>,
}

impl PowerPlan {
    pub fn target_count(&self) -> usize {
        self.phases.iter().map(|p| p.members.len()).sum()
    }
}

// =============================================================================
// Aggregate Report
// =============================================================================

/// Final cluster state check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Non-excluded VMs still powered on
    pub powered_on_targets: Vec<String>,
    /// Non-excluded VMs powered off
    pub powered_off_targets: Vec<String>,
    pub hosts_in_maintenance: Vec<String>,
}

/// One member or host that needs operator attention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// Phase category id, or `host:<action>`
    pub stage: String,
    pub name: String,
    pub reason: String,
}

/// Aggregate result of a shutdown or startup run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub direction: Direction,
    pub cluster: String,
    pub phases: Vec<PhaseResult>,
    pub hosts: Vec<HostOutcome>,
    /// Infrastructure-managed VMs left untouched
    pub excluded: Vec<String>,
    pub verification: Option<Verification>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl LifecycleReport {
    pub fn new(direction: Direction, cluster: &str) -> Self {
        Self {
            direction,
            cluster: cluster.to_string(),
            phases: Vec::new(),
            hosts: Vec::new(),
            excluded: Vec::new(),
            verification: None,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn total_attempted(&self) -> usize {
        self.phases.iter().map(|p| p.attempted).sum()
    }

    pub fn total_forced(&self) -> usize {
        self.phases.iter().map(|p| p.forced_count).sum()
    }

    /// Every unconverged member and failed host, by stage and name
    pub fn failures(&self) -> Vec<FailureEntry> {
        let mut entries = Vec::new();

        for phase in &self.phases {
            for name in &phase.failed_names {
                entries.push(FailureEntry {
                    stage: phase.category.id().to_string(),
                    name: name.clone(),
                    reason: phase
                        .failure_reasons
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                });
            }
        }

        for outcome in self.hosts.iter().filter(|o| o.status.is_failure()) {
            entries.push(FailureEntry {
                stage: format!("host:{}", outcome.action),
                name: outcome.host.clone(),
                reason: outcome
                    .detail
                    .clone()
                    .unwrap_or_else(|| outcome.status.to_string()),
            });
        }

        if let Some(verification) = &self.verification {
            let leftovers = match self.direction {
                Direction::Shutdown => &verification.powered_on_targets,
                Direction::Startup => &verification.powered_off_targets,
            };
            for name in leftovers {
                let already_listed = entries.iter().any(|e| &e.name == name);
                if !already_listed {
                    entries.push(FailureEntry {
                        stage: "verification".to_string(),
                        name: name.clone(),
                        reason: format!("not {} at final check", self.direction.desired_power_state()),
                    });
                }
            }
        }

        entries
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures().is_empty()
    }

    /// 0 on full success, 1 on any recorded failure or cancellation
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_accounting() {
        let mut result = PhaseResult::new(VmCategory::Other, Direction::Shutdown, 3);
        result.record_success("a");
        result.record_success("a");
        result.record_success("b");
        assert!(!result.is_consistent());

        result.record_failure("c", "did not reach off");
        assert!(result.is_consistent());
        assert!(!result.is_success());
        assert_eq!(result.succeeded, 2);
    }

    #[test]
    fn test_report_failures_and_exit_code() {
        let mut report = LifecycleReport::new(Direction::Shutdown, "lab");
        assert_eq!(report.exit_code(), 0);

        let mut phase = PhaseResult::new(VmCategory::TagGroup("apps".into()), Direction::Shutdown, 1);
        phase.record_failure("app-01", "force-stop did not converge");
        report.phases.push(phase);
        report.hosts.push(
            HostOutcome::new("esx-01", HostAction::EnterMaintenance, HostStatus::TimedOut)
                .with_detail("still normal after 600s"),
        );
        report.verification = Some(Verification {
            powered_on_targets: vec!["app-01".into(), "misc-01".into()],
            ..Default::default()
        });

        let failures = report.failures();
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].stage, "apps");
        assert_eq!(failures[1].stage, "host:enter-maintenance");
        assert_eq!(failures[2].name, "misc-01");
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_cancelled_report_fails() {
        let mut report = LifecycleReport::new(Direction::Startup, "lab");
        report.cancelled = true;
        assert!(!report.is_success());
    }
}
