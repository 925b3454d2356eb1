//! Async Operation Tracker
//!
//! Launches a batch of remote VM operations concurrently, then observes them
//! jointly. Each round polls every pending operation once; an operation
//! leaves the pending set when it reaches a terminal state or its own
//! deadline passes. A slow member never holds up the others.
//!
//! A tracker is single-use: [`OperationTracker::observe`] consumes it.

use crate::domain::ports::{
    ClusterClientRef, OperationHandle, OperationKind, RemoteOperationState, VmOperation,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

// =============================================================================
// Operation Records
// =============================================================================

/// Lifecycle state of a tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::Pending)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationState::Pending => write!(f, "pending"),
            OperationState::Succeeded => write!(f, "succeeded"),
            OperationState::Failed => write!(f, "failed"),
            OperationState::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// A remote operation issued against one target
#[derive(Debug, Clone, Serialize)]
pub struct AsyncOperation {
    pub target: String,
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
    pub state: OperationState,
    /// Failure cause, for launch or remote failures
    pub error: Option<String>,
    #[serde(skip)]
    handle: Option<OperationHandle>,
    #[serde(skip)]
    launched: Instant,
}

impl AsyncOperation {
    fn pending(target: &str, kind: OperationKind, handle: OperationHandle) -> Self {
        Self {
            target: target.to_string(),
            kind,
            started_at: Utc::now(),
            state: OperationState::Pending,
            error: None,
            handle: Some(handle),
            launched: Instant::now(),
        }
    }

    fn launch_failed(target: &str, kind: OperationKind, cause: String) -> Self {
        Self {
            target: target.to_string(),
            kind,
            started_at: Utc::now(),
            state: OperationState::Failed,
            error: Some(cause),
            handle: None,
            launched: Instant::now(),
        }
    }

    fn fail(&mut self, reason: String) {
        self.state = OperationState::Failed;
        self.error = Some(
            Error::OperationFailed {
                target: self.target.clone(),
                operation: self.kind.to_string(),
                reason,
            }
            .to_string(),
        );
    }

    fn time_out(&mut self, waited: Duration) {
        self.state = OperationState::TimedOut;
        self.error = Some(
            Error::OperationTimeout {
                target: self.target.clone(),
                operation: self.kind.to_string(),
                waited,
            }
            .to_string(),
        );
    }

    pub fn handle(&self) -> Option<&OperationHandle> {
        self.handle.as_ref()
    }

    /// Time since the operation was issued
    pub fn elapsed(&self) -> Duration {
        self.launched.elapsed()
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Launches and observes one batch of VM operations
pub struct OperationTracker {
    client: ClusterClientRef,
    poll_interval: Duration,
    operations: Vec<AsyncOperation>,
}

impl OperationTracker {
    pub fn new(client: ClusterClientRef, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            operations: Vec::new(),
        }
    }

    /// Operations launched so far
    pub fn operations(&self) -> &[AsyncOperation] {
        &self.operations
    }

    /// Issue one operation without waiting for it
    pub async fn launch(&mut self, target: &str, op: VmOperation) -> Result<&AsyncOperation> {
        let outcome = self.client.launch_vm_operation(target, op).await;
        self.track(target, op.into(), outcome)?;
        Ok(&self.operations[self.operations.len() - 1])
    }

    /// Issue one operation per target, all before any waiting begins
    pub async fn launch_all(&mut self, targets: &[String], op: VmOperation) -> Result<()> {
        let client = &self.client;
        let launches = targets
            .iter()
            .map(|target| async move { (target, client.launch_vm_operation(target, op).await) });
        let outcomes = join_all(launches).await;

        for (target, outcome) in outcomes {
            self.track(target, op.into(), outcome)?;
        }
        Ok(())
    }

    /// Record a launch result. Fatal errors abort the batch; any other
    /// launch error becomes an operation that is already failed.
    fn track(
        &mut self,
        target: &str,
        kind: OperationKind,
        outcome: Result<OperationHandle>,
    ) -> Result<()> {
        let operation = match outcome {
            Ok(handle) => {
                debug!("Launched {} on {} ({})", kind, target, handle);
                AsyncOperation::pending(target, kind, handle)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Failed to launch {} on {}: {}", kind, target, e);
                AsyncOperation::launch_failed(target, kind, e.to_string())
            }
        };
        self.operations.push(operation);
        Ok(())
    }

    /// Observe every operation until it is terminal or has been pending
    /// longer than `per_op_timeout`. Items arrive as operations finish.
    pub fn observe(self, per_op_timeout: Duration) -> BoxStream<'static, Result<AsyncOperation>> {
        let (ready, pending): (Vec<_>, Vec<_>) = self
            .operations
            .into_iter()
            .partition(|op| op.state.is_terminal());

        let state = ObserveState {
            client: self.client,
            poll_interval: self.poll_interval,
            timeout: per_op_timeout,
            ready: ready.into(),
            pending,
            halted: false,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if let Some(op) = st.ready.pop_front() {
                    return Some((Ok(op), st));
                }
                if st.halted || st.pending.is_empty() {
                    return None;
                }
                if let Err(e) = st.poll_round().await {
                    st.halted = true;
                    return Some((Err(e), st));
                }
                if st.ready.is_empty() && !st.pending.is_empty() {
                    tokio::time::sleep(st.poll_interval).await;
                }
            }
        })
        .boxed()
    }

    /// Observe the whole batch and collect the terminal operations
    pub async fn wait_all(self, per_op_timeout: Duration) -> Result<Vec<AsyncOperation>> {
        self.observe(per_op_timeout).try_collect().await
    }
}

struct ObserveState {
    client: ClusterClientRef,
    poll_interval: Duration,
    timeout: Duration,
    ready: VecDeque<AsyncOperation>,
    pending: Vec<AsyncOperation>,
    halted: bool,
}

impl ObserveState {
    /// Poll every pending operation once
    async fn poll_round(&mut self) -> Result<()> {
        let client = &self.client;
        let polls = self.pending.iter().map(|op| async move {
            match op.handle() {
                Some(handle) => client.poll_operation(handle).await,
                None => Ok(RemoteOperationState::Failed("operation has no handle".into())),
            }
        });
        let results = join_all(polls).await;

        let mut still_pending = Vec::with_capacity(self.pending.len());
        for (mut op, result) in std::mem::take(&mut self.pending).into_iter().zip(results) {
            match result {
                Ok(RemoteOperationState::Succeeded) => {
                    op.state = OperationState::Succeeded;
                }
                Ok(RemoteOperationState::Failed(reason)) => op.fail(reason),
                Ok(RemoteOperationState::Running) if op.elapsed() >= self.timeout => {
                    op.time_out(self.timeout);
                }
                Ok(RemoteOperationState::Running) => {
                    still_pending.push(op);
                    continue;
                }
                Err(e) if e.is_fatal() => {
                    self.pending = still_pending;
                    return Err(e);
                }
                Err(e) => op.fail(e.to_string()),
            }
            debug!("{} on {} finished: {}", op.kind, op.target, op.state);
            self.ready.push_back(op);
        }

        self.pending = still_pending;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSeed, InMemoryCluster, VmBehavior};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_reaches_terminal_states() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        cluster.set_vm_behavior("app-02", VmBehavior::NoGuestTools);

        let mut tracker = OperationTracker::new(cluster.clone(), Duration::from_secs(1));
        tracker
            .launch_all(&names(&["app-01", "app-02", "app-03"]), VmOperation::ShutdownGuest)
            .await
            .unwrap();
        assert_eq!(tracker.operations().len(), 3);

        let ops = tracker.wait_all(Duration::from_secs(30)).await.unwrap();
        assert_eq!(ops.len(), 3);

        let failed: Vec<_> = ops
            .iter()
            .filter(|op| op.state == OperationState::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target, "app-02");
        assert!(failed[0].error.as_deref().unwrap().contains("guest tools"));

        // The failed member is reported first; it never blocked on the others
        assert_eq!(ops[0].target, "app-02");
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_is_tracked() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        let mut tracker = OperationTracker::new(cluster, Duration::from_secs(1));

        let op = tracker
            .launch("ghost-vm", VmOperation::Start)
            .await
            .unwrap()
            .clone();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.kind, OperationKind::StartVm);

        let ops = tracker.wait_all(Duration::from_secs(5)).await.unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_operation_timeout() {
        let mut seed = ClusterSeed::demo("lab");
        seed.timing.guest_shutdown_ms = 120_000;
        let cluster = Arc::new(InMemoryCluster::from_seed(seed));
        let mut tracker = OperationTracker::new(cluster, Duration::from_secs(1));

        tracker
            .launch_all(&names(&["db-01"]), VmOperation::ShutdownGuest)
            .await
            .unwrap();

        let ops = tracker.wait_all(Duration::from_millis(1_500)).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].state, OperationState::TimedOut);
        assert!(ops[0].elapsed() >= Duration::from_millis(1_500));
        assert!(ops[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_aborts_observation() {
        let cluster = Arc::new(InMemoryCluster::from_seed(ClusterSeed::demo("lab")));
        let mut tracker = OperationTracker::new(cluster.clone(), Duration::from_secs(1));
        tracker
            .launch_all(&names(&["db-01", "db-02"]), VmOperation::ShutdownGuest)
            .await
            .unwrap();

        cluster.set_unreachable(true);
        let result = tracker.wait_all(Duration::from_secs(30)).await;
        assert_matches!(result, Err(Error::Connection(_)));
    }
}
