//! Cluster Lifecycle Module
//!
//! Provides:
//! - Poll-until condition waits
//! - Batched tracking of remote operations
//! - Phase execution with force fallback
//! - Host maintenance and power-off control
//! - The shutdown/startup orchestrator and its reports

pub mod events;
pub mod host;
pub mod orchestrator;
pub mod phase;
pub mod poll;
pub mod report;
pub mod tracker;

pub use events::{EventSink, LifecycleEvent};
pub use host::HostStateController;
pub use orchestrator::LifecycleOrchestrator;
pub use phase::{PhaseExecutor, PhasePolicy, PhaseState};
pub use poll::{wait_until, PollPolicy, WaitOutcome};
pub use report::*;
pub use tracker::{AsyncOperation, OperationState, OperationTracker};
