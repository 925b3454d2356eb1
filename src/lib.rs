//! Cluster Power Orchestrator
//!
//! Brings a hypervisor cluster down and back up in a safe, ordered way:
//! VMs are shut down or started category by category, hosts move through
//! maintenance, and every member that did not converge is reported.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        Lifecycle Orchestrator                                │
//! │         shutdown_cluster / startup_cluster / plan / cancellation             │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Inventory     │  │       VM        │  │      Host State             │  │
//! │  │   Snapshot      │  │   Classifier    │  │      Controller             │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           │          ┌─────────┴─────────┐               │                   │
//! │           │          │  Phase Executor   │               │                   │
//! │           │          │ (force fallback)  │               │                   │
//! │           │          └─────────┬─────────┘               │                   │
//! │           │          ┌─────────┴─────────┐    ┌──────────┴──────────┐       │
//! │           │          │ Operation Tracker │    │     Poll-Until      │       │
//! │           │          └─────────┬─────────┘    └──────────┬──────────┘       │
//! │           └────────────────────┼─────────────────────────┘                   │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                       ClusterClient port                                     │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │    InMemoryCluster          │  │        RestClusterClient            │   │
//! │  │  (simulation / tests)       │  │   (JSON management API)             │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`lifecycle`]: Orchestrator, phases, host control, tracking, reports
//! - [`classification`]: VM categories and their per-direction order
//! - [`inventory`]: Cluster snapshots
//! - [`cluster`]: Cluster client adapters
//! - [`config`]: Configuration loading and validation
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod classification;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod inventory;
pub mod lifecycle;

// Re-export commonly used types
pub use classification::{Classification, VmCategory, VmClassifier};

pub use cluster::{
    ClusterClientFactory, ClusterSeed, InMemoryCluster, RestClusterClient, RestClusterConfig,
};

pub use config::Config;

pub use domain::ports::{
    ClusterClient, ClusterClientRef, ClusterRef, Direction, HostInfo, VmInfo, VmPowerState,
};

pub use error::{Error, Result};

pub use inventory::{InventorySnapshot, InventorySummary};

pub use lifecycle::{
    LifecycleEvent, LifecycleOrchestrator, LifecycleReport, PhaseResult, PhaseState, PowerPlan,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
