//! Inventory Module
//!
//! Point-in-time reads of cluster hosts and virtual machines.

pub mod snapshot;

pub use snapshot::*;
