//! Domain layer - Core cluster types and port definitions
//!
//! This module defines the cluster data model and the client trait (port)
//! that adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
