//! VM Classification Module
//!
//! Partitions virtual machines into ordered power categories using
//! configured priority names and tag groups.

pub mod classifier;

pub use classifier::*;
