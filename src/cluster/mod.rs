//! Cluster Client Adapters
//!
//! Provides implementations of the cluster client port:
//! - In-memory: deterministic simulation for tests and dry runs
//! - REST: JSON cluster-management API

pub mod memory;
pub mod rest;

pub use memory::*;
pub use rest::*;

use crate::config::Config;
use crate::domain::ports::ClusterClientRef;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Factory for creating cluster clients
pub struct ClusterClientFactory;

impl ClusterClientFactory {
    /// Connect to the management API named in the configuration
    pub async fn connect(config: &Config) -> Result<ClusterClientRef> {
        let endpoint = config.connection.endpoint.clone().ok_or_else(|| {
            Error::Configuration("connection.endpoint is required without --simulate".into())
        })?;
        let token = std::env::var(&config.connection.token_env).ok();
        if token.is_none() {
            info!(
                "{} is not set; connecting without a session token",
                config.connection.token_env
            );
        }

        let client = RestClusterClient::connect(RestClusterConfig {
            endpoint,
            token,
            timeout: config.connection_timeout(),
            accept_invalid_certs: config.connection.accept_invalid_certs,
        })
        .await?;

        Ok(Arc::new(client))
    }

    /// Build a simulated cluster from a seed
    pub fn simulated(seed: ClusterSeed) -> Arc<InMemoryCluster> {
        Arc::new(InMemoryCluster::from_seed(seed))
    }
}
