//! Error types for the cluster power orchestrator
//!
//! Provides structured error types for the cluster client adapters,
//! configuration loading, and the lifecycle orchestrator.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Run cancelled by operator")]
    Cancelled,

    // =========================================================================
    // Cluster API Errors
    // =========================================================================
    #[error("Cluster API connection error: {0}")]
    Connection(String),

    #[error("Cluster API HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cluster not found: {cluster}")]
    ClusterNotFound { cluster: String },

    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    // =========================================================================
    // Operation Errors
    // =========================================================================
    #[error("Operation {operation} on {target} timed out after {waited:?}")]
    OperationTimeout {
        target: String,
        operation: String,
        waited: Duration,
    },

    #[error("Operation {operation} on {target} failed: {reason}")]
    OperationFailed {
        target: String,
        operation: String,
        reason: String,
    },

    #[error("{stage} aborted: {source}")]
    Aborted {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error must abort the whole run.
    ///
    /// Nothing downstream can proceed without the cluster client, so
    /// transport failures and an unknown cluster end the run. Everything
    /// else is captured into the phase and host reports.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Http(_) | Error::ClusterNotFound { .. } => true,
            Error::Aborted { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            Error::Aborted { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Attach the orchestration stage a fatal error surfaced in
    pub fn during(self, stage: impl Into<String>) -> Self {
        match self {
            // Keep the innermost stage; it names the failing target.
            Error::Aborted { .. } => self,
            other => Error::Aborted {
                stage: stage.into(),
                source: Box::new(other),
            },
        }
    }

    /// Strip stage context to reach the underlying error
    pub fn root(&self) -> &Error {
        match self {
            Error::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_error_fatality() {
        assert!(Error::Connection("refused".into()).is_fatal());
        assert!(Error::ClusterNotFound {
            cluster: "prod".into()
        }
        .is_fatal());

        let timeout = Error::OperationTimeout {
            target: "vm-1".into(),
            operation: "shutdown-guest".into(),
            waited: Duration::from_secs(30),
        };
        assert!(!timeout.is_fatal());

        let missing = Error::NotFound {
            kind: "VirtualMachine".into(),
            name: "vm-1".into(),
        };
        assert!(!missing.is_fatal());
    }

    #[test]
    fn test_error_transient() {
        assert!(Error::Connection("reset".into()).is_transient());
        assert!(!Error::Configuration("invalid".into()).is_transient());
        let missing = Error::NotFound {
            kind: "HostSystem".into(),
            name: "esx-09".into(),
        };
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_stage_context() {
        let err = Error::Connection("refused".into()).during("inventory snapshot");
        assert!(err.is_fatal());
        assert_matches!(err.root(), Error::Connection(_));
        assert!(err.to_string().starts_with("inventory snapshot aborted"));

        // Re-wrapping keeps the innermost stage
        let err = err.during("shutdown");
        assert_matches!(&err, Error::Aborted { stage, .. } if stage == "inventory snapshot");
    }
}
