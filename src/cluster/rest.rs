//! REST Cluster Adapter
//!
//! Talks to a JSON cluster-management API over HTTPS using a pre-issued
//! session token. Endpoints:
//!
//! | Call                 | Route                                   |
//! |----------------------|-----------------------------------------|
//! | session probe        | `GET  /api/v1/session`                  |
//! | list hosts           | `GET  /api/v1/clusters/{cluster}/hosts` |
//! | list VMs             | `GET  /api/v1/clusters/{cluster}/vms`   |
//! | get host             | `GET  /api/v1/hosts/{host}`             |
//! | VM power operation   | `POST /api/v1/vms/{vm}/power`           |
//! | task state           | `GET  /api/v1/tasks/{task}`             |
//! | host maintenance     | `POST /api/v1/hosts/{host}/maintenance` |
//! | host power-off       | `POST /api/v1/hosts/{host}/power-off`   |

use crate::domain::ports::{
    ClusterClient, ClusterRef, HostInfo, MaintenanceTransition, MigrationMode, OperationHandle,
    RemoteOperationState, VmInfo, VmOperation,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST adapter
#[derive(Debug, Clone)]
pub struct RestClusterConfig {
    /// Base URL, e.g. `https://vcenter.example.net`
    pub endpoint: String,
    /// Bearer token for an already-authenticated session
    pub token: Option<String>,
    /// Per-request and connect-probe timeout
    pub timeout: Duration,
    /// Accept self-signed certificates
    pub accept_invalid_certs: bool,
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TaskRef {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Serialize)]
struct PowerRequest {
    operation: VmOperation,
}

#[derive(Debug, Serialize)]
struct MaintenanceRequest {
    transition: MaintenanceTransition,
    migration_mode: MigrationMode,
}

// =============================================================================
// REST Client
// =============================================================================

/// Cluster client backed by the management REST API
pub struct RestClusterClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
    timeout: Duration,
}

impl RestClusterClient {
    /// Create a client without contacting the API
    pub fn new(config: RestClusterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Configuration(format!("Invalid HTTP client settings: {}", e)))?;

        Ok(Self {
            http,
            base: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token,
            timeout: config.timeout,
        })
    }

    /// Create a client and verify the session, retrying transient failures
    pub async fn connect(config: RestClusterConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.probe().await?;
        Ok(client)
    }

    async fn probe(&self) -> Result<()> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(self.timeout))
            .build();

        let session: SessionInfo = backoff::future::retry(policy, || async move {
            self.get_json("/api/v1/session", || Error::Connection("session endpoint missing".into()))
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        warn!("Cluster API not reachable yet: {}", e);
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await?;

        info!(
            "Connected to cluster API at {} as {}",
            self.base,
            session.user.as_deref().unwrap_or("<token>")
        );
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T, F>(&self, path: &str, not_found: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Error,
    {
        debug!("GET {}", path);
        let response = self
            .request(self.http.get(self.url(path)))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, not_found).await?;
        response.json().await.map_err(transport_error)
    }

    async fn post_json<B, T, F>(&self, path: &str, body: &B, not_found: F) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
        F: FnOnce() -> Error,
    {
        debug!("POST {}", path);
        let response = self
            .request(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, not_found).await?;
        response.json().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::Connection(e.to_string())
    } else {
        Error::Http(e)
    }
}

async fn check_status<F>(response: Response, not_found: F) -> Result<Response>
where
    F: FnOnce() -> Error,
{
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(not_found()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Connection(format!(
            "session rejected ({}): {}",
            status, body
        ))),
        s if s.is_server_error() => Err(Error::Connection(format!("server error {}: {}", s, body))),
        s => Err(Error::Internal(format!("unexpected response {}: {}", s, body))),
    }
}

fn segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn not_found(kind: &'static str, name: &str) -> impl FnOnce() -> Error {
    let name = name.to_string();
    move || Error::NotFound {
        kind: kind.to_string(),
        name,
    }
}

#[async_trait]
impl ClusterClient for RestClusterClient {
    async fn list_hosts(&self, cluster: &ClusterRef) -> Result<Vec<HostInfo>> {
        let path = format!("/api/v1/clusters/{}/hosts", segment(cluster.name()));
        self.get_json(&path, || Error::ClusterNotFound {
            cluster: cluster.name().to_string(),
        })
        .await
    }

    async fn list_vms(&self, cluster: &ClusterRef) -> Result<Vec<VmInfo>> {
        let path = format!("/api/v1/clusters/{}/vms", segment(cluster.name()));
        self.get_json(&path, || Error::ClusterNotFound {
            cluster: cluster.name().to_string(),
        })
        .await
    }

    async fn get_host(&self, name: &str) -> Result<HostInfo> {
        let path = format!("/api/v1/hosts/{}", segment(name));
        self.get_json(&path, not_found("HostSystem", name)).await
    }

    async fn launch_vm_operation(&self, vm: &str, op: VmOperation) -> Result<OperationHandle> {
        let path = format!("/api/v1/vms/{}/power", segment(vm));
        let task: TaskRef = self
            .post_json(&path, &PowerRequest { operation: op }, not_found("VirtualMachine", vm))
            .await?;
        Ok(OperationHandle(task.task_id))
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<RemoteOperationState> {
        let path = format!("/api/v1/tasks/{}", segment(handle.as_str()));
        self.get_json(&path, not_found("Task", handle.as_str())).await
    }

    async fn set_host_maintenance(
        &self,
        host: &str,
        transition: MaintenanceTransition,
        migration: MigrationMode,
    ) -> Result<OperationHandle> {
        let path = format!("/api/v1/hosts/{}/maintenance", segment(host));
        let body = MaintenanceRequest {
            transition,
            migration_mode: migration,
        };
        let task: TaskRef = self
            .post_json(&path, &body, not_found("HostSystem", host))
            .await?;
        Ok(OperationHandle(task.task_id))
    }

    async fn power_off_host(&self, host: &str) -> Result<OperationHandle> {
        let path = format!("/api/v1/hosts/{}/power-off", segment(host));
        let task: TaskRef = self
            .post_json(&path, &serde_json::json!({}), not_found("HostSystem", host))
            .await?;
        Ok(OperationHandle(task.task_id))
    }

    fn client_name(&self) -> &str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config(endpoint: &str) -> RestClusterConfig {
        RestClusterConfig {
            endpoint: endpoint.to_string(),
            token: Some("secret".into()),
            timeout: Duration::from_millis(200),
            accept_invalid_certs: false,
        }
    }

    #[test]
    fn test_url_building() {
        let client = RestClusterClient::new(config("https://vc.example.net/")).unwrap();
        assert_eq!(
            client.url("/api/v1/session"),
            "https://vc.example.net/api/v1/session"
        );
        assert_eq!(segment("web 01/a"), "web%2001%2Fa");
    }

    #[test]
    fn test_request_bodies() {
        let body = serde_json::to_value(PowerRequest {
            operation: VmOperation::ShutdownGuest,
        })
        .unwrap();
        assert_eq!(body["operation"], "shutdown_guest");

        let body = serde_json::to_value(MaintenanceRequest {
            transition: MaintenanceTransition::Enter,
            migration_mode: MigrationMode::EnsureAccessibility,
        })
        .unwrap();
        assert_eq!(body["transition"], "enter");
        assert_eq!(body["migration_mode"], "ensure_accessibility");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Port 9 (discard) is closed on test hosts
        let result = RestClusterClient::connect(config("http://127.0.0.1:9")).await;
        assert_matches!(result.err(), Some(e) if e.is_fatal());
    }
}
