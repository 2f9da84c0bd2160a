use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;

use crate::infrastructure::shutdown::ShutdownSignal;

/// Possible service states reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    WarmingUp,
    Working,
    ShuttingDown,
    NoInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub notes: Vec<String>,
    pub description: String,
}

/// Cloneable handle for reading and mutating the reported service state.
#[derive(Clone)]
pub struct HealthState {
    service_name: Arc<str>,
    state: Arc<RwLock<ServiceState>>,
}

impl HealthState {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: Arc::from(service_name),
            state: Arc::new(RwLock::new(ServiceState::NoInfo)),
        }
    }

    pub async fn set(&self, state: ServiceState) {
        *self.state.write().await = state;
    }

    pub async fn get(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Compose the wire response for the current state.
    ///
    /// `pass` maps to 200, `warn` to 203 and `fail` to 503, per the health
    /// response draft the endpoint follows.
    pub async fn report(&self) -> (StatusCode, HealthReport) {
        let (status, code, note) = match self.get().await {
            ServiceState::Working => (HealthStatus::Pass, StatusCode::OK, "Service is running"),
            ServiceState::Stopped => (
                HealthStatus::Fail,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is not running",
            ),
            _ => (
                HealthStatus::Warn,
                StatusCode::NON_AUTHORITATIVE_INFORMATION,
                "Service is not healthy",
            ),
        };
        let report = HealthReport {
            status,
            notes: vec![note.to_string()],
            description: format!("Health state of '{}' service", self.service_name),
        };
        (code, report)
    }
}

/// Minimal HTTP server for the health endpoint.
///
/// Not part of the lifecycle core: an application that wants the endpoint
/// spawns [`HealthServer::serve`] as a background task during `start()`, and
/// the server winds down on the shared [`ShutdownSignal`].
pub struct HealthServer {
    state: HealthState,
    addr: SocketAddr,
}

impl HealthServer {
    pub fn new(service_name: &str, addr: SocketAddr) -> Self {
        Self {
            state: HealthState::new(service_name),
            addr,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state.clone()
    }

    /// Bind the configured address and serve until shutdown is requested.
    pub async fn serve(self, shutdown: ShutdownSignal) -> crate::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_with(listener, shutdown).await
    }

    /// Serve on an already-bound listener until shutdown is requested.
    pub async fn serve_with(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> crate::Result<()> {
        let addr = listener.local_addr()?;
        info!("health endpoint listening on {addr}");

        let router = Router::new()
            .route("/health", get(report_health))
            .route("/health/state", put(set_state))
            .with_state(self.state);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        info!("health endpoint stopped");
        Ok(())
    }
}

async fn report_health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let (code, report) = state.report().await;
    (code, Json(report))
}

#[derive(Debug, Deserialize)]
struct SetStateRequest {
    state: ServiceState,
}

async fn set_state(
    State(state): State<HealthState>,
    Json(request): Json<SetStateRequest>,
) -> StatusCode {
    state.set(request.state).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_maps_states() {
        let state = HealthState::new("svc");

        let (code, report) = state.report().await;
        assert_eq!(code, StatusCode::NON_AUTHORITATIVE_INFORMATION);
        assert_eq!(report.status, HealthStatus::Warn);

        state.set(ServiceState::Working).await;
        let (code, report) = state.report().await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(report.status, HealthStatus::Pass);
        assert!(report.description.contains("svc"));

        state.set(ServiceState::Stopped).await;
        let (code, report) = state.report().await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, HealthStatus::Fail);
    }

    #[tokio::test]
    async fn test_endpoint_serves_and_mutates() {
        let server = HealthServer::new("svc", "127.0.0.1:0".parse().unwrap());
        let state = server.state();
        let shutdown = ShutdownSignal::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(server.serve_with(listener, shutdown.clone()));

        state.set(ServiceState::Working).await;
        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "pass");

        let client = reqwest::Client::new();
        let response = client
            .put(format!("http://{addr}/health/state"))
            .json(&serde_json::json!({ "state": "stopped" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let response = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);

        drop(client);
        shutdown.request();
        serving.await.unwrap().unwrap();
    }
}
