use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unhealthy,
    Degraded,
    Healthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Degraded => "Degraded",
            Self::Unhealthy => "Unhealthy",
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unhealthy => 2,
        }
    }

    /// The worse of the two statuses.
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            description: None,
        }
    }

    pub fn degraded(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            description: Some(description.into()),
        }
    }

    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            description: Some(description.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> String;

    async fn check(&self) -> HealthCheckResult;
}

/// Registered health checks. An empty registry reports `Healthy`.
#[derive(Clone, Default)]
pub struct HealthChecks {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_check(&mut self, check: Arc<dyn HealthCheck>) -> &mut Self {
        debug!("Health check registered: {}", check.name());
        self.checks.push(check);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut components = HashMap::new();
        let mut overall_status = HealthStatus::Healthy;

        for check in &self.checks {
            let start = Instant::now();
            let result = check.check().await;
            let duration = start.elapsed().as_secs_f64() * 1000.0;

            if result.status == HealthStatus::Unhealthy {
                error!(
                    "Health check {} failed: {}",
                    check.name(),
                    result.description.as_deref().unwrap_or("no description")
                );
            }
            overall_status = overall_status.worst(result.status);
            components.insert(
                check.name(),
                ComponentHealth {
                    status: result.status,
                    latency_ms: (duration * 100.0).round() / 100.0,
                    description: result.description,
                },
            );
        }

        HealthReport {
            status: overall_status,
            components,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    pub allow_caching_responses: bool,
    pub healthy_status_code: StatusCode,
    pub degraded_status_code: StatusCode,
    pub unhealthy_status_code: StatusCode,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            allow_caching_responses: false,
            healthy_status_code: StatusCode::OK,
            degraded_status_code: StatusCode::OK,
            unhealthy_status_code: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl HealthCheckOptions {
    fn status_code(&self, status: HealthStatus) -> StatusCode {
        match status {
            HealthStatus::Healthy => self.healthy_status_code,
            HealthStatus::Degraded => self.degraded_status_code,
            HealthStatus::Unhealthy => self.unhealthy_status_code,
        }
    }
}

struct HealthState {
    checks: HealthChecks,
    options: HealthCheckOptions,
}

/// Router answering `GET {path}` with the plain-text overall status.
pub fn create_health_router(
    path: &str,
    checks: HealthChecks,
    options: HealthCheckOptions,
) -> Router {
    let state = HealthState { checks, options };

    Router::new()
        .route(path, get(health_handler))
        .with_state(Arc::new(state))
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> Response {
    let report = state.checks.check_all().await;
    let code = state.options.status_code(report.status);

    let mut response = (
        code,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
        report.status.as_str(),
    )
        .into_response();

    if !state.options.allow_caching_responses {
        let headers = response.headers_mut();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(
            header::EXPIRES,
            HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
        );
    }

    response
}
