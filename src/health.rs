//! Liveness, readiness and per-component health.
//!
//! Readiness depends on the database ping: a failed or timed-out ping makes the
//! service unready, a ping slower than half the fetch timeout marks it degraded
//! but still ready.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{Instant, timeout};

/// Ordered from best to worst so the overall status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but the database answers slowly
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: serde_json::Value,
}

impl ComponentHealth {
    fn new(status: HealthStatus, error: Option<String>, details: serde_json::Value) -> Self {
        Self {
            status,
            error,
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentsResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: BTreeMap<&'static str, ComponentHealth>,
}

impl IntoResponse for LivenessResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

impl IntoResponse for ComponentsResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    state: Arc<AppState>,
}

impl HealthChecker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// The process is up and routing requests.
    pub fn liveness(&self) -> LivenessResponse {
        LivenessResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let components = self.check_components().await;
        let status = overall(&components);
        ReadinessResponse {
            ready: status != HealthStatus::Unhealthy,
            status,
            timestamp: now(),
            not_ready: components
                .iter()
                .filter(|(_, health)| health.status == HealthStatus::Unhealthy)
                .map(|(name, _)| name.to_string())
                .collect(),
        }
    }

    pub async fn components(&self) -> ComponentsResponse {
        let components = self.check_components().await;
        ComponentsResponse {
            status: overall(&components),
            timestamp: now(),
            components,
        }
    }

    async fn check_components(&self) -> BTreeMap<&'static str, ComponentHealth> {
        BTreeMap::from([
            ("database", self.check_database().await),
            ("partitions", self.check_partitions()),
        ])
    }

    /// Pings the row source within one fetch timeout.
    async fn check_database(&self) -> ComponentHealth {
        let source = self.state.source();
        let budget = self.state.settings().fetch_policy.fetch_timeout;
        let started = Instant::now();
        let outcome = timeout(budget, source.ping()).await;
        let latency = started.elapsed();
        let details = json!({
            "backend": source.kind(),
            "latency_ms": latency.as_millis() as u64,
        });

        match outcome {
            Ok(Ok(())) if latency > budget / 2 => ComponentHealth::new(
                HealthStatus::Degraded,
                Some(format!("ping took {}ms", latency.as_millis())),
                details,
            ),
            Ok(Ok(())) => ComponentHealth::new(HealthStatus::Healthy, None, details),
            Ok(Err(error)) => ComponentHealth::new(
                HealthStatus::Unhealthy,
                Some(format!("ping failed: {error:#}")),
                details,
            ),
            Err(_) => ComponentHealth::new(
                HealthStatus::Unhealthy,
                Some(format!("ping timed out after {}ms", budget.as_millis())),
                details,
            ),
        }
    }

    /// Years covered by `year=all` and the configured price column.
    fn check_partitions(&self) -> ComponentHealth {
        let settings = self.state.settings();
        let years = settings.resolver.supported();
        ComponentHealth::new(
            HealthStatus::Healthy,
            None,
            json!({
                "first_year": years.start(),
                "last_year": years.end(),
                "price_column": settings.price_column,
                "uptime_secs": self.state.uptime_secs(),
            }),
        )
    }
}

fn overall(components: &BTreeMap<&'static str, ComponentHealth>) -> HealthStatus {
    components
        .values()
        .map(|health| health.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> LivenessResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> ReadinessResponse {
    checker.readiness().await
}

pub async fn components_handler(State(checker): State<Arc<HealthChecker>>) -> ComponentsResponse {
    checker.components().await
}
