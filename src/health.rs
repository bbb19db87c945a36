//! Health reporting.
//!
//! `GET /health` runs every registered [`HealthCheck`]. The reconciler check
//! reports `degraded` when the last sweep could not run or had failing
//! tenants.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::reconcile::ReconcileStatus;

/// Health check status
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check result for a single component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Overall health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: Vec<ComponentHealth>,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status_code, Json(self)).into_response()
    }
}

/// Trait for implementing health checks
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ComponentHealth> + Send + '_>>;
}

/// Basic health check that always returns healthy
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicHealthCheck;

impl HealthCheck for BasicHealthCheck {
    fn name(&self) -> &str {
        "application"
    }

    fn check(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ComponentHealth> + Send + '_>> {
        Box::pin(async {
            ComponentHealth {
                name: self.name().to_string(),
                status: HealthStatus::Healthy,
                message: Some("Application is running".to_string()),
            }
        })
    }
}

/// Reports the outcome of the most recent reconcile sweep.
#[derive(Debug, Clone)]
pub struct ReconcilerHealthCheck {
    status: ReconcileStatus,
}

impl ReconcilerHealthCheck {
    #[must_use]
    pub fn new(status: ReconcileStatus) -> Self {
        Self { status }
    }
}

impl HealthCheck for ReconcilerHealthCheck {
    fn name(&self) -> &str {
        "reconciler"
    }

    fn check(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ComponentHealth> + Send + '_>> {
        Box::pin(async {
            let (status, message) = match self.status.last().await {
                None => (HealthStatus::Healthy, "No sweep has run yet".to_string()),
                Some(last) if last.is_clean() => (
                    HealthStatus::Healthy,
                    format!(
                        "Last sweep at {} reconciled {} subscriptions",
                        last.finished_at, last.summary.considered
                    ),
                ),
                Some(last) => match last.error {
                    Some(error) => (
                        HealthStatus::Degraded,
                        format!("Last sweep failed: {}", error),
                    ),
                    None => (
                        HealthStatus::Degraded,
                        format!(
                            "Last sweep at {} had {} failing tenants",
                            last.finished_at, last.summary.errors
                        ),
                    ),
                },
            };

            ComponentHealth {
                name: self.name().to_string(),
                status,
                message: Some(message),
            }
        })
    }
}

/// Health check manager that runs all registered checks
pub struct HealthChecker {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            checks: vec![Arc::new(BasicHealthCheck)],
        }
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Add the reconciler check backed by `status`.
    pub fn with_reconciler(self, status: ReconcileStatus) -> Self {
        self.with_check(Arc::new(ReconcilerHealthCheck::new(status)))
    }

    pub async fn check_health(&self) -> HealthResponse {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        for check in &self.checks {
            let result = check.check().await;

            match result.status {
                HealthStatus::Unhealthy => overall_status = HealthStatus::Unhealthy,
                HealthStatus::Degraded if overall_status == HealthStatus::Healthy => {
                    overall_status = HealthStatus::Degraded
                }
                _ => {}
            }

            checks.push(result);
        }

        HealthResponse {
            status: overall_status,
            checks,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;

    #[tokio::test]
    async fn test_healthy_before_any_sweep() {
        let checker = HealthChecker::new().with_reconciler(ReconcileStatus::new());
        let report = checker.check_health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.checks.len(), 2);
    }

    #[tokio::test]
    async fn test_degraded_after_sweep_with_errors() {
        let ctx = TestContext::new();
        ctx.subscribe("t1", "price_basic").await;
        let sub = ctx.store_subscription("t1").await;
        ctx.provider.fail_subscription(&sub.external_subscription_id).await;

        let status = ReconcileStatus::new();
        crate::reconcile::run_sweep(&ctx.manager, &status).await.unwrap();

        let report = HealthChecker::new()
            .with_reconciler(status)
            .check_health()
            .await;
        assert_eq!(report.status, HealthStatus::Degraded);
        let reconciler = report.checks.iter().find(|c| c.name == "reconciler").unwrap();
        assert!(reconciler.message.as_deref().unwrap().contains("1 failing"));
    }

    #[test]
    fn test_degraded_still_serves_200() {
        let response = HealthResponse {
            status: HealthStatus::Degraded,
            checks: vec![],
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
