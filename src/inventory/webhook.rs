use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{InventoryVisibility, VisibilityAction};
use crate::error::{ConsignError, Result};

/// Default timeout for storefront webhook calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`StorefrontWebhookInventory`].
#[derive(Debug, Clone)]
pub struct WebhookInventoryConfig {
    /// Endpoint that receives `{tenantId, action}` POSTs.
    pub url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Sent as a bearer token when set.
    pub auth_token: Option<SecretString>,
}

impl WebhookInventoryConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
            auth_token: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(SecretString::from(token.into()));
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityRequest<'a> {
    tenant_id: &'a str,
    action: VisibilityAction,
}

#[derive(Debug, Default, Deserialize)]
struct VisibilityResponse {
    #[serde(default)]
    affected: u64,
}

/// Delegates product visibility to the storefront over HTTP.
///
/// The storefront owns the product catalogue; consign only tells it which
/// way to flip a tenant. The storefront is expected to treat repeated
/// requests as no-ops.
#[derive(Clone)]
pub struct StorefrontWebhookInventory {
    client: reqwest::Client,
    config: WebhookInventoryConfig,
}

impl StorefrontWebhookInventory {
    #[must_use]
    pub fn new(config: WebhookInventoryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("consign/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    async fn send(&self, tenant_id: &str, action: VisibilityAction) -> Result<u64> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&VisibilityRequest { tenant_id, action });
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            ConsignError::upstream(format!("Storefront {} request failed: {}", action.as_str(), e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsignError::upstream(format!(
                "Storefront {} returned status: {}",
                action.as_str(),
                status
            )));
        }

        // A body is optional; storefronts that do not report counts yield 0.
        let body = response.bytes().await.map_err(|e| {
            ConsignError::upstream(format!("Failed to read storefront response: {}", e))
        })?;
        let parsed: VisibilityResponse = serde_json::from_slice(&body).unwrap_or_default();

        tracing::debug!(
            target: "consign::inventory",
            tenant_id = %tenant_id,
            action = action.as_str(),
            affected = parsed.affected,
            "Storefront visibility updated"
        );

        Ok(parsed.affected)
    }
}

impl std::fmt::Debug for StorefrontWebhookInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontWebhookInventory")
            .field("url", &self.config.url)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InventoryVisibility for StorefrontWebhookInventory {
    async fn archive_all_products(&self, tenant_id: &str) -> Result<u64> {
        self.send(tenant_id, VisibilityAction::Archive).await
    }

    async fn unarchive_all_products(&self, tenant_id: &str) -> Result<u64> {
        self.send(tenant_id, VisibilityAction::Unarchive).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(serde_json::Value, Option<String>)>>>;

    async fn spawn_storefront(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let recorder = seen.clone();
        let app = Router::new().route(
            "/visibility",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let recorder = recorder.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    recorder.lock().await.push((body, auth));
                    (status, Json(serde_json::json!({ "affected": 4 })))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/visibility", addr), seen)
    }

    #[tokio::test]
    async fn test_posts_tenant_and_action() {
        let (url, seen) = spawn_storefront(StatusCode::OK).await;
        let inventory =
            StorefrontWebhookInventory::new(WebhookInventoryConfig::new(url).auth_token("tok"));

        assert_eq!(inventory.archive_all_products("t1").await.unwrap(), 4);

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0["tenantId"], "t1");
        assert_eq!(seen[0].0["action"], "archive");
        assert_eq!(seen[0].1.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let (url, _seen) = spawn_storefront(StatusCode::INTERNAL_SERVER_ERROR).await;
        let inventory = StorefrontWebhookInventory::new(WebhookInventoryConfig::new(url));

        let err = inventory.unarchive_all_products("t1").await.unwrap_err();
        assert!(matches!(err, ConsignError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_unreachable_storefront_is_upstream_error() {
        let inventory = StorefrontWebhookInventory::new(
            WebhookInventoryConfig::new("http://127.0.0.1:9/visibility")
                .timeout(Duration::from_millis(500)),
        );
        let err = inventory.archive_all_products("t1").await.unwrap_err();
        assert!(matches!(err, ConsignError::Upstream(_)));
    }

    #[test]
    fn test_debug_hides_token() {
        let inventory = StorefrontWebhookInventory::new(
            WebhookInventoryConfig::new("http://localhost/x").auth_token("very-secret"),
        );
        assert!(!format!("{:?}", inventory).contains("very-secret"));
    }
}
