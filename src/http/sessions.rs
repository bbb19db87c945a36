//! Device-session endpoints.
//!
//! `POST /sessions/device` is called by the storefront right after the
//! upstream login succeeds. It always answers with the device cookie, even
//! when the login is refused, so the browser keeps a stable identity.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};

use super::extract::TenantId;
use super::routes::RouteModule;
use super::state::AppState;
use super::views::{SessionList, SessionView};
use crate::devices::{DeviceToken, device_cookie, read_device_cookie};
use crate::error::{ConsignError, Result};

async fn admit_device(
    State(state): State<AppState>,
    tenant: std::result::Result<TenantId, ConsignError>,
    headers: HeaderMap,
) -> Response {
    let presented = read_device_cookie(&headers, &state.devices.cookie_name);
    let (token, fresh) = DeviceToken::resolve(presented.as_deref());

    let mut response = match tenant {
        Ok(tenant) => {
            if fresh && presented.is_some() {
                tracing::debug!(
                    target: "consign::devices",
                    tenant_id = %tenant.as_str(),
                    "malformed device cookie replaced"
                );
            }
            match state.guard.admit(tenant.as_str(), &token.device_id()).await {
                Ok(admission) => Json(admission).into_response(),
                Err(e) => e.into_response(),
            }
        }
        // Rejected before admission, but the browser still gets its cookie.
        Err(e) => e.into_response(),
    };

    let cookie = device_cookie(&state.devices, &token);
    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

async fn list_devices(
    State(state): State<AppState>,
    tenant: TenantId,
    headers: HeaderMap,
) -> Result<Json<SessionList>> {
    let current = read_device_cookie(&headers, &state.devices.cookie_name)
        .as_deref()
        .and_then(DeviceToken::parse)
        .map(|token| token.device_id());

    let sessions = state.guard.list_sessions(tenant.as_str()).await?;
    Ok(Json(SessionList {
        sessions: sessions
            .into_iter()
            .map(|s| SessionView::new(s, current.as_deref()))
            .collect(),
    }))
}

async fn revoke_device(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(device_id): Path<String>,
) -> Result<StatusCode> {
    state.guard.revoke(tenant.as_str(), &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `/sessions` routes.
pub struct SessionRoutes;

impl RouteModule for SessionRoutes {
    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/device", post(admit_device))
            .route("/devices", get(list_devices))
            .route("/devices/{device_id}", delete(revoke_device))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/sessions")
    }
}
