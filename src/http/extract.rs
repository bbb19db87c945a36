//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::billing::validate_tenant_id;
use crate::error::ConsignError;

/// Header carrying the authenticated tenant, set by the upstream auth provider.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// The tenant a request acts for.
///
/// Rejects with 401 when the header is missing and 400 when it is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for TenantId {
    type Rejection = ConsignError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or_else(|| ConsignError::unauthorized("Missing tenant identity"))?
            .to_str()
            .map_err(|_| ConsignError::bad_request("Tenant header is not valid text"))?;

        validate_tenant_id(value)?;
        Ok(Self(value.to_string()))
    }
}

/// Check an `Authorization: Bearer` header against `expected` in constant time.
pub(crate) fn bearer_matches(headers: &HeaderMap, expected: &SecretString) -> bool {
    let Some(presented) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };

    presented
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into()
}
