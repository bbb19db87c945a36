//! JSON shapes returned by the API.
//!
//! Field names are camelCase and timestamps RFC 3339, matching what the
//! storefront front end consumes.

use serde::Serialize;

use crate::billing::{ActiveSession, StoredSubscription};
use crate::utils::time::to_rfc3339;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub subscription_id: String,
    pub plan_name: String,
    pub plan_price_id: String,
    pub status: String,
    pub current_period_start: Option<String>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_tenant_id: Option<String>,
    pub updated_at: Option<String>,
}

impl From<StoredSubscription> for SubscriptionView {
    fn from(record: StoredSubscription) -> Self {
        Self {
            subscription_id: record.external_subscription_id,
            plan_name: record.plan_name,
            plan_price_id: record.plan_price_id,
            status: record.status.as_str().to_string(),
            current_period_start: to_rfc3339(record.current_period_start),
            current_period_end: to_rfc3339(record.current_period_end),
            cancel_at_period_end: record.cancel_at_period_end,
            referrer_tenant_id: record.referrer_tenant_id,
            updated_at: to_rfc3339(record.updated_at),
        }
    }
}

/// Body of `GET /subscription`; `subscription` is null for unsubscribed tenants.
#[derive(Debug, Serialize)]
pub struct CurrentSubscription {
    pub subscription: Option<SubscriptionView>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionHistory {
    pub subscriptions: Vec<SubscriptionView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub device_id: String,
    pub last_active_at: Option<String>,
    pub created_at: Option<String>,
    /// The session belongs to the device making the request.
    pub current: bool,
}

impl SessionView {
    pub fn new(session: ActiveSession, current_device: Option<&str>) -> Self {
        let current = current_device == Some(session.device_id.as_str());
        Self {
            last_active_at: to_rfc3339(session.last_active_at),
            created_at: to_rfc3339(session.created_at),
            device_id: session.device_id,
            current,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionView>,
}
