//! Subscription endpoints for the authenticated tenant.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, put},
};
use serde::Deserialize;

use super::extract::TenantId;
use super::routes::RouteModule;
use super::state::AppState;
use super::views::{CurrentSubscription, SubscriptionHistory, SubscriptionView};
use crate::error::Result;

#[derive(Debug, Default, Deserialize)]
pub struct GetSubscriptionQuery {
    #[serde(default)]
    pub sync: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionBody {
    pub plan_price_id: String,
    pub payment_method_id: String,
    #[serde(default)]
    pub referrer_tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanBody {
    pub plan_price_id: String,
}

async fn get_subscription(
    State(state): State<AppState>,
    tenant: TenantId,
    Query(query): Query<GetSubscriptionQuery>,
) -> Result<Json<CurrentSubscription>> {
    let subscription = state
        .manager
        .get_subscription(tenant.as_str(), query.sync)
        .await?;

    Ok(Json(CurrentSubscription {
        subscription: subscription.map(SubscriptionView::from),
    }))
}

async fn create_subscription(
    State(state): State<AppState>,
    tenant: TenantId,
    Json(body): Json<CreateSubscriptionBody>,
) -> Result<(StatusCode, Json<SubscriptionView>)> {
    let record = state
        .manager
        .create_subscription(
            tenant.as_str(),
            &body.plan_price_id,
            &body.payment_method_id,
            body.referrer_tenant_id.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(record.into())))
}

async fn change_plan(
    State(state): State<AppState>,
    tenant: TenantId,
    Json(body): Json<ChangePlanBody>,
) -> Result<Json<SubscriptionView>> {
    let record = state
        .manager
        .change_subscription(tenant.as_str(), &body.plan_price_id)
        .await?;
    Ok(Json(record.into()))
}

async fn cancel_subscription(
    State(state): State<AppState>,
    tenant: TenantId,
) -> Result<Json<SubscriptionView>> {
    let record = state.manager.cancel_subscription(tenant.as_str()).await?;
    Ok(Json(record.into()))
}

async fn subscription_history(
    State(state): State<AppState>,
    tenant: TenantId,
) -> Result<Json<SubscriptionHistory>> {
    let history = state.manager.subscription_history(tenant.as_str()).await?;
    Ok(Json(SubscriptionHistory {
        subscriptions: history.into_iter().map(SubscriptionView::from).collect(),
    }))
}

/// `/subscription` routes.
pub struct SubscriptionRoutes;

impl RouteModule for SubscriptionRoutes {
    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route(
                "/",
                get(get_subscription)
                    .post(create_subscription)
                    .delete(cancel_subscription),
            )
            .route("/plan", put(change_plan))
            .route("/history", get(subscription_history))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/subscription")
    }
}
