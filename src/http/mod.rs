//! HTTP surface.
//!
//! Tenant identity comes from the `x-tenant-id` header set by the upstream
//! auth provider; see [`TenantId`]. Handlers are grouped into
//! [`RouteModule`]s and share an [`AppState`].

mod extract;
mod internal;
mod routes;
mod sessions;
mod state;
mod subscriptions;
mod views;

use axum::Router;

pub use extract::{TENANT_HEADER, TenantId};
pub use internal::OperatorRoutes;
pub use routes::RouteModule;
pub use sessions::SessionRoutes;
pub use state::AppState;
pub use subscriptions::SubscriptionRoutes;
pub use views::{SessionView, SubscriptionView};

/// Every route, with state applied.
pub fn router(state: AppState) -> Router {
    let router = SubscriptionRoutes.register(Router::new());
    let router = SessionRoutes.register(router);
    OperatorRoutes.register(router).with_state(state)
}
