use axum::Router;

use super::state::AppState;

/// A group of routes mounted together.
///
/// # Example
///
/// ```ignore
/// struct ReportsModule;
///
/// impl RouteModule for ReportsModule {
///     fn routes(&self) -> Router<AppState> {
///         Router::new().route("/", get(list_reports))
///     }
///
///     fn prefix(&self) -> Option<&str> {
///         Some("/reports")
///     }
/// }
/// ```
pub trait RouteModule {
    /// The module's routes, without state applied.
    fn routes(&self) -> Router<AppState>;

    /// Optional path prefix for every route in the module.
    fn prefix(&self) -> Option<&str> {
        None
    }

    /// Mount this module onto `router`.
    fn register(self, router: Router<AppState>) -> Router<AppState>
    where
        Self: Sized,
    {
        let routes = self.routes();

        if let Some(prefix) = self.prefix() {
            router.nest(prefix, routes)
        } else {
            router.merge(routes)
        }
    }
}
