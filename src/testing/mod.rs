//! Testing utilities.
//!
//! - [`TestContext`] wires the in-memory store, sandbox provider and
//!   in-memory inventory behind a real manager, guard and router.
//! - [`Scenario`] drives the router without starting a server.
//!
//! # Example
//!
//! ```rust,ignore
//! use consign::testing::{self, TestContext};
//!
//! #[tokio::test]
//! async fn third_device_is_refused() {
//!     let ctx = TestContext::new();
//!     ctx.subscribe("store_1", "price_basic").await;
//!
//!     for _ in 0..2 {
//!         testing::post(ctx.router(), "/sessions/device")
//!             .tenant("store_1")
//!             .execute()
//!             .await
//!             .assert_ok();
//!     }
//!
//!     testing::post(ctx.router(), "/sessions/device")
//!         .tenant("store_1")
//!         .execute()
//!         .await
//!         .assert_forbidden();
//! }
//! ```

mod context;
mod scenario;

pub use context::{TEST_PAYMENT_METHOD, TestContext, test_plans};
pub use scenario::{Scenario, ScenarioAssert, delete, get, post, put};
