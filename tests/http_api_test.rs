use consign::billing::SubscriptionStatus;
use consign::devices::DeviceToken;
use consign::testing::{self, TestContext};
use consign::{App, ConfigBuilder};
use serde_json::{Value, json};

const COOKIE: &str = "consign_device";

async fn login(ctx: &TestContext, tenant: &str, cookie: Option<&str>) -> testing::ScenarioAssert {
    let scenario = testing::post(ctx.router(), "/sessions/device").tenant(tenant);
    let scenario = match cookie {
        Some(value) => scenario.cookie(COOKIE, value),
        None => scenario,
    };
    scenario.execute().await
}

#[tokio::test]
async fn test_subscription_crud_over_http() {
    let ctx = TestContext::new();

    testing::post(ctx.router(), "/subscription")
        .tenant("store_1")
        .json_body(&json!({
            "planPriceId": "price_basic",
            "paymentMethodId": testing::TEST_PAYMENT_METHOD,
        }))
        .execute()
        .await
        .assert_created()
        .assert_json_path("status", json!("active"))
        .await;

    testing::put(ctx.router(), "/subscription/plan")
        .tenant("store_1")
        .json_body(&json!({"planPriceId": "price_pro"}))
        .execute()
        .await
        .assert_ok()
        .assert_json_path("planName", json!("pro"))
        .await;

    testing::delete(ctx.router(), "/subscription")
        .tenant("store_1")
        .execute()
        .await
        .assert_ok()
        .assert_json_path("cancelAtPeriodEnd", json!(true))
        .await;

    testing::get(ctx.router(), "/subscription")
        .tenant("store_1")
        .execute()
        .await
        .assert_ok()
        .assert_json_path("subscription.planPriceId", json!("price_pro"))
        .await;
}

#[tokio::test]
async fn test_subscription_error_statuses() {
    let ctx = TestContext::new();

    testing::put(ctx.router(), "/subscription/plan")
        .tenant("store_1")
        .json_body(&json!({"planPriceId": "price_pro"}))
        .execute()
        .await
        .assert_not_found();

    testing::delete(ctx.router(), "/subscription")
        .tenant("store_1")
        .execute()
        .await
        .assert_not_found();

    ctx.subscribe("store_1", "price_basic").await;
    testing::post(ctx.router(), "/subscription")
        .tenant("store_1")
        .json_body(&json!({
            "planPriceId": "price_pro",
            "paymentMethodId": testing::TEST_PAYMENT_METHOD,
        }))
        .execute()
        .await
        .assert_conflict();

    testing::post(ctx.router(), "/subscription")
        .tenant("store_2")
        .json_body(&json!({
            "planPriceId": "price_unknown",
            "paymentMethodId": testing::TEST_PAYMENT_METHOD,
        }))
        .execute()
        .await
        .assert_bad_request();

    testing::get(ctx.router(), "/subscription")
        .tenant("not a tenant!")
        .execute()
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_sync_reflects_provider_state() {
    let ctx = TestContext::new();
    let sub = ctx.subscribe("store_1", "price_basic").await;
    ctx.provider
        .modify_subscription(&sub.external_subscription_id, |s| {
            s.status = SubscriptionStatus::PastDue;
        })
        .await;

    testing::get(ctx.router(), "/subscription")
        .tenant("store_1")
        .execute()
        .await
        .assert_json_path("subscription.status", json!("active"))
        .await;

    testing::get(ctx.router(), "/subscription")
        .tenant("store_1")
        .with_query(&[("sync", "true")])
        .execute()
        .await
        .assert_json_path("subscription.status", json!("past_due"))
        .await;

    assert!(!ctx.is_active("store_1").await);
}

#[tokio::test]
async fn test_device_cap_over_http() {
    let ctx = TestContext::new();
    ctx.subscribe("store_1", "price_basic").await;

    let first = login(&ctx, "store_1", None).await.assert_ok();
    let first_cookie = first.set_cookie(COOKIE).unwrap();
    first
        .assert_json_path("admission", json!("registered"))
        .await
        .assert_json_path("activeSessions", json!(1))
        .await;

    let second = login(&ctx, "store_1", None).await.assert_ok();
    assert!(second.set_cookie(COOKIE).is_some());

    // Third device is refused but still receives its cookie.
    let third = login(&ctx, "store_1", None).await.assert_forbidden();
    assert!(third.set_cookie(COOKIE).is_some());
    third.assert_json_path("limit", json!(2)).await;

    // A known device logs in again without counting against the cap.
    let again = login(&ctx, "store_1", Some(&first_cookie)).await.assert_ok();
    assert_eq!(again.set_cookie(COOKIE).unwrap(), first_cookie);
    again
        .assert_json_path("admission", json!("refreshed"))
        .await;
}

#[tokio::test]
async fn test_malformed_device_cookie_is_replaced() {
    let ctx = TestContext::new();

    let response = login(&ctx, "store_1", Some("not-a-real-token")).await.assert_ok();
    let issued = response.set_cookie(COOKIE).unwrap();

    assert_ne!(issued, "not-a-real-token");
    assert!(DeviceToken::parse(&issued).is_some());
    response
        .assert_json_path("admission", json!("unrestricted"))
        .await;
}

#[tokio::test]
async fn test_device_cookie_set_when_tenant_header_rejected() {
    let ctx = TestContext::new();

    let missing = testing::post(ctx.router(), "/sessions/device")
        .execute()
        .await
        .assert_unauthorized();
    let issued = missing.set_cookie(COOKIE).unwrap();
    assert!(DeviceToken::parse(&issued).is_some());

    let malformed = testing::post(ctx.router(), "/sessions/device")
        .tenant("bad tenant!")
        .cookie(COOKIE, &issued)
        .execute()
        .await
        .assert_bad_request();
    // A valid cookie is echoed back unchanged.
    assert_eq!(malformed.set_cookie(COOKIE).unwrap(), issued);

    // Nothing was registered for either request.
    ctx.subscribe("store_1", "price_basic").await;
    assert!(ctx.guard.list_sessions("store_1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_conflict_body_does_not_leak_tenant_state() {
    let ctx = TestContext::new();
    ctx.subscribe("store_1", "price_basic").await;

    let body: Value = testing::post(ctx.router(), "/subscription")
        .tenant("store_1")
        .json_body(&json!({
            "planPriceId": "price_pro",
            "paymentMethodId": testing::TEST_PAYMENT_METHOD,
        }))
        .execute()
        .await
        .assert_conflict()
        .json()
        .await;

    let message = body["error"].as_str().unwrap();
    assert!(!message.contains("store_1"));
    assert!(body["error_id"].as_str().is_some());
}

#[tokio::test]
async fn test_list_and_revoke_devices() {
    let ctx = TestContext::new();
    ctx.subscribe("store_1", "price_basic").await;

    let cookie = login(&ctx, "store_1", None)
        .await
        .assert_ok()
        .set_cookie(COOKIE)
        .unwrap();
    login(&ctx, "store_1", None).await.assert_ok();

    let list: Value = testing::get(ctx.router(), "/sessions/devices")
        .tenant("store_1")
        .cookie(COOKIE, &cookie)
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    let sessions = list["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions.iter().filter(|s| s["current"] == json!(true)).count(), 1);

    let other = sessions
        .iter()
        .find(|s| s["current"] == json!(false))
        .unwrap()["deviceId"]
        .as_str()
        .unwrap()
        .to_string();

    testing::delete(ctx.router(), &format!("/sessions/devices/{}", other))
        .tenant("store_1")
        .execute()
        .await
        .assert_no_content();
    testing::delete(ctx.router(), &format!("/sessions/devices/{}", other))
        .tenant("store_1")
        .execute()
        .await
        .assert_not_found();

    // The freed slot admits a new device.
    login(&ctx, "store_1", None).await.assert_ok();
}

#[tokio::test]
async fn test_reconcile_trigger_requires_token() {
    let ctx = TestContext::new();

    // Closed when no token is configured.
    testing::post(ctx.router(), "/internal/reconcile")
        .bearer_token("anything")
        .execute()
        .await
        .assert_forbidden();

    let state = ctx
        .state()
        .with_reconcile_token(Some("s3cret".to_string().into()));
    let router = consign::http::router(state);

    testing::post(router.clone(), "/internal/reconcile")
        .execute()
        .await
        .assert_unauthorized();
    testing::post(router.clone(), "/internal/reconcile")
        .bearer_token("wrong")
        .execute()
        .await
        .assert_unauthorized();

    ctx.subscribe("store_1", "price_basic").await;
    testing::post(router, "/internal/reconcile")
        .bearer_token("s3cret")
        .execute()
        .await
        .assert_ok()
        .assert_json_path("considered", json!(1))
        .await
        .assert_json_path("errors", json!(0))
        .await;

    assert!(ctx.reconcile_status.last().await.is_some());
}

#[tokio::test]
async fn test_health_reports_reconciler() {
    let ctx = TestContext::new();
    let sub = ctx.subscribe("store_1", "price_basic").await;

    testing::get(ctx.router(), "/health")
        .execute()
        .await
        .assert_ok()
        .assert_json_path("status", json!("healthy"))
        .await;

    ctx.provider
        .fail_subscription(&sub.external_subscription_id)
        .await;
    consign::reconcile::run_sweep(&ctx.manager, &ctx.reconcile_status)
        .await
        .unwrap();

    testing::get(ctx.router(), "/health")
        .execute()
        .await
        .assert_ok()
        .assert_json_path("status", json!("degraded"))
        .await
        .assert_json_path("checks.1.name", json!("reconciler"))
        .await;
}

#[tokio::test]
async fn test_app_builds_from_config() {
    let config = ConfigBuilder::new()
        .with_reconcile_enabled(false)
        .build()
        .unwrap();
    let router = App::in_memory(config).into_test_router();

    testing::get(router, "/health").execute().await.assert_ok();
}
