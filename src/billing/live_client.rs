//! [`BillingProvider`] backed by the Stripe API.
//!
//! Stripe types stay inside this module; callers only ever see
//! [`ProviderSubscription`] and [`BillingError`]. Transient failures
//! (429, 5xx, timeouts) are retried with jittered exponential backoff, and
//! every mutating call carries an idempotency key that is reused across its
//! retries.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;

use super::error::BillingError;
use super::provider::{
    BillingProvider, CreateSubscriptionRequest, ProviderResult, ProviderSubscription,
};
use super::storage::SubscriptionStatus;

const META_TENANT_ID: &str = "tenant_id";
const META_REFERRER_TENANT_ID: &str = "referrer_tenant_id";

const MIN_KEY_LENGTH: usize = 20;
const TEST_KEY_PREFIXES: [&str; 2] = ["sk_test_", "rk_test_"];
const LIVE_KEY_PREFIXES: [&str; 2] = ["sk_live_", "rk_live_"];

/// Retry and timeout settings for [`LiveStripeClient`].
#[derive(Debug, Clone)]
pub struct LiveStripeClientConfig {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each one after.
    pub base_delay_ms: u64,
    /// Upper bound on the doubled delay, before jitter.
    pub max_delay_ms: u64,
    /// Limit for a single attempt.
    pub timeout_seconds: u64,
}

impl Default for LiveStripeClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
        }
    }
}

impl LiveStripeClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Wait before retry number `attempt` (0-based), with up to 25% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let capped = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        let jitter = if capped == 0 {
            0
        } else {
            fastrand::u64(0..=capped / 4)
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

/// A secret key that Stripe would reject outright.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiKeyError {
    #[error("Stripe secret key is empty")]
    Empty,
    #[error("Stripe secret key is shorter than 20 characters")]
    TooShort,
    #[error("Stripe secret key must be a secret (sk_) or restricted (rk_) test or live key")]
    UnknownPrefix,
}

fn check_api_key(key: &str) -> Result<(), ApiKeyError> {
    if key.is_empty() {
        return Err(ApiKeyError::Empty);
    }
    if key.len() < MIN_KEY_LENGTH {
        return Err(ApiKeyError::TooShort);
    }
    let known = TEST_KEY_PREFIXES
        .iter()
        .chain(LIVE_KEY_PREFIXES.iter())
        .any(|prefix| key.starts_with(prefix));
    if !known {
        return Err(ApiKeyError::UnknownPrefix);
    }
    Ok(())
}

fn parse_id<T: std::str::FromStr>(field: &str, id: &str) -> ProviderResult<T> {
    id.parse().map_err(|_| BillingError::InvalidInput {
        field: field.to_string(),
        reason: format!("'{}' is not a Stripe {}", id, field.replace('_', " ")),
    })
}

/// Live Stripe provider.
///
/// ```rust,ignore
/// let client = LiveStripeClient::new(secret_key, LiveStripeClientConfig::new().max_retries(5))?;
/// let manager = SubscriptionManager::new(store, client, inventory, plans);
/// ```
#[derive(Clone)]
pub struct LiveStripeClient {
    client: stripe::Client,
    config: LiveStripeClientConfig,
    test_mode: bool,
}

impl LiveStripeClient {
    /// Build a client after checking the key's shape.
    ///
    /// The key is handed to the Stripe client and not kept anywhere else.
    ///
    /// # Errors
    ///
    /// Returns [`ApiKeyError`] for keys that are empty, too short or not a
    /// secret/restricted key.
    pub fn new(
        api_key: impl Into<SecretString>,
        config: LiveStripeClientConfig,
    ) -> Result<Self, ApiKeyError> {
        let api_key: SecretString = api_key.into();
        let key = api_key.expose_secret();
        check_api_key(key)?;

        let test_mode = TEST_KEY_PREFIXES.iter().any(|prefix| key.starts_with(prefix));
        let client = stripe::Client::new(key).with_app_info(
            "consign".to_string(),
            Some(env!("CARGO_PKG_VERSION").to_string()),
            None,
        );

        Ok(Self {
            client,
            config,
            test_mode,
        })
    }

    /// True for `sk_test_`/`rk_test_` keys.
    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    /// Client whose requests, retries included, share one idempotency key.
    fn idempotent(&self, operation: &str) -> stripe::Client {
        let key = format!("{}_{}", operation, uuid::Uuid::new_v4());
        self.client
            .clone()
            .with_strategy(stripe::RequestStrategy::Idempotent(key))
    }

    /// Run `request` until it succeeds, fails permanently or runs out of
    /// retries.
    async fn call<T, F, Fut>(&self, operation: &str, request: F) -> ProviderResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, stripe::StripeError>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.config.attempt_timeout(), request()).await;
            let failure = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    if !is_transient(&e) || attempt >= self.config.max_retries {
                        return Err(map_stripe_error(e, operation));
                    }
                    e.to_string()
                }
                Err(_elapsed) => {
                    if attempt >= self.config.max_retries {
                        return Err(BillingError::RetryLimitExceeded {
                            operation: operation.to_string(),
                        });
                    }
                    format!("no response within {}s", self.config.timeout_seconds)
                }
            };

            let delay = self.config.backoff(attempt);
            tracing::warn!(
                target: "consign::billing::stripe",
                operation = operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "transient Stripe failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch(&self, sub_id: &stripe::SubscriptionId) -> ProviderResult<stripe::Subscription> {
        self.call("retrieve_subscription", || {
            let client = self.client.clone();
            let sub_id = sub_id.clone();
            async move { stripe::Subscription::retrieve(&client, &sub_id, &[]).await }
        })
        .await
    }

    async fn update(
        &self,
        operation: &str,
        sub_id: &stripe::SubscriptionId,
        params: stripe::UpdateSubscription<'_>,
    ) -> ProviderResult<ProviderSubscription> {
        let client = self.idempotent(operation);
        let updated = self
            .call(operation, || {
                let client = client.clone();
                let sub_id = sub_id.clone();
                let params = params.clone();
                async move { stripe::Subscription::update(&client, &sub_id, params).await }
            })
            .await?;
        Ok(map_subscription(updated))
    }
}

impl std::fmt::Debug for LiveStripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStripeClient")
            .field("config", &self.config)
            .field("test_mode", &self.test_mode)
            .finish_non_exhaustive()
    }
}

fn is_transient(error: &stripe::StripeError) -> bool {
    match error {
        stripe::StripeError::Stripe(e) => e.http_status == 429 || e.http_status >= 500,
        stripe::StripeError::Timeout => true,
        _ => false,
    }
}

fn map_stripe_error(error: stripe::StripeError, operation: &str) -> BillingError {
    let provider_error = |message: String, code, http_status| BillingError::ProviderError {
        operation: operation.to_string(),
        message,
        code,
        http_status,
    };

    match error {
        stripe::StripeError::Stripe(e) => {
            let message = e.message.unwrap_or_else(|| "no message".to_string());
            if e.http_status == 404 {
                if let Some(subscription_id) = missing_subscription_id(&message) {
                    return BillingError::ProviderSubscriptionNotFound { subscription_id };
                }
            }
            let code = e.code.map(|c| format!("{c:?}"));
            provider_error(message, code, Some(e.http_status))
        }
        stripe::StripeError::ClientError(msg) => {
            provider_error(format!("HTTP client error: {msg}"), None, None)
        }
        stripe::StripeError::Timeout => {
            provider_error("Request timed out".to_string(), None, Some(408))
        }
        other => BillingError::Internal {
            message: format!("Stripe request could not be built: {other}"),
        },
    }
}

/// `"No such subscription: 'sub_x'"` → `sub_x`.
fn missing_subscription_id(message: &str) -> Option<String> {
    let id = message
        .strip_prefix("No such subscription: ")?
        .trim()
        .trim_matches('\'');
    (!id.is_empty()).then(|| id.to_string())
}

fn map_subscription(sub: stripe::Subscription) -> ProviderSubscription {
    let customer_id = match &sub.customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(c) => c.id.to_string(),
    };
    let price_id = sub
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|price| price.id.to_string());

    ProviderSubscription {
        id: sub.id.to_string(),
        customer_id,
        price_id,
        status: SubscriptionStatus::parse(sub.status.as_str()),
        current_period_start: u64::try_from(sub.current_period_start).unwrap_or(0),
        current_period_end: u64::try_from(sub.current_period_end).unwrap_or(0),
        cancel_at_period_end: sub.cancel_at_period_end,
    }
}

#[async_trait]
impl BillingProvider for LiveStripeClient {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        let sub_id = parse_id("subscription_id", subscription_id)?;
        Ok(map_subscription(self.fetch(&sub_id).await?))
    }

    async fn create_customer(&self, tenant_id: &str) -> ProviderResult<String> {
        let client = self.idempotent("create_customer");
        let mut params = stripe::CreateCustomer::new();
        params.metadata = Some(HashMap::from([(
            META_TENANT_ID.to_string(),
            tenant_id.to_string(),
        )]));

        let customer = self
            .call("create_customer", || {
                let client = client.clone();
                let params = params.clone();
                async move { stripe::Customer::create(&client, params).await }
            })
            .await?;

        tracing::debug!(
            target: "consign::billing::stripe",
            tenant_id = %tenant_id,
            customer_id = %customer.id,
            "created Stripe customer"
        );
        Ok(customer.id.to_string())
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> ProviderResult<ProviderSubscription> {
        let customer_id: stripe::CustomerId = parse_id("customer_id", &request.customer_id)?;
        let payment_method_id: stripe::PaymentMethodId =
            parse_id("payment_method_id", &request.payment_method_id)?;

        // Stripe only accepts a default payment method the customer owns.
        let attach = self.idempotent("attach_payment_method");
        self.call("attach_payment_method", || {
            let client = attach.clone();
            let payment_method_id = payment_method_id.clone();
            let params = stripe::AttachPaymentMethod {
                customer: customer_id.clone(),
            };
            async move { stripe::PaymentMethod::attach(&client, &payment_method_id, params).await }
        })
        .await?;

        let mut metadata = HashMap::from([(META_TENANT_ID.to_string(), request.tenant_id.clone())]);
        if let Some(referrer) = &request.referrer_tenant_id {
            metadata.insert(META_REFERRER_TENANT_ID.to_string(), referrer.clone());
        }

        let mut params = stripe::CreateSubscription::new(customer_id);
        params.items = Some(vec![stripe::CreateSubscriptionItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.default_payment_method = Some(&request.payment_method_id);
        params.metadata = Some(metadata);

        let client = self.idempotent("create_subscription");
        let created = self
            .call("create_subscription", || {
                let client = client.clone();
                let params = params.clone();
                async move { stripe::Subscription::create(&client, params).await }
            })
            .await?;

        Ok(map_subscription(created))
    }

    async fn update_subscription_plan(
        &self,
        subscription_id: &str,
        new_price_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        use stripe::generated::billing::subscription::SubscriptionProrationBehavior;

        let sub_id = parse_id("subscription_id", subscription_id)?;

        // Swap the price on the existing item rather than adding a second one.
        let current = self.fetch(&sub_id).await?;
        let Some(item) = current.items.data.first() else {
            return Err(BillingError::provider(
                "update_subscription_plan",
                format!("subscription '{}' has no items", subscription_id),
            ));
        };

        let mut params = stripe::UpdateSubscription::new();
        params.items = Some(vec![stripe::UpdateSubscriptionItems {
            id: Some(item.id.to_string()),
            price: Some(new_price_id.to_string()),
            ..Default::default()
        }]);
        params.proration_behavior = Some(SubscriptionProrationBehavior::None);

        self.update("update_subscription_plan", &sub_id, params).await
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        let sub_id = parse_id("subscription_id", subscription_id)?;
        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);

        self.update("cancel_at_period_end", &sub_id, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TEST_KEY: &str = "sk_test_12345678901234567890";

    fn no_delay(max_retries: u32) -> LiveStripeClientConfig {
        LiveStripeClientConfig {
            base_delay_ms: 0,
            ..LiveStripeClientConfig::new().max_retries(max_retries)
        }
    }

    #[test]
    fn test_api_key_shapes() {
        assert!(check_api_key("sk_live_1234567890abcdef").is_ok());
        assert!(check_api_key("rk_test_1234567890abcdef").is_ok());

        assert_eq!(check_api_key(""), Err(ApiKeyError::Empty));
        assert_eq!(check_api_key("sk_test_short"), Err(ApiKeyError::TooShort));
        // Publishable keys cannot create subscriptions.
        assert_eq!(
            check_api_key("pk_test_1234567890abcdef"),
            Err(ApiKeyError::UnknownPrefix)
        );
    }

    #[test]
    fn test_mode_follows_key_prefix() {
        let client = LiveStripeClient::new(TEST_KEY, LiveStripeClientConfig::new()).unwrap();
        assert!(client.is_test_mode());

        let client =
            LiveStripeClient::new("rk_live_12345678901234567890", LiveStripeClientConfig::new())
                .unwrap();
        assert!(!client.is_test_mode());
    }

    #[test]
    fn test_debug_omits_key() {
        let client = LiveStripeClient::new(TEST_KEY, LiveStripeClientConfig::new()).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains(TEST_KEY));
        assert!(debug.contains("test_mode: true"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = LiveStripeClientConfig::new();

        let first = config.backoff(0).as_millis();
        assert!((500..=625).contains(&first));
        let third = config.backoff(2).as_millis();
        assert!((2000..=2500).contains(&third));
        assert!(config.backoff(20).as_millis() <= 37_500);

        assert_eq!(no_delay(1).backoff(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_limit() {
        let client = LiveStripeClient::new(TEST_KEY, no_delay(2)).unwrap();
        let attempts = AtomicU32::new(0);

        let result: ProviderResult<()> = client
            .call("retrieve_subscription", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(stripe::StripeError::Timeout) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(BillingError::ProviderError {
                http_status: Some(408),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let client = LiveStripeClient::new(TEST_KEY, no_delay(3)).unwrap();
        let attempts = AtomicU32::new(0);

        let result: ProviderResult<()> = client
            .call("create_subscription", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(stripe::StripeError::UnsupportedVersion) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(BillingError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let client = LiveStripeClient::new(TEST_KEY, no_delay(3)).unwrap();
        let attempts = AtomicU32::new(0);

        let result = client
            .call("create_customer", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(stripe::StripeError::Timeout)
                    } else {
                        Ok("cus_1")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "cus_1");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stripe_status_mapping() {
        let status = |s: stripe::SubscriptionStatus| SubscriptionStatus::parse(s.as_str());
        assert_eq!(status(stripe::SubscriptionStatus::PastDue), SubscriptionStatus::PastDue);
        assert_eq!(
            status(stripe::SubscriptionStatus::IncompleteExpired),
            SubscriptionStatus::IncompleteExpired
        );
        assert_eq!(status(stripe::SubscriptionStatus::Paused), SubscriptionStatus::Paused);
    }

    #[test]
    fn test_missing_subscription_id() {
        assert_eq!(
            missing_subscription_id("No such subscription: 'sub_123'"),
            Some("sub_123".to_string())
        );
        assert_eq!(missing_subscription_id("No such customer: 'cus_1'"), None);
    }

    #[test]
    fn test_malformed_ids_rejected_locally() {
        let customer: ProviderResult<stripe::CustomerId> =
            parse_id("customer_id", "not a customer");
        assert!(matches!(customer, Err(BillingError::InvalidInput { .. })));
    }
}
