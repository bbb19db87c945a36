//! Plan configuration and definitions.
//!
//! A plan ties a Stripe price to the entitlements consign enforces: the
//! number of concurrently active devices and whether the plan is the
//! unrestricted free tier.
//!
//! # Code-configured plans
//!
//! ```rust,ignore
//! use consign::billing::Plans;
//!
//! let plans = Plans::builder()
//!     .plan("basic")
//!         .stripe_price("price_basic_monthly")
//!         .max_users(2)
//!         .done()
//!     .plan("pro")
//!         .stripe_price("price_pro_monthly")
//!         .max_users(10)
//!         .display_name("Pro")
//!         .done()
//!     .build();
//! ```
//!
//! # Environment-configured plans
//!
//! `CONSIGN_PLANS` holds a JSON array of [`PlanConfig`] objects:
//!
//! ```text
//! [{"id":"basic","stripe_price_id":"price_basic","max_users":2}]
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A collection of plan configurations.
#[derive(Clone, Debug, Default)]
pub struct Plans {
    plans: HashMap<String, PlanConfig>,
    // Ids seen more than once; the later definition replaced the earlier.
    duplicate_ids: Vec<String>,
}

impl Plans {
    /// Create a new empty plans collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing plans.
    #[must_use]
    pub fn builder() -> PlansBuilder {
        PlansBuilder::new()
    }

    /// Create a collection from deserialized plan configs.
    #[must_use]
    pub fn from_configs(configs: impl IntoIterator<Item = PlanConfig>) -> Self {
        let mut plans = Self::new();
        for config in configs {
            plans.add(config);
        }
        plans
    }

    /// Add a single plan config.
    ///
    /// Adding an id twice keeps the later config and makes
    /// [`validate`](Self::validate) fail.
    pub fn add(&mut self, config: PlanConfig) {
        let id = config.id.clone();
        if self.plans.insert(id.clone(), config).is_some() {
            self.duplicate_ids.push(id);
        }
    }

    /// Get a plan by ID.
    #[must_use]
    pub fn get(&self, plan_id: &str) -> Option<&PlanConfig> {
        self.plans.get(plan_id)
    }

    /// Check if a plan exists.
    #[must_use]
    pub fn contains(&self, plan_id: &str) -> bool {
        self.plans.contains_key(plan_id)
    }

    /// Get the number of plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Check if there are no plans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Iterate over all plans.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlanConfig)> {
        self.plans.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Find plan by Stripe price ID.
    #[must_use]
    pub fn find_by_stripe_price(&self, price_id: &str) -> Option<&PlanConfig> {
        self.plans
            .values()
            .find(|p| !p.stripe_price_id.is_empty() && p.stripe_price_id == price_id)
    }

    /// Check the collection for configuration mistakes.
    ///
    /// Plan ids and prices must be unique, every plan needs a price, and a
    /// capped (non free-tier) plan must allow at least one device.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(id) = self.duplicate_ids.first() {
            return Err(format!("Plan id '{}' is defined more than once", id));
        }

        let mut seen_prices = HashSet::new();
        for plan in self.plans.values() {
            if plan.stripe_price_id.trim().is_empty() {
                return Err(format!("Plan '{}' has no stripe_price_id", plan.id));
            }
            if !seen_prices.insert(plan.stripe_price_id.as_str()) {
                return Err(format!(
                    "Stripe price '{}' is assigned to more than one plan",
                    plan.stripe_price_id
                ));
            }
            if !plan.free_tier && plan.max_users == Some(0) {
                return Err(format!(
                    "Plan '{}' has max_users = 0; use free_tier or a positive cap",
                    plan.id
                ));
            }
        }
        Ok(())
    }
}

/// Configuration for a single plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Plan identifier (e.g., "basic", "pro"), also used as the plan name.
    pub id: String,
    /// Stripe price ID for the subscription.
    pub stripe_price_id: String,
    /// Maximum concurrently registered devices (None = unlimited).
    #[serde(default)]
    pub max_users: Option<u32>,
    /// Unrestricted tier; device capping is skipped entirely.
    #[serde(default)]
    pub free_tier: bool,
    /// Display name for the plan.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl PlanConfig {
    /// The device cap this plan enforces, if any.
    #[must_use]
    pub fn device_cap(&self) -> Option<u32> {
        if self.free_tier { None } else { self.max_users }
    }

    /// Name shown to users, falling back to the plan id.
    #[must_use]
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Builder for constructing a collection of plans.
#[derive(Debug, Default)]
pub struct PlansBuilder {
    plans: Plans,
}

impl PlansBuilder {
    /// Create a new plans builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start defining a new plan.
    #[must_use]
    pub fn plan(self, id: &str) -> PlanBuilder {
        PlanBuilder {
            parent: self,
            config: PlanConfig {
                id: id.to_string(),
                stripe_price_id: String::new(),
                max_users: None,
                free_tier: false,
                display_name: None,
            },
        }
    }

    /// Build the plans collection.
    ///
    /// Call [`Plans::validate`] to catch plans defined without a price or
    /// defined twice.
    #[must_use]
    pub fn build(self) -> Plans {
        self.plans
    }

    fn add_plan(mut self, config: PlanConfig) -> Self {
        self.plans.add(config);
        self
    }
}

/// Builder for a single plan configuration.
#[derive(Debug)]
pub struct PlanBuilder {
    parent: PlansBuilder,
    config: PlanConfig,
}

impl PlanBuilder {
    /// Set the Stripe price ID for the subscription.
    #[must_use]
    pub fn stripe_price(mut self, price_id: &str) -> Self {
        self.config.stripe_price_id = price_id.to_string();
        self
    }

    /// Set the maximum number of concurrently registered devices.
    #[must_use]
    pub fn max_users(mut self, max: u32) -> Self {
        self.config.max_users = Some(max);
        self
    }

    /// Mark this plan as the unrestricted free tier.
    #[must_use]
    pub fn free_tier(mut self) -> Self {
        self.config.free_tier = true;
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn display_name(mut self, name: &str) -> Self {
        self.config.display_name = Some(name.to_string());
        self
    }

    /// Finish defining this plan and return to the parent builder.
    #[must_use]
    pub fn done(self) -> PlansBuilder {
        self.parent.add_plan(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Plans {
        Plans::builder()
            .plan("free")
            .stripe_price("price_free")
            .free_tier()
            .done()
            .plan("basic")
            .stripe_price("price_basic")
            .max_users(2)
            .done()
            .plan("pro")
            .stripe_price("price_pro")
            .max_users(10)
            .display_name("Pro")
            .done()
            .build()
    }

    #[test]
    fn test_build_plans() {
        let plans = sample();
        assert_eq!(plans.len(), 3);
        assert!(plans.contains("basic"));
        assert!(plans.validate().is_ok());
    }

    #[test]
    fn test_device_cap() {
        let plans = sample();
        assert_eq!(plans.get("basic").unwrap().device_cap(), Some(2));
        assert_eq!(plans.get("free").unwrap().device_cap(), None);
    }

    #[test]
    fn test_free_tier_ignores_max_users() {
        let plans = Plans::builder()
            .plan("free")
            .stripe_price("price_free")
            .max_users(1)
            .free_tier()
            .done()
            .build();
        assert_eq!(plans.get("free").unwrap().device_cap(), None);
    }

    #[test]
    fn test_find_by_stripe_price() {
        let plans = sample();
        assert_eq!(plans.find_by_stripe_price("price_pro").unwrap().id, "pro");
        assert!(plans.find_by_stripe_price("price_unknown").is_none());
        assert!(plans.find_by_stripe_price("").is_none());
    }

    #[test]
    fn test_name_falls_back_to_id() {
        let plans = sample();
        assert_eq!(plans.get("pro").unwrap().name(), "Pro");
        assert_eq!(plans.get("basic").unwrap().name(), "basic");
    }

    #[test]
    fn test_validate_rejects_missing_price() {
        let plans = Plans::builder().plan("basic").max_users(2).done().build();
        assert!(plans.validate().unwrap_err().contains("no stripe_price_id"));
    }

    #[test]
    fn test_validate_rejects_shared_price() {
        let plans = Plans::builder()
            .plan("a")
            .stripe_price("price_same")
            .done()
            .plan("b")
            .stripe_price("price_same")
            .done()
            .build();
        assert!(plans.validate().unwrap_err().contains("more than one plan"));
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let plans = Plans::builder()
            .plan("a")
            .stripe_price("price_a")
            .max_users(0)
            .done()
            .build();
        assert!(plans.validate().is_err());
    }

    #[test]
    fn test_deserialize_plan_config() {
        let json = r#"[{"id":"basic","stripe_price_id":"price_basic","max_users":2},
                       {"id":"free","stripe_price_id":"price_free","free_tier":true}]"#;
        let configs: Vec<PlanConfig> = serde_json::from_str(json).unwrap();
        let plans = Plans::from_configs(configs);
        assert_eq!(plans.get("basic").unwrap().max_users, Some(2));
        assert!(plans.get("free").unwrap().free_tier);
        assert!(plans.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let json = r#"[{"id":"basic","stripe_price_id":"price_basic","max_users":2},
                       {"id":"basic","stripe_price_id":"price_basic_v2","max_users":5}]"#;
        let configs: Vec<PlanConfig> = serde_json::from_str(json).unwrap();
        let plans = Plans::from_configs(configs);

        assert_eq!(plans.len(), 1);
        assert_eq!(
            plans.validate().unwrap_err(),
            "Plan id 'basic' is defined more than once"
        );
    }
}
