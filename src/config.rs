use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::billing::PlanConfig;
use crate::error::ConsignError;
use crate::utils::{get_env_flag, get_env_with_prefix};

/// Main configuration for a consign service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection URL; without one the in-memory store is used.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Stripe secret key; without one the sandbox provider is used.
    #[serde(skip)]
    pub stripe_secret_key: Option<SecretString>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_stripe_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconcile_interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub run_on_startup: bool,
    /// Bearer token for `POST /internal/reconcile`; the endpoint is closed without one.
    #[serde(skip)]
    pub trigger_token: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_cookie_max_age_days")]
    pub cookie_max_age_days: u32,
    #[serde(default = "default_true")]
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InventoryConfig {
    /// Storefront endpoint notified on archive/unarchive.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            max_retries: default_max_retries(),
            timeout_seconds: default_stripe_timeout(),
            plans: Vec::new(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_reconcile_interval(),
            run_on_startup: false,
            trigger_token: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            cookie_max_age_days: default_cookie_max_age_days(),
            cookie_secure: true,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_stripe_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    60 * 60
}

fn default_cookie_name() -> String {
    "consign_device".to_string()
}

fn default_cookie_max_age_days() -> u32 {
    400
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
    plans_error: Option<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            plans_error: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = Some(url.into());
        self
    }

    pub fn with_stripe_secret_key(mut self, key: impl Into<String>) -> Self {
        self.config.billing.stripe_secret_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_plans(mut self, plans: Vec<PlanConfig>) -> Self {
        self.config.billing.plans = plans;
        self
    }

    pub fn with_reconcile_enabled(mut self, enabled: bool) -> Self {
        self.config.reconcile.enabled = enabled;
        self
    }

    pub fn with_reconcile_interval(mut self, seconds: u64) -> Self {
        self.config.reconcile.interval_seconds = seconds;
        self
    }

    pub fn with_reconcile_trigger_token(mut self, token: impl Into<String>) -> Self {
        self.config.reconcile.trigger_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_device_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.config.devices.cookie_name = name.into();
        self
    }

    pub fn with_device_cookie_max_age_days(mut self, days: u32) -> Self {
        self.config.devices.cookie_max_age_days = days;
        self
    }

    pub fn with_device_cookie_secure(mut self, secure: bool) -> Self {
        self.config.devices.cookie_secure = secure;
        self
    }

    pub fn with_inventory_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.config.inventory.webhook_url = Some(url.into());
        self
    }

    /// Load configuration from environment variables with CONSIGN_ prefix
    ///
    /// Unparseable numeric or boolean values leave the current setting in
    /// place. A malformed `PLANS` value is kept aside and reported by `build()`.
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        if let Some(port) = get_env_with_prefix("PORT").and_then(|p| p.parse().ok()) {
            self.config.server.port = port;
        }
        if let Some(size) = get_env_with_prefix("MAX_BODY_SIZE").and_then(|s| s.parse().ok()) {
            self.config.server.max_body_size = size;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_flag("LOG_JSON") {
            self.config.logging.json = json;
        }

        if let Some(url) = get_env_with_prefix("DATABASE_URL") {
            self.config.database.url = Some(url);
        }

        if let Some(key) = get_env_with_prefix("STRIPE_SECRET_KEY") {
            self.config.billing.stripe_secret_key = Some(SecretString::from(key));
        }
        if let Some(retries) =
            get_env_with_prefix("STRIPE_MAX_RETRIES").and_then(|r| r.parse().ok())
        {
            self.config.billing.max_retries = retries;
        }
        if let Some(timeout) =
            get_env_with_prefix("STRIPE_TIMEOUT_SECONDS").and_then(|t| t.parse().ok())
        {
            self.config.billing.timeout_seconds = timeout;
        }
        if let Some(raw) = get_env_with_prefix("PLANS") {
            match serde_json::from_str::<Vec<PlanConfig>>(&raw) {
                Ok(plans) => self.config.billing.plans = plans,
                Err(e) => self.plans_error = Some(format!("Invalid PLANS value: {}", e)),
            }
        }

        if let Some(enabled) = get_env_flag("RECONCILE_ENABLED") {
            self.config.reconcile.enabled = enabled;
        }
        if let Some(interval) =
            get_env_with_prefix("RECONCILE_INTERVAL_SECONDS").and_then(|i| i.parse().ok())
        {
            self.config.reconcile.interval_seconds = interval;
        }
        if let Some(on_startup) = get_env_flag("RECONCILE_RUN_ON_STARTUP") {
            self.config.reconcile.run_on_startup = on_startup;
        }
        if let Some(token) = get_env_with_prefix("RECONCILE_TRIGGER_TOKEN") {
            self.config.reconcile.trigger_token = Some(SecretString::from(token));
        }

        if let Some(name) = get_env_with_prefix("DEVICE_COOKIE_NAME") {
            self.config.devices.cookie_name = name;
        }
        if let Some(days) =
            get_env_with_prefix("DEVICE_COOKIE_MAX_AGE_DAYS").and_then(|d| d.parse().ok())
        {
            self.config.devices.cookie_max_age_days = days;
        }
        if let Some(secure) = get_env_flag("DEVICE_COOKIE_SECURE") {
            self.config.devices.cookie_secure = secure;
        }

        if let Some(url) = get_env_with_prefix("INVENTORY_WEBHOOK_URL") {
            self.config.inventory.webhook_url = Some(url);
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration is invalid:
    /// - Invalid server address (host:port)
    /// - Invalid log level
    /// - Zero reconcile interval while the reconciler is enabled
    /// - Invalid device cookie settings
    /// - Malformed `PLANS` JSON, or plans with missing or shared prices
    pub fn build(self) -> crate::error::Result<Config> {
        if let Some(err) = self.plans_error {
            return Err(ConsignError::bad_request(err));
        }

        self.config.server.addr().map_err(|e| {
            ConsignError::bad_request(format!(
                "Invalid server address {}:{} - {}",
                self.config.server.host, self.config.server.port, e
            ))
        })?;

        if self.config.server.port == 0 {
            return Err(ConsignError::bad_request(
                "Server port must be greater than 0",
            ));
        }

        if self.config.server.max_body_size == 0 {
            return Err(ConsignError::bad_request(
                "Maximum body size must be greater than 0",
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(ConsignError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if self.config.reconcile.enabled && self.config.reconcile.interval_seconds == 0 {
            return Err(ConsignError::bad_request(
                "Reconcile interval must be greater than 0 when enabled",
            ));
        }

        if self.config.devices.cookie_name.trim().is_empty() {
            return Err(ConsignError::bad_request(
                "Device cookie name must not be empty",
            ));
        }

        if self.config.devices.cookie_max_age_days == 0 {
            return Err(ConsignError::bad_request(
                "Device cookie max age must be greater than 0",
            ));
        }

        crate::billing::Plans::from_configs(self.config.billing.plans.clone())
            .validate()
            .map_err(ConsignError::bad_request)?;

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
