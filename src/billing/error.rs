//! Billing-specific error types.
//!
//! Domain errors raised by the subscription manager and provider clients.
//! They convert into [`ConsignError`](crate::error::ConsignError) for HTTP
//! responses: missing subscriptions become `NotFound`, a live subscription
//! blocking a new one becomes `Conflict`, and provider failures become
//! `Upstream`.

use std::fmt;

use crate::error::ConsignError;

/// Billing-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    // Validation errors
    /// The tenant ID is invalid.
    InvalidTenantId { id: String, reason: String },
    /// The referral cannot be recorded.
    InvalidReferral { reason: String },
    /// A request field is malformed.
    InvalidInput { field: String, reason: String },

    // Plan errors
    /// No configured plan uses this price.
    PlanNotFound { price_id: String },

    // Subscription errors
    /// No subscription found for the tenant.
    NoSubscription { tenant_id: String },
    /// The tenant already has a subscription that has not been canceled.
    SubscriptionAlreadyActive { tenant_id: String, status: String },
    /// The provider has no subscription with this ID.
    ProviderSubscriptionNotFound { subscription_id: String },

    // Provider errors
    /// The billing provider returned an error.
    ProviderError {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },

    // General errors
    /// The operation failed after multiple retries.
    RetryLimitExceeded { operation: String },
    /// An unexpected internal error occurred.
    Internal { message: String },
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTenantId { id, reason } => {
                write!(f, "Invalid tenant ID '{}': {}", id, reason)
            }
            Self::InvalidReferral { reason } => {
                write!(f, "Invalid referral: {}", reason)
            }
            Self::InvalidInput { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::PlanNotFound { price_id } => {
                write!(f, "No plan is configured for price '{}'", price_id)
            }
            Self::NoSubscription { tenant_id } => {
                write!(f, "No subscription found for '{}'", tenant_id)
            }
            Self::SubscriptionAlreadyActive { tenant_id, status } => {
                write!(
                    f,
                    "Tenant '{}' already has a subscription in status '{}'",
                    tenant_id, status
                )
            }
            Self::ProviderSubscriptionNotFound { subscription_id } => {
                write!(f, "Billing provider has no subscription '{}'", subscription_id)
            }
            Self::ProviderError {
                operation,
                message,
                code,
                http_status,
            } => {
                write!(f, "Billing provider error during '{}': {}", operation, message)?;
                if let Some(code) = code {
                    write!(f, " (code: {})", code)?;
                }
                if let Some(status) = http_status {
                    write!(f, " [HTTP {}]", status)?;
                }
                Ok(())
            }
            Self::RetryLimitExceeded { operation } => {
                write!(f, "Operation '{}' failed after multiple retries", operation)
            }
            Self::Internal { message } => {
                write!(f, "Internal billing error: {}", message)
            }
        }
    }
}

impl std::error::Error for BillingError {}

impl From<BillingError> for ConsignError {
    fn from(err: BillingError) -> Self {
        match &err {
            BillingError::NoSubscription { .. } => ConsignError::NotFound(err.to_string()),

            BillingError::SubscriptionAlreadyActive { .. } => {
                ConsignError::Conflict(err.to_string())
            }

            BillingError::InvalidTenantId { .. }
            | BillingError::InvalidReferral { .. }
            | BillingError::InvalidInput { .. }
            | BillingError::PlanNotFound { .. } => ConsignError::BadRequest(err.to_string()),

            // Declined payment: the caller must fix the payment method.
            BillingError::ProviderError {
                message,
                http_status: Some(402),
                ..
            } => ConsignError::BadRequest(message.clone()),

            BillingError::ProviderSubscriptionNotFound { .. }
            | BillingError::ProviderError { .. }
            | BillingError::RetryLimitExceeded { .. } => ConsignError::Upstream(err.to_string()),

            BillingError::Internal { .. } => ConsignError::Internal(err.to_string()),
        }
    }
}

impl BillingError {
    /// Check if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTenantId { .. }
                | Self::InvalidReferral { .. }
                | Self::InvalidInput { .. }
                | Self::PlanNotFound { .. }
                | Self::NoSubscription { .. }
                | Self::SubscriptionAlreadyActive { .. }
        )
    }

    /// Check if this is a server or upstream error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::ProviderSubscriptionNotFound { .. }
            | Self::RetryLimitExceeded { .. }
            | Self::Internal { .. } => true,
            // Provider 4xx still means our request to them was rejected
            Self::ProviderError { .. } => true,
            _ => false,
        }
    }

    /// Check if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderError { http_status, .. } => {
                // Rate limit (429) and server errors (5xx) are retryable
                matches!(http_status, Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }

    /// Shorthand for a provider error without HTTP details.
    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            operation: operation.into(),
            message: message.into(),
            code: None,
            http_status: None,
        }
    }
}
