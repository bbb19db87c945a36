//! Input validation for billing operations.
//!
//! Tenant IDs arrive from the upstream auth provider and price or payment
//! method IDs from clients; both end up in provider metadata and log lines,
//! so they are restricted to a conservative alphabet.

use super::error::BillingError;

/// Maximum length for tenant IDs.
const MAX_TENANT_ID_LENGTH: usize = 256;

/// Maximum length for provider object IDs (prices, payment methods).
const MAX_PROVIDER_ID_LENGTH: usize = 256;

/// Validate a tenant ID.
///
/// Tenant IDs must:
/// - Not be empty
/// - Not exceed 256 characters
/// - Contain only alphanumeric characters, underscores, and hyphens
///
/// # Errors
///
/// Returns `BillingError::InvalidTenantId` if validation fails.
pub fn validate_tenant_id(id: &str) -> Result<(), BillingError> {
    if id.is_empty() {
        return Err(BillingError::InvalidTenantId {
            id: id.to_string(),
            reason: "tenant_id cannot be empty".to_string(),
        });
    }

    if id.len() > MAX_TENANT_ID_LENGTH {
        return Err(BillingError::InvalidTenantId {
            id: sanitize_for_error(id),
            reason: format!("tenant_id exceeds maximum length of {}", MAX_TENANT_ID_LENGTH),
        });
    }

    if !id.chars().all(is_id_char) {
        return Err(BillingError::InvalidTenantId {
            id: sanitize_for_error(id),
            reason: "tenant_id may only contain letters, digits, '_' and '-'".to_string(),
        });
    }

    Ok(())
}

/// Validate a provider object ID such as a price or payment method.
///
/// `kind` names the field in the error message.
pub fn validate_provider_id(kind: &str, id: &str) -> Result<(), BillingError> {
    let reason = if id.is_empty() {
        Some("cannot be empty".to_string())
    } else if id.len() > MAX_PROVIDER_ID_LENGTH {
        Some(format!("exceeds maximum length of {}", MAX_PROVIDER_ID_LENGTH))
    } else if !id.chars().all(is_id_char) {
        Some(format!("'{}' contains invalid characters", sanitize_for_error(id)))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BillingError::InvalidInput {
            field: kind.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Sanitize a string for error messages to prevent log injection.
fn sanitize_for_error(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .take(50)
        .map(|c| if is_id_char(c) { c } else { '?' })
        .collect();

    if s.chars().count() > 50 {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
