//! Device-session capping.
//!
//! Each browser carries a random device token in a long-lived cookie. At
//! login, [`DeviceSessionGuard`] registers the device against the tenant's
//! plan-derived cap or rejects it with `QuotaExceeded`.
//!
//! # Example
//!
//! ```rust,ignore
//! use consign::devices::{DeviceSessionGuard, DeviceToken};
//!
//! let guard = DeviceSessionGuard::new(store, plans);
//! let (token, _fresh) = DeviceToken::resolve(cookie_value.as_deref());
//! let admission = guard.admit("store_1", &token.device_id()).await?;
//! ```

mod guard;
mod token;

pub use guard::{DeviceSessionGuard, DynDeviceGuard, LoginAdmission};
pub use token::{DeviceToken, TOKEN_LENGTH, device_cookie, read_device_cookie};
