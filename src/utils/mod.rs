//! Utility functions and helpers.
//!
//! Environment variable lookup and the unix clock used for billing periods.

pub mod env;
pub mod time;

pub use env::{get_env_flag, get_env_with_prefix};
pub use time::unix_now;
