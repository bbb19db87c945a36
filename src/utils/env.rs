/// Get environment variable with CONSIGN_ prefix, falling back to unprefixed version
///
/// Checks `CONSIGN_{key}` first, then `{key}`, so platform-provided variables
/// such as `PORT` or `DATABASE_URL` work without renaming.
///
/// # Examples
///
/// ```rust,ignore
/// use consign::utils::get_env_with_prefix;
///
/// // Checks CONSIGN_DATABASE_URL first, then DATABASE_URL
/// let url = get_env_with_prefix("DATABASE_URL");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("CONSIGN_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse a boolean flag from the environment.
///
/// Accepts `true/false`, `1/0` and `yes/no` (case-insensitive). Anything else is `None`.
pub fn get_env_flag(key: &str) -> Option<bool> {
    get_env_with_prefix(key).and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_with_prefix() {
        unsafe {
            std::env::set_var("CONSIGN_ENV_TEST_PREFIXED", "prefixed_value");
            std::env::set_var("ENV_TEST_PREFIXED", "plain_value");
        }
        assert_eq!(
            get_env_with_prefix("ENV_TEST_PREFIXED"),
            Some("prefixed_value".to_string())
        );
        unsafe {
            std::env::remove_var("CONSIGN_ENV_TEST_PREFIXED");
        }
        assert_eq!(
            get_env_with_prefix("ENV_TEST_PREFIXED"),
            Some("plain_value".to_string())
        );
        unsafe {
            std::env::remove_var("ENV_TEST_PREFIXED");
        }

        assert_eq!(get_env_with_prefix("ENV_TEST_NOT_SET_ANYWHERE"), None);
    }

    #[test]
    fn test_get_env_flag() {
        unsafe {
            std::env::set_var("CONSIGN_ENV_TEST_FLAG_YES", "Yes");
            std::env::set_var("CONSIGN_ENV_TEST_FLAG_ZERO", "0");
            std::env::set_var("CONSIGN_ENV_TEST_FLAG_JUNK", "maybe");
        }
        assert_eq!(get_env_flag("ENV_TEST_FLAG_YES"), Some(true));
        assert_eq!(get_env_flag("ENV_TEST_FLAG_ZERO"), Some(false));
        assert_eq!(get_env_flag("ENV_TEST_FLAG_JUNK"), None);
        unsafe {
            std::env::remove_var("CONSIGN_ENV_TEST_FLAG_YES");
            std::env::remove_var("CONSIGN_ENV_TEST_FLAG_ZERO");
            std::env::remove_var("CONSIGN_ENV_TEST_FLAG_JUNK");
        }
    }
}
