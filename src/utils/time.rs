use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as unix seconds.
///
/// Billing periods, session timestamps and record versions are all stored as
/// unix seconds. A clock before the epoch reads as 0.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Render unix seconds as an RFC 3339 UTC timestamp for API responses.
#[must_use]
pub fn to_rfc3339(seconds: u64) -> Option<String> {
    let seconds = i64::try_from(seconds).ok()?;
    chrono::DateTime::<chrono::Utc>::from_timestamp(seconds, 0).map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_recent() {
        // 2023-11-14
        assert!(unix_now() > 1_700_000_000);
    }

    #[test]
    fn test_to_rfc3339() {
        assert_eq!(
            to_rfc3339(1_700_000_000).as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
        assert_eq!(to_rfc3339(u64::MAX), None);
    }
}
