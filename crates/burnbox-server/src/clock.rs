use chrono::Utc;

/// Current time in epoch milliseconds.
///
/// Creation checks, retrieval and the sweeper all read time through here so
/// they agree on what "expired" means.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A record is live strictly before its expiration instant.
pub fn is_expired(expires_at: i64, now: i64) -> bool {
    now >= expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_exclusive() {
        assert!(!is_expired(1_000, 999));
        assert!(is_expired(1_000, 1_000));
        assert!(is_expired(1_000, 1_001));
    }
}
