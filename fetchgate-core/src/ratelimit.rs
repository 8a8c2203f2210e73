// Fixed-window rate limiting per client key

use crate::config::RateLimitSettings;
use crate::store::KvStore;
use chrono::{DateTime, Timelike, Utc};
use std::time::Duration;
use tracing::{debug, warn};

pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Two wall-clock aligned windows (minute and hour) per client.
///
/// Windows are not sliding: a burst straddling a boundary can briefly exceed
/// the nominal rate.
#[derive(Clone)]
pub struct RateLimiter {
    store: KvStore,
    enabled: bool,
    per_minute: u64,
    per_hour: u64,
}

struct Window {
    key: String,
    ttl: Duration,
    cap: u64,
}

impl RateLimiter {
    pub fn new(store: KvStore, settings: &RateLimitSettings) -> Self {
        Self {
            store,
            enabled: settings.enabled,
            per_minute: settings.requests_per_minute,
            per_hour: settings.requests_per_hour,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn allow(&self, client_key: &str) -> bool {
        self.allow_at(client_key, Utc::now()).await
    }

    /// Decide for a request arriving at `now`. Rejected calls do not count.
    pub async fn allow_at(&self, client_key: &str, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }

        let client = if client_key.is_empty() {
            ANONYMOUS_CLIENT
        } else {
            client_key
        };
        let windows = self.windows(client, now);

        for window in &windows {
            match self.store.get_count(&window.key).await {
                Ok(count) if count >= window.cap => {
                    debug!("Rate limit hit for {} ({} >= {})", window.key, count, window.cap);
                    return false;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Rate limit store unavailable, allowing request: {}", e);
                    return true;
                }
            }
        }

        for window in &windows {
            if let Err(e) = self.store.incr_with_expiry(&window.key, window.ttl).await {
                warn!("Failed to record request for {}: {}", window.key, e);
            }
        }

        true
    }

    fn windows(&self, client: &str, now: DateTime<Utc>) -> [Window; 2] {
        let seconds_into_minute = u64::from(now.second());
        let seconds_into_hour = u64::from(now.minute()) * 60 + seconds_into_minute;

        [
            Window {
                key: format!("rate_limit:{}:{}", client, now.format("%Y%m%d%H%M")),
                ttl: Duration::from_secs((60 - seconds_into_minute).max(1)),
                cap: self.per_minute,
            },
            Window {
                key: format!("rate_limit:{}:{}", client, now.format("%Y%m%d%H")),
                ttl: Duration::from_secs((3600 - seconds_into_hour).max(1)),
                cap: self.per_hour,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter(per_minute: u64, per_hour: u64) -> RateLimiter {
        RateLimiter::new(
            KvStore::memory(),
            &RateLimitSettings {
                enabled: true,
                requests_per_minute: per_minute,
                requests_per_hour: per_hour,
            },
        )
    }

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, hour, minute, second).unwrap()
    }

    #[tokio::test]
    async fn test_cap_plus_one_rejected_within_minute() {
        let limiter = limiter(3, 100);
        let now = at(10, 0, 5);

        for _ in 0..3 {
            assert!(limiter.allow_at("client", now).await);
        }
        assert!(!limiter.allow_at("client", now).await);
    }

    #[tokio::test]
    async fn test_rejected_calls_do_not_increment() {
        let limiter = limiter(2, 100);
        let now = at(10, 0, 5);

        assert!(limiter.allow_at("client", now).await);
        assert!(limiter.allow_at("client", now).await);
        for _ in 0..5 {
            assert!(!limiter.allow_at("client", now).await);
        }

        let minute_key = format!("rate_limit:client:{}", now.format("%Y%m%d%H%M"));
        let hour_key = format!("rate_limit:client:{}", now.format("%Y%m%d%H"));
        assert_eq!(limiter.store.get_count(&minute_key).await.unwrap(), 2);
        assert_eq!(limiter.store.get_count(&hour_key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_new_minute_window_resets_minute_cap() {
        let limiter = limiter(1, 100);

        assert!(limiter.allow_at("client", at(10, 0, 59)).await);
        assert!(!limiter.allow_at("client", at(10, 0, 59)).await);
        assert!(limiter.allow_at("client", at(10, 1, 0)).await);
    }

    #[tokio::test]
    async fn test_hour_cap_applies_across_minutes() {
        let limiter = limiter(10, 2);

        assert!(limiter.allow_at("client", at(10, 0, 0)).await);
        assert!(limiter.allow_at("client", at(10, 5, 0)).await);
        assert!(!limiter.allow_at("client", at(10, 10, 0)).await);
        assert!(limiter.allow_at("client", at(11, 0, 0)).await);
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = limiter(1, 100);
        let now = at(10, 0, 0);

        assert!(limiter.allow_at("alice", now).await);
        assert!(!limiter.allow_at("alice", now).await);
        assert!(limiter.allow_at("bob", now).await);
    }

    #[tokio::test]
    async fn test_disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(
            KvStore::memory(),
            &RateLimitSettings {
                enabled: false,
                requests_per_minute: 1,
                requests_per_hour: 1,
            },
        );
        let now = at(10, 0, 0);
        for _ in 0..10 {
            assert!(limiter.allow_at("client", now).await);
        }
    }

    #[test]
    fn test_window_expiry_aligns_to_boundary() {
        let limiter = limiter(1, 1);
        let [minute, hour] = limiter.windows("c", at(10, 59, 45));

        assert_eq!(minute.ttl, Duration::from_secs(15));
        assert_eq!(hour.ttl, Duration::from_secs(15));
        assert_eq!(minute.key, "rate_limit:c:202601151059");
        assert_eq!(hour.key, "rate_limit:c:2026011510");
    }
}
