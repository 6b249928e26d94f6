use std::sync::Arc;

use common_redis::Client as RedisClient;
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::config::{Config, QuotaSubjectMode};
use crate::metrics::{
    consts::{
        ADMIN_RATE_LIMITED_COUNTER, ADMIN_RATE_LIMIT_REQUESTS_COUNTER,
        ADMIN_RATE_LIMIT_STORE_ERRORS_COUNTER,
    },
    utils::inc,
};

/// TTL reply for a key that exists but never expires.
const NO_EXPIRY: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    pub max_requests: u64,
    pub window_seconds: u64,
}

impl QuotaConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_requests: config.admin_rate_limit_max_requests,
            window_seconds: config.admin_rate_limit_window_secs,
        }
    }
}

/// Who a quota counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaSubject<'a> {
    Principal(&'a str),
    /// The raw API key. Only its SHA-1 digest is ever written to the store.
    Credential(&'a str),
}

impl<'a> QuotaSubject<'a> {
    pub fn for_mode(mode: QuotaSubjectMode, principal_id: &'a str, credential: &'a str) -> Self {
        match mode {
            QuotaSubjectMode::Principal => QuotaSubject::Principal(principal_id),
            QuotaSubjectMode::Credential => QuotaSubject::Credential(credential),
        }
    }
}

/// Fixed-window request counter for the admin plane, kept in the shared store.
///
/// The first request of a window creates the counter and gives it a TTL of one
/// window. A denied request re-applies the TTL if the counter lost it, so a failed
/// EXPIRE cannot lock a subject out for good. Any store error allows the request.
#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn RedisClient + Send + Sync>,
    config: QuotaConfig,
    key_prefix: String,
}

impl QuotaTracker {
    pub fn new(
        store: Arc<dyn RedisClient + Send + Sync>,
        config: QuotaConfig,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            config,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn counter_key(&self, subject: QuotaSubject<'_>) -> String {
        match subject {
            QuotaSubject::Principal(id) => format!("{}{}", self.key_prefix, id),
            QuotaSubject::Credential(key) => {
                format!("{}key:{:x}", self.key_prefix, Sha1::digest(key.as_bytes()))
            }
        }
    }

    pub async fn allow(&self, subject: QuotaSubject<'_>) -> bool {
        let key = self.counter_key(subject);
        inc(ADMIN_RATE_LIMIT_REQUESTS_COUNTER, &[], 1);

        let count = match self.store.incr(key.clone()).await {
            Ok(count) => count,
            Err(e) => {
                inc(ADMIN_RATE_LIMIT_STORE_ERRORS_COUNTER, &[], 1);
                warn!(error = %e, key = %key, "Rate limit store unavailable, allowing admin request");
                return true;
            }
        };

        if count == 1 {
            if let Err(e) = self.store.expire(key.clone(), self.config.window_seconds).await {
                inc(ADMIN_RATE_LIMIT_STORE_ERRORS_COUNTER, &[], 1);
                warn!(error = %e, key = %key, "Failed to set rate limit window expiry");
            }
        }

        let allowed = u64::try_from(count).map_or(true, |count| count <= self.config.max_requests);
        if !allowed {
            inc(ADMIN_RATE_LIMITED_COUNTER, &[], 1);
            warn!(key = %key, count, limit = self.config.max_requests, "Admin request rate limited");
            self.ensure_window_expiry(&key).await;
        }
        allowed
    }

    async fn ensure_window_expiry(&self, key: &str) {
        match self.store.ttl(key.to_string()).await {
            Ok(NO_EXPIRY) => {
                warn!(key = %key, "Rate limit counter has no expiry, restoring window");
                if let Err(e) = self.store.expire(key.to_string(), self.config.window_seconds).await {
                    inc(ADMIN_RATE_LIMIT_STORE_ERRORS_COUNTER, &[], 1);
                    warn!(error = %e, key = %key, "Failed to set rate limit window expiry");
                }
            }
            Ok(_) => {}
            Err(e) => {
                inc(ADMIN_RATE_LIMIT_STORE_ERRORS_COUNTER, &[], 1);
                warn!(error = %e, key = %key, "Failed to read rate limit window expiry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_redis::{CustomRedisError, MockRedisClient};
    use std::time::Duration;

    const CONFIG: QuotaConfig = QuotaConfig {
        max_requests: 30,
        window_seconds: 60,
    };

    fn tracker(store: &MockRedisClient) -> QuotaTracker {
        QuotaTracker::new(Arc::new(store.clone()), CONFIG, "rate_limit:admin:")
    }

    #[tokio::test(start_paused = true)]
    async fn test_thirty_per_window() {
        let store = MockRedisClient::new();
        let tracker = tracker(&store);

        for i in 0..30 {
            assert!(
                tracker.allow(QuotaSubject::Principal("alice")).await,
                "request {} should be allowed",
                i + 1
            );
        }
        assert!(!tracker.allow(QuotaSubject::Principal("alice")).await);
        assert!(!tracker.allow(QuotaSubject::Principal("alice")).await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_set_once_per_window() {
        let store = MockRedisClient::new();
        let tracker = tracker(&store);

        for _ in 0..5 {
            assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        }

        let expires: Vec<_> = store
            .get_calls()
            .into_iter()
            .filter(|call| call.op == "expire")
            .collect();
        assert_eq!(expires.len(), 1);
        assert_eq!(store.expiry("rate_limit:admin:alice"), Some(Duration::from_secs(60)));

        // The window does not slide with later requests.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        assert_eq!(store.expiry("rate_limit:admin:alice"), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let store = MockRedisClient::new();
        let tracker = QuotaTracker::new(
            Arc::new(store.clone()),
            QuotaConfig {
                max_requests: 1,
                window_seconds: 60,
            },
            "rate_limit:admin:",
        );

        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        assert!(!tracker.allow(QuotaSubject::Principal("alice")).await);
        assert!(tracker.allow(QuotaSubject::Principal("bob")).await);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let store = MockRedisClient::new();
        let tracker = QuotaTracker::new(
            Arc::new(store.clone()),
            QuotaConfig {
                max_requests: 1,
                window_seconds: 60,
            },
            "rate_limit:admin:",
        );
        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        assert!(!tracker.allow(QuotaSubject::Principal("alice")).await);

        store.set_failure(Some(CustomRedisError::Timeout));
        for _ in 0..100 {
            assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        }
    }

    #[tokio::test]
    async fn test_expire_failure_still_allows() {
        let mut store = MockRedisClient::new();
        store.fail_op("expire", CustomRedisError::Timeout);
        let tracker = tracker(&store);

        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        assert_eq!(store.value("rate_limit:admin:alice"), Some("1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_expiry_is_restored_once_denied() {
        let mut store = MockRedisClient::new();
        store.fail_op("expire", CustomRedisError::Timeout);
        let tracker = QuotaTracker::new(
            Arc::new(store.clone()),
            QuotaConfig {
                max_requests: 2,
                window_seconds: 60,
            },
            "rate_limit:admin:",
        );

        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
        assert_eq!(store.expiry("rate_limit:admin:alice"), None);

        store.clear_op_failure("expire");
        assert!(!tracker.allow(QuotaSubject::Principal("alice")).await);
        assert_eq!(
            store.expiry("rate_limit:admin:alice"),
            Some(Duration::from_secs(60))
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(tracker.allow(QuotaSubject::Principal("alice")).await);
    }

    #[test]
    fn test_counter_keys() {
        let store = MockRedisClient::new();
        let tracker = tracker(&store);

        assert_eq!(
            tracker.counter_key(QuotaSubject::Principal("42")),
            "rate_limit:admin:42"
        );

        let hashed = tracker.counter_key(QuotaSubject::Credential("secret-key"));
        assert!(hashed.starts_with("rate_limit:admin:key:"));
        assert!(!hashed.contains("secret-key"));
        // 40 hex characters of SHA-1
        assert_eq!(hashed.len(), "rate_limit:admin:key:".len() + 40);
        assert_eq!(hashed, tracker.counter_key(QuotaSubject::Credential("secret-key")));
    }

    #[test]
    fn test_subject_for_mode() {
        assert_eq!(
            QuotaSubject::for_mode(QuotaSubjectMode::Principal, "alice", "k"),
            QuotaSubject::Principal("alice")
        );
        assert_eq!(
            QuotaSubject::for_mode(QuotaSubjectMode::Credential, "alice", "k"),
            QuotaSubject::Credential("k")
        );
    }
}
