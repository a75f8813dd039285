//! Fixed-window rate limiting with tiered quotas.
//!
//! Counters live in the shared store under `rate_limit:{identity}:{window}`
//! and reset only via store-level expiry. Increments must be atomic at the
//! store level: concurrent requests from one identity may land on different
//! processes, so in-process locking would undercount.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::SharedStore;

/// Sentinel limit meaning "no ceiling".
pub const UNLIMITED: i64 = -1;

const HOUR_SECS: u64 = 3600;
const DAY_SECS: u64 = 86400;

/// Quota-gated action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaAction {
    RequestsPerHour,
    RequestsPerDay,
    AnalysisPerDay,
    ChatPerHour,
}

impl QuotaAction {
    /// Window length for this action's fixed window.
    pub fn window(&self) -> Duration {
        match self {
            QuotaAction::RequestsPerHour | QuotaAction::ChatPerHour => {
                Duration::from_secs(HOUR_SECS)
            }
            QuotaAction::RequestsPerDay | QuotaAction::AnalysisPerDay => {
                Duration::from_secs(DAY_SECS)
            }
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            QuotaAction::RequestsPerHour => "requests_per_hour",
            QuotaAction::RequestsPerDay => "requests_per_day",
            QuotaAction::AnalysisPerDay => "analysis_per_day",
            QuotaAction::ChatPerHour => "chat_per_hour",
        }
    }
}

/// Per-tier quota ceilings. `UNLIMITED` (-1) disables a ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub requests_per_hour: i64,
    pub requests_per_day: i64,
    pub analysis_per_day: i64,
    pub chat_per_hour: i64,
}

impl TierLimits {
    fn limit_for(&self, action: QuotaAction) -> i64 {
        match action {
            QuotaAction::RequestsPerHour => self.requests_per_hour,
            QuotaAction::RequestsPerDay => self.requests_per_day,
            QuotaAction::AnalysisPerDay => self.analysis_per_day,
            QuotaAction::ChatPerHour => self.chat_per_hour,
        }
    }
}

/// Default quota table keyed by identity tier.
pub fn default_tiers() -> HashMap<String, TierLimits> {
    HashMap::from([
        (
            "free".to_string(),
            TierLimits {
                requests_per_hour: 50,
                requests_per_day: 500,
                analysis_per_day: 10,
                chat_per_hour: 20,
            },
        ),
        (
            "basic".to_string(),
            TierLimits {
                requests_per_hour: 200,
                requests_per_day: 2000,
                analysis_per_day: 100,
                chat_per_hour: 100,
            },
        ),
        (
            "premium".to_string(),
            TierLimits {
                requests_per_hour: 1000,
                requests_per_day: 10000,
                analysis_per_day: 1000,
                chat_per_hour: 500,
            },
        ),
        (
            "enterprise".to_string(),
            TierLimits {
                requests_per_hour: UNLIMITED,
                requests_per_day: UNLIMITED,
                analysis_per_day: UNLIMITED,
                chat_per_hour: UNLIMITED,
            },
        ),
    ])
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RateDecision {
    Allowed,
    /// Rejected with quota metadata for the client.
    Limited {
        limit: u64,
        requests: u64,
        /// Seconds until the window resets.
        reset_in: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Fixed-window rate limiter over the shared store.
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    tiers: HashMap<String, TierLimits>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            tiers: default_tiers(),
        }
    }

    pub fn with_tiers(store: Arc<dyn SharedStore>, tiers: HashMap<String, TierLimits>) -> Self {
        Self { store, tiers }
    }

    fn counter_key(identity: &str, window: Duration) -> String {
        format!("rate_limit:{}:{}", identity, window.as_secs())
    }

    /// Check an explicit (limit, window) pair for an identity.
    ///
    /// Atomically increments the window counter; a post-increment count above
    /// the limit rejects. On store error the request is allowed (fail open)
    /// and the fault is logged.
    pub async fn check(&self, identity: &str, limit: i64, window: Duration) -> RateDecision {
        if limit == UNLIMITED {
            return RateDecision::Allowed;
        }

        let key = Self::counter_key(identity, window);

        let count = match self.store.incr_with_expiry(&key, window).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Rate limit check failed for {}, failing open: {}", key, e);
                return RateDecision::Allowed;
            }
        };

        if count <= limit.max(0) as u64 {
            return RateDecision::Allowed;
        }

        let reset_in = match self.store.ttl(&key).await {
            Ok(Some(ttl)) => ttl.as_secs(),
            _ => window.as_secs(),
        };

        RateDecision::Limited {
            limit: limit.max(0) as u64,
            requests: count,
            reset_in,
        }
    }

    /// Check a tier-governed action for an identity.
    ///
    /// Unknown tiers fall back to the free tier's ceilings.
    pub async fn check_tier(
        &self,
        identity: &str,
        tier: &str,
        action: QuotaAction,
    ) -> RateDecision {
        let limits = match self.tiers.get(tier).or_else(|| self.tiers.get("free")) {
            Some(limits) => limits,
            None => return RateDecision::Allowed,
        };

        let limit = limits.limit_for(action);
        let scoped = format!("{}:{}", identity, action.suffix());
        self.check(&scoped, limit, action.window()).await
    }

    /// Current usage for an identity within a window.
    pub async fn usage(&self, identity: &str, window: Duration) -> (u64, u64) {
        let key = Self::counter_key(identity, window);
        let requests = match self.store.get(&key).await {
            Ok(Some(v)) => v.parse().unwrap_or(0),
            _ => 0,
        };
        let reset_in = match self.store.ttl(&key).await {
            Ok(Some(ttl)) => ttl.as_secs(),
            _ => window.as_secs(),
        };
        (requests, reset_in)
    }

    /// Clear an identity's counter for a window (admin reset).
    pub async fn reset(&self, identity: &str, window: Duration) {
        let key = Self::counter_key(identity, window);
        if let Err(e) = self.store.delete(&key).await {
            warn!("Rate limit reset failed for {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter() -> (RateLimiter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (RateLimiter::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_request_n_allowed_n_plus_one_limited() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(limiter.check("user:a", 3, window).await.is_allowed());
        }

        match limiter.check("user:a", 3, window).await {
            RateDecision::Limited {
                limit,
                requests,
                reset_in,
            } => {
                assert_eq!(limit, 3);
                assert_eq!(requests, 4);
                assert!(reset_in <= 60);
            }
            other => panic!("expected Limited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_identities_do_not_share_counters() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);
        assert!(limiter.check("user:a", 1, window).await.is_allowed());
        assert!(limiter.check("user:b", 1, window).await.is_allowed());
        assert!(!limiter.check("user:a", 1, window).await.is_allowed());
    }

    #[tokio::test]
    async fn test_unlimited_sentinel_never_limits() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);
        for _ in 0..100 {
            assert!(limiter.check("user:vip", UNLIMITED, window).await.is_allowed());
        }
    }

    #[tokio::test]
    async fn test_counter_reset_via_expiry() {
        let (limiter, store) = limiter();
        let window = Duration::from_secs(60);
        assert!(limiter.check("user:a", 1, window).await.is_allowed());
        assert!(!limiter.check("user:a", 1, window).await.is_allowed());

        store.expire_now("rate_limit:user:a:60").await;
        assert!(limiter.check("user:a", 1, window).await.is_allowed());
    }

    #[tokio::test]
    async fn test_tier_quotas() {
        let (limiter, _) = limiter();

        // Free tier: 10 analyses per day.
        for _ in 0..10 {
            assert!(limiter
                .check_tier("user:a", "free", QuotaAction::AnalysisPerDay)
                .await
                .is_allowed());
        }
        assert!(!limiter
            .check_tier("user:a", "free", QuotaAction::AnalysisPerDay)
            .await
            .is_allowed());

        // Enterprise is unlimited.
        for _ in 0..50 {
            assert!(limiter
                .check_tier("user:e", "enterprise", QuotaAction::AnalysisPerDay)
                .await
                .is_allowed());
        }
    }

    #[tokio::test]
    async fn test_unknown_tier_falls_back_to_free() {
        let (limiter, _) = limiter();
        for _ in 0..20 {
            limiter
                .check_tier("user:x", "mystery", QuotaAction::ChatPerHour)
                .await;
        }
        assert!(!limiter
            .check_tier("user:x", "mystery", QuotaAction::ChatPerHour)
            .await
            .is_allowed());
    }
}
