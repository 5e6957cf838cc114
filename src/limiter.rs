use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::timeout;

use crate::config::Config;
use crate::error::StoreError;
use crate::keys::CounterKey;
use crate::store::{Backend, BackendKind, CounterStore, MemoryLedger, RestStore};

/// Deny reasons shown to callers, one per tier.
pub mod reason {
    pub const GLOBAL: &str = "Daily global limit reached. Try again tomorrow.";
    pub const HOURLY: &str = "Hourly limit reached. Try again in about an hour.";
    pub const DAILY: &str = "Daily limit reached. Try again tomorrow.";

    pub fn hourly_wait(minutes: u64) -> String {
        format!("Hourly limit reached. Try again in {} minutes.", minutes)
    }
}

/// Request thresholds per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimits {
    pub per_hour: u64,
    pub per_day: u64,
    pub global_per_day: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_hour: 5,
            per_day: 15,
            global_per_day: 500,
        }
    }
}

/// Threshold that denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Global,
    Hourly,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u64 },
    Denied { tier: Tier, reason: String },
}

impl Decision {
    pub fn denied(tier: Tier, reason: &str) -> Self {
        Decision::Denied {
            tier,
            reason: reason.to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Requests left for the caller today; always 0 once denied.
    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Allowed { remaining } => *remaining,
            Decision::Denied { .. } => 0,
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Denied { tier, .. } => Some(*tier),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Denied { reason, .. } => Some(reason),
        }
    }
}

/// A decision together with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub backend: BackendKind,
}

/// Hour/day/global request limiter.
///
/// Uses the durable store when one is configured and falls back to the
/// in-memory ledger for any single evaluation where the durable store fails
/// or times out. The two backends keep independent counts.
#[derive(Clone)]
pub struct RateLimiter {
    limits: RateLimits,
    durable: Option<Arc<dyn CounterStore>>,
    memory: Arc<MemoryLedger>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        limits: RateLimits,
        durable: Option<Arc<dyn CounterStore>>,
        memory: Arc<MemoryLedger>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            limits,
            durable,
            memory,
            store_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let durable: Option<Arc<dyn CounterStore>> = match config.backend() {
            Backend::Durable { endpoint, token } => {
                tracing::info!(endpoint = %endpoint, "Using durable rate limit store");
                Some(Arc::new(RestStore::new(
                    &endpoint,
                    &token,
                    config.store_timeout(),
                )?))
            }
            Backend::InMemory => {
                tracing::info!("Durable store not configured, using in-memory rate limiting");
                None
            }
        };

        Ok(Self::new(
            config.limits(),
            durable,
            Arc::new(MemoryLedger::default()),
            config.store_timeout(),
        ))
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    pub fn memory(&self) -> &Arc<MemoryLedger> {
        &self.memory
    }

    /// Backend tried first for every evaluation.
    pub fn primary_backend(&self) -> BackendKind {
        if self.durable.is_some() {
            BackendKind::Redis
        } else {
            BackendKind::Memory
        }
    }

    pub async fn check(&self, identity: &str) -> Verdict {
        self.check_at(identity, now_ms()).await
    }

    pub async fn check_at(&self, identity: &str, now_ms: u64) -> Verdict {
        if let Some(store) = &self.durable {
            let outcome = match timeout(
                self.store_timeout,
                self.check_durable(store.as_ref(), identity, now_ms),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.store_timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(decision) => {
                    return Verdict {
                        decision,
                        backend: BackendKind::Redis,
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        identity = %identity,
                        error = %err,
                        "Durable store failed, falling back to in-memory limiter"
                    );
                }
            }
        }

        Verdict {
            decision: self.memory.check(identity, &self.limits, now_ms),
            backend: BackendKind::Memory,
        }
    }

    /// Increment-then-check against the durable store. The request that
    /// crosses a threshold is recorded and denied.
    pub async fn check_durable(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        now_ms: u64,
    ) -> Result<Decision, StoreError> {
        let hour_key = CounterKey::caller_hour(identity, now_ms);
        let day_key = CounterKey::caller_day(identity, now_ms);
        let global_key = CounterKey::global_day(now_ms);

        let (hour_name, day_name, global_name) =
            (hour_key.to_string(), day_key.to_string(), global_key.to_string());

        let (hour_count, day_count, global_count) = tokio::try_join!(
            store.increment(&hour_name),
            store.increment(&day_name),
            store.increment(&global_name),
        )?;

        for (key, name, count) in [
            (&hour_key, &hour_name, hour_count),
            (&day_key, &day_name, day_count),
            (&global_key, &global_name, global_count),
        ] {
            if count == 1 {
                store.expire(name, key.window().ttl_secs()).await?;
            }
        }

        let (hour_count, day_count, global_count) = (
            non_negative(hour_count),
            non_negative(day_count),
            non_negative(global_count),
        );

        tracing::debug!(
            identity = %identity,
            hour_count,
            day_count,
            global_count,
            "Durable counters incremented"
        );

        if global_count > self.limits.global_per_day {
            return Ok(Decision::denied(Tier::Global, reason::GLOBAL));
        }
        if hour_count > self.limits.per_hour {
            return Ok(Decision::denied(Tier::Hourly, reason::HOURLY));
        }
        if day_count > self.limits.per_day {
            return Ok(Decision::denied(Tier::Daily, reason::DAILY));
        }

        Ok(Decision::Allowed {
            remaining: self.limits.per_day.saturating_sub(day_count),
        })
    }
}

fn non_negative(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Window;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const HOUR: u64 = 3_600_000;

    #[derive(Default)]
    struct FakeStore {
        counters: Mutex<HashMap<String, i64>>,
        expiries: Mutex<Vec<(String, u64)>>,
        down: AtomicBool,
        hang: AtomicBool,
    }

    impl FakeStore {
        fn count(&self, key: &str) -> i64 {
            self.counters.lock().unwrap().get(key).copied().unwrap_or(0)
        }

        fn check_up(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Status {
                    status: 503,
                    body: "unavailable".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CounterStore for FakeStore {
        async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
            self.check_up()?;
            Ok(self.counters.lock().unwrap().get(key).copied())
        }

        async fn increment(&self, key: &str) -> Result<i64, StoreError> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.check_up()?;
            let mut counters = self.counters.lock().unwrap();
            let count = counters.entry(key.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
            self.check_up()?;
            self.expiries.lock().unwrap().push((key.to_string(), seconds));
            Ok(())
        }
    }

    fn durable_limiter(store: Arc<FakeStore>, limits: RateLimits) -> RateLimiter {
        RateLimiter::new(
            limits,
            Some(store as Arc<dyn CounterStore>),
            Arc::new(MemoryLedger::starting_at(0)),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_durable_scenario_hour_limit() {
        let store = Arc::new(FakeStore::default());
        let limiter = durable_limiter(store.clone(), RateLimits::default());

        let mut remaining = Vec::new();
        for i in 0..5 {
            let verdict = limiter.check_at("A", 1_000 + i).await;
            assert_eq!(verdict.backend, BackendKind::Redis);
            remaining.push(verdict.decision.remaining());
        }
        assert_eq!(remaining, vec![14, 13, 12, 11, 10]);

        let sixth = limiter.check_at("A", 2_000).await;
        assert_eq!(sixth.decision.tier(), Some(Tier::Hourly));
        assert_eq!(sixth.decision.reason(), Some(reason::HOURLY));

        assert!(limiter.check_at("B", 2_000).await.decision.is_allowed());

        // Increment-then-check: the denied request was still recorded.
        assert_eq!(store.count(&CounterKey::caller_hour("A", 0).to_string()), 6);
    }

    #[tokio::test]
    async fn test_expiry_set_only_on_first_increment() {
        let store = Arc::new(FakeStore::default());
        let limiter = durable_limiter(store.clone(), RateLimits::default());

        limiter.check_at("A", 0).await;
        limiter.check_at("A", 0).await;

        let expiries = store.expiries.lock().unwrap().clone();
        assert_eq!(
            expiries.iter().map(|(_, ttl)| *ttl).collect::<Vec<_>>(),
            vec![Window::Hour.ttl_secs(), Window::Day.ttl_secs(), Window::Day.ttl_secs()]
        );
        assert!(expiries.iter().any(|(key, _)| key == "rl:global:0"));
    }

    #[tokio::test]
    async fn test_global_reason_takes_precedence() {
        let store = Arc::new(FakeStore::default());
        let limits = RateLimits {
            per_hour: 1,
            per_day: 15,
            global_per_day: 1,
        };
        let limiter = durable_limiter(store, limits);

        assert!(limiter.check_at("A", 0).await.decision.is_allowed());
        let verdict = limiter.check_at("A", 0).await;
        assert_eq!(verdict.decision.tier(), Some(Tier::Global));
        assert_eq!(verdict.decision.reason(), Some(reason::GLOBAL));
    }

    #[tokio::test]
    async fn test_daily_limit_and_remaining_reaches_zero() {
        let store = Arc::new(FakeStore::default());
        let limiter = durable_limiter(store, RateLimits::default());

        let mut last = u64::MAX;
        for i in 0..15u64 {
            // Spread over separate hour buckets within one day.
            let decision = limiter.check_at("A", (i / 5) * HOUR).await.decision;
            assert!(decision.is_allowed());
            assert!(decision.remaining() <= last);
            last = decision.remaining();
        }
        assert_eq!(last, 0);

        let decision = limiter.check_at("A", 4 * HOUR).await.decision;
        assert_eq!(decision.tier(), Some(Tier::Daily));
        assert_eq!(decision.reason(), Some(reason::DAILY));
    }

    #[tokio::test]
    async fn test_fallback_is_per_call_and_keeps_durable_counts() {
        let store = Arc::new(FakeStore::default());
        let limiter = durable_limiter(store.clone(), RateLimits::default());

        limiter.check_at("A", 0).await;
        limiter.check_at("A", 0).await;

        store.down.store(true, Ordering::SeqCst);
        let verdict = limiter.check_at("A", 0).await;
        assert_eq!(verdict.backend, BackendKind::Memory);
        assert_eq!(verdict.decision, Decision::Allowed { remaining: 14 });

        store.down.store(false, Ordering::SeqCst);
        let verdict = limiter.check_at("A", 0).await;
        assert_eq!(verdict.backend, BackendKind::Redis);
        assert_eq!(verdict.decision, Decision::Allowed { remaining: 12 });
    }

    #[tokio::test]
    async fn test_hung_store_times_out_to_memory() {
        let store = Arc::new(FakeStore::default());
        store.hang.store(true, Ordering::SeqCst);
        let limiter = durable_limiter(store, RateLimits::default());

        let verdict = limiter.check_at("A", 0).await;
        assert_eq!(verdict.backend, BackendKind::Memory);
        assert!(verdict.decision.is_allowed());
    }

    #[tokio::test]
    async fn test_in_memory_only_limiter() {
        let limiter = RateLimiter::new(
            RateLimits::default(),
            None,
            Arc::new(MemoryLedger::starting_at(0)),
            Duration::from_secs(1),
        );
        assert_eq!(limiter.primary_backend(), BackendKind::Memory);

        let verdict = limiter.check_at("A", 0).await;
        assert_eq!(verdict.backend, BackendKind::Memory);
        assert_eq!(verdict.decision.remaining(), 14);
    }
}
