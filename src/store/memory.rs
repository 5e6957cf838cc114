use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::keys::Window;
use crate::limiter::{reason, Decision, RateLimits, Tier};

/// Count within one fixed window, reset lazily on read.
#[derive(Debug, Clone, Copy)]
struct WindowCount {
    count: u64,
    reset_at: u64,
}

impl WindowCount {
    fn fresh(now_ms: u64, window: Window) -> Self {
        Self {
            count: 0,
            reset_at: now_ms + window.millis(),
        }
    }

    fn roll(&mut self, now_ms: u64, window: Window) {
        if now_ms > self.reset_at {
            *self = Self::fresh(now_ms, window);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CallerRecord {
    hour: WindowCount,
    day: WindowCount,
}

#[derive(Debug)]
struct LedgerState {
    callers: HashMap<String, CallerRecord>,
    global: WindowCount,
}

/// Process-local fallback for the durable counter store.
///
/// Keeps one record per caller and one global record. State lives only as
/// long as the process, so it resets on every fresh instance and is not
/// shared across instances.
#[derive(Debug)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Create a ledger whose global day window starts at `now_ms`.
    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                callers: HashMap::new(),
                global: WindowCount::fresh(now_ms, Window::Day),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evaluate one request. Every tier is check-then-increment: a denied
    /// request consumes nothing.
    pub fn check(&self, identity: &str, limits: &RateLimits, now_ms: u64) -> Decision {
        let mut state = self.lock();

        state.global.roll(now_ms, Window::Day);
        if state.global.count >= limits.global_per_day {
            return Decision::denied(Tier::Global, reason::GLOBAL);
        }

        let record = state
            .callers
            .entry(identity.to_string())
            .or_insert_with(|| CallerRecord {
                hour: WindowCount::fresh(now_ms, Window::Hour),
                day: WindowCount::fresh(now_ms, Window::Day),
            });
        record.hour.roll(now_ms, Window::Hour);
        record.day.roll(now_ms, Window::Day);

        if record.hour.count >= limits.per_hour {
            let wait_minutes = (record.hour.reset_at - now_ms).div_ceil(60_000);
            return Decision::denied(Tier::Hourly, &reason::hourly_wait(wait_minutes));
        }

        if record.day.count >= limits.per_day {
            return Decision::denied(Tier::Daily, reason::DAILY);
        }

        record.hour.count += 1;
        record.day.count += 1;
        let day_count = record.day.count;
        state.global.count += 1;

        Decision::Allowed {
            remaining: limits.per_day.saturating_sub(day_count),
        }
    }

    /// Drop caller records whose windows have all elapsed. Equivalent to the
    /// lazy reset they would get on their next request.
    pub fn prune(&self, now_ms: u64) -> usize {
        let mut state = self.lock();
        let before = state.callers.len();
        state
            .callers
            .retain(|_, record| now_ms <= record.hour.reset_at || now_ms <= record.day.reset_at);
        before - state.callers.len()
    }

    pub fn tracked_callers(&self) -> usize {
        self.lock().callers.len()
    }

    pub fn global_count(&self) -> u64 {
        self.lock().global.count
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::starting_at(crate::limiter::now_ms())
    }
}
