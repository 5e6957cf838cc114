//! Counter key generation for the fixed hour/day windows.

use std::fmt;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Fixed counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Hour,
    Day,
}

impl Window {
    pub fn millis(&self) -> u64 {
        match self {
            Window::Hour => HOUR_MS,
            Window::Day => DAY_MS,
        }
    }

    /// Lifetime given to a durable counter for this window.
    pub fn ttl_secs(&self) -> u64 {
        self.millis() / 1000
    }

    /// Bucket id for `now_ms`. Each window gets a fresh key, so no reset
    /// logic is needed against the durable store.
    pub fn index(&self, now_ms: u64) -> u64 {
        now_ms / self.millis()
    }

    fn label(&self) -> &'static str {
        match self {
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    CallerHour,
    CallerDay,
    GlobalDay,
}

/// A counter in the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKey {
    scope: Scope,
    identity: Option<String>,
    index: u64,
}

impl CounterKey {
    pub fn caller_hour(identity: &str, now_ms: u64) -> Self {
        Self {
            scope: Scope::CallerHour,
            identity: Some(sanitize_identity(identity)),
            index: Window::Hour.index(now_ms),
        }
    }

    pub fn caller_day(identity: &str, now_ms: u64) -> Self {
        Self {
            scope: Scope::CallerDay,
            identity: Some(sanitize_identity(identity)),
            index: Window::Day.index(now_ms),
        }
    }

    pub fn global_day(now_ms: u64) -> Self {
        Self {
            scope: Scope::GlobalDay,
            identity: None,
            index: Window::Day.index(now_ms),
        }
    }

    pub fn window(&self) -> Window {
        match self.scope {
            Scope::CallerHour => Window::Hour,
            Scope::CallerDay | Scope::GlobalDay => Window::Day,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Some(identity) => write!(
                f,
                "rl:{}:{}:{}",
                identity,
                self.window().label(),
                self.index
            ),
            None => write!(f, "rl:global:{}", self.index),
        }
    }
}

/// Restrict an identity to characters that are safe inside a key and a URL
/// path segment.
///
/// The mapping is lossy: forged identities that differ only in replaced
/// characters (`a/b` and `a_b`) share one bucket.
pub fn sanitize_identity(identity: &str) -> String {
    identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
