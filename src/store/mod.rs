//! Counter storage backends for the rate limiter.
//!
//! The durable backend talks to a Redis-compatible REST endpoint and is safe
//! to share between independent instances. The in-memory ledger only guards
//! callers within one process and is used when no durable store is
//! configured, or for a single evaluation when the durable store fails.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::error::StoreError;

pub use memory::MemoryLedger;
pub use rest::RestStore;

/// Atomic counter operations the limiter needs from a durable store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a counter without modifying it.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Increment a counter by one, creating it at 1, and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Bound the lifetime of a counter.
    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError>;
}

/// Counter backend selected from configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Durable { endpoint: String, token: String },
    InMemory,
}

/// Which backend produced a limiter decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Redis,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
