pub mod analysis;
pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod keys;
pub mod limiter;
pub mod middleware;
pub mod response;
pub mod server;
pub mod store;
pub mod validation;

pub use config::Config;
pub use error::{ProxyError, Result, StoreError};
pub use limiter::{Decision, RateLimiter, RateLimits, Tier};
pub use server::create_app;
