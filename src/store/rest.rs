use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::CounterStore;
use crate::error::StoreError;

/// Client for a Redis REST endpoint (Upstash wire format).
///
/// Every command is a single HTTP request of the form
/// `{endpoint}/{command}/{args...}` authenticated with a bearer token. Replies
/// are `{"result": ...}` on success or `{"error": "..."}` on failure.
#[derive(Clone)]
pub struct RestStore {
    endpoint: String,
    token: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestStore {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn command(&self, method: reqwest::Method, path: &str) -> Result<Option<Value>, StoreError> {
        let url = format!("{}/{}", self.endpoint, path);
        let response = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        if let Some(error) = reply.error {
            return Err(StoreError::Remote(error));
        }

        Ok(reply.result.filter(|v| !v.is_null()))
    }
}

/// Redis replies with integers for INCR but with strings for GET.
fn as_integer(value: &Value) -> Result<i64, StoreError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| StoreError::Malformed(format!("non-integer counter {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| StoreError::Malformed(format!("non-integer counter '{}'", s))),
        other => Err(StoreError::Malformed(format!("unexpected result {}", other))),
    }
}

#[async_trait]
impl CounterStore for RestStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.command(reqwest::Method::GET, &format!("get/{}", key))
            .await?
            .as_ref()
            .map(as_integer)
            .transpose()
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let result = self
            .command(reqwest::Method::POST, &format!("incr/{}", key))
            .await?
            .ok_or_else(|| StoreError::Malformed("INCR returned no result".to_string()))?;
        as_integer(&result)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        self.command(reqwest::Method::POST, &format!("expire/{}/{}", key, seconds))
            .await
            .map(|_| ())
    }
}
