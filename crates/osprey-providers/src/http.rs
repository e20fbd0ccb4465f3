//! Shared HTTP plumbing for provider adapters.
//!
//! One attempt per call: the engine's retry policy owns attempts, the
//! adapter owns request construction, authentication, the per-attempt
//! deadline, and mapping responses onto the transient/permanent failure
//! classes.

use crate::secure_string::SecureString;
use osprey_core::error::FetchError;
use reqwest::header::HeaderValue;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// How a provider authenticates its requests.
pub enum ApiAuth {
    None,
    /// API key in a request header.
    Header {
        header: &'static str,
        key: SecureString,
    },
    /// `Authorization: Bearer` token.
    Bearer(SecureString),
    /// API key as a query parameter.
    Query {
        param: &'static str,
        key: SecureString,
    },
}

/// A pooled JSON API client bound to one base URL.
pub struct HttpClient {
    client: Client,
    base_url: String,
    auth: ApiAuth,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, auth: ApiAuth) -> Result<Self, FetchError> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("osprey/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::permanent(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            auth,
        })
    }

    pub fn build_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Executes one GET and decodes the JSON body.
    ///
    /// A JSON decode failure on a 2xx response is permanent; network
    /// failures and 408/429/5xx are transient, with `Retry-After`
    /// surfaced on 429.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        deadline: Duration,
    ) -> Result<Value, FetchError> {
        let mut request = self.client.get(self.build_url(path)).timeout(deadline);
        if !query.is_empty() {
            request = request.query(query);
        }
        request = match &self.auth {
            ApiAuth::None => request,
            ApiAuth::Header { header, key } => request.header(*header, key.expose_secret()),
            ApiAuth::Bearer(key) => request.bearer_auth(key.expose_secret()),
            ApiAuth::Query { param, key } => request.query(&[(*param, key.expose_secret())]),
        };

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            return Err(
                FetchError::from_status(429, "rate limited by provider")
                    .with_retry_after(retry_after),
            );
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(
                status.as_u16(),
                format!("HTTP {}: {}", status, truncate(&body, 200)),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::transient(format!("failed to read response body: {}", e)))?;
        serde_json::from_str(&text).map_err(|e| {
            FetchError::permanent(format!(
                "undecodable response body: {} - {}",
                e,
                truncate(&text, 200)
            ))
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::transient(format!("request timed out: {}", e))
    } else if e.is_connect() {
        FetchError::transient(format!("connection failed: {}", e))
    } else {
        FetchError::transient(format!("request failed: {}", e))
    }
}

fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
