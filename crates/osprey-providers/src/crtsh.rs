//! Certificate transparency provider backed by crt.sh.
//!
//! The unified schema has no certificate family, so the certificate list
//! is preserved in the raw payload; the only fields mined out of it are
//! email addresses that appear among the subject alternative names.

use crate::http::{ApiAuth, HttpClient};
use async_trait::async_trait;
use osprey_core::error::FetchError;
use osprey_core::provider::{Provider, RateLimitSpec};
use osprey_core::record::{TargetType, UnifiedRecord};
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://crt.sh";

/// Certificate transparency log provider. No credentials required.
pub struct CrtShProvider {
    client: HttpClient,
}

impl CrtShProvider {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            client: HttpClient::new(BASE_URL, ApiAuth::None)?,
        })
    }
}

#[async_trait]
impl Provider for CrtShProvider {
    fn name(&self) -> &str {
        "crtsh"
    }

    fn supports(&self, kind: TargetType) -> bool {
        kind == TargetType::Domain
    }

    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec::per_minute(120.0, 10.0)
    }

    async fn fetch(
        &self,
        target: &str,
        _kind: TargetType,
        deadline: Duration,
    ) -> Result<Value, FetchError> {
        self.client
            .get_json("/", &[("q", target), ("output", "json")], deadline)
            .await
    }

    fn normalize(
        &self,
        raw: &Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError> {
        let mut record = UnifiedRecord::empty(self.name(), target, kind);

        for cert in raw.as_array().into_iter().flatten() {
            let Some(names) = cert.get("name_value").and_then(Value::as_str) else {
                continue;
            };
            for name in names.lines() {
                let name = name.trim();
                if name.contains('@') {
                    record.whois.emails.insert(name.to_lowercase());
                }
            }
        }

        record.raw.insert(self.name().to_string(), raw.clone());
        Ok(record)
    }
}
