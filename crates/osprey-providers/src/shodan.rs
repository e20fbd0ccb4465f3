//! Port/service exposure provider backed by the Shodan host API.

use crate::http::{ApiAuth, HttpClient};
use crate::secure_string::SecureString;
use async_trait::async_trait;
use osprey_core::error::FetchError;
use osprey_core::provider::{Provider, RateLimitSpec};
use osprey_core::record::{TargetType, UnifiedRecord};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Environment key holding the API credential.
pub const SHODAN_API_KEY: &str = "SHODAN_API_KEY";

const BASE_URL: &str = "https://api.shodan.io";

/// Shodan host lookup provider.
pub struct ShodanProvider {
    client: HttpClient,
    has_key: bool,
}

impl ShodanProvider {
    pub fn from_env() -> Result<Self, FetchError> {
        Self::with_key(std::env::var(SHODAN_API_KEY).ok().map(SecureString::from))
    }

    pub fn with_key(key: Option<SecureString>) -> Result<Self, FetchError> {
        let has_key = key.is_some();
        let auth = match key {
            Some(key) => ApiAuth::Query { param: "key", key },
            None => ApiAuth::None,
        };
        Ok(Self {
            client: HttpClient::new(BASE_URL, auth)?,
            has_key,
        })
    }
}

#[async_trait]
impl Provider for ShodanProvider {
    fn name(&self) -> &str {
        "shodan"
    }

    fn supports(&self, kind: TargetType) -> bool {
        kind == TargetType::Ip
    }

    fn required_credentials(&self) -> Vec<&'static str> {
        vec![SHODAN_API_KEY]
    }

    fn missing_credentials(&self) -> Vec<String> {
        if self.has_key {
            Vec::new()
        } else {
            vec![SHODAN_API_KEY.to_string()]
        }
    }

    fn rate_limit(&self) -> RateLimitSpec {
        // Shodan tolerates roughly one query per second
        RateLimitSpec::per_second(1.0, 1.0)
    }

    async fn fetch(
        &self,
        target: &str,
        _kind: TargetType,
        deadline: Duration,
    ) -> Result<Value, FetchError> {
        self.client
            .get_json(&format!("/shodan/host/{}", target), &[], deadline)
            .await
    }

    fn normalize(
        &self,
        raw: &Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError> {
        let mut record = UnifiedRecord::empty(self.name(), target, kind);

        let response: ShodanHost = serde_json::from_value(raw.clone()).unwrap_or_default();

        record.network.asn = response.asn;
        record.network.asn_name = response.org.clone();
        record.network.isp = response.isp.or(response.org);
        record.network.city = response.city;
        record.network.region = response.region_code;
        record.network.country = response.country_code;

        if let Some(tags) = response.tags {
            record.risk.categories.extend(tags);
        }
        // Known vulnerabilities flag the host; the CVE list itself stays
        // in the raw payload.
        if response.vulns.map(|v| !v.is_empty()).unwrap_or(false) {
            record.risk.categories.insert("known-vulnerabilities");
        }

        record.raw.insert(self.name().to_string(), raw.clone());
        Ok(record)
    }
}

// Shodan host report shape; ports, banners and vulns stay in `raw`.

#[derive(Debug, Default, Deserialize)]
struct ShodanHost {
    asn: Option<String>,
    org: Option<String>,
    isp: Option<String>,
    city: Option<String>,
    region_code: Option<String>,
    country_code: Option<String>,
    tags: Option<Vec<String>>,
    vulns: Option<Vec<String>>,
}
