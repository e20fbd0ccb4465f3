//! IP geolocation provider backed by ipinfo.io.

use crate::http::{ApiAuth, HttpClient};
use crate::secure_string::SecureString;
use async_trait::async_trait;
use osprey_core::error::FetchError;
use osprey_core::provider::{Provider, RateLimitSpec};
use osprey_core::record::{TargetType, UnifiedRecord};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Environment key holding the API token.
pub const IPINFO_TOKEN: &str = "IPINFO_TOKEN";

const BASE_URL: &str = "https://ipinfo.io";

/// IP geolocation and network locality provider.
pub struct IpInfoProvider {
    client: HttpClient,
    has_key: bool,
}

impl IpInfoProvider {
    pub fn from_env() -> Result<Self, FetchError> {
        Self::with_key(std::env::var(IPINFO_TOKEN).ok().map(SecureString::from))
    }

    pub fn with_key(key: Option<SecureString>) -> Result<Self, FetchError> {
        let has_key = key.is_some();
        let auth = match key {
            Some(key) => ApiAuth::Bearer(key),
            None => ApiAuth::None,
        };
        Ok(Self {
            client: HttpClient::new(BASE_URL, auth)?,
            has_key,
        })
    }
}

#[async_trait]
impl Provider for IpInfoProvider {
    fn name(&self) -> &str {
        "ipinfo"
    }

    fn supports(&self, kind: TargetType) -> bool {
        kind == TargetType::Ip
    }

    fn required_credentials(&self) -> Vec<&'static str> {
        vec![IPINFO_TOKEN]
    }

    fn missing_credentials(&self) -> Vec<String> {
        if self.has_key {
            Vec::new()
        } else {
            vec![IPINFO_TOKEN.to_string()]
        }
    }

    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec::per_second(10.0, 20.0)
    }

    async fn fetch(
        &self,
        target: &str,
        _kind: TargetType,
        deadline: Duration,
    ) -> Result<Value, FetchError> {
        self.client
            .get_json(&format!("/{}/json", target), &[], deadline)
            .await
    }

    fn normalize(
        &self,
        raw: &Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError> {
        let mut record = UnifiedRecord::empty(self.name(), target, kind);

        let response: IpInfoResponse = serde_json::from_value(raw.clone()).unwrap_or_default();

        // Paid plans return a structured asn object; the free tier folds
        // "AS<number> <name>" into `org`.
        if let Some(asn) = &response.asn {
            record.network.asn = asn.asn.clone();
            record.network.asn_name = asn.name.clone();
        } else if let Some((asn, name)) = response.org.as_deref().and_then(split_org) {
            record.network.asn = Some(asn);
            record.network.asn_name = Some(name);
        }

        record.network.isp = response.org.clone();
        record.network.city = response.city;
        record.network.region = response.region;
        record.network.country = response.country;

        record.raw.insert(self.name().to_string(), raw.clone());
        Ok(record)
    }
}

/// Splits an `"AS15169 Google LLC"` org string into ASN and name.
fn split_org(org: &str) -> Option<(String, String)> {
    let (asn, name) = org.split_once(' ')?;
    if asn.starts_with("AS") && asn[2..].chars().all(|c| c.is_ascii_digit()) && !name.is_empty() {
        Some((asn.to_string(), name.to_string()))
    } else {
        None
    }
}

#[derive(Debug, Default, Deserialize)]
struct IpInfoResponse {
    org: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    asn: Option<AsnBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct AsnBlock {
    asn: Option<String>,
    name: Option<String>,
}
