//! Threat intelligence provider backed by VirusTotal API v3.

use crate::http::{ApiAuth, HttpClient};
use crate::secure_string::SecureString;
use crate::util::{from_epoch, parse_timestamp};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use osprey_core::error::FetchError;
use osprey_core::provider::{Provider, RateLimitSpec};
use osprey_core::record::{
    is_malicious_score, score_from_counts, TargetType, UnifiedRecord, WhoisData,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Environment key holding the API credential.
pub const VT_API_KEY: &str = "VT_API_KEY";

const BASE_URL: &str = "https://www.virustotal.com";

/// VirusTotal threat intelligence provider.
pub struct VirusTotalProvider {
    client: HttpClient,
    has_key: bool,
}

impl VirusTotalProvider {
    pub fn from_env() -> Result<Self, FetchError> {
        Self::with_key(std::env::var(VT_API_KEY).ok().map(SecureString::from))
    }

    pub fn with_key(key: Option<SecureString>) -> Result<Self, FetchError> {
        let has_key = key.is_some();
        let auth = match key {
            Some(key) => ApiAuth::Header {
                header: "x-apikey",
                key,
            },
            None => ApiAuth::None,
        };
        Ok(Self {
            client: HttpClient::new(BASE_URL, auth)?,
            has_key,
        })
    }
}

#[async_trait]
impl Provider for VirusTotalProvider {
    fn name(&self) -> &str {
        "virustotal"
    }

    fn supports(&self, kind: TargetType) -> bool {
        matches!(kind, TargetType::Domain | TargetType::Ip | TargetType::Url)
    }

    fn required_credentials(&self) -> Vec<&'static str> {
        vec![VT_API_KEY]
    }

    fn missing_credentials(&self) -> Vec<String> {
        if self.has_key {
            Vec::new()
        } else {
            vec![VT_API_KEY.to_string()]
        }
    }

    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec::per_minute(600.0, 20.0)
    }

    fn cache_ttl(&self) -> Option<Duration> {
        // analysis verdicts move faster than registration data
        Some(Duration::from_secs(3600))
    }

    async fn fetch(
        &self,
        target: &str,
        kind: TargetType,
        deadline: Duration,
    ) -> Result<Value, FetchError> {
        let path = match kind {
            TargetType::Domain => format!("/api/v3/domains/{}", target.to_lowercase()),
            TargetType::Ip => format!("/api/v3/ip_addresses/{}", target),
            // URL lookups use the URL-safe unpadded base64 of the URL
            TargetType::Url => format!("/api/v3/urls/{}", URL_SAFE_NO_PAD.encode(target)),
            TargetType::Email => {
                return Err(FetchError::permanent("email targets are not supported"));
            }
        };
        self.client.get_json(&path, &[], deadline).await
    }

    fn normalize(
        &self,
        raw: &Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError> {
        let mut record = UnifiedRecord::empty(self.name(), target, kind);

        let response: VtResponse = serde_json::from_value(raw.clone()).unwrap_or_default();
        let attributes = response.data.unwrap_or_default().attributes.unwrap_or_default();

        if let Some(stats) = &attributes.last_analysis_stats {
            let total = stats.malicious
                + stats.suspicious
                + stats.clean
                + stats.harmless
                + stats.undetected;
            let score = score_from_counts(stats.malicious, stats.suspicious, total);
            record.risk.score = Some(score);
            record.risk.malicious = is_malicious_score(score) || stats.malicious > 0;
        }

        if let Some(categories) = &attributes.categories {
            record.risk.categories.extend(categories.values().cloned());
        }
        if let Some(tags) = &attributes.tags {
            record.risk.categories.extend(tags.iter().cloned());
        }

        if let Some(asn) = attributes.asn {
            record.network.asn = Some(format!("AS{}", asn));
            record.network.asn_name = attributes.as_owner.clone();
        }
        record.network.country = attributes.country.clone();

        for entry in attributes.last_dns_records.iter().flatten() {
            let value = entry.value.as_deref().unwrap_or("");
            if value.is_empty() {
                continue;
            }
            match entry.record_type.as_deref() {
                Some("A") | Some("AAAA") => {
                    record.resolved.ip.insert(value);
                }
                Some("MX") => {
                    let encoded = match entry.priority {
                        Some(priority) => format!("{} {}", priority, value),
                        None => value.to_string(),
                    };
                    record.resolved.mx.insert(encoded);
                }
                Some("NS") => {
                    record.resolved.ns.insert(value);
                }
                Some("TXT") => {
                    record.resolved.txt.insert(value);
                }
                _ => {}
            }
        }

        if let Some(text) = &attributes.whois {
            record.whois = parse_whois_text(text);
        }
        if let Some(registrar) = attributes.registrar {
            record.whois.registrar = Some(registrar);
        }
        // Structured dates beat whatever the whois text yielded.
        if let Some(created) = attributes.creation_date.and_then(from_epoch) {
            record.whois.created = Some(created);
        }
        if let Some(updated) = attributes.last_modification_date.and_then(from_epoch) {
            record.whois.updated = Some(updated);
        }

        record.raw.insert(self.name().to_string(), raw.clone());
        Ok(record)
    }
}

/// Parses the free-text whois blob VirusTotal attaches to domain reports.
fn parse_whois_text(text: &str) -> WhoisData {
    let mut whois = WhoisData::default();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        if key.contains("registrar") && !key.contains("abuse") && whois.registrar.is_none() {
            whois.registrar = Some(value.to_string());
        } else if (key.contains("organization") || key == "org") && whois.org.is_none() {
            whois.org = Some(value.to_string());
        } else if key.contains("country") && whois.country.is_none() {
            whois.country = Some(value.to_uppercase());
        } else if key.contains("email") && value.contains('@') {
            whois.emails.insert(value.to_lowercase());
        } else if (key.contains("creation date") || key.contains("created"))
            && whois.created.is_none()
        {
            whois.created = parse_timestamp(value);
        } else if (key.contains("updated date") || key.contains("modified"))
            && whois.updated.is_none()
        {
            whois.updated = parse_timestamp(value);
        } else if key.contains("expir") && whois.expires.is_none() {
            whois.expires = parse_timestamp(value);
        }
    }

    whois
}

// VirusTotal API v3 response shapes, everything optional.

#[derive(Debug, Default, Deserialize)]
struct VtResponse {
    data: Option<VtData>,
}

#[derive(Debug, Default, Deserialize)]
struct VtData {
    attributes: Option<VtAttributes>,
}

#[derive(Debug, Default, Deserialize)]
struct VtAttributes {
    last_analysis_stats: Option<VtAnalysisStats>,
    categories: Option<HashMap<String, String>>,
    tags: Option<Vec<String>>,
    last_dns_records: Option<Vec<VtDnsRecord>>,
    whois: Option<String>,
    registrar: Option<String>,
    creation_date: Option<i64>,
    last_modification_date: Option<i64>,
    asn: Option<u32>,
    as_owner: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VtAnalysisStats {
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
    #[serde(default)]
    clean: u32,
    #[serde(default)]
    harmless: u32,
    #[serde(default)]
    undetected: u32,
}

#[derive(Debug, Default, Deserialize)]
struct VtDnsRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    value: Option<String>,
    priority: Option<u32>,
}
