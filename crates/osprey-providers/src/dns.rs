//! Passive DNS provider backed by a DNS-over-HTTPS resolver.
//!
//! Queries A, AAAA, MX, NS and TXT in one fetch and assembles the answers
//! into a single payload keyed by record type. No credentials required.

use crate::http::{ApiAuth, HttpClient};
use crate::util::{strip_quotes, strip_trailing_dot};
use async_trait::async_trait;
use osprey_core::error::FetchError;
use osprey_core::provider::{Provider, RateLimitSpec};
use osprey_core::record::{TargetType, UnifiedRecord};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

const RESOLVER_URL: &str = "https://dns.google";
const RECORD_TYPES: [&str; 5] = ["A", "AAAA", "MX", "NS", "TXT"];

// RR type codes as they appear in DoH answers.
const TYPE_A: u64 = 1;
const TYPE_NS: u64 = 2;
const TYPE_MX: u64 = 15;
const TYPE_TXT: u64 = 16;
const TYPE_AAAA: u64 = 28;

/// DNS resolution provider.
pub struct DnsProvider {
    client: HttpClient,
}

impl DnsProvider {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            client: HttpClient::new(RESOLVER_URL, ApiAuth::None)?,
        })
    }
}

#[async_trait]
impl Provider for DnsProvider {
    fn name(&self) -> &str {
        "dns"
    }

    fn supports(&self, kind: TargetType) -> bool {
        kind == TargetType::Domain
    }

    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec::per_second(5.0, 10.0)
    }

    async fn fetch(
        &self,
        target: &str,
        _kind: TargetType,
        deadline: Duration,
    ) -> Result<Value, FetchError> {
        let mut payload = Map::new();
        for rrtype in RECORD_TYPES {
            let response = self
                .client
                .get_json("/resolve", &[("name", target), ("type", rrtype)], deadline)
                .await?;
            payload.insert(rrtype.to_string(), response);
        }
        debug!(scan_target = %target, "resolved {} record types", RECORD_TYPES.len());
        Ok(Value::Object(payload))
    }

    fn normalize(
        &self,
        raw: &Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError> {
        let mut record = UnifiedRecord::empty(self.name(), target, kind);

        for (rrtype, type_code) in [
            ("A", TYPE_A),
            ("AAAA", TYPE_AAAA),
            ("MX", TYPE_MX),
            ("NS", TYPE_NS),
            ("TXT", TYPE_TXT),
        ] {
            for answer in answers(raw, rrtype, type_code) {
                match type_code {
                    TYPE_A | TYPE_AAAA => {
                        record.resolved.ip.insert(answer);
                    }
                    TYPE_MX => {
                        record.resolved.mx.insert(format_mx(&answer));
                    }
                    TYPE_NS => {
                        record.resolved.ns.insert(strip_trailing_dot(&answer));
                    }
                    TYPE_TXT => {
                        record.resolved.txt.insert(strip_quotes(&answer));
                    }
                    _ => {}
                }
            }
        }

        record.raw.insert(self.name().to_string(), raw.clone());
        Ok(record)
    }
}

/// Extracts answer data strings of the expected RR type, skipping CNAME
/// chain entries the resolver interleaves.
fn answers(raw: &Value, rrtype: &str, type_code: u64) -> Vec<String> {
    raw.get(rrtype)
        .and_then(|section| section.get("Answer"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|e| e.get("type").and_then(Value::as_u64) == Some(type_code))
                .filter_map(|e| e.get("data").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Normalizes an MX answer to `"<priority> <host>"` without the trailing
/// dot on the exchange host.
fn format_mx(data: &str) -> String {
    match data.split_once(' ') {
        Some((priority, host)) => format!("{} {}", priority, strip_trailing_dot(host)),
        None => data.to_string(),
    }
}
