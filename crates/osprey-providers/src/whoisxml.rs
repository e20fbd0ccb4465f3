//! WHOIS provider backed by the WhoisXML API.

use crate::http::{ApiAuth, HttpClient};
use crate::secure_string::SecureString;
use crate::util::parse_timestamp;
use async_trait::async_trait;
use osprey_core::error::FetchError;
use osprey_core::provider::{Provider, RateLimitSpec};
use osprey_core::record::{TargetType, UnifiedRecord};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Environment key holding the API credential.
pub const WHOISXML_API_KEY: &str = "WHOISXML_API_KEY";

const BASE_URL: &str = "https://www.whoisxmlapi.com";

/// WHOIS registration data provider.
pub struct WhoisXmlProvider {
    client: HttpClient,
    has_key: bool,
}

impl WhoisXmlProvider {
    pub fn from_env() -> Result<Self, FetchError> {
        Self::with_key(std::env::var(WHOISXML_API_KEY).ok().map(SecureString::from))
    }

    pub fn with_key(key: Option<SecureString>) -> Result<Self, FetchError> {
        let has_key = key.is_some();
        let auth = match key {
            Some(key) => ApiAuth::Query {
                param: "apiKey",
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
impl Provider for WhoisXmlProvider {
    fn name(&self) -> &str {
        "whoisxml"
    }

    fn supports(&self, kind: TargetType) -> bool {
        kind == TargetType::Domain
    }

    fn required_credentials(&self) -> Vec<&'static str> {
        vec![WHOISXML_API_KEY]
    }

    fn missing_credentials(&self) -> Vec<String> {
        if self.has_key {
            Vec::new()
        } else {
            vec![WHOISXML_API_KEY.to_string()]
        }
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
        self.client
            .get_json(
                "/whoisserver/WhoisService",
                &[("domainName", target), ("outputFormat", "JSON")],
                deadline,
            )
            .await
    }

    fn normalize(
        &self,
        raw: &Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError> {
        let mut record = UnifiedRecord::empty(self.name(), target, kind);

        let response: WhoisXmlResponse =
            serde_json::from_value(raw.clone()).unwrap_or_default();
        let whois = response.whois_record.unwrap_or_default();

        record.whois.registrar = whois.registrar_name.filter(|s| !s.is_empty());

        if let Some(registrant) = &whois.registrant {
            record.whois.org = registrant.organization.clone().filter(|s| !s.is_empty());
            record.whois.country = registrant.country.clone().filter(|s| !s.is_empty());
            if let Some(email) = &registrant.email {
                record.whois.emails.insert(email.clone());
            }
        }
        for contact in [
            &whois.administrative_contact,
            &whois.technical_contact,
            &whois.billing_contact,
        ]
        .into_iter()
        .flatten()
        {
            if let Some(email) = &contact.email {
                record.whois.emails.insert(email.clone());
            }
        }

        // Registry data carries the authoritative dates; top-level fields
        // are the fallback.
        let registry = whois.registry_data.unwrap_or_default();
        record.whois.created = registry
            .created_date
            .or(whois.created_date)
            .as_deref()
            .and_then(parse_timestamp);
        record.whois.updated = registry
            .updated_date
            .or(whois.updated_date)
            .as_deref()
            .and_then(parse_timestamp);
        record.whois.expires = registry
            .expires_date
            .or(whois.expires_date)
            .as_deref()
            .and_then(parse_timestamp);

        if let Some(servers) = whois.name_servers {
            record.resolved.ns.extend(servers.host_names);
        }

        if record.whois.country.is_none() {
            record.whois.country = whois
                .administrative_contact
                .and_then(|c| c.country)
                .filter(|s| !s.is_empty());
        }

        record.raw.insert(self.name().to_string(), raw.clone());
        Ok(record)
    }
}

// WhoisXML response shapes; everything optional so malformed payloads
// degrade to an empty record instead of failing.

#[derive(Debug, Default, Deserialize)]
struct WhoisXmlResponse {
    #[serde(rename = "WhoisRecord")]
    whois_record: Option<WhoisRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhoisRecord {
    registrar_name: Option<String>,
    registrant: Option<Contact>,
    administrative_contact: Option<Contact>,
    technical_contact: Option<Contact>,
    billing_contact: Option<Contact>,
    registry_data: Option<RegistryData>,
    created_date: Option<String>,
    updated_date: Option<String>,
    expires_date: Option<String>,
    name_servers: Option<NameServers>,
}

#[derive(Debug, Default, Deserialize)]
struct Contact {
    organization: Option<String>,
    country: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryData {
    created_date: Option<String>,
    updated_date: Option<String>,
    expires_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameServers {
    #[serde(default)]
    host_names: Vec<String>,
}
