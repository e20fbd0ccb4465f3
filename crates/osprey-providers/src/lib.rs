//! # osprey-providers
//!
//! Enrichment provider adapters for the Osprey engine: passive DNS,
//! WHOIS, IP geolocation, threat intelligence, port/service exposure,
//! and certificate transparency.
//!
//! Each adapter owns its endpoint, authentication, request construction
//! and normalization. Retry, rate limiting and caching live in
//! `osprey-core`; adapters make exactly one attempt per `fetch`.

pub mod crtsh;
pub mod dns;
pub mod http;
pub mod ipinfo;
pub mod secure_string;
pub mod shodan;
mod util;
pub mod virustotal;
pub mod whoisxml;

pub use crtsh::CrtShProvider;
pub use dns::DnsProvider;
pub use http::{ApiAuth, HttpClient};
pub use ipinfo::{IpInfoProvider, IPINFO_TOKEN};
pub use secure_string::SecureString;
pub use shodan::{ShodanProvider, SHODAN_API_KEY};
pub use virustotal::{VirusTotalProvider, VT_API_KEY};
pub use whoisxml::{WhoisXmlProvider, WHOISXML_API_KEY};

use osprey_core::error::FetchError;
use osprey_core::provider::ProviderRegistry;
use std::sync::Arc;

/// Builds the standard registry with every bundled provider, credentials
/// taken from the environment.
///
/// Registration order is the canonical merge tie-break order: resolvers
/// and registration data first, then enrichment sources.
pub fn default_registry() -> Result<ProviderRegistry, FetchError> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(DnsProvider::new()?));
    registry.register(Arc::new(WhoisXmlProvider::from_env()?));
    registry.register(Arc::new(IpInfoProvider::from_env()?));
    registry.register(Arc::new(VirusTotalProvider::from_env()?));
    registry.register(Arc::new(ShodanProvider::from_env()?));
    registry.register(Arc::new(CrtShProvider::new()?));
    Ok(registry)
}
