//! Provider abstraction and registry.
//!
//! Every enrichment provider exposes the same capability set: a stable
//! name, the target types it can handle, the credentials it needs, its
//! rate-limit spec, a single-attempt `fetch`, and a pure `normalize`.
//! Retry, rate limiting and caching are owned by the engine, never by the
//! provider itself.

use crate::error::{EnrichError, FetchError};
use crate::record::{TargetType, UnifiedRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Token-bucket parameters for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Refill rate in tokens per second.
    pub tokens_per_second: f64,
    /// Maximum burst size.
    pub capacity: f64,
}

impl RateLimitSpec {
    pub fn per_second(tokens_per_second: f64, capacity: f64) -> Self {
        Self {
            tokens_per_second,
            capacity,
        }
    }

    pub fn per_minute(tokens_per_minute: f64, capacity: f64) -> Self {
        Self {
            tokens_per_second: tokens_per_minute / 60.0,
            capacity,
        }
    }
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self::per_second(5.0, 10.0)
    }
}

/// Static description of a registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub target_types: Vec<TargetType>,
    pub required_credentials: Vec<String>,
    pub rate_limit: RateLimitSpec,
    #[serde(skip)]
    pub default_timeout: Duration,
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

/// An enrichment provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, also the key used in `raw` maps and cache keys.
    fn name(&self) -> &str;

    /// Whether this provider can handle the given target type.
    fn supports(&self, kind: TargetType) -> bool;

    /// Environment/config keys this provider needs.
    fn required_credentials(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// The subset of `required_credentials` that is not configured.
    /// Non-empty means the engine skips this provider with a warning.
    fn missing_credentials(&self) -> Vec<String> {
        Vec::new()
    }

    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec::default()
    }

    /// Provider-specific cache TTL; `None` uses the engine default.
    /// A per-call TTL override still wins over this.
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// One remote attempt. No retry, rate limiting or caching in here;
    /// `deadline` bounds the whole attempt.
    async fn fetch(
        &self,
        target: &str,
        kind: TargetType,
        deadline: Duration,
    ) -> Result<serde_json::Value, FetchError>;

    /// Maps a raw payload onto the unified schema.
    ///
    /// Must not panic on malformed data: unknown fields stay in
    /// `raw[name]`, missing fields leave empty collections or unset
    /// optionals. An error here is permanent.
    fn normalize(
        &self,
        raw: &serde_json::Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError>;

    fn descriptor(&self) -> ProviderDescriptor {
        let target_types = [
            TargetType::Domain,
            TargetType::Ip,
            TargetType::Url,
            TargetType::Email,
        ]
        .into_iter()
        .filter(|kind| self.supports(*kind))
        .collect();

        ProviderDescriptor {
            name: self.name().to_string(),
            target_types,
            required_credentials: self
                .required_credentials()
                .into_iter()
                .map(str::to_string)
                .collect(),
            rate_limit: self.rate_limit(),
            default_timeout: self.default_timeout(),
        }
    }
}

/// Insertion-ordered provider registry.
///
/// Registration order is load-bearing: it is the canonical tie-break order
/// for single-valued fields in the merge engine. The registry is built at
/// startup and read-only afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider. Re-registering a name replaces the provider
    /// in place, keeping its original position.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            *slot = provider;
        } else {
            tracing::debug!(provider = provider.name(), "registered provider");
            self.providers.push(provider);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolves the providers to run for a scan.
    ///
    /// An empty `requested` list means every provider supporting the type.
    /// The result preserves registry order regardless of the order names
    /// were requested in. Unknown names are a permanent error.
    pub fn resolve(
        &self,
        requested: &[String],
        kind: TargetType,
    ) -> Result<Vec<Arc<dyn Provider>>, EnrichError> {
        for name in requested {
            if self.get(name).is_none() {
                return Err(EnrichError::UnknownProvider(name.clone()));
            }
        }

        Ok(self
            .providers
            .iter()
            .filter(|p| requested.is_empty() || requested.iter().any(|n| n == p.name()))
            .filter(|p| p.supports(kind))
            .cloned()
            .collect())
    }
}
