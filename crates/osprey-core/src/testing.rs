//! Configurable mock provider for engine and registry tests.
//!
//! Supports preconfigured payloads per target, failure injection, latency
//! simulation, and fetch counting, so orchestration behavior can be tested
//! without real API calls.

use crate::error::FetchError;
use crate::provider::{Provider, RateLimitSpec};
use crate::record::{TargetType, UnifiedRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Failure-injection behavior for a mock provider.
#[derive(Debug, Clone, Default)]
pub enum MockBehavior {
    /// Serve preconfigured payloads normally.
    #[default]
    Normal,
    /// Every fetch fails with this error.
    AlwaysFail(FetchError),
    /// Fetches for the listed targets fail; others succeed.
    FailOn {
        targets: Vec<String>,
        error: FetchError,
    },
    /// The first `failures` fetches fail, then fetches succeed.
    FailFirst { failures: u64, error: FetchError },
}

/// A provider whose remote behavior is fully scripted.
pub struct MockProvider {
    name: String,
    supported: Vec<TargetType>,
    missing_credentials: Vec<String>,
    rate_limit: RateLimitSpec,
    latency: Option<Duration>,
    payloads: Mutex<HashMap<String, Value>>,
    behavior: Mutex<MockBehavior>,
    fetch_count: AtomicU64,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            supported: vec![
                TargetType::Domain,
                TargetType::Ip,
                TargetType::Url,
                TargetType::Email,
            ],
            missing_credentials: Vec::new(),
            rate_limit: RateLimitSpec::per_second(1000.0, 1000.0),
            latency: None,
            payloads: Mutex::new(HashMap::new()),
            behavior: Mutex::new(MockBehavior::Normal),
            fetch_count: AtomicU64::new(0),
        }
    }

    pub fn with_supported_types(mut self, types: Vec<TargetType>) -> Self {
        self.supported = types;
        self
    }

    /// Presents the given credential keys as missing, so the engine skips
    /// this provider.
    pub fn with_missing_credentials(mut self, keys: Vec<&str>) -> Self {
        self.missing_credentials = keys.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_rate_limit(mut self, spec: RateLimitSpec) -> Self {
        self.rate_limit = spec;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Payload returned for fetches of `target`. The payload may carry
    /// `resolved` / `whois` / `network` / `risk` sections, which
    /// `normalize` maps onto the record.
    pub fn with_payload(self, target: &str, payload: Value) -> Self {
        self.payloads
            .lock()
            .unwrap()
            .insert(target.to_string(), payload);
        self
    }

    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        *self.behavior.lock().unwrap() = behavior;
        self
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Number of fetch attempts made against this provider.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, kind: TargetType) -> bool {
        self.supported.contains(&kind)
    }

    fn missing_credentials(&self) -> Vec<String> {
        self.missing_credentials.clone()
    }

    fn rate_limit(&self) -> RateLimitSpec {
        self.rate_limit
    }

    async fn fetch(
        &self,
        target: &str,
        _kind: TargetType,
        _deadline: Duration,
    ) -> Result<Value, FetchError> {
        let count = self.fetch_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            MockBehavior::Normal => {}
            MockBehavior::AlwaysFail(error) => return Err(error),
            MockBehavior::FailOn { targets, error } => {
                if targets.iter().any(|t| t == target) {
                    return Err(error);
                }
            }
            MockBehavior::FailFirst { failures, error } => {
                if count <= failures {
                    return Err(error);
                }
            }
        }

        Ok(self
            .payloads
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})))
    }

    fn normalize(
        &self,
        raw: &Value,
        target: &str,
        kind: TargetType,
    ) -> Result<UnifiedRecord, FetchError> {
        let mut record = UnifiedRecord::empty(self.name(), target, kind);

        if let Some(section) = raw.get("resolved") {
            record.resolved = serde_json::from_value(section.clone())
                .map_err(|e| FetchError::permanent(format!("bad resolved section: {}", e)))?;
        }
        if let Some(section) = raw.get("whois") {
            record.whois = serde_json::from_value(section.clone())
                .map_err(|e| FetchError::permanent(format!("bad whois section: {}", e)))?;
        }
        if let Some(section) = raw.get("network") {
            record.network = serde_json::from_value(section.clone())
                .map_err(|e| FetchError::permanent(format!("bad network section: {}", e)))?;
        }
        if let Some(section) = raw.get("risk") {
            record.risk = serde_json::from_value(section.clone())
                .map_err(|e| FetchError::permanent(format!("bad risk section: {}", e)))?;
        }

        record.raw.insert(self.name.clone(), raw.clone());
        Ok(record)
    }
}
