//! The orchestrator.
//!
//! Fans out per-target provider units with bounded parallelism, collects
//! partial results, merges them, and reports per-provider status. A unit
//! runs: cache probe, rate acquire, worker permit, retry-wrapped fetch,
//! normalize, validate, cache write. A failing unit never aborts its
//! siblings; the merged record always exists.

use crate::cache::{CacheBackend, CacheKey, CacheMode, DiskCache, MemoryCache};
use crate::config::EngineConfig;
use crate::error::{EnrichError, FetchError};
use crate::merge::merge;
use crate::provider::{Provider, ProviderRegistry};
use crate::ratelimit::{AcquireError, RateLimiterTable, TokenBucket};
use crate::record::{validate, TargetType, UnifiedRecord};
use crate::retry::{RetryError, RetryPolicy};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One enrichment invocation.
#[derive(Debug, Clone)]
pub struct EnrichRequest {
    /// Nonempty list of targets, all of the same declared type.
    pub targets: Vec<String>,
    pub kind: TargetType,
    /// Provider names to run; empty means all that support the type.
    pub providers: Vec<String>,
    pub options: EnrichOptions,
}

impl EnrichRequest {
    pub fn new(targets: Vec<String>, kind: TargetType) -> Self {
        Self {
            targets,
            kind,
            providers: Vec::new(),
            options: EnrichOptions::default(),
        }
    }
}

/// Per-call overrides; unset fields fall back to the engine config.
#[derive(Debug, Clone, Default)]
pub struct EnrichOptions {
    pub no_cache: Option<bool>,
    pub refresh_cache: Option<bool>,
    pub cache_ttl: Option<Duration>,
    pub max_workers: Option<usize>,
    pub target_deadline: Option<Duration>,
    pub provider_timeout: Option<Duration>,
}

/// Outcome of one provider unit.
#[derive(Debug, Clone)]
pub enum ProviderOutcome {
    Success,
    /// Provider skipped before any attempt; not a scan failure.
    Skipped { missing_credentials: Vec<String> },
    Failed(EnrichError),
}

impl ProviderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderOutcome::Success)
    }
}

impl Serialize for ProviderOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProviderOutcome::Success => {
                let mut s = serializer.serialize_struct("ProviderOutcome", 1)?;
                s.serialize_field("status", "success")?;
                s.end()
            }
            ProviderOutcome::Skipped {
                missing_credentials,
            } => {
                let mut s = serializer.serialize_struct("ProviderOutcome", 2)?;
                s.serialize_field("status", "skipped")?;
                s.serialize_field("missing_credentials", missing_credentials)?;
                s.end()
            }
            ProviderOutcome::Failed(error) => {
                let mut s = serializer.serialize_struct("ProviderOutcome", 3)?;
                s.serialize_field("status", "failed")?;
                s.serialize_field("kind", error.kind())?;
                s.serialize_field("error", &error.to_string())?;
                s.end()
            }
        }
    }
}

/// Per-provider status line in a target report.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub outcome: ProviderOutcome,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

/// Everything the engine produced for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    #[serde(rename = "type")]
    pub kind: TargetType,
    /// The merged record; present (possibly empty) even when everything
    /// failed.
    pub record: UnifiedRecord,
    pub providers: Vec<ProviderStatus>,
    /// Target-level rejection (invalid target), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl TargetReport {
    /// True when at least one provider contributed data.
    pub fn has_data(&self) -> bool {
        !self.record.raw.is_empty()
    }

    pub fn cache_hits(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|s| s.from_cache)
            .map(|s| s.provider.as_str())
            .collect()
    }
}

struct UnitOutput {
    status: ProviderStatus,
    record: Option<UnifiedRecord>,
}

/// Shared state for one scan invocation.
struct ScanContext {
    providers: Vec<Arc<dyn Provider>>,
    buckets: Vec<Arc<TokenBucket>>,
    cache: Arc<dyn CacheBackend>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    kind: TargetType,
    mode: CacheMode,
    call_ttl: Option<Duration>,
    default_ttl: Duration,
    provider_timeout: Duration,
    target_deadline: Duration,
}

impl ScanContext {
    /// Effective TTL for one provider: call override, then the
    /// provider's own TTL, then the engine default.
    fn cache_ttl_for(&self, provider: &dyn Provider) -> Duration {
        self.call_ttl
            .or_else(|| provider.cache_ttl())
            .unwrap_or(self.default_ttl)
    }
}

/// The enrichment engine. Construct once, share, and call
/// [`EnrichmentEngine::enrich`] per scan.
pub struct EnrichmentEngine {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn CacheBackend>,
    limiters: RateLimiterTable,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl EnrichmentEngine {
    /// Builds an engine with the cache backend chosen by the config:
    /// disk-backed when `cache_dir` is set, in-memory otherwise.
    pub fn new(config: EngineConfig, registry: ProviderRegistry) -> Self {
        let cache: Arc<dyn CacheBackend> = match &config.cache_dir {
            Some(dir) => match DiskCache::new(dir) {
                Ok(disk) => Arc::new(disk),
                Err(e) => {
                    warn!(dir = %dir.display(), "disk cache unavailable, using memory: {}", e);
                    Arc::new(MemoryCache::default())
                }
            },
            None => Arc::new(MemoryCache::default()),
        };
        Self::with_cache(config, registry, cache)
    }

    /// Builds an engine over an explicit cache backend.
    pub fn with_cache(
        config: EngineConfig,
        registry: ProviderRegistry,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        let mut limiters = RateLimiterTable::new();
        for provider in registry.iter() {
            let spec = config
                .rate_limits
                .get(provider.name())
                .copied()
                .unwrap_or_else(|| provider.rate_limit());
            limiters.register(provider.name(), spec);
        }

        let retry = config.retry_policy();
        Self {
            config,
            registry: Arc::new(registry),
            cache,
            limiters,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> Arc<dyn CacheBackend> {
        self.cache.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token observed by every unit of every scan on this engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels in-flight scans: fetches abort, rate-limiter waiters
    /// unblock, pending units are not started. Partial results already
    /// computed are still returned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs a scan. Fails fast only on caller errors (an unknown provider
    /// name); everything else is reported per target and per provider.
    pub async fn enrich(&self, request: EnrichRequest) -> Result<Vec<TargetReport>, EnrichError> {
        let providers = self.registry.resolve(&request.providers, request.kind)?;
        let opts = &request.options;

        let mode = match (opts.no_cache, opts.refresh_cache) {
            (Some(true), _) => CacheMode::Disabled,
            (_, Some(true)) => CacheMode::Refresh,
            (Some(false), Some(false)) => CacheMode::ReadWrite,
            _ => self.config.cache_mode(),
        };

        let buckets = providers
            .iter()
            .map(|p| {
                self.limiters
                    .bucket(p.name())
                    .expect("limiter registered for every provider")
            })
            .collect();

        let max_workers = opts.max_workers.unwrap_or(self.config.max_workers).max(1);
        let ctx = Arc::new(ScanContext {
            providers,
            buckets,
            cache: self.cache.clone(),
            retry: self.retry,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            cancel: self.cancel.clone(),
            kind: request.kind,
            mode,
            call_ttl: opts.cache_ttl,
            default_ttl: self.config.cache_ttl(),
            provider_timeout: opts
                .provider_timeout
                .unwrap_or_else(|| self.config.provider_timeout()),
            target_deadline: opts
                .target_deadline
                .unwrap_or_else(|| self.config.target_deadline()),
        });

        info!(
            targets = request.targets.len(),
            providers = ctx.providers.len(),
            kind = %request.kind,
            "starting scan"
        );

        let mut handles = Vec::with_capacity(request.targets.len());
        for target in &request.targets {
            let ctx = ctx.clone();
            let target = target.clone();
            handles.push(tokio::spawn(enrich_target(ctx, target)));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (handle, target) in handles.into_iter().zip(request.targets) {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(scan_target = %target, "target task panicked: {}", e);
                    reports.push(TargetReport {
                        record: merge(&target, request.kind, &[]),
                        target,
                        kind: request.kind,
                        providers: Vec::new(),
                        error: Some(EnrichError::Internal(e.to_string()).to_string()),
                        elapsed_ms: 0,
                    });
                }
            }
        }

        info!(
            targets = reports.len(),
            with_data = reports.iter().filter(|r| r.has_data()).count(),
            "scan finished"
        );
        Ok(reports)
    }
}

async fn enrich_target(ctx: Arc<ScanContext>, target: String) -> TargetReport {
    let started = Instant::now();

    if !ctx.kind.matches(&target) {
        warn!(scan_target = %target, kind = %ctx.kind, "rejecting invalid target");
        let error = EnrichError::InvalidTarget {
            target: target.clone(),
            kind: ctx.kind,
        };
        return TargetReport {
            record: merge(&target, ctx.kind, &[]),
            target,
            kind: ctx.kind,
            providers: Vec::new(),
            error: Some(error.to_string()),
            elapsed_ms: elapsed_ms(started),
        };
    }

    let mut handles = Vec::with_capacity(ctx.providers.len());
    for index in 0..ctx.providers.len() {
        let ctx = ctx.clone();
        let target = target.clone();
        handles.push(tokio::spawn(run_unit(ctx, index, target)));
    }

    let mut statuses = Vec::with_capacity(handles.len());
    let mut records = Vec::new();
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(output) => {
                if let Some(record) = output.record {
                    records.push(record);
                }
                statuses.push(output.status);
            }
            Err(e) => {
                let provider = ctx.providers[index].name().to_string();
                warn!(provider = %provider, "provider unit panicked: {}", e);
                statuses.push(ProviderStatus {
                    provider,
                    outcome: ProviderOutcome::Failed(EnrichError::Internal(e.to_string())),
                    from_cache: false,
                    elapsed_ms: 0,
                });
            }
        }
    }

    // `records` is in registry resolution order, which makes the merge
    // tie-breaks deterministic.
    let record = merge(&target, ctx.kind, &records);

    TargetReport {
        record,
        target,
        kind: ctx.kind,
        providers: statuses,
        error: None,
        elapsed_ms: elapsed_ms(started),
    }
}

async fn run_unit(ctx: Arc<ScanContext>, index: usize, target: String) -> UnitOutput {
    let provider = ctx.providers[index].clone();
    let bucket = ctx.buckets[index].clone();
    let name = provider.name().to_string();
    let started = Instant::now();

    let status = |outcome, from_cache| ProviderStatus {
        provider: name.clone(),
        outcome,
        from_cache,
        elapsed_ms: elapsed_ms(started),
    };

    if ctx.cancel.is_cancelled() {
        return UnitOutput {
            status: status(
                ProviderOutcome::Failed(EnrichError::Cancelled {
                    reason: "scan cancelled before start".to_string(),
                }),
                false,
            ),
            record: None,
        };
    }

    let missing = provider.missing_credentials();
    if !missing.is_empty() {
        warn!(
            provider = %name,
            missing = ?missing,
            "skipping provider, credentials not configured"
        );
        return UnitOutput {
            status: status(
                ProviderOutcome::Skipped {
                    missing_credentials: missing,
                },
                false,
            ),
            record: None,
        };
    }

    let key = CacheKey::new(target.as_str(), name.as_str());
    let ttl = ctx.cache_ttl_for(provider.as_ref());
    if ctx.mode.reads() {
        if let Some(record) = ctx.cache.get(&key, ttl).await {
            debug!(provider = %name, scan_target = %target, "serving cached record");
            return UnitOutput {
                status: status(ProviderOutcome::Success, true),
                record: Some(record),
            };
        }
    }

    let deadline_at = started + ctx.target_deadline;
    let work = fetch_and_normalize(&ctx, &provider, &bucket, &key, ttl, &target, started);

    match tokio::time::timeout_at(deadline_at, work).await {
        Ok(Ok(record)) => UnitOutput {
            status: status(ProviderOutcome::Success, false),
            record: Some(record),
        },
        Ok(Err(error)) => UnitOutput {
            status: status(ProviderOutcome::Failed(error), false),
            record: None,
        },
        Err(_) => UnitOutput {
            status: status(
                ProviderOutcome::Failed(EnrichError::ProviderTimeout {
                    provider: name.clone(),
                    target: target.clone(),
                    after: started.elapsed(),
                }),
                false,
            ),
            record: None,
        },
    }
}

async fn fetch_and_normalize(
    ctx: &ScanContext,
    provider: &Arc<dyn Provider>,
    bucket: &Arc<TokenBucket>,
    key: &CacheKey,
    ttl: Duration,
    target: &str,
    started: Instant,
) -> Result<UnifiedRecord, EnrichError> {
    let name = provider.name().to_string();

    bucket
        .acquire(1.0, ctx.provider_timeout, &ctx.cancel)
        .await
        .map_err(|e| match e {
            AcquireError::Cancelled => EnrichError::Cancelled {
                reason: "scan cancelled".to_string(),
            },
            AcquireError::TimedOut => EnrichError::ProviderTimeout {
                provider: name.clone(),
                target: target.to_string(),
                after: started.elapsed(),
            },
            AcquireError::ExceedsCapacity => {
                EnrichError::Internal("acquire exceeds bucket capacity".to_string())
            }
        })?;

    // The worker bound applies only to units holding a rate token, so the
    // permit is taken after the acquire, never before.
    let _permit = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            return Err(EnrichError::Cancelled { reason: "scan cancelled".to_string() });
        }
        permit = ctx.semaphore.clone().acquire_owned() => {
            permit.map_err(|_| EnrichError::Internal("worker pool closed".to_string()))?
        }
    };

    let kind = ctx.kind;
    let timeout = ctx.provider_timeout;
    let retried = ctx.retry.run(&name, target, &ctx.cancel, |_attempt| {
        let provider = provider.clone();
        let target = target.to_string();
        async move {
            match tokio::time::timeout(timeout, provider.fetch(&target, kind, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::deadline(format!(
                    "no response within {:?}",
                    timeout
                ))),
            }
        }
    });
    // Racing against the token aborts an in-flight fetch on cancel, not
    // just the waits between attempts.
    let raw = tokio::select! {
        _ = ctx.cancel.cancelled() => Err(RetryError::Cancelled),
        result = retried => result,
    }
    .map_err(|e| match e {
            RetryError::Permanent { error } if error.deadline_exceeded => {
                EnrichError::ProviderTimeout {
                    provider: name.clone(),
                    target: target.to_string(),
                    after: started.elapsed(),
                }
            }
            RetryError::Permanent { error } => EnrichError::Permanent {
                provider: name.clone(),
                target: target.to_string(),
                cause: error.to_string(),
            },
            RetryError::Exhausted { error, attempts } => EnrichError::Transient {
                provider: name.clone(),
                target: target.to_string(),
                cause: error.to_string(),
                attempts,
            },
            RetryError::Cancelled => EnrichError::Cancelled {
                reason: "scan cancelled".to_string(),
            },
        })?;

    let mut record = provider
        .normalize(&raw, target, kind)
        .map_err(|e| EnrichError::Permanent {
            provider: name.clone(),
            target: target.to_string(),
            cause: format!("normalization failed: {}", e),
        })?;

    record.source = name.clone();
    record.raw.entry(name.clone()).or_insert(raw);

    validate(&record).map_err(|e| {
        EnrichError::Internal(format!("provider {} produced an invalid record: {}", name, e))
    })?;

    if ctx.mode.writes() {
        ctx.cache.put(key, &record, ttl).await;
    }

    Ok(record)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
