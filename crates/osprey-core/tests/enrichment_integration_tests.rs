//! End-to-end engine tests against scripted mock providers.

use osprey_core::engine::{EnrichOptions, EnrichRequest, EnrichmentEngine, ProviderOutcome};
use osprey_core::error::{EnrichError, FetchError};
use osprey_core::provider::{ProviderRegistry, RateLimitSpec};
use osprey_core::record::TargetType;
use osprey_core::testing::{MockBehavior, MockProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn engine_with(providers: Vec<Arc<MockProvider>>) -> EnrichmentEngine {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider);
    }
    EnrichmentEngine::new(osprey_core::EngineConfig::default(), registry)
}

fn dns_mock() -> Arc<MockProvider> {
    Arc::new(MockProvider::new("dns").with_payload(
        "example.com",
        json!({
            "resolved": {"ip": ["93.184.216.34"], "mx": ["10 mail.example.com"]}
        }),
    ))
}

fn whois_mock() -> Arc<MockProvider> {
    Arc::new(MockProvider::new("whoisxml").with_payload(
        "example.com",
        json!({
            "whois": {"registrar": "IANA", "created": "1995-08-14T04:00:00Z"}
        }),
    ))
}

#[tokio::test]
async fn test_happy_path_two_providers() {
    let engine = engine_with(vec![dns_mock(), whois_mock()]);
    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.has_data());
    assert!(report.error.is_none());
    assert_eq!(report.record.source, "merged");
    assert_eq!(report.record.resolved.ip.as_slice(), &["93.184.216.34"]);
    assert_eq!(
        report.record.resolved.mx.as_slice(),
        &["10 mail.example.com"]
    );
    assert_eq!(report.record.whois.registrar.as_deref(), Some("IANA"));
    assert_eq!(
        report.record.whois.created,
        Some("1995-08-14T04:00:00Z".parse().unwrap())
    );
    assert!(!report.record.risk.malicious);
    assert!(report.record.raw.contains_key("dns"));
    assert!(report.record.raw.contains_key("whoisxml"));
    assert!(report.providers.iter().all(|s| s.outcome.is_success()));
}

#[tokio::test]
async fn test_overlapping_results_deduplicate() {
    let a = Arc::new(
        MockProvider::new("dns")
            .with_payload("example.com", json!({"resolved": {"ip": ["1.1.1.1", "2.2.2.2"]}})),
    );
    let b = Arc::new(
        MockProvider::new("virustotal")
            .with_payload("example.com", json!({"resolved": {"ip": ["2.2.2.2", "3.3.3.3"]}})),
    );

    let engine = engine_with(vec![a, b]);
    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    assert_eq!(reports[0].record.resolved.ip.len(), 3);
}

#[tokio::test]
async fn test_partial_failure_keeps_siblings() {
    let failing = Arc::new(
        MockProvider::new("virustotal").with_behavior(MockBehavior::AlwaysFail(
            FetchError::from_status(401, "401 Unauthorized"),
        )),
    );
    let engine = engine_with(vec![dns_mock(), failing, whois_mock()]);

    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    let report = &reports[0];
    assert!(report.has_data());

    let mut raw_keys: Vec<_> = report.record.raw.keys().cloned().collect();
    raw_keys.sort();
    assert_eq!(raw_keys, vec!["dns", "whoisxml"]);

    let vt_status = report
        .providers
        .iter()
        .find(|s| s.provider == "virustotal")
        .unwrap();
    match &vt_status.outcome {
        ProviderOutcome::Failed(EnrichError::Permanent { cause, .. }) => {
            assert!(cause.contains("401"));
        }
        other => panic!("expected permanent failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transient_failure_retries_then_succeeds() {
    let flaky = Arc::new(
        MockProvider::new("dns")
            .with_payload("example.com", json!({"resolved": {"ip": ["1.1.1.1"]}}))
            .with_behavior(MockBehavior::FailFirst {
                failures: 1,
                error: FetchError::from_status(503, "unavailable"),
            }),
    );
    let engine = engine_with(vec![flaky.clone()]);

    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    assert!(reports[0].has_data());
    assert_eq!(flaky.fetch_count(), 2);
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts() {
    let down = Arc::new(
        MockProvider::new("dns").with_behavior(MockBehavior::AlwaysFail(FetchError::from_status(
            503,
            "unavailable",
        ))),
    );
    let engine = engine_with(vec![down.clone()]);

    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    let report = &reports[0];
    assert!(!report.has_data());
    assert!(report.record.is_empty());
    match &report.providers[0].outcome {
        ProviderOutcome::Failed(EnrichError::Transient { attempts, .. }) => {
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected transient failure, got {:?}", other),
    }
    assert_eq!(down.fetch_count(), 3);
}

#[tokio::test]
async fn test_missing_credentials_skips_provider() {
    let keyless = Arc::new(
        MockProvider::new("virustotal").with_missing_credentials(vec!["VT_API_KEY"]),
    );
    let engine = engine_with(vec![dns_mock(), keyless.clone()]);

    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    let report = &reports[0];
    assert!(report.has_data());
    assert_eq!(keyless.fetch_count(), 0);

    let status = report
        .providers
        .iter()
        .find(|s| s.provider == "virustotal")
        .unwrap();
    match &status.outcome {
        ProviderOutcome::Skipped {
            missing_credentials,
        } => assert_eq!(missing_credentials, &vec!["VT_API_KEY".to_string()]),
        other => panic!("expected skip, got {:?}", other),
    }
}

#[tokio::test]
async fn test_all_credentials_missing_yields_empty_record() {
    let a = Arc::new(MockProvider::new("virustotal").with_missing_credentials(vec!["VT_API_KEY"]));
    let b = Arc::new(MockProvider::new("shodan").with_missing_credentials(vec!["SHODAN_API_KEY"]));
    let engine = engine_with(vec![a, b]);

    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    let report = &reports[0];
    assert!(!report.has_data());
    assert!(report.record.is_empty());
    assert_eq!(report.providers.len(), 2);
    assert!(report
        .providers
        .iter()
        .all(|s| matches!(s.outcome, ProviderOutcome::Skipped { .. })));
}

#[tokio::test]
async fn test_empty_provider_set_after_type_filter() {
    let ip_only = Arc::new(
        MockProvider::new("ipinfo").with_supported_types(vec![TargetType::Ip]),
    );
    let engine = engine_with(vec![ip_only]);

    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["example.com".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    let report = &reports[0];
    assert!(report.error.is_none());
    assert!(report.providers.is_empty());
    assert!(report.record.is_empty());
    assert_eq!(report.record.source, "merged");
}

#[tokio::test]
async fn test_unknown_provider_is_an_error() {
    let engine = engine_with(vec![dns_mock()]);
    let mut request = EnrichRequest::new(vec!["example.com".to_string()], TargetType::Domain);
    request.providers = vec!["nosuch".to_string()];

    let err = engine.enrich(request).await.unwrap_err();
    assert!(matches!(err, EnrichError::UnknownProvider(name) if name == "nosuch"));
}

#[tokio::test]
async fn test_invalid_target_rejected_before_providers_run() {
    let dns = dns_mock();
    let engine = engine_with(vec![dns.clone()]);

    let reports = engine
        .enrich(EnrichRequest::new(
            vec!["not a domain".to_string()],
            TargetType::Domain,
        ))
        .await
        .unwrap();

    let report = &reports[0];
    assert!(report.error.is_some());
    assert!(report.providers.is_empty());
    assert!(!report.has_data());
    assert_eq!(dns.fetch_count(), 0);
}

#[tokio::test]
async fn test_second_run_within_ttl_hits_cache() {
    let dns = dns_mock();
    let engine = engine_with(vec![dns.clone()]);
    let request = EnrichRequest::new(vec!["example.com".to_string()], TargetType::Domain);

    let first = engine.enrich(request.clone()).await.unwrap();
    assert_eq!(dns.fetch_count(), 1);
    assert!(first[0].cache_hits().is_empty());

    let second = engine.enrich(request).await.unwrap();
    assert_eq!(dns.fetch_count(), 1, "second run must not fetch");
    assert_eq!(second[0].cache_hits(), vec!["dns"]);
    assert_eq!(first[0].record, second[0].record);
}

#[tokio::test]
async fn test_no_cache_mode_always_fetches() {
    let dns = dns_mock();
    let engine = engine_with(vec![dns.clone()]);
    let mut request = EnrichRequest::new(vec!["example.com".to_string()], TargetType::Domain);
    request.options = EnrichOptions {
        no_cache: Some(true),
        ..Default::default()
    };

    engine.enrich(request.clone()).await.unwrap();
    engine.enrich(request).await.unwrap();
    assert_eq!(dns.fetch_count(), 2);
}

#[tokio::test]
async fn test_refresh_mode_bypasses_read_but_writes() {
    let dns = dns_mock();
    let engine = engine_with(vec![dns.clone()]);

    let plain = EnrichRequest::new(vec!["example.com".to_string()], TargetType::Domain);
    engine.enrich(plain.clone()).await.unwrap();
    assert_eq!(dns.fetch_count(), 1);

    let mut refresh = plain.clone();
    refresh.options.refresh_cache = Some(true);
    engine.enrich(refresh).await.unwrap();
    assert_eq!(dns.fetch_count(), 2, "refresh must re-fetch");

    // the refreshed entry serves the next plain run
    let third = engine.enrich(plain).await.unwrap();
    assert_eq!(dns.fetch_count(), 2);
    assert_eq!(third[0].cache_hits(), vec!["dns"]);
}

#[tokio::test(start_paused = true)]
async fn test_provider_deadline_reports_timeout() {
    let slow = Arc::new(
        MockProvider::new("dns")
            .with_payload("example.com", json!({"resolved": {"ip": ["1.1.1.1"]}}))
            .with_latency(Duration::from_secs(120)),
    );
    let engine = engine_with(vec![slow]);

    let mut request = EnrichRequest::new(vec!["example.com".to_string()], TargetType::Domain);
    request.options.provider_timeout = Some(Duration::from_secs(1));

    let reports = engine.enrich(request).await.unwrap();
    match &reports[0].providers[0].outcome {
        ProviderOutcome::Failed(EnrichError::ProviderTimeout { .. }) => {}
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_paces_fetches() {
    // rate 1/s, capacity 1: five targets must take at least four seconds
    let paced = Arc::new(
        MockProvider::new("scanner").with_rate_limit(RateLimitSpec::per_second(1.0, 1.0)),
    );
    let engine = engine_with(vec![paced.clone()]);

    let targets: Vec<String> = (1..=5).map(|i| format!("host{}.example.com", i)).collect();
    let mut request = EnrichRequest::new(targets, TargetType::Domain);
    request.options.provider_timeout = Some(Duration::from_secs(60));
    request.options.target_deadline = Some(Duration::from_secs(120));

    let start = Instant::now();
    let reports = engine.enrich(request).await.unwrap();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.has_data()));
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(paced.fetch_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_worker_bound_serializes_fetches() {
    let slow = Arc::new(
        MockProvider::new("dns").with_latency(Duration::from_millis(100)),
    );
    let engine = engine_with(vec![slow]);

    let targets: Vec<String> = (1..=3).map(|i| format!("host{}.example.com", i)).collect();
    let mut request = EnrichRequest::new(targets, TargetType::Domain);
    request.options.max_workers = Some(1);

    let start = Instant::now();
    engine.enrich(request).await.unwrap();
    // one worker slot: the three 100ms fetches cannot overlap
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_returns_partial_results() {
    let fast = Arc::new(
        MockProvider::new("dns").with_payload("example.com", json!({"resolved": {"ip": ["1.1.1.1"]}})),
    );
    let slow = Arc::new(
        MockProvider::new("whoisxml")
            .with_payload("example.com", json!({"whois": {"registrar": "IANA"}}))
            .with_latency(Duration::from_secs(30)),
    );

    let engine = Arc::new(engine_with(vec![fast, slow]));
    let cancel_handle = engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel_handle.cancel();
    });

    let mut request = EnrichRequest::new(vec!["example.com".to_string()], TargetType::Domain);
    request.options.provider_timeout = Some(Duration::from_secs(60));
    request.options.target_deadline = Some(Duration::from_secs(120));

    let reports = engine.enrich(request).await.unwrap();
    let report = &reports[0];

    // the fast provider finished before the cancel; the slow one did not
    assert!(report.record.raw.contains_key("dns"));
    assert!(!report.record.raw.contains_key("whoisxml"));
    let slow_status = report
        .providers
        .iter()
        .find(|s| s.provider == "whoisxml")
        .unwrap();
    assert!(matches!(
        slow_status.outcome,
        ProviderOutcome::Failed(EnrichError::Cancelled { .. })
    ));
}
