//! Merge engine.
//!
//! Deterministically combines per-provider unified records for one target
//! into a single record. Set-valued fields take the union in first-seen
//! order; single-valued fields take the first non-empty value in registry
//! order, which makes the caller's record ordering the canonical
//! tie-breaker.

use crate::record::{TargetType, UnifiedRecord, MERGED_SOURCE};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Merges provider records into one record with `source = "merged"`.
///
/// `records` must be ordered by provider registry declaration order.
/// Inputs are not mutated; an empty slice yields an empty merged record
/// for the given target.
pub fn merge(target: &str, kind: TargetType, records: &[UnifiedRecord]) -> UnifiedRecord {
    let mut merged = UnifiedRecord::empty(MERGED_SOURCE, target, kind);

    for record in records {
        merge_resolved(&mut merged, record);
        merge_whois(&mut merged, record);
        merge_network(&mut merged, record);
        merge_risk(&mut merged, record);

        for (provider, payload) in &record.raw {
            merged
                .raw
                .entry(provider.clone())
                .or_insert_with(|| payload.clone());
        }
    }

    debug!(
        scan_target = %target,
        sources = records.len(),
        "merged provider records"
    );

    merged
}

fn merge_resolved(merged: &mut UnifiedRecord, record: &UnifiedRecord) {
    merged.resolved.ip.extend(record.resolved.ip.iter());
    merged.resolved.mx.extend(record.resolved.mx.iter());
    merged.resolved.ns.extend(record.resolved.ns.iter());
    merged.resolved.txt.extend(record.resolved.txt.iter());
}

fn merge_whois(merged: &mut UnifiedRecord, record: &UnifiedRecord) {
    first_non_empty(&mut merged.whois.registrar, &record.whois.registrar);
    first_non_empty(&mut merged.whois.org, &record.whois.org);
    first_non_empty(&mut merged.whois.country, &record.whois.country);
    merged.whois.emails.extend(record.whois.emails.iter());

    // Registration date: earliest wins. Update/expiry: latest wins.
    merged.whois.created = pick_earliest(merged.whois.created, record.whois.created);
    merged.whois.updated = pick_latest(merged.whois.updated, record.whois.updated);
    merged.whois.expires = pick_latest(merged.whois.expires, record.whois.expires);
}

fn merge_network(merged: &mut UnifiedRecord, record: &UnifiedRecord) {
    first_non_empty(&mut merged.network.asn, &record.network.asn);
    first_non_empty(&mut merged.network.asn_name, &record.network.asn_name);
    first_non_empty(&mut merged.network.isp, &record.network.isp);
    first_non_empty(&mut merged.network.city, &record.network.city);
    first_non_empty(&mut merged.network.region, &record.network.region);
    first_non_empty(&mut merged.network.country, &record.network.country);
}

fn merge_risk(merged: &mut UnifiedRecord, record: &UnifiedRecord) {
    if let Some(score) = record.risk.score {
        merged.risk.score = Some(match merged.risk.score {
            Some(existing) => existing.max(score),
            None => score,
        });
    }
    merged.risk.categories.extend(record.risk.categories.iter());
    merged.risk.malicious = merged.risk.malicious || record.risk.malicious;
}

fn first_non_empty(slot: &mut Option<String>, candidate: &Option<String>) {
    if slot.is_none() {
        if let Some(value) = candidate {
            if !value.is_empty() {
                *slot = Some(value.clone());
            }
        }
    }
}

fn pick_earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

fn pick_latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}
