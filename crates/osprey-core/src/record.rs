//! Unified record schema.
//!
//! Every provider produces this one shape, and the merge engine consumes it.
//! Fields are semantic rather than provider-specific; anything a provider
//! returns that has no semantic slot is preserved verbatim in `raw`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// The `source` tag carried by a merged record.
pub const MERGED_SOURCE: &str = "merged";

/// Risk score at or above which a target is considered malicious.
pub const MALICIOUS_SCORE_THRESHOLD: u8 = 30;

/// Kind of target a scan runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Domain,
    Ip,
    Url,
    Email,
}

impl TargetType {
    /// Returns true if `target` is syntactically plausible for this type.
    ///
    /// This is a gate against obviously wrong input (an IP passed as a
    /// domain scan, an empty string), not full RFC validation.
    pub fn matches(&self, target: &str) -> bool {
        if target.is_empty() {
            return false;
        }
        match self {
            TargetType::Ip => target.parse::<IpAddr>().is_ok(),
            TargetType::Url => url::Url::parse(target)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
                .unwrap_or(false),
            TargetType::Email => {
                let mut parts = target.splitn(2, '@');
                match (parts.next(), parts.next()) {
                    (Some(local), Some(domain)) => {
                        !local.is_empty() && TargetType::Domain.matches(domain)
                    }
                    _ => false,
                }
            }
            TargetType::Domain => {
                // At least one dot, labels of [a-z0-9-] not edged with '-',
                // and not parseable as a bare IP.
                if target.parse::<IpAddr>().is_ok() || !target.contains('.') {
                    return false;
                }
                target.split('.').all(|label| {
                    !label.is_empty()
                        && label.len() <= 63
                        && !label.starts_with('-')
                        && !label.ends_with('-')
                        && label
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '-')
                })
            }
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetType::Domain => "domain",
            TargetType::Ip => "ip",
            TargetType::Url => "url",
            TargetType::Email => "email",
        };
        f.write_str(s)
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "domain" => Ok(TargetType::Domain),
            "ip" => Ok(TargetType::Ip),
            "url" => Ok(TargetType::Url),
            "email" => Ok(TargetType::Email),
            other => Err(format!("unknown target type: {}", other)),
        }
    }
}

/// A deduplicated string collection preserving first-seen insertion order.
///
/// Serializes as a plain JSON array. Equality is set equality: two
/// `OrderedSet`s with the same elements in different orders compare equal.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct OrderedSet(Vec<String>);

impl OrderedSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts a value, returning false if it was already present.
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.is_empty() || self.0.contains(&value) {
            return false;
        }
        self.0.push(value);
        true
    }

    pub fn extend<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, values: I) {
        for v in values {
            self.insert(v);
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    fn sorted(&self) -> Vec<&String> {
        let mut v: Vec<&String> = self.0.iter().collect();
        v.sort();
        v
    }
}

impl PartialEq for OrderedSet {
    fn eq(&self, other: &Self) -> bool {
        self.sorted() == other.sorted()
    }
}

impl Eq for OrderedSet {}

impl<S: Into<String>> FromIterator<S> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<'de> Deserialize<'de> for OrderedSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Deduplicate on the way in so deserialized records uphold the
        // no-duplicates invariant.
        let values = Vec::<String>::deserialize(deserializer)?;
        Ok(values.into_iter().collect())
    }
}

/// DNS-style resolution data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedData {
    /// A and AAAA records, as literal address strings.
    #[serde(default)]
    pub ip: OrderedSet,
    /// MX records encoded as `"<priority> <host>"`.
    #[serde(default)]
    pub mx: OrderedSet,
    #[serde(default)]
    pub ns: OrderedSet,
    #[serde(default)]
    pub txt: OrderedSet,
}

impl ResolvedData {
    pub fn is_empty(&self) -> bool {
        self.ip.is_empty() && self.mx.is_empty() && self.ns.is_empty() && self.txt.is_empty()
    }
}

/// WHOIS registration facts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisData {
    #[serde(default)]
    pub registrar: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub emails: OrderedSet,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

/// Network locality data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkData {
    #[serde(default)]
    pub asn: Option<String>,
    #[serde(default)]
    pub asn_name: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Threat signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskData {
    /// 0..=100 when present.
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub categories: OrderedSet,
    #[serde(default)]
    pub malicious: bool,
}

/// The canonical record every provider produces and merge emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    /// Provider name, or `"merged"` for the merge engine's output.
    pub source: String,
    #[serde(rename = "type")]
    pub kind: TargetType,
    pub target: String,
    #[serde(default)]
    pub resolved: ResolvedData,
    #[serde(default)]
    pub whois: WhoisData,
    #[serde(default)]
    pub network: NetworkData,
    #[serde(default)]
    pub risk: RiskData,
    /// Provider name -> original payload, preserved verbatim.
    #[serde(default)]
    pub raw: HashMap<String, serde_json::Value>,
}

impl UnifiedRecord {
    /// Creates a record with empty collections and unset optionals.
    pub fn empty(source: impl Into<String>, target: impl Into<String>, kind: TargetType) -> Self {
        Self {
            source: source.into(),
            kind,
            target: target.into(),
            resolved: ResolvedData::default(),
            whois: WhoisData::default(),
            network: NetworkData::default(),
            risk: RiskData::default(),
            raw: HashMap::new(),
        }
    }

    /// Returns true if the record carries no provider data at all.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
            && self.whois == WhoisData::default()
            && self.network == NetworkData::default()
            && self.risk == RiskData::default()
            && self.raw.is_empty()
    }
}

/// What went wrong during record validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    #[error("field is empty")]
    Empty,
    #[error("target does not match the declared type")]
    TargetTypeMismatch,
    #[error("value out of range")]
    OutOfRange,
}

/// A validation failure, naming the first offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid record: {field}: {kind}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub field: &'static str,
}

/// Validates a record against the schema invariants.
///
/// Total: never panics, reports the first offending field. Set-valued
/// fields cannot hold duplicates by construction, so only the value-level
/// invariants are checked here.
pub fn validate(record: &UnifiedRecord) -> Result<(), ValidationError> {
    if record.source.is_empty() {
        return Err(ValidationError {
            kind: ValidationErrorKind::Empty,
            field: "source",
        });
    }
    if record.target.is_empty() {
        return Err(ValidationError {
            kind: ValidationErrorKind::Empty,
            field: "target",
        });
    }
    if !record.kind.matches(&record.target) {
        return Err(ValidationError {
            kind: ValidationErrorKind::TargetTypeMismatch,
            field: "target",
        });
    }
    if let Some(score) = record.risk.score {
        if score > 100 {
            return Err(ValidationError {
                kind: ValidationErrorKind::OutOfRange,
                field: "risk.score",
            });
        }
    }
    Ok(())
}

/// Maps engine detection counts onto the canonical 0..=100 risk score.
///
/// `score = round(100 * (malicious + 0.5 * suspicious) / total)`, with a
/// total of zero treated as one so an empty analysis scores zero.
pub fn score_from_counts(malicious: u32, suspicious: u32, total: u32) -> u8 {
    let total = total.max(1) as f64;
    let weighted = malicious as f64 + 0.5 * suspicious as f64;
    ((100.0 * weighted / total).round() as u8).min(100)
}

/// Whether a score alone crosses the malicious threshold.
pub fn is_malicious_score(score: u8) -> bool {
    score >= MALICIOUS_SCORE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_type_matches_ip() {
        assert!(TargetType::Ip.matches("93.184.216.34"));
        assert!(TargetType::Ip.matches("2606:2800:220:1:248:1893:25c8:1946"));
        assert!(!TargetType::Ip.matches("example.com"));
        assert!(!TargetType::Ip.matches(""));
    }

    #[test]
    fn test_target_type_matches_domain() {
        assert!(TargetType::Domain.matches("example.com"));
        assert!(TargetType::Domain.matches("sub.example.co.uk"));
        assert!(!TargetType::Domain.matches("93.184.216.34"));
        assert!(!TargetType::Domain.matches("no-dots"));
        assert!(!TargetType::Domain.matches("-bad.example.com"));
    }

    #[test]
    fn test_target_type_matches_url_and_email() {
        assert!(TargetType::Url.matches("https://example.com/login"));
        assert!(!TargetType::Url.matches("ftp://example.com"));
        assert!(!TargetType::Url.matches("example.com"));
        assert!(TargetType::Email.matches("admin@example.com"));
        assert!(!TargetType::Email.matches("@example.com"));
        assert!(!TargetType::Email.matches("admin"));
    }

    #[test]
    fn test_target_type_round_trip() {
        for kind in [
            TargetType::Domain,
            TargetType::Ip,
            TargetType::Url,
            TargetType::Email,
        ] {
            assert_eq!(kind.to_string().parse::<TargetType>().unwrap(), kind);
        }
        assert!("hostname".parse::<TargetType>().is_err());
    }

    #[test]
    fn test_ordered_set_dedup_and_order() {
        let mut set = OrderedSet::new();
        assert!(set.insert("1.1.1.1"));
        assert!(set.insert("2.2.2.2"));
        assert!(!set.insert("1.1.1.1"));
        assert!(!set.insert(""));
        assert_eq!(set.as_slice(), &["1.1.1.1", "2.2.2.2"]);
    }

    #[test]
    fn test_ordered_set_equality_ignores_order() {
        let a: OrderedSet = ["a", "b", "c"].into_iter().collect();
        let b: OrderedSet = ["c", "a", "b"].into_iter().collect();
        let c: OrderedSet = ["a", "b"].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ordered_set_deserialize_dedupes() {
        let set: OrderedSet = serde_json::from_str(r#"["x","y","x"]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.as_slice(), &["x", "y"]);
    }

    #[test]
    fn test_validate_ok() {
        let record = UnifiedRecord::empty("dns", "example.com", TargetType::Domain);
        assert!(validate(&record).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_target() {
        let record = UnifiedRecord::empty("dns", "", TargetType::Domain);
        let err = validate(&record).unwrap_err();
        assert_eq!(err.field, "target");
        assert_eq!(err.kind, ValidationErrorKind::Empty);
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let record = UnifiedRecord::empty("dns", "93.184.216.34", TargetType::Domain);
        let err = validate(&record).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::TargetTypeMismatch);
    }

    #[test]
    fn test_validate_rejects_score_out_of_range() {
        let mut record = UnifiedRecord::empty("vt", "example.com", TargetType::Domain);
        record.risk.score = Some(101);
        let err = validate(&record).unwrap_err();
        assert_eq!(err.field, "risk.score");
    }

    #[test]
    fn test_score_from_counts() {
        // 2 malicious + 1 suspicious out of 50 engines -> 5
        assert_eq!(score_from_counts(2, 1, 50), 5);
        // all malicious
        assert_eq!(score_from_counts(70, 0, 70), 100);
        // empty analysis
        assert_eq!(score_from_counts(0, 0, 0), 0);
        // weighting of suspicious
        assert_eq!(score_from_counts(0, 10, 10), 50);
    }

    #[test]
    fn test_malicious_threshold() {
        assert!(!is_malicious_score(29));
        assert!(is_malicious_score(30));
    }

    #[test]
    fn test_record_json_round_trip() {
        let mut record = UnifiedRecord::empty("dns", "example.com", TargetType::Domain);
        record.resolved.ip.insert("93.184.216.34");
        record.resolved.mx.insert("10 mail.example.com");
        record.whois.registrar = Some("IANA".to_string());
        record.whois.created = Some("1995-08-14T04:00:00Z".parse().unwrap());
        record.risk.score = Some(12);
        record
            .raw
            .insert("dns".to_string(), serde_json::json!({"A": ["93.184.216.34"]}));

        let json = serde_json::to_string(&record).unwrap();
        let back: UnifiedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);

        // field names are lowercase with `type` spelled out
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "domain");
        assert!(value["resolved"]["ns"].as_array().unwrap().is_empty());
    }
}
