//! Error taxonomy for the enrichment engine.
//!
//! Two layers: `FetchError` is what a single provider attempt reports, with
//! a transient/permanent class the retry policy acts on. `EnrichError` is
//! what the engine surfaces to callers per provider unit; it never unwinds
//! the orchestrator.

use crate::record::TargetType;
use std::time::Duration;
use thiserror::Error;

/// Retry classification of a failed provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying: connection failures, timeouts, 408/429/5xx.
    Transient,
    /// Retrying is futile: 4xx client errors, undecodable 2xx bodies.
    Permanent,
}

/// Failure of one provider fetch attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    pub class: FailureClass,
    pub message: String,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Server-requested wait, from a 429 `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Set when the per-provider deadline expired. Socket-level timeouts
    /// stay transient; a blown deadline surfaces as a timeout error.
    pub deadline_exceeded: bool,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
            status: None,
            retry_after: None,
            deadline_exceeded: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
            status: None,
            retry_after: None,
            deadline_exceeded: false,
        }
    }

    /// The per-provider deadline expired mid-attempt.
    pub fn deadline(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
            status: None,
            retry_after: None,
            deadline_exceeded: true,
        }
    }

    /// Classifies an HTTP response status.
    ///
    /// 408, 429 and server errors are transient; remaining client errors
    /// are permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let class = match status {
            408 | 429 => FailureClass::Transient,
            500..=599 => FailureClass::Transient,
            _ => FailureClass::Permanent,
        };
        Self {
            class,
            message: message.into(),
            status: Some(status),
            retry_after: None,
            deadline_exceeded: false,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }
}

/// Per-provider outcome errors surfaced to the caller.
#[derive(Debug, Clone, Error)]
pub enum EnrichError {
    /// Provider was skipped before any attempt; not a scan failure.
    #[error("{provider}: missing credentials ({})", .missing.join(", "))]
    CredentialsMissing {
        provider: String,
        missing: Vec<String>,
    },

    /// Target rejected before any provider ran.
    #[error("invalid {kind} target: {target:?}")]
    InvalidTarget { target: String, kind: TargetType },

    /// Retries exhausted on a retryable failure class.
    #[error("{provider} failed for {target} after {attempts} attempt(s): {cause}")]
    Transient {
        provider: String,
        target: String,
        cause: String,
        attempts: u32,
    },

    /// Non-retryable provider response.
    #[error("{provider} failed for {target}: {cause}")]
    Permanent {
        provider: String,
        target: String,
        cause: String,
    },

    /// Per-provider deadline hit.
    #[error("{provider} timed out for {target} after {after:.1?}")]
    ProviderTimeout {
        provider: String,
        target: String,
        after: Duration,
    },

    /// Cooperative cancellation.
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    /// Caller asked for a provider the registry does not know.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Bug-class failure: normalizer produced an invalid record, task panic.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EnrichError {
    /// Stable machine-readable label for serialization and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EnrichError::CredentialsMissing { .. } => "credentials_missing",
            EnrichError::InvalidTarget { .. } => "invalid_target",
            EnrichError::Transient { .. } => "transient",
            EnrichError::Permanent { .. } => "permanent",
            EnrichError::ProviderTimeout { .. } => "provider_timeout",
            EnrichError::Cancelled { .. } => "cancelled",
            EnrichError::UnknownProvider(_) => "unknown_provider",
            EnrichError::Internal(_) => "internal",
        }
    }
}
