//! Upstream data providers.
//!
//! Providers are explicitly constructed and handed to the feed at startup,
//! never held in lazily-initialized globals, so tests can substitute fakes without
//! touching shared state.  A provider performs exactly one fetch per call;
//! retries, timeouts, and staleness judgement belong to the fetch
//! orchestrator, not here.

pub mod nba_stats;
pub mod odds_api;

pub use nba_stats::NbaStats;
pub use odds_api::TheOddsApi;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::feed::DataDomain;

/// Trait every upstream provider implements.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Fetch one domain payload for a logical key (e.g. a sport slug).
    /// The returned JSON is the normalized payload the cache stores verbatim.
    async fn fetch(&self, domain: DataDomain, key: &str)
        -> Result<serde_json::Value, ProviderError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429; the retry policy backs off harder for these
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream returned HTTP {status}")]
    Http { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
    #[error("domain {0} not served by this provider")]
    UnsupportedDomain(DataDomain),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Timeout => true,
            ProviderError::Transport(_) => true,
            ProviderError::Http { status } => *status >= 500,
            ProviderError::Malformed(_) | ProviderError::UnsupportedDomain(_) => false,
        }
    }

    /// Map a reqwest failure into the taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Classify a non-success HTTP status, pulling `Retry-After` for 429s.
pub(crate) fn error_for_status(resp: &reqwest::Response) -> Option<ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return None;
    }
    if status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Some(ProviderError::RateLimited { retry_after });
    }
    Some(ProviderError::Http {
        status: status.as_u16(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Http { status: 502 }.is_retryable());
        assert!(!ProviderError::Http { status: 404 }.is_retryable());
        assert!(!ProviderError::Malformed("bad json".into()).is_retryable());
    }
}
