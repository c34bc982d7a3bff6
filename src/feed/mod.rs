//! Freshness-gated data cache with bounded-time refresh fallback.
//!
//! Every read answers from the in-memory snapshot and tags the result with a
//! freshness tier.  Stale reads trigger a refresh bounded by a hard timeout;
//! a failed refresh falls back to the cached entry as long as it is younger
//! than the domain's hard cutoff.  Past the cutoff the read is rejected;
//! consumers that feed monetary recommendations must refuse to answer rather
//! than work from data this old, and nothing in this module will silently
//! convert a rejected read into usable data.
//!
//! Concurrent stale reads of one key share a single in-flight refresh
//! (single-flight) so a burst of requests cannot thunder against a
//! rate-limited upstream.

pub mod policy;
pub mod retry;

pub use policy::{FreshnessPolicy, PolicySet};
pub use retry::RetryPolicy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};

use crate::providers::DataProvider;

/// The data families the assistant serves, each with its own staleness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDomain {
    Odds,
    Scores,
    Lineups,
    Matchups,
}

impl DataDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataDomain::Odds => "odds",
            DataDomain::Scores => "scores",
            DataDomain::Lineups => "lineups",
            DataDomain::Matchups => "matchups",
        }
    }

    pub fn parse(s: &str) -> Option<DataDomain> {
        match s {
            "odds" => Some(DataDomain::Odds),
            "scores" => Some(DataDomain::Scores),
            "lineups" => Some(DataDomain::Lineups),
            "matchups" => Some(DataDomain::Matchups),
            _ => None,
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical cache key: one entry per (domain, key), e.g. (Odds, "basketball_nba").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainKey {
    pub domain: DataDomain,
    pub key: String,
}

impl DomainKey {
    pub fn new(domain: DataDomain, key: impl Into<String>) -> Self {
        DomainKey {
            domain,
            key: key.into(),
        }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessTier {
    Fresh,
    Acceptable,
    StaleButServed,
    Rejected,
}

/// A cache read: the payload plus explicit staleness metadata.  Callers that
/// see `Acceptable` or `StaleButServed` must surface a staleness notice.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub payload: serde_json::Value,
    pub tier: FreshnessTier,
    pub age_secs: u64,
}

#[derive(Debug, Error)]
pub enum FeedError {
    /// Data past the hard cutoff (or missing entirely) with no fresher data
    /// obtainable.  Terminal: the caller must refuse to answer from it.
    #[error("no sufficiently fresh {domain} data for '{key}'")]
    Rejected {
        domain: DataDomain,
        key: String,
        /// Age of the unusable entry, if one existed at all
        age_secs: Option<u64>,
    },
    #[error("no provider registered for domain {0}")]
    NoProvider(DataDomain),
}

struct CacheEntry {
    payload: serde_json::Value,
    last_refreshed_at: DateTime<Utc>,
}

struct FeedInner {
    entries: RwLock<HashMap<DomainKey, CacheEntry>>,
    /// Per-key in-flight refresh markers; followers wait on the receiver
    inflight: Mutex<HashMap<DomainKey, watch::Receiver<()>>>,
    providers: HashMap<DataDomain, Arc<dyn DataProvider>>,
    policies: PolicySet,
    refresh_timeout: Duration,
    retry: RetryPolicy,
}

/// Freshness-gated cache plus fetch orchestrator.  Cheap to clone.
#[derive(Clone)]
pub struct DataFeed {
    inner: Arc<FeedInner>,
}

impl DataFeed {
    pub fn new(
        providers: HashMap<DataDomain, Arc<dyn DataProvider>>,
        policies: PolicySet,
        refresh_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        DataFeed {
            inner: Arc::new(FeedInner {
                entries: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                providers,
                policies,
                refresh_timeout,
                retry,
            }),
        }
    }

    /// Serve the most useful available snapshot for `key`.
    ///
    /// Fresh and acceptable entries return immediately.  Staler entries
    /// trigger a timeout-bounded, single-flight refresh; on failure the old
    /// entry is served (`StaleButServed`) while it remains under the hard
    /// cutoff, and rejected once past it.
    pub async fn get(&self, key: &DomainKey) -> Result<Snapshot, FeedError> {
        let policy = self.inner.policies.for_domain(key.domain);

        if let Some((payload, age)) = self.read_entry(key).await {
            if age < policy.fresh_window {
                return Ok(Snapshot {
                    payload,
                    tier: FreshnessTier::Fresh,
                    age_secs: age.as_secs(),
                });
            }
            if age < policy.acceptable_window {
                return Ok(Snapshot {
                    payload,
                    tier: FreshnessTier::Acceptable,
                    age_secs: age.as_secs(),
                });
            }
        }

        // Entry missing or past the acceptable window: refresh, then
        // re-classify whatever the cache holds afterwards.
        self.refresh_single_flight(key).await;

        match self.read_entry(key).await {
            Some((payload, age)) => match policy.tier_for_age(age) {
                FreshnessTier::Rejected => Err(FeedError::Rejected {
                    domain: key.domain,
                    key: key.key.clone(),
                    age_secs: Some(age.as_secs()),
                }),
                tier => Ok(Snapshot {
                    payload,
                    tier,
                    age_secs: age.as_secs(),
                }),
            },
            None => Err(FeedError::Rejected {
                domain: key.domain,
                key: key.key.clone(),
                age_secs: None,
            }),
        }
    }

    /// The freshness policy in force for a domain.
    pub fn policy_for(&self, domain: DataDomain) -> FreshnessPolicy {
        self.inner.policies.for_domain(domain)
    }

    /// Insert an entry directly with an explicit refresh timestamp.
    /// Used by tests to construct aged entries.
    pub async fn put(
        &self,
        key: DomainKey,
        payload: serde_json::Value,
        last_refreshed_at: DateTime<Utc>,
    ) {
        let mut entries = self.inner.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                payload,
                last_refreshed_at,
            },
        );
    }

    async fn read_entry(&self, key: &DomainKey) -> Option<(serde_json::Value, Duration)> {
        let entries = self.inner.entries.read().await;
        entries.get(key).map(|entry| {
            let age = (Utc::now() - entry.last_refreshed_at)
                .to_std()
                .unwrap_or_default();
            (entry.payload.clone(), age)
        })
    }

    /// De-duplicated refresh: the first stale reader becomes the leader and
    /// performs the upstream fetch; everyone else waits for the leader's
    /// watch channel to close, then re-reads the cache.
    async fn refresh_single_flight(&self, key: &DomainKey) {
        enum Flight {
            Leader(#[allow(dead_code)] watch::Sender<()>),
            Follower(watch::Receiver<()>),
        }

        let flight = {
            let mut inflight = self.inner.inflight.lock().await;
            match inflight.get(key) {
                Some(rx) => Flight::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(());
                    inflight.insert(key.clone(), rx);
                    Flight::Leader(tx)
                }
            }
        };

        match flight {
            Flight::Leader(_tx) => {
                self.do_refresh(key).await;
                self.inner.inflight.lock().await.remove(key);
                // _tx drops here, waking every follower
            }
            Flight::Follower(mut rx) => {
                // Err(closed) is the expected wake-up
                let _ = rx.changed().await;
            }
        }
    }

    /// One refresh attempt, bounded by the configured timeout.  The cache
    /// entry is replaced wholesale on success and untouched on any failure.
    async fn do_refresh(&self, key: &DomainKey) {
        // A previous leader may have landed a refresh while this caller was
        // waiting for the flight slot.
        let policy = self.inner.policies.for_domain(key.domain);
        if let Some((_, age)) = self.read_entry(key).await {
            if age < policy.fresh_window {
                return;
            }
        }

        let Some(provider) = self.inner.providers.get(&key.domain) else {
            warn!("No provider registered for domain '{}'", key.domain);
            return;
        };

        let fetch = self
            .inner
            .retry
            .run(|| provider.fetch(key.domain, &key.key));

        match tokio::time::timeout(self.inner.refresh_timeout, fetch).await {
            Ok(Ok(payload)) => {
                debug!("Refreshed {} from provider '{}'", key, provider.name());
                self.put(key.clone(), payload, Utc::now()).await;
            }
            Ok(Err(e)) => {
                warn!("Refresh of {} failed, serving cache fallback: {}", key, e);
            }
            Err(_) => {
                warn!(
                    "Refresh of {} timed out after {:?}, serving cache fallback",
                    key, self.inner.refresh_timeout
                );
            }
        }
    }
}
