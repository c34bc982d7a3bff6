use std::time::Duration;

use super::{DataDomain, FreshnessTier};

/// Staleness thresholds for one data domain.
///
/// `fresh_window < acceptable_window < hard_cutoff`.  Data younger than the
/// fresh window is served as-is; inside the acceptable window it is served
/// with a staleness notice; between acceptable and hard cutoff it is only a
/// fallback for failed refreshes; past the hard cutoff it is unusable.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    pub fresh_window: Duration,
    pub acceptable_window: Duration,
    pub hard_cutoff: Duration,
}

impl FreshnessPolicy {
    pub fn new(fresh_window: Duration, acceptable_window: Duration, hard_cutoff: Duration) -> Self {
        FreshnessPolicy {
            fresh_window,
            acceptable_window,
            hard_cutoff,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fresh_window >= self.acceptable_window
            || self.acceptable_window >= self.hard_cutoff
        {
            anyhow::bail!(
                "freshness windows must be strictly increasing: {:?} < {:?} < {:?}",
                self.fresh_window,
                self.acceptable_window,
                self.hard_cutoff
            );
        }
        Ok(())
    }

    /// Classify an entry's age.  `StaleButServed` here means "in the fallback
    /// band": the feed only returns it after a refresh attempt has failed.
    pub fn tier_for_age(&self, age: Duration) -> FreshnessTier {
        if age < self.fresh_window {
            FreshnessTier::Fresh
        } else if age < self.acceptable_window {
            FreshnessTier::Acceptable
        } else if age < self.hard_cutoff {
            FreshnessTier::StaleButServed
        } else {
            FreshnessTier::Rejected
        }
    }
}

/// Per-domain freshness policies.  Odds move fastest and have the tightest
/// windows; lineup and matchup data barely changes intra-day.
#[derive(Debug, Clone)]
pub struct PolicySet {
    odds: FreshnessPolicy,
    scores: FreshnessPolicy,
    lineups: FreshnessPolicy,
    matchups: FreshnessPolicy,
}

impl Default for PolicySet {
    fn default() -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        PolicySet {
            odds: FreshnessPolicy::new(minutes(5), minutes(30), minutes(120)),
            scores: FreshnessPolicy::new(Duration::from_secs(60), minutes(10), minutes(60)),
            lineups: FreshnessPolicy::new(minutes(15), minutes(60), minutes(240)),
            matchups: FreshnessPolicy::new(minutes(15), minutes(60), minutes(240)),
        }
    }
}

impl PolicySet {
    pub fn for_domain(&self, domain: DataDomain) -> FreshnessPolicy {
        match domain {
            DataDomain::Odds => self.odds,
            DataDomain::Scores => self.scores,
            DataDomain::Lineups => self.lineups,
            DataDomain::Matchups => self.matchups,
        }
    }

    /// Override one domain's policy (the thresholds are tunables, not truths)
    pub fn with_policy(mut self, domain: DataDomain, policy: FreshnessPolicy) -> Self {
        match domain {
            DataDomain::Odds => self.odds = policy,
            DataDomain::Scores => self.scores = policy,
            DataDomain::Lineups => self.lineups = policy,
            DataDomain::Matchups => self.matchups = policy,
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.odds.validate()?;
        self.scores.validate()?;
        self.lineups.validate()?;
        self.matchups.validate()?;
        Ok(())
    }
}
