//! The core exposed to the chat/UI layer.
//!
//! Five operations: serve domain data with explicit freshness, detect
//! pricing discrepancies, detect sharp-money signals, log a bet, settle a
//! bet.  The two detectors only ever see quotes that came through the feed's
//! freshness gate; a `Rejected` read propagates out as an error so the caller
//! can answer "I don't have sufficiently fresh data for that" instead of
//! quoting stale numbers.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::models::{Bet, BetOutcome, Discrepancy, LedgerEntry, Quote};
use crate::db::{BankrollSummary, Database};
use crate::detector::{
    detect_discrepancies, detect_sharp_signals, DiscrepancyConfig, PublicSplit, SharpConfig,
    SharpSignal,
};
use crate::feed::{DataDomain, DataFeed, DomainKey, FeedError, Snapshot};
use crate::settlement::{self, SettleError, SettlementResult};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Carries `FeedError::Rejected`: the terminal "data too old to trust"
    /// condition the caller must surface, never paper over.
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Settle(#[from] SettleError),
    #[error("cached payload did not parse: {0}")]
    Payload(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bankroll seeded for a user's first bet
    pub initial_bankroll: f64,
    pub discrepancy: DiscrepancyConfig,
    pub sharp: SharpConfig,
}

/// Engine façade over the feed, the detectors, and the settlement ledger.
/// Cheap to clone; all dependencies are injected at construction.
#[derive(Clone)]
pub struct Engine {
    feed: DataFeed,
    db: Database,
    config: Arc<EngineConfig>,
    /// Per-sport high-water mark of archived quote observations, so repeated
    /// reads of one cached snapshot do not duplicate archive rows.
    archive_watermark: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl Engine {
    pub fn new(feed: DataFeed, db: Database, config: EngineConfig) -> Self {
        Engine {
            feed,
            db,
            config: Arc::new(config),
            archive_watermark: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `getData`: a domain payload with its freshness tier and age.
    pub async fn get_data(&self, domain: DataDomain, key: &str) -> Result<Snapshot, EngineError> {
        let snapshot = self.feed.get(&DomainKey::new(domain, key)).await?;
        if domain == DataDomain::Odds {
            // Keep the sharp detector's line-movement history current.
            if let Ok(quotes) = parse_quotes(&snapshot.payload) {
                self.archive_new_quotes(key, &quotes);
            }
        }
        Ok(snapshot)
    }

    /// `detectDiscrepancies`: widest cross-book pricing gaps for a sport.
    ///
    /// Refuses (via `FeedError::Rejected`) when no fresh-enough odds exist.
    pub async fn detect_discrepancies(
        &self,
        sport: &str,
        min_bookmakers: Option<usize>,
    ) -> Result<Vec<Discrepancy>, EngineError> {
        let snapshot = self
            .feed
            .get(&DomainKey::new(DataDomain::Odds, sport))
            .await?;
        let quotes = parse_quotes(&snapshot.payload).map_err(EngineError::Payload)?;
        self.archive_new_quotes(sport, &quotes);

        let mut config = self.config.discrepancy;
        if let Some(n) = min_bookmakers {
            config.min_bookmakers = n;
        }
        let hard_cutoff = self.feed.policy_for(DataDomain::Odds).hard_cutoff;
        let records = detect_discrepancies(&quotes, &config, hard_cutoff, Utc::now());

        if let Err(e) = self.db.insert_discrepancy_audit(&records) {
            warn!("Failed to write discrepancy audit rows: {}", e);
        }
        Ok(records)
    }

    /// `detectSharpSignals`: reverse line movement, steam, and sharp-book
    /// consensus over the archived quote history for a sport.
    pub async fn detect_sharp_signals(
        &self,
        sport: &str,
    ) -> Result<Vec<SharpSignal>, EngineError> {
        // Gate on current odds first; this also tops up the archive.
        let snapshot = self
            .feed
            .get(&DomainKey::new(DataDomain::Odds, sport))
            .await?;
        let quotes = parse_quotes(&snapshot.payload).map_err(EngineError::Payload)?;
        self.archive_new_quotes(sport, &quotes);

        let hard_cutoff = self.feed.policy_for(DataDomain::Odds).hard_cutoff;
        let since = Utc::now()
            - chrono::Duration::from_std(hard_cutoff).unwrap_or(chrono::Duration::zero());
        let history = self.db.list_quotes_since(sport, since)?;

        let splits = self.public_splits(sport).await;
        Ok(detect_sharp_signals(
            &history,
            &splits,
            &self.config.sharp,
            Utc::now(),
        ))
    }

    /// `logBet`: record a pending bet against the user's bankroll.
    pub fn log_bet(
        &self,
        user_id: &str,
        amount: f64,
        odds: i32,
        description: &str,
    ) -> Result<Bet, EngineError> {
        Ok(settlement::log_bet(
            &self.db,
            user_id,
            amount,
            odds,
            description,
            self.config.initial_bankroll,
        )?)
    }

    /// `settleBet`: transition a bet to its declared outcome and move the
    /// bankroll, atomically.
    pub fn settle_bet(
        &self,
        user_id: &str,
        bet_ref: &str,
        outcome: BetOutcome,
        actual_return: Option<f64>,
    ) -> Result<SettlementResult, EngineError> {
        Ok(settlement::settle_bet(
            &self.db,
            user_id,
            bet_ref,
            outcome,
            actual_return,
        )?)
    }

    pub fn list_bets(&self, user_id: &str, limit: i64) -> Result<Vec<Bet>, EngineError> {
        Ok(self.db.list_bets(user_id, limit)?)
    }

    pub fn bankroll(
        &self,
        user_id: &str,
    ) -> Result<(BankrollSummary, Vec<LedgerEntry>), EngineError> {
        let summary = self.db.get_bankroll_summary(user_id)?;
        let ledger = self.db.list_ledger(user_id, 50)?;
        Ok((summary, ledger))
    }

    /// Public betting splits ride along in the matchups payload when the
    /// provider has them.  They are an enhancement for reverse-line-movement
    /// detection, not monetary data, so a missing or rejected matchups read
    /// just disables that one detector.
    async fn public_splits(&self, sport: &str) -> Vec<PublicSplit> {
        match self
            .feed
            .get(&DomainKey::new(DataDomain::Matchups, sport))
            .await
        {
            Ok(snapshot) => snapshot
                .payload
                .get("public_splits")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            Err(e) => {
                debug!("No matchup data for '{}' ({}), skipping RLM inputs", sport, e);
                Vec::new()
            }
        }
    }

    /// Archive quotes newer than the sport's watermark.  Quote rows are
    /// immutable, so this only ever appends.
    fn archive_new_quotes(&self, sport: &str, quotes: &[Quote]) {
        let fresh: Vec<Quote> = {
            let mut watermark = self.archive_watermark.lock().unwrap();
            let mark = watermark.entry(sport.to_string()).or_insert(DateTime::UNIX_EPOCH);
            let fresh: Vec<Quote> = quotes
                .iter()
                .filter(|q| q.observed_at > *mark)
                .cloned()
                .collect();
            if let Some(newest) = fresh.iter().map(|q| q.observed_at).max() {
                *mark = newest;
            }
            fresh
        };
        if fresh.is_empty() {
            return;
        }
        if let Err(e) = self.db.insert_quotes(&fresh) {
            warn!("Failed to archive {} quotes: {}", fresh.len(), e);
        }
    }
}

fn parse_quotes(payload: &serde_json::Value) -> Result<Vec<Quote>, String> {
    serde_json::from_value(payload.clone()).map_err(|e| e.to_string())
}
