use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bookmaker's price for one outcome of one market of one event.
///
/// Immutable once recorded: a later observation of the same outcome is a new
/// `Quote` row, never an update.  The append-only archive is what the
/// sharp-money detector replays for line-movement history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Provider's event/game ID
    pub event_id: String,
    pub sport: String,
    /// Scheduled start of the event
    pub commence_time: DateTime<Utc>,
    pub bookmaker: String,
    pub market: MarketKind,
    /// e.g. team name, "Over", "Under"
    pub outcome_name: String,
    /// American odds
    pub price: i32,
    /// Line value for spreads/totals
    pub point: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Moneyline,
    Spread,
    Total,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Moneyline => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
        }
    }

    pub fn parse(s: &str) -> Option<MarketKind> {
        match s {
            "moneyline" | "h2h" => Some(MarketKind::Moneyline),
            "spread" | "spreads" => Some(MarketKind::Spread),
            "total" | "totals" => Some(MarketKind::Total),
            _ => None,
        }
    }
}

/// A user-declared informal bet tracked against the virtual bankroll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Option<i64>,
    pub user_id: String,
    /// Stake in bankroll units (USD)
    pub amount: f64,
    /// American odds at which the bet was taken
    pub odds: i32,
    /// Free-text description, e.g. "Lakers -4.5 vs Celtics"
    pub description: String,
    pub outcome: BetOutcome,
    /// Total returned at settlement (stake + profit); None while pending
    pub actual_return: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Bet lifecycle: created `Pending`, transitions exactly once to a terminal
/// state and is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetOutcome {
    Pending,
    Win,
    Loss,
    Push,
}

impl BetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetOutcome::Pending => "pending",
            BetOutcome::Win => "win",
            BetOutcome::Loss => "loss",
            BetOutcome::Push => "push",
        }
    }

    pub fn parse(s: &str) -> Option<BetOutcome> {
        match s {
            "pending" => Some(BetOutcome::Pending),
            "win" => Some(BetOutcome::Win),
            "loss" => Some(BetOutcome::Loss),
            "push" => Some(BetOutcome::Push),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetOutcome::Pending)
    }
}

/// Append-only bankroll ledger entry.  The user's balance is the
/// `balance_after` of their most recent entry; full history is
/// reconstructable by replaying `amount` deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Option<i64>,
    pub user_id: String,
    pub entry_type: LedgerEntryType,
    /// Signed delta applied to the bankroll
    pub amount: f64,
    pub balance_after: f64,
    /// The settled bet, for bet-driven entries
    pub bet_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// The widest implied-probability gap across bookmakers for one outcome.
///
/// Derived and recomputed on every detection pass; rows written to the
/// `discrepancy_audit` table are a trail, not a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub event_id: String,
    pub market: MarketKind,
    pub outcome_name: String,
    pub commence_time: DateTime<Utc>,
    /// Lowest implied probability seen (0.0–1.0)
    pub probability_low: f64,
    /// Highest implied probability seen (0.0–1.0)
    pub probability_high: f64,
    pub bookmaker_low: String,
    pub bookmaker_high: String,
    pub num_bookmakers: usize,
    /// `probability_high − probability_low`, in percentage points
    pub difference_pp: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    BetWon,
    BetLost,
    BetPushed,
    ManualAdjustment,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::BetWon => "bet_won",
            LedgerEntryType::BetLost => "bet_lost",
            LedgerEntryType::BetPushed => "bet_pushed",
            LedgerEntryType::ManualAdjustment => "manual_adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<LedgerEntryType> {
        match s {
            "bet_won" => Some(LedgerEntryType::BetWon),
            "bet_lost" => Some(LedgerEntryType::BetLost),
            "bet_pushed" => Some(LedgerEntryType::BetPushed),
            "manual_adjustment" => Some(LedgerEntryType::ManualAdjustment),
            _ => None,
        }
    }

    pub fn for_outcome(outcome: BetOutcome) -> Option<LedgerEntryType> {
        match outcome {
            BetOutcome::Win => Some(LedgerEntryType::BetWon),
            BetOutcome::Loss => Some(LedgerEntryType::BetLost),
            BetOutcome::Push => Some(LedgerEntryType::BetPushed),
            BetOutcome::Pending => None,
        }
    }
}
