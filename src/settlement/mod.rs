//! Bet lifecycle and bankroll settlement.
//!
//! A bet is created `pending` and transitions exactly once to `win`, `loss`,
//! or `push`.  Settlement resolves the caller's (possibly fuzzy) bet
//! reference, computes the payout from the recorded American odds, and
//! commits the outcome transition and the bankroll ledger entry in one
//! database transaction.  An imprecise reference never settles anything:
//! zero matches and multiple matches are both surfaced back to the caller
//! with no mutation.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::db::models::{Bet, BetOutcome};
use crate::db::Database;
use crate::odds;

#[derive(Debug, Error)]
pub enum SettleError {
    #[error("no pending bet matches '{bet_ref}'")]
    NotFound { bet_ref: String },
    /// More than one pending bet matches; candidates returned so the caller
    /// can ask the user which one they meant.  Nothing was mutated.
    #[error("{} pending bets match '{bet_ref}'", candidates.len())]
    AmbiguousMatch {
        bet_ref: String,
        candidates: Vec<Bet>,
    },
    /// The referenced bet is already terminal.  Re-settling must fail, not
    /// reapply.
    #[error("bet {bet_id} was already settled as {existing_outcome:?}")]
    SettlementConflict {
        bet_id: i64,
        existing_outcome: BetOutcome,
    },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementResult {
    pub bet: Bet,
    pub profit: f64,
    pub actual_return: f64,
    pub previous_balance: f64,
    pub new_balance: f64,
}

/// Validate and record a new pending bet.
pub fn log_bet(
    db: &Database,
    user_id: &str,
    amount: f64,
    odds_price: i32,
    description: &str,
    initial_balance: f64,
) -> Result<Bet, SettleError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(SettleError::Validation(format!(
            "stake must be positive, got {}",
            amount
        )));
    }
    if !odds::validate_american(odds_price) {
        return Err(SettleError::Validation(format!(
            "odds must be American format with |odds| >= 100, got {}",
            odds_price
        )));
    }
    let description = description.trim();
    if description.is_empty() {
        return Err(SettleError::Validation(
            "bet description must not be empty".into(),
        ));
    }

    let balance = db
        .ensure_bankroll_seeded(user_id, initial_balance)
        .map_err(SettleError::Storage)?;
    if amount > balance {
        return Err(SettleError::Validation(format!(
            "stake {:.2} exceeds bankroll {:.2}",
            amount, balance
        )));
    }

    let mut bet = Bet {
        id: None,
        user_id: user_id.to_string(),
        amount,
        odds: odds_price,
        description: description.to_string(),
        outcome: BetOutcome::Pending,
        actual_return: None,
        created_at: Utc::now(),
        settled_at: None,
    };
    let id = db.insert_bet(&bet).map_err(SettleError::Storage)?;
    bet.id = Some(id);
    info!(
        "Logged bet #{} for {}: {:.2} at {} on '{}'",
        id, user_id, amount, odds_price, bet.description
    );
    Ok(bet)
}

/// Settle one of the user's bets.
///
/// `bet_ref` is either an exact bet id (numeric) or a free-text fragment
/// matched case-insensitively against pending bet descriptions.  With
/// multiple matches nothing is settled; the candidates come back in
/// `AmbiguousMatch` for the caller to disambiguate; guessing among them
/// would risk settling the wrong bet.
pub fn settle_bet(
    db: &Database,
    user_id: &str,
    bet_ref: &str,
    outcome: BetOutcome,
    actual_return: Option<f64>,
) -> Result<SettlementResult, SettleError> {
    if !outcome.is_terminal() {
        return Err(SettleError::Validation(
            "settlement outcome must be win, loss, or push".into(),
        ));
    }
    if let Some(r) = actual_return {
        if !r.is_finite() || r < 0.0 {
            return Err(SettleError::Validation(format!(
                "actual return must be non-negative, got {}",
                r
            )));
        }
    }

    let bet = resolve_bet_ref(db, user_id, bet_ref)?;
    let bet_id = bet.id.expect("bet from storage has an id");
    if bet.outcome.is_terminal() {
        return Err(SettleError::SettlementConflict {
            bet_id,
            existing_outcome: bet.outcome,
        });
    }

    let actual_return =
        actual_return.unwrap_or_else(|| odds::settlement_return(bet.amount, bet.odds, outcome));
    let profit = actual_return - bet.amount;
    let settled_at = Utc::now();

    let balances = db
        .settle_bet_atomic(user_id, bet_id, outcome, actual_return, profit, settled_at)
        .map_err(SettleError::Storage)?;
    let Some((previous_balance, new_balance)) = balances else {
        // A concurrent settlement won the compare-and-swap between our read
        // and the transaction.
        let existing = db
            .get_bet(user_id, bet_id)
            .map_err(SettleError::Storage)?
            .map(|b| b.outcome)
            .unwrap_or(BetOutcome::Pending);
        return Err(SettleError::SettlementConflict {
            bet_id,
            existing_outcome: existing,
        });
    };

    let settled = db
        .get_bet(user_id, bet_id)
        .map_err(SettleError::Storage)?
        .ok_or_else(|| SettleError::Storage(anyhow::anyhow!("settled bet vanished")))?;
    info!(
        "Settled bet #{} for {} as {:?}: return {:.2}, profit {:+.2}, balance {:.2} -> {:.2}",
        bet_id, user_id, outcome, actual_return, profit, previous_balance, new_balance
    );

    Ok(SettlementResult {
        bet: settled,
        profit,
        actual_return,
        previous_balance,
        new_balance,
    })
}

/// Resolve a bet reference against the user's bets.
///
/// A numeric reference addresses a bet id directly (terminal bets included,
/// so re-settling by id reports a conflict instead of "not found").  Text
/// references only search pending bets.
fn resolve_bet_ref(db: &Database, user_id: &str, bet_ref: &str) -> Result<Bet, SettleError> {
    let trimmed = bet_ref.trim();
    if trimmed.is_empty() {
        return Err(SettleError::Validation("bet reference must not be empty".into()));
    }

    if let Ok(id) = trimmed.parse::<i64>() {
        if let Some(bet) = db.get_bet(user_id, id).map_err(SettleError::Storage)? {
            return Ok(bet);
        }
        return Err(SettleError::NotFound {
            bet_ref: trimmed.to_string(),
        });
    }

    let needle = trimmed.to_lowercase();
    let pending = db.list_pending_bets(user_id).map_err(SettleError::Storage)?;
    let mut matches: Vec<Bet> = pending
        .into_iter()
        .filter(|bet| bet.description.to_lowercase().contains(&needle))
        .collect();

    match matches.len() {
        0 => Err(SettleError::NotFound {
            bet_ref: trimmed.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        _ => Err(SettleError::AmbiguousMatch {
            bet_ref: trimmed.to_string(),
            candidates: matches,
        }),
    }
}
