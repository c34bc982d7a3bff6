//! American-odds math shared by the signal detectors and the settlement ledger.
//!
//! American odds quote prices relative to a 100-unit stake: positive odds show
//! the profit on a 100 stake (+150 → bet 100 to win 150), negative odds show
//! the stake needed to profit 100 (-110 → bet 110 to win 100).  Both the
//! discrepancy detector and the payout calculator convert through the same
//! functions here so the two subsystems can never disagree on a price.

use crate::db::models::BetOutcome;

/// Smallest legal magnitude for an American price.  Values in (-100, 100)
/// other than 0 do not exist in the format; 0 is undefined.
pub const MIN_AMERICAN_MAGNITUDE: i32 = 100;

/// Whether `odds` is a well-formed American price.
pub fn validate_american(odds: i32) -> bool {
    odds.abs() >= MIN_AMERICAN_MAGNITUDE
}

/// Convert an American price to its implied win probability.
///
/// - `odds > 0`: `p = 100 / (odds + 100)`
/// - `odds < 0`: `p = |odds| / (|odds| + 100)`
///
/// Always in (0, 1) for valid input.  `-110 → 0.5238`, `+150 → 0.4`.
pub fn implied_probability(odds: i32) -> f64 {
    debug_assert!(validate_american(odds), "invalid American odds {}", odds);
    let o = odds as f64;
    if odds > 0 {
        100.0 / (o + 100.0)
    } else {
        o.abs() / (o.abs() + 100.0)
    }
}

/// Total amount returned to the bettor when a bet wins (stake + profit).
///
/// - `odds > 0`: `stake + stake * (odds / 100)`
/// - `odds < 0`: `stake + stake * (100 / |odds|)`
pub fn win_return(stake: f64, odds: i32) -> f64 {
    debug_assert!(stake > 0.0, "stake must be positive");
    let o = odds as f64;
    if odds > 0 {
        stake + stake * (o / 100.0)
    } else {
        stake + stake * (100.0 / o.abs())
    }
}

/// Total amount returned for a settled bet: full win return on a win, the
/// stake back on a push, nothing on a loss.
pub fn settlement_return(stake: f64, odds: i32, outcome: BetOutcome) -> f64 {
    match outcome {
        BetOutcome::Win => win_return(stake, odds),
        BetOutcome::Push => stake,
        BetOutcome::Loss => 0.0,
        // Pending bets have no return; callers reject this before computing.
        BetOutcome::Pending => 0.0,
    }
}

/// Expected value of a stake at a given price under an estimated win
/// probability: `p * profit_if_win − (1 − p) * stake`.
pub fn expected_value(win_prob: f64, stake: f64, odds: i32) -> f64 {
    debug_assert!((0.0..=1.0).contains(&win_prob), "win_prob out of range");
    let profit_if_win = win_return(stake, odds) - stake;
    win_prob * profit_if_win - (1.0 - win_prob) * stake
}

/// Strip the bookmaker margin from a full market.
///
/// Implied probabilities across all outcomes of one market sum to more than 1
/// (the vig).  Dividing each by the overround yields the fair probabilities
/// the prices would imply with no margin.  Returns an empty vector for an
/// empty market.
pub fn no_vig_probabilities(prices: &[i32]) -> Vec<f64> {
    let implied: Vec<f64> = prices.iter().map(|&o| implied_probability(o)).collect();
    let overround: f64 = implied.iter().sum();
    if overround <= 0.0 {
        return Vec::new();
    }
    implied.into_iter().map(|p| p / overround).collect()
}
