use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection behind a mutex).
///
/// The mutex doubles as the serialization point the settlement path needs:
/// only one transaction runs at a time, and the `pending → terminal`
/// compare-and-swap inside it decides races on the same bet.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Bets ─────────────────────────────────────────────────────────────────

    /// Insert a new pending bet, returning its id
    pub fn insert_bet(&self, bet: &Bet) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bets (user_id, amount, odds, description, outcome, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bet.user_id,
                bet.amount,
                bet.odds,
                bet.description,
                bet.outcome.as_str(),
                bet.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch one of the user's bets by id
    pub fn get_bet(&self, user_id: &str, bet_id: i64) -> Result<Option<Bet>> {
        let conn = self.conn.lock().unwrap();
        let bet = conn
            .query_row(
                "SELECT id, user_id, amount, odds, description, outcome,
                        actual_return, created_at, settled_at
                 FROM bets WHERE id = ?1 AND user_id = ?2",
                params![bet_id, user_id],
                map_bet,
            )
            .optional()?;
        Ok(bet)
    }

    /// List the user's pending bets, oldest first
    pub fn list_pending_bets(&self, user_id: &str) -> Result<Vec<Bet>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount, odds, description, outcome,
                    actual_return, created_at, settled_at
             FROM bets WHERE user_id = ?1 AND outcome = 'pending'
             ORDER BY created_at ASC",
        )?;
        let bets = stmt
            .query_map(params![user_id], map_bet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bets)
    }

    /// List the user's bets, newest first
    pub fn list_bets(&self, user_id: &str, limit: i64) -> Result<Vec<Bet>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount, odds, description, outcome,
                    actual_return, created_at, settled_at
             FROM bets WHERE user_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let bets = stmt
            .query_map(params![user_id, limit], map_bet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bets)
    }

    /// Settle a bet and record the bankroll delta in one transaction.
    ///
    /// The UPDATE is a compare-and-swap on `outcome = 'pending'`: of two
    /// concurrent settlement attempts exactly one sees an affected row.  The
    /// loser gets `Ok(None)` and no mutation.  On success the ledger entry
    /// and the bet transition commit together or not at all.
    pub fn settle_bet_atomic(
        &self,
        user_id: &str,
        bet_id: i64,
        outcome: BetOutcome,
        actual_return: f64,
        profit: f64,
        settled_at: DateTime<Utc>,
    ) -> Result<Option<(f64, f64)>> {
        let entry_type = LedgerEntryType::for_outcome(outcome)
            .ok_or_else(|| anyhow::anyhow!("cannot settle to a non-terminal outcome"))?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE bets SET outcome = ?1, actual_return = ?2, settled_at = ?3
             WHERE id = ?4 AND user_id = ?5 AND outcome = 'pending'",
            params![outcome.as_str(), actual_return, settled_at, bet_id, user_id],
        )?;
        if updated == 0 {
            // Lost the race (or the bet was already terminal); nothing changed.
            return Ok(None);
        }

        let previous_balance: f64 = tx
            .query_row(
                "SELECT balance_after FROM bankroll_ledger
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0.0);
        let new_balance = previous_balance + profit;

        tx.execute(
            "INSERT INTO bankroll_ledger (user_id, entry_type, amount, balance_after, bet_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                entry_type.as_str(),
                profit,
                new_balance,
                bet_id,
                settled_at,
            ],
        )?;

        tx.commit()?;
        Ok(Some((previous_balance, new_balance)))
    }

    // ── Bankroll ledger ──────────────────────────────────────────────────────

    /// Current balance: `balance_after` of the user's latest ledger entry
    pub fn get_balance(&self, user_id: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let balance = conn
            .query_row(
                "SELECT balance_after FROM bankroll_ledger
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance)
    }

    /// Seed a user's bankroll with an initial manual adjustment if they have
    /// no ledger history yet.  Returns the resulting balance either way.
    pub fn ensure_bankroll_seeded(&self, user_id: &str, initial_balance: f64) -> Result<f64> {
        if let Some(balance) = self.get_balance(user_id)? {
            return Ok(balance);
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bankroll_ledger (user_id, entry_type, amount, balance_after, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                LedgerEntryType::ManualAdjustment.as_str(),
                initial_balance,
                initial_balance,
                Utc::now(),
            ],
        )?;
        Ok(initial_balance)
    }

    /// List a user's ledger entries, newest first
    pub fn list_ledger(&self, user_id: &str, limit: i64) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, entry_type, amount, balance_after, bet_id, created_at
             FROM bankroll_ledger WHERE user_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![user_id, limit], map_ledger_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Aggregate bankroll stats for one user
    pub fn get_bankroll_summary(&self, user_id: &str) -> Result<BankrollSummary> {
        let conn = self.conn.lock().unwrap();
        let count_where = |clause: &str| -> i64 {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM bets WHERE user_id = ?1 AND {}", clause),
                params![user_id],
                |r| r.get(0),
            )
            .unwrap_or(0)
        };
        let pending_bets = count_where("outcome = 'pending'");
        let wins = count_where("outcome = 'win'");
        let losses = count_where("outcome = 'loss'");
        let pushes = count_where("outcome = 'push'");
        let net_profit: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM bankroll_ledger
                 WHERE user_id = ?1 AND entry_type != 'manual_adjustment'",
                params![user_id],
                |r| r.get(0),
            )
            .unwrap_or(0.0);
        let current_balance: f64 = conn
            .query_row(
                "SELECT balance_after FROM bankroll_ledger
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or(0.0);
        Ok(BankrollSummary {
            current_balance,
            pending_bets,
            wins,
            losses,
            pushes,
            net_profit,
        })
    }

    // ── Quote archive ────────────────────────────────────────────────────────

    /// Append observed quotes.  Rows are immutable; re-observations insert
    /// new rows rather than updating old ones.
    pub fn insert_quotes(&self, quotes: &[Quote]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO quotes (event_id, sport, commence_time, bookmaker, market,
                                     outcome_name, price, point, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for q in quotes {
                stmt.execute(params![
                    q.event_id,
                    q.sport,
                    q.commence_time,
                    q.bookmaker,
                    q.market.as_str(),
                    q.outcome_name,
                    q.price,
                    q.point,
                    q.observed_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Quotes for a sport observed at or after `since`, oldest first.
    /// The detector's line-movement history.
    pub fn list_quotes_since(&self, sport: &str, since: DateTime<Utc>) -> Result<Vec<Quote>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT event_id, sport, commence_time, bookmaker, market,
                    outcome_name, price, point, observed_at
             FROM quotes WHERE sport = ?1 AND observed_at >= ?2
             ORDER BY observed_at ASC",
        )?;
        let quotes = stmt
            .query_map(params![sport, since], map_quote)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(quotes)
    }

    // ── Discrepancy audit trail ──────────────────────────────────────────────

    pub fn insert_discrepancy_audit(&self, records: &[Discrepancy]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO discrepancy_audit (event_id, market, outcome_name, probability_low,
                                                probability_high, bookmaker_low, bookmaker_high,
                                                num_bookmakers, difference_pp, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for d in records {
                stmt.execute(params![
                    d.event_id,
                    d.market.as_str(),
                    d.outcome_name,
                    d.probability_low,
                    d.probability_high,
                    d.bookmaker_low,
                    d.bookmaker_high,
                    d.num_bookmakers as i64,
                    d.difference_pp,
                    d.computed_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_bet(row: &rusqlite::Row) -> rusqlite::Result<Bet> {
    let outcome_str: String = row.get(5)?;
    Ok(Bet {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        odds: row.get(3)?,
        description: row.get(4)?,
        outcome: BetOutcome::parse(&outcome_str).unwrap_or(BetOutcome::Pending),
        actual_return: row.get(6)?,
        created_at: row.get(7)?,
        settled_at: row.get(8)?,
    })
}

fn map_ledger_entry(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
    let type_str: String = row.get(2)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        entry_type: LedgerEntryType::parse(&type_str)
            .unwrap_or(LedgerEntryType::ManualAdjustment),
        amount: row.get(3)?,
        balance_after: row.get(4)?,
        bet_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_quote(row: &rusqlite::Row) -> rusqlite::Result<Quote> {
    let market_str: String = row.get(4)?;
    Ok(Quote {
        event_id: row.get(0)?,
        sport: row.get(1)?,
        commence_time: row.get(2)?,
        bookmaker: row.get(3)?,
        market: MarketKind::parse(&market_str).unwrap_or(MarketKind::Moneyline),
        outcome_name: row.get(5)?,
        price: row.get(6)?,
        point: row.get(7)?,
        observed_at: row.get(8)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bets (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT    NOT NULL,
    amount        REAL    NOT NULL,
    odds          INTEGER NOT NULL,
    description   TEXT    NOT NULL,
    outcome       TEXT    NOT NULL DEFAULT 'pending',
    actual_return REAL,
    created_at    TEXT    NOT NULL,
    settled_at    TEXT
);

CREATE TABLE IF NOT EXISTS bankroll_ledger (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT    NOT NULL,
    entry_type    TEXT    NOT NULL,
    amount        REAL    NOT NULL,
    balance_after REAL    NOT NULL,
    bet_id        INTEGER,
    created_at    TEXT    NOT NULL,
    FOREIGN KEY (bet_id) REFERENCES bets(id)
);

CREATE TABLE IF NOT EXISTS quotes (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id      TEXT    NOT NULL,
    sport         TEXT    NOT NULL,
    commence_time TEXT    NOT NULL,
    bookmaker     TEXT    NOT NULL,
    market        TEXT    NOT NULL,
    outcome_name  TEXT    NOT NULL,
    price         INTEGER NOT NULL,
    point         REAL,
    observed_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS discrepancy_audit (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id         TEXT    NOT NULL,
    market           TEXT    NOT NULL,
    outcome_name     TEXT    NOT NULL,
    probability_low  REAL    NOT NULL,
    probability_high REAL    NOT NULL,
    bookmaker_low    TEXT    NOT NULL,
    bookmaker_high   TEXT    NOT NULL,
    num_bookmakers   INTEGER NOT NULL,
    difference_pp    REAL    NOT NULL,
    computed_at      TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bets_user_outcome ON bets(user_id, outcome);
CREATE INDEX IF NOT EXISTS idx_ledger_user ON bankroll_ledger(user_id, id);
CREATE INDEX IF NOT EXISTS idx_quotes_sport_observed ON quotes(sport, observed_at);
CREATE INDEX IF NOT EXISTS idx_quotes_event ON quotes(event_id);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankrollSummary {
    pub current_balance: f64,
    pub pending_bets: i64,
    pub wins: i64,
    pub losses: i64,
    pub pushes: i64,
    pub net_profit: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bet(user: &str, desc: &str) -> Bet {
        Bet {
            id: None,
            user_id: user.into(),
            amount: 100.0,
            odds: -110,
            description: desc.into(),
            outcome: BetOutcome::Pending,
            actual_return: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn test_insert_and_list_pending() {
        let db = Database::open_in_memory().unwrap();
        db.insert_bet(&make_bet("u1", "Lakers ML")).unwrap();
        db.insert_bet(&make_bet("u1", "Celtics -3.5")).unwrap();
        db.insert_bet(&make_bet("u2", "Knicks ML")).unwrap();

        let pending = db.list_pending_bets("u1").unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|b| b.outcome == BetOutcome::Pending));
    }

    #[test]
    fn test_settle_atomic_cas_fires_once() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_bankroll_seeded("u1", 1000.0).unwrap();
        let id = db.insert_bet(&make_bet("u1", "Lakers ML")).unwrap();

        let first = db
            .settle_bet_atomic("u1", id, BetOutcome::Win, 190.91, 90.91, Utc::now())
            .unwrap();
        assert!(first.is_some());
        let (prev, new) = first.unwrap();
        assert!((prev - 1000.0).abs() < 1e-9);
        assert!((new - 1090.91).abs() < 1e-9);

        // Second attempt loses the CAS and mutates nothing.
        let second = db
            .settle_bet_atomic("u1", id, BetOutcome::Loss, 0.0, -100.0, Utc::now())
            .unwrap();
        assert!(second.is_none());
        assert!((db.get_balance("u1").unwrap().unwrap() - 1090.91).abs() < 1e-9);

        let bet = db.get_bet("u1", id).unwrap().unwrap();
        assert_eq!(bet.outcome, BetOutcome::Win);
    }

    #[test]
    fn test_ledger_replay_matches_balance() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_bankroll_seeded("u1", 500.0).unwrap();
        let id1 = db.insert_bet(&make_bet("u1", "Bet one")).unwrap();
        let id2 = db.insert_bet(&make_bet("u1", "Bet two")).unwrap();
        db.settle_bet_atomic("u1", id1, BetOutcome::Win, 190.91, 90.91, Utc::now())
            .unwrap();
        db.settle_bet_atomic("u1", id2, BetOutcome::Loss, 0.0, -100.0, Utc::now())
            .unwrap();

        let entries = db.list_ledger("u1", 100).unwrap();
        let replayed: f64 = entries.iter().map(|e| e.amount).sum();
        let balance = db.get_balance("u1").unwrap().unwrap();
        assert!((replayed - balance).abs() < 1e-9);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert!((db.ensure_bankroll_seeded("u1", 250.0).unwrap() - 250.0).abs() < 1e-9);
        // Re-seeding must not stack a second adjustment.
        assert!((db.ensure_bankroll_seeded("u1", 250.0).unwrap() - 250.0).abs() < 1e-9);
        assert_eq!(db.list_ledger("u1", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_quote_archive_roundtrip_window() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let old = now - chrono::Duration::hours(5);
        let quotes = vec![
            models::Quote {
                event_id: "e1".into(),
                sport: "basketball_nba".into(),
                commence_time: now + chrono::Duration::hours(2),
                bookmaker: "pinnacle".into(),
                market: models::MarketKind::Moneyline,
                outcome_name: "Lakers".into(),
                price: -110,
                point: None,
                observed_at: now,
            },
            models::Quote {
                event_id: "e1".into(),
                sport: "basketball_nba".into(),
                commence_time: now + chrono::Duration::hours(2),
                bookmaker: "pinnacle".into(),
                market: models::MarketKind::Moneyline,
                outcome_name: "Lakers".into(),
                price: -120,
                point: None,
                observed_at: old,
            },
        ];
        db.insert_quotes(&quotes).unwrap();

        let recent = db
            .list_quotes_since("basketball_nba", now - chrono::Duration::hours(2))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].price, -110);
    }
}
