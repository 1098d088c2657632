use anyhow::Result;
use rusqlite::{params, Connection};

use crate::round::RoundSummary;

/// Archive of finished rounds.
pub struct RoundStore {
    conn: Connection,
}

impl RoundStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS rounds (
                round_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                start_ts REAL NOT NULL,
                end_ts REAL NOT NULL,
                ended_at REAL NOT NULL,
                final_pnl REAL NOT NULL,
                risk_cost REAL NOT NULL,
                score REAL NOT NULL,
                injected INTEGER NOT NULL,
                trades INTEGER NOT NULL,
                ended_early INTEGER NOT NULL,
                config_fingerprint TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS rounds_by_end ON rounds (ended_at);
            COMMIT;",
        )?;
        Ok(())
    }

    /// Insert or replace one summary.
    pub fn persist_round(&mut self, s: &RoundSummary) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO rounds (round_id, symbol, start_ts, end_ts, ended_at,
                final_pnl, risk_cost, score, injected, trades, ended_early, config_fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                s.round_id,
                s.symbol,
                s.start_ts,
                s.end_ts,
                s.ended_at,
                s.final_pnl,
                s.risk_cost,
                s.score,
                s.injected as i64,
                s.trades as i64,
                s.ended_early,
                s.config_fingerprint
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most recently ended rounds first.
    pub fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT round_id, symbol, start_ts, end_ts, ended_at, final_pnl, risk_cost,
                    score, injected, trades, ended_early, config_fingerprint
             FROM rounds ORDER BY ended_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |r| {
            Ok(RoundSummary {
                round_id: r.get(0)?,
                symbol: r.get(1)?,
                start_ts: r.get(2)?,
                end_ts: r.get(3)?,
                ended_at: r.get(4)?,
                final_pnl: r.get(5)?,
                risk_cost: r.get(6)?,
                score: r.get(7)?,
                injected: r.get::<_, i64>(8)? as u32,
                trades: r.get::<_, i64>(9)? as u32,
                ended_early: r.get(10)?,
                config_fingerprint: r.get(11)?,
            })
        })?;
        let rounds = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rounds)
    }

    /// Best score recorded for `symbol`, if any round was archived.
    pub fn best_score(&self, symbol: &str) -> Result<Option<f64>> {
        let best = self.conn.query_row(
            "SELECT MAX(score) FROM rounds WHERE symbol = ?1",
            params![symbol],
            |r| r.get::<_, Option<f64>>(0),
        )?;
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, ended_at: f64, score: f64) -> RoundSummary {
        RoundSummary {
            round_id: id.to_string(),
            symbol: "AMZN".to_string(),
            start_ts: ended_at - 30.0,
            end_ts: ended_at,
            ended_at,
            final_pnl: score + 1.0,
            risk_cost: 1.0,
            score,
            injected: 2,
            trades: 5,
            ended_early: false,
            config_fingerprint: "abcdef0123456789".to_string(),
        }
    }

    #[test]
    fn test_persist_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.db");
        let mut store = RoundStore::new(path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        store.persist_round(&summary("a", 30.0, -2.5)).unwrap();
        store.persist_round(&summary("b", 60.0, 4.0)).unwrap();

        let rounds = store.recent_rounds(10).unwrap();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0], summary("b", 60.0, 4.0));
        assert_eq!(rounds[1].round_id, "a");
        assert_eq!(store.recent_rounds(1).unwrap().len(), 1);
    }

    #[test]
    fn test_init_is_idempotent_and_replace_by_id() {
        let mut store = RoundStore::in_memory().unwrap();
        store.init().unwrap();
        store.init().unwrap();
        store.persist_round(&summary("a", 30.0, 1.0)).unwrap();
        let mut again = summary("a", 30.0, 3.0);
        again.ended_early = true;
        store.persist_round(&again).unwrap();
        let rounds = store.recent_rounds(10).unwrap();
        assert_eq!(rounds, vec![again]);
    }

    #[test]
    fn test_best_score() {
        let mut store = RoundStore::in_memory().unwrap();
        store.init().unwrap();
        assert_eq!(store.best_score("AMZN").unwrap(), None);
        store.persist_round(&summary("a", 30.0, 1.0)).unwrap();
        store.persist_round(&summary("b", 60.0, 7.5)).unwrap();
        assert_eq!(store.best_score("AMZN").unwrap(), Some(7.5));
        assert_eq!(store.best_score("AAPL").unwrap(), None);
    }
}
