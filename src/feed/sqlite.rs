use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::json;

use crate::error::{SimError, SimResult};
use crate::logging::{log, obj, Domain, Level};

use super::{FeedCursor, NewsFeed, NewsItem};

/// Reads scored headlines for one symbol out of the news store
/// (`symbols`, `news_items`, `news_predictions`).
pub struct SqliteFeed {
    conn: Connection,
    symbol_id: i64,
}

fn upstream(e: rusqlite::Error) -> SimError {
    SimError::upstream(e.to_string())
}

impl SqliteFeed {
    pub fn open(path: &str, symbol: &str) -> SimResult<Self> {
        let conn = Connection::open(path).map_err(upstream)?;
        Self::with_connection(conn, symbol)
    }

    pub fn with_connection(conn: Connection, symbol: &str) -> SimResult<Self> {
        let symbol_id: Option<i64> = conn
            .query_row("SELECT id FROM symbols WHERE symbol = ?1", params![symbol], |r| r.get(0))
            .optional()
            .map_err(upstream)?;
        let symbol_id = symbol_id
            .ok_or_else(|| SimError::config(format!("symbol {} not found in news store", symbol)))?;
        Ok(Self { conn, symbol_id })
    }

    pub fn symbol_id(&self) -> i64 {
        self.symbol_id
    }

    fn cursor_known(&self, last_id: i64) -> SimResult<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM news_items WHERE id = ?1 AND symbol_id = ?2",
                params![last_id, self.symbol_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(upstream)?;
        Ok(hit.is_some())
    }
}

/// Numeric column as f64; NULL, text and blobs give `None`.
fn real(v: ValueRef<'_>) -> Option<f64> {
    match v {
        ValueRef::Real(x) => Some(x),
        ValueRef::Integer(i) => Some(i as f64),
        _ => None,
    }
}

fn integer(v: ValueRef<'_>) -> Option<i64> {
    match v {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(x) if x.fract() == 0.0 => Some(x as i64),
        _ => None,
    }
}

/// Decode one joined row. Only the id is mandatory: a row whose score
/// columns are NULL or mistyped comes back neutral with zero impact, so the
/// gate drops it and the cursor still moves past it.
fn decode_row(row: &Row<'_>) -> rusqlite::Result<NewsItem> {
    let id: i64 = row.get(0)?;
    let headline = match row.get_ref(1)? {
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        _ => String::new(),
    };
    let scored = integer(row.get_ref(2)?).zip(real(row.get_ref(3)?));
    let (direction, impact) = match scored {
        // out-of-range directions are rejected later at ingestion
        Some((d, i)) => (d.clamp(i8::MIN as i64, i8::MAX as i64) as i8, i),
        None => {
            log(
                Level::Warn,
                Domain::Feed,
                "news_row_unscored",
                obj(&[("news_id", json!(id))]),
            );
            (0, 0.0)
        }
    };
    Ok(NewsItem { id, headline, direction, impact })
}

impl NewsFeed for SqliteFeed {
    fn next_batch(&mut self, cursor: FeedCursor, limit: usize) -> SimResult<Vec<NewsItem>> {
        if cursor.last_id != 0 && !self.cursor_known(cursor.last_id)? {
            return Err(SimError::invalid(format!("unknown feed cursor {}", cursor.last_id)));
        }
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT n.id, n.headline, p.direction, p.impact_score
                 FROM news_items n
                 JOIN news_predictions p ON p.news_id = n.id
                 WHERE n.symbol_id = ?1 AND n.id > ?2
                 ORDER BY n.id ASC
                 LIMIT ?3",
            )
            .map_err(upstream)?;
        let mut rows = stmt
            .query(params![self.symbol_id, cursor.last_id, limit as i64])
            .map_err(upstream)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(upstream)? {
            items.push(decode_row(row).map_err(upstream)?);
        }
        Ok(items)
    }
}
