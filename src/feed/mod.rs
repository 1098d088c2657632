//! Scored news feed consumed by the round controller.
//!
//! A feed hands out items in ascending id order, strictly after a cursor.
//! The controller owns the cursor and moves it forward only over items it has
//! consumed, so an id is never applied twice.

use serde::{Deserialize, Serialize};

use crate::error::SimResult;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryFeed;
pub use sqlite::SqliteFeed;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: i64,
    /// Display only; the engine never reads it.
    #[serde(default)]
    pub headline: String,
    pub direction: i8,
    pub impact: f64,
}

impl NewsItem {
    /// Uninformative items (neutral or below the gate) are skipped, not injected.
    pub fn passes_gate(&self, min_impact: f64) -> bool {
        self.direction != 0 && self.impact >= min_impact
    }
}

/// Position in the feed: the last id handed to the engine. Zero means "from
/// the beginning".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCursor {
    pub last_id: i64,
}

impl FeedCursor {
    pub fn new(last_id: i64) -> Self {
        Self { last_id }
    }

    /// Move past `id`. Never moves backwards.
    pub fn advance(&mut self, id: i64) {
        self.last_id = self.last_id.max(id);
    }

    pub fn has_consumed(&self, id: i64) -> bool {
        id <= self.last_id
    }
}

pub trait NewsFeed {
    /// Up to `limit` items with `id > cursor.last_id`, ascending by id.
    ///
    /// Empty when nothing new is available. An unknown non-zero cursor is an
    /// `InvalidArgument`; a failed query is `UpstreamUnavailable`.
    fn next_batch(&mut self, cursor: FeedCursor, limit: usize) -> SimResult<Vec<NewsItem>>;
}

impl<F: NewsFeed + ?Sized> NewsFeed for Box<F> {
    fn next_batch(&mut self, cursor: FeedCursor, limit: usize) -> SimResult<Vec<NewsItem>> {
        (**self).next_batch(cursor, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(direction: i8, impact: f64) -> NewsItem {
        NewsItem { id: 1, headline: String::new(), direction, impact }
    }

    #[test]
    fn test_gate() {
        assert!(item(1, 0.15).passes_gate(0.15));
        assert!(item(-1, 0.9).passes_gate(0.15));
        assert!(!item(0, 0.9).passes_gate(0.15));
        assert!(!item(1, 0.149).passes_gate(0.15));
    }

    #[test]
    fn test_cursor_never_moves_back() {
        let mut c = FeedCursor::default();
        c.advance(5);
        c.advance(3);
        assert_eq!(c.last_id, 5);
        assert!(c.has_consumed(5));
        assert!(!c.has_consumed(6));
    }
}
