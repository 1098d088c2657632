use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{SimError, SimResult};

use super::{FeedCursor, NewsFeed, NewsItem};

/// Vector-backed feed. Items can be appended while a round runs to simulate
/// news arriving.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    items: Vec<NewsItem>,
}

impl MemoryFeed {
    pub fn new(items: Vec<NewsItem>) -> SimResult<Self> {
        let mut feed = Self::default();
        for item in items {
            feed.push(item)?;
        }
        Ok(feed)
    }

    /// Load one JSON object per line; blank lines and `#` comments are skipped.
    pub fn from_jsonl(path: &Path) -> SimResult<Self> {
        let file = File::open(path)
            .map_err(|e| SimError::upstream(format!("cannot open {}: {}", path.display(), e)))?;
        let mut feed = Self::default();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| SimError::upstream(e.to_string()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let item: NewsItem = serde_json::from_str(trimmed).map_err(|e| {
                SimError::invalid(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
            feed.push(item)?;
        }
        Ok(feed)
    }

    /// Append an item. Ids must be positive and strictly increasing.
    pub fn push(&mut self, item: NewsItem) -> SimResult<()> {
        if item.id <= 0 {
            return Err(SimError::invalid(format!("news id must be positive, got {}", item.id)));
        }
        if let Some(last) = self.items.last() {
            if item.id <= last.id {
                return Err(SimError::invalid(format!(
                    "news id {} not after {}",
                    item.id, last.id
                )));
            }
        }
        self.items.push(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn is_known(&self, id: i64) -> bool {
        self.items.binary_search_by_key(&id, |i| i.id).is_ok()
    }
}

impl NewsFeed for MemoryFeed {
    fn next_batch(&mut self, cursor: FeedCursor, limit: usize) -> SimResult<Vec<NewsItem>> {
        if cursor.last_id != 0 && !self.is_known(cursor.last_id) {
            return Err(SimError::invalid(format!("unknown feed cursor {}", cursor.last_id)));
        }
        let start = self.items.partition_point(|i| i.id <= cursor.last_id);
        Ok(self.items[start..].iter().take(limit).cloned().collect())
    }
}
