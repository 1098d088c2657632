//! Continuous play with no rounds.
//!
//! Every `advance` ticks the market and then drains whatever the feed has
//! past the cursor, injecting each item that clears the gate. There is no
//! injection cadence, no inventory penalty and no score; the session runs
//! until the host closes it, which flattens the player.

use serde_json::json;

use crate::config::Config;
use crate::error::{SimError, SimResult};
use crate::execution::{Fill, Ingest, MarketSim};
use crate::feed::{FeedCursor, NewsFeed, NewsItem};
use crate::logging::{log, log_feed_error, obj, v_num, v_str, Domain, Level};
use crate::pricing::{NoiseSource, Quote};

/// What one streaming `advance` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    pub mid: f64,
    /// Items injected this call, in feed order.
    pub injected: Vec<NewsItem>,
    pub skipped: u32,
    pub feed_error: Option<SimError>,
}

pub struct StreamController<F: NewsFeed> {
    sim: MarketSim,
    feed: F,
    cursor: FeedCursor,
    closed: bool,
}

impl<F: NewsFeed> StreamController<F> {
    pub fn new(cfg: Config, feed: F, noise: Box<dyn NoiseSource + Send>) -> SimResult<Self> {
        let sim = MarketSim::new(cfg, noise)?;
        Ok(Self { sim, feed, cursor: FeedCursor::default(), closed: false })
    }

    /// Tick, then poll the feed once and inject every item that passes.
    pub fn advance(&mut self, now: f64) -> SimResult<StreamOutcome> {
        self.ensure_open(now)?;
        let mut outcome = StreamOutcome { mid: self.sim.tick(now)?, ..Default::default() };

        let batch = match self.feed.next_batch(self.cursor, self.sim.config().feed_batch) {
            Ok(batch) => batch,
            Err(err) => {
                log_feed_error(err.kind(), &err.to_string(), self.cursor.last_id);
                outcome.feed_error = Some(err);
                return Ok(outcome);
            }
        };

        let min_impact = self.sim.config().min_impact;
        for item in batch {
            if self.cursor.has_consumed(item.id) {
                continue;
            }
            self.cursor.advance(item.id);
            match self.sim.ingest(&item, min_impact, now) {
                Ingest::Injected(_) => {
                    log(
                        Level::Info,
                        Domain::Feed,
                        "news_injected",
                        obj(&[("news_id", json!(item.id)), ("headline", v_str(&item.headline))]),
                    );
                    outcome.injected.push(item);
                }
                Ingest::Gated | Ingest::Rejected(_) => outcome.skipped += 1,
            }
        }
        Ok(outcome)
    }

    pub fn buy(&mut self, qty: i64, now: f64) -> SimResult<Fill> {
        self.ensure_open(now)?;
        self.sim.buy(qty, now)
    }

    pub fn sell(&mut self, qty: i64, now: f64) -> SimResult<Fill> {
        self.ensure_open(now)?;
        self.sim.sell(qty, now)
    }

    pub fn flatten(&mut self, now: f64) -> SimResult<Option<Fill>> {
        self.ensure_open(now)?;
        self.sim.flatten(now)
    }

    /// Flatten and stop accepting calls. Returns the closing fill, if any.
    pub fn close(&mut self, now: f64) -> SimResult<Option<Fill>> {
        self.ensure_open(now)?;
        let fill = self.sim.flatten(now)?;
        self.closed = true;
        log(
            Level::Info,
            Domain::System,
            "stream_closed",
            obj(&[
                ("pnl", v_num(self.sim.pnl())),
                ("cursor", json!(self.cursor.last_id)),
            ]),
        );
        Ok(fill)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn cursor(&self) -> FeedCursor {
        self.cursor
    }

    pub fn quotes(&self, now: f64) -> Quote {
        self.sim.quotes(now)
    }

    pub fn mid(&self) -> f64 {
        self.sim.mid()
    }

    pub fn cash(&self) -> f64 {
        self.sim.cash()
    }

    pub fn inventory(&self) -> i64 {
        self.sim.inventory()
    }

    pub fn pnl(&self) -> f64 {
        self.sim.pnl()
    }

    pub fn sim(&self) -> &MarketSim {
        &self.sim
    }

    pub fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    fn ensure_open(&self, now: f64) -> SimResult<()> {
        if !now.is_finite() {
            return Err(SimError::invalid("timestamp must be finite"));
        }
        if self.closed {
            return Err(SimError::RoundFinished);
        }
        Ok(())
    }
}
