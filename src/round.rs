//! Bounded trading rounds.
//!
//! The host loop calls [`RoundController::advance`] with one `now` per
//! iteration. Each call integrates the inventory penalty over the wall-clock
//! time since the previous call, serves at most one due news slot, and ticks
//! the market. Reaching `end_ts` force-flattens the player and freezes the
//! score.
//!
//! Lifecycle: `NotStarted -> Running -> Ended`. A new `start` after `Ended`
//! opens a fresh round on the same market and player.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::error::{SimError, SimResult};
use crate::execution::{Fill, Ingest, MarketSim};
use crate::feed::{FeedCursor, NewsFeed, NewsItem};
use crate::logging::{
    self, log, log_feed_error, log_round_summary, log_shock, obj, v_num, v_str, Domain, Level,
};
use crate::pricing::{NoiseSource, Quote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    NotStarted,
    Running,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundState {
    pub round_id: String,
    pub start_ts: f64,
    pub end_ts: f64,
    pub risk_cost: f64,
    pub feed_cursor: FeedCursor,
    /// Due time of the next slot, always `start_ts + next_slot * interval`.
    pub next_injection_ts: f64,
    pub next_slot: u32,
    pub prev_now: f64,
    pub phase: RoundPhase,
    pub injected: u32,
    pub trades: u32,
}

impl RoundState {
    fn idle(feed_cursor: FeedCursor) -> Self {
        Self {
            round_id: String::new(),
            start_ts: 0.0,
            end_ts: 0.0,
            risk_cost: 0.0,
            feed_cursor,
            next_injection_ts: 0.0,
            next_slot: 1,
            prev_now: 0.0,
            phase: RoundPhase::NotStarted,
            injected: 0,
            trades: 0,
        }
    }
}

/// Archived form of a finished round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_id: String,
    pub symbol: String,
    pub start_ts: f64,
    pub end_ts: f64,
    pub ended_at: f64,
    pub final_pnl: f64,
    pub risk_cost: f64,
    pub score: f64,
    pub injected: u32,
    pub trades: u32,
    pub ended_early: bool,
    pub config_fingerprint: String,
}

/// What one `advance` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvanceOutcome {
    /// Item injected into the ledger this call.
    pub injected: Option<NewsItem>,
    /// Items pulled and dropped by the gate this call.
    pub skipped: u32,
    /// Feed failure absorbed this call.
    pub feed_error: Option<SimError>,
    /// Mid after the tick; `None` when the round ended instead.
    pub mid: Option<f64>,
    /// Forced flatten at round end.
    pub flatten: Option<Fill>,
    pub summary: Option<RoundSummary>,
}

/// Slack when comparing a clock reading against a scheduled time, relative to
/// the magnitude of that time. Absorbs rounding between `start + k*interval`
/// and `start + duration`.
const SCHEDULE_EPS: f64 = 1e-9;

/// `now` has reached `due`, up to rounding.
fn reached(now: f64, due: f64) -> bool {
    now >= due - SCHEDULE_EPS * due.abs().max(1.0)
}

/// Convex inventory penalty rate: `lambda * |inventory|^power` per second.
pub fn risk_rate(inventory: i64, lambda: f64, power: f64) -> f64 {
    lambda * (inventory.unsigned_abs() as f64).powf(power)
}

pub struct RoundController<F: NewsFeed> {
    sim: MarketSim,
    feed: F,
    round: RoundState,
    pending: VecDeque<NewsItem>,
    last_summary: Option<RoundSummary>,
    rounds_started: u32,
}

impl<F: NewsFeed> RoundController<F> {
    pub fn new(cfg: Config, feed: F, noise: Box<dyn NoiseSource + Send>) -> SimResult<Self> {
        let sim = MarketSim::new(cfg, noise)?;
        Ok(Self::with_sim(sim, feed))
    }

    pub fn with_sim(sim: MarketSim, feed: F) -> Self {
        Self {
            sim,
            feed,
            round: RoundState::idle(FeedCursor::default()),
            pending: VecDeque::new(),
            last_summary: None,
            rounds_started: 0,
        }
    }

    fn cfg(&self) -> &Config {
        self.sim.config()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub fn start(&mut self, now0: f64) -> SimResult<()> {
        if !now0.is_finite() {
            return Err(SimError::invalid("round start must be finite"));
        }
        if self.round.phase == RoundPhase::Running {
            return Err(SimError::invalid("round already running"));
        }
        self.rounds_started += 1;
        let round_id = format!("{}-{}", logging::run_id(), self.rounds_started);
        let (duration, interval) = (self.cfg().round_secs, self.cfg().injection_interval);
        self.round = RoundState {
            round_id,
            start_ts: now0,
            end_ts: now0 + duration,
            risk_cost: 0.0,
            feed_cursor: self.round.feed_cursor,
            next_injection_ts: now0 + interval,
            next_slot: 1,
            prev_now: now0,
            phase: RoundPhase::Running,
            injected: 0,
            trades: 0,
        };
        log(
            Level::Info,
            Domain::Round,
            "round_start",
            obj(&[
                ("round_id", v_str(&self.round.round_id)),
                ("symbol", v_str(&self.cfg().symbol)),
                ("start_ts", v_num(now0)),
                ("end_ts", v_num(self.round.end_ts)),
                ("mid", v_num(self.sim.mid())),
                ("config", v_str(&self.cfg().fingerprint())),
            ]),
        );
        Ok(())
    }

    /// Drive the round forward to `now`.
    pub fn advance(&mut self, now: f64) -> SimResult<AdvanceOutcome> {
        self.ensure_running(now)?;
        self.accrue_risk(now);

        let mut outcome = AdvanceOutcome::default();
        if reached(now, self.round.end_ts) {
            // a slot falling due exactly at the bell is still served
            if reached(self.round.end_ts, self.round.next_injection_ts)
                && reached(now, self.round.next_injection_ts)
            {
                self.serve_injection(now, &mut outcome);
            }
            let (flatten, summary) = self.finish(now, false)?;
            outcome.flatten = flatten;
            outcome.summary = Some(summary);
            return Ok(outcome);
        }

        if reached(now, self.round.next_injection_ts) {
            self.serve_injection(now, &mut outcome);
        }
        outcome.mid = Some(self.sim.tick(now)?);
        Ok(outcome)
    }

    /// End a running round early. The position is flattened before scoring.
    pub fn abort(&mut self, now: f64) -> SimResult<RoundSummary> {
        self.ensure_running(now)?;
        self.accrue_risk(now);
        let (_, summary) = self.finish(now, true)?;
        Ok(summary)
    }

    // ---------------------------------------------------------------------
    // Player actions
    // ---------------------------------------------------------------------

    pub fn buy(&mut self, qty: i64, now: f64) -> SimResult<Fill> {
        self.ensure_tradable(now)?;
        let fill = self.sim.buy(qty, now)?;
        self.round.trades += 1;
        Ok(fill)
    }

    pub fn sell(&mut self, qty: i64, now: f64) -> SimResult<Fill> {
        self.ensure_tradable(now)?;
        let fill = self.sim.sell(qty, now)?;
        self.round.trades += 1;
        Ok(fill)
    }

    pub fn flatten(&mut self, now: f64) -> SimResult<Option<Fill>> {
        self.ensure_tradable(now)?;
        let fill = self.sim.flatten(now)?;
        if fill.is_some() {
            self.round.trades += 1;
        }
        Ok(fill)
    }

    /// Inject a shock directly, bypassing the feed and its gate.
    pub fn add_shock(&mut self, direction: i8, impact: f64, now: f64) -> SimResult<()> {
        self.ensure_tradable(now)?;
        let shock = self.sim.add_shock(direction, impact, now)?;
        let live = self.sim.pricing().ledger().len();
        log_shock(shock.direction, shock.impact, shock.start_ts, live);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Observability
    // ---------------------------------------------------------------------

    pub fn phase(&self) -> RoundPhase {
        self.round.phase
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn risk_cost(&self) -> f64 {
        self.round.risk_cost
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

    /// Live score while running, frozen score once ended.
    pub fn score(&self) -> f64 {
        match (&self.round.phase, &self.last_summary) {
            (RoundPhase::Ended, Some(summary)) => summary.score,
            _ => self.sim.pnl() - self.round.risk_cost,
        }
    }

    pub fn time_left(&self, now: f64) -> f64 {
        match self.round.phase {
            RoundPhase::Running => (self.round.end_ts - now).max(0.0),
            _ => 0.0,
        }
    }

    pub fn last_summary(&self) -> Option<&RoundSummary> {
        self.last_summary.as_ref()
    }

    pub fn sim(&self) -> &MarketSim {
        &self.sim
    }

    pub fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn ensure_running(&self, now: f64) -> SimResult<()> {
        if !now.is_finite() {
            return Err(SimError::invalid("timestamp must be finite"));
        }
        match self.round.phase {
            RoundPhase::Running => Ok(()),
            RoundPhase::Ended => Err(SimError::RoundFinished),
            RoundPhase::NotStarted => Err(SimError::invalid("round not started")),
        }
    }

    /// Trades past the bell are refused; the next `advance` closes the round.
    fn ensure_tradable(&mut self, now: f64) -> SimResult<()> {
        self.ensure_running(now)?;
        if reached(now, self.round.end_ts) {
            return Err(SimError::RoundFinished);
        }
        self.accrue_risk(now);
        Ok(())
    }

    /// Integrate the penalty over `[prev_now, now]` at the inventory held
    /// during that span. A clock that steps back accrues nothing.
    fn accrue_risk(&mut self, now: f64) {
        let elapsed = now - self.round.prev_now;
        if elapsed <= 0.0 {
            return;
        }
        let rate = risk_rate(
            self.sim.inventory(),
            self.cfg().inv_penalty_lambda,
            self.cfg().inv_penalty_power,
        );
        self.round.risk_cost += rate * elapsed;
        self.round.prev_now = now;
    }

    /// Serve one injection slot: pull until a usable item is injected or the
    /// feed runs dry, then move the schedule forward by one interval.
    fn serve_injection(&mut self, now: f64, outcome: &mut AdvanceOutcome) {
        let min_impact = self.cfg().min_impact;
        loop {
            let item = match self.next_unconsumed() {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(err) => {
                    log_feed_error(err.kind(), &err.to_string(), self.round.feed_cursor.last_id);
                    outcome.feed_error = Some(err);
                    break;
                }
            };
            self.round.feed_cursor.advance(item.id);

            match self.sim.ingest(&item, min_impact, now) {
                Ingest::Injected(_) => {
                    self.round.injected += 1;
                    log(
                        Level::Info,
                        Domain::Feed,
                        "news_injected",
                        obj(&[
                            ("round_id", v_str(&self.round.round_id)),
                            ("news_id", json!(item.id)),
                            ("headline", v_str(&item.headline)),
                        ]),
                    );
                    outcome.injected = Some(item);
                    break;
                }
                Ingest::Gated | Ingest::Rejected(_) => outcome.skipped += 1,
            }
        }
        let interval = self.cfg().injection_interval;
        self.round.next_slot += 1;
        self.round.next_injection_ts =
            self.round.start_ts + f64::from(self.round.next_slot) * interval;
    }

    /// Next item past the cursor, refilling from the feed when the buffer is
    /// drained. Ids at or below the cursor are dropped even if the feed
    /// hands them out again.
    fn next_unconsumed(&mut self) -> SimResult<Option<NewsItem>> {
        let cursor = self.round.feed_cursor;
        self.pending.retain(|item| !cursor.has_consumed(item.id));
        if self.pending.is_empty() {
            let batch = self.feed.next_batch(cursor, self.cfg().feed_batch)?;
            self.pending
                .extend(batch.into_iter().filter(|item| !cursor.has_consumed(item.id)));
        }
        Ok(self.pending.pop_front())
    }

    fn finish(&mut self, now: f64, early: bool) -> SimResult<(Option<Fill>, RoundSummary)> {
        let flatten = self.sim.flatten(now)?;
        if flatten.is_some() {
            self.round.trades += 1;
        }
        self.round.phase = RoundPhase::Ended;

        let final_pnl = self.sim.pnl();
        let summary = RoundSummary {
            round_id: self.round.round_id.clone(),
            symbol: self.cfg().symbol.clone(),
            start_ts: self.round.start_ts,
            end_ts: self.round.end_ts,
            ended_at: now,
            final_pnl,
            risk_cost: self.round.risk_cost,
            score: final_pnl - self.round.risk_cost,
            injected: self.round.injected,
            trades: self.round.trades,
            ended_early: early,
            config_fingerprint: self.cfg().fingerprint(),
        };
        log_round_summary(
            &summary.round_id,
            summary.final_pnl,
            summary.risk_cost,
            summary.score,
            summary.injected,
            early,
        );
        self.last_summary = Some(summary.clone());
        Ok((flatten, summary))
    }
}
