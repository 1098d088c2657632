//! Fills against the engine's quotes, and the player ledger they update.

use serde::Serialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{SimError, SimResult};
use crate::feed::NewsItem;
use crate::logging::{log, log_fill, log_shock, obj, v_num, v_str, Domain, Level};
use crate::pricing::{NoiseSource, PricingEngine, Quote};
use crate::shock::Shock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fill {
    pub side: Side,
    pub qty: i64,
    pub price: f64,
    pub fee: f64,
    pub ts: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Player {
    pub cash: f64,
    pub inventory: i64,
}

impl Player {
    /// Mark-to-market value at `mid`.
    pub fn pnl(&self, mid: f64) -> f64 {
        self.cash + self.inventory as f64 * mid
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionModel {
    fee_per_share: f64,
    slip0: f64,
}

impl ExecutionModel {
    pub fn new(cfg: &Config) -> Self {
        Self {
            fee_per_share: cfg.fee_per_share,
            slip0: cfg.slip0,
        }
    }

    /// Quote plus impact-scaled slippage, always against the taker.
    pub fn fill_price(&self, side: Side, quote: &Quote) -> f64 {
        let slippage = self.slip0 * quote.impact;
        match side {
            Side::Buy => quote.ask + slippage,
            Side::Sell => quote.bid - slippage,
        }
    }

    pub fn buy(
        &self,
        player: &mut Player,
        pricing: &PricingEngine,
        qty: i64,
        now: f64,
    ) -> SimResult<Fill> {
        self.execute(player, pricing, Side::Buy, qty, now)
    }

    pub fn sell(
        &self,
        player: &mut Player,
        pricing: &PricingEngine,
        qty: i64,
        now: f64,
    ) -> SimResult<Fill> {
        self.execute(player, pricing, Side::Sell, qty, now)
    }

    /// Close the whole position with one order. `None` when already flat.
    pub fn flatten(
        &self,
        player: &mut Player,
        pricing: &PricingEngine,
        now: f64,
    ) -> SimResult<Option<Fill>> {
        match player.inventory {
            0 => Ok(None),
            inv if inv > 0 => self.sell(player, pricing, inv, now).map(Some),
            inv => {
                let qty = inv
                    .checked_neg()
                    .ok_or_else(|| SimError::invalid("inventory too large to flatten"))?;
                self.buy(player, pricing, qty, now).map(Some)
            }
        }
    }

    fn execute(
        &self,
        player: &mut Player,
        pricing: &PricingEngine,
        side: Side,
        qty: i64,
        now: f64,
    ) -> SimResult<Fill> {
        if qty <= 0 {
            return Err(SimError::invalid(format!("trade qty must be positive, got {}", qty)));
        }
        if !now.is_finite() {
            return Err(SimError::invalid("trade timestamp must be finite"));
        }

        let quote = pricing.quotes(now);
        let price = self.fill_price(side, &quote);
        let fee = self.fee_per_share * qty as f64;
        let notional = price * qty as f64;

        let (cash, inventory) = match side {
            Side::Buy => (player.cash - notional - fee, player.inventory.checked_add(qty)),
            Side::Sell => (player.cash + notional - fee, player.inventory.checked_sub(qty)),
        };
        let inventory = inventory.ok_or_else(|| SimError::invalid("inventory overflow"))?;
        if !cash.is_finite() {
            return Err(SimError::invalid("non-finite cash after fill"));
        }

        player.cash = cash;
        player.inventory = inventory;
        log_fill(side.as_str(), qty, price, fee, player.inventory, player.cash);

        Ok(Fill { side, qty, price, fee, ts: now })
    }
}

/// What happened to a news item offered to the market.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    Injected(Shock),
    /// Neutral or below the impact gate.
    Gated,
    /// Failed shock validation (bad direction, non-finite impact).
    Rejected(SimError),
}

/// One market and one player: the engine state a round controller drives.
#[derive(Debug)]
pub struct MarketSim {
    pricing: PricingEngine,
    exec: ExecutionModel,
    player: Player,
}

impl MarketSim {
    pub fn new(cfg: Config, noise: Box<dyn NoiseSource + Send>) -> SimResult<Self> {
        let exec = ExecutionModel::new(&cfg);
        let pricing = PricingEngine::new(cfg, noise)?;
        Ok(Self { pricing, exec, player: Player::default() })
    }

    pub fn config(&self) -> &Config {
        self.pricing.config()
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    pub fn player(&self) -> Player {
        self.player
    }

    pub fn mid(&self) -> f64 {
        self.pricing.mid()
    }

    pub fn cash(&self) -> f64 {
        self.player.cash
    }

    pub fn inventory(&self) -> i64 {
        self.player.inventory
    }

    pub fn quotes(&self, now: f64) -> Quote {
        self.pricing.quotes(now)
    }

    pub fn pnl(&self) -> f64 {
        self.player.pnl(self.pricing.mid())
    }

    pub fn add_shock(&mut self, direction: i8, impact: f64, ts: f64) -> SimResult<Shock> {
        self.pricing.add_shock(direction, impact, ts)
    }

    pub fn tick(&mut self, now: f64) -> SimResult<f64> {
        self.pricing.tick(now)
    }

    /// Gate one feed item and, if it passes, inject it as a shock at `now`.
    pub fn ingest(&mut self, item: &NewsItem, min_impact: f64, now: f64) -> Ingest {
        if !item.passes_gate(min_impact) {
            log(
                Level::Debug,
                Domain::Feed,
                "news_gated",
                obj(&[
                    ("news_id", json!(item.id)),
                    ("direction", json!(item.direction)),
                    ("impact", v_num(item.impact)),
                ]),
            );
            return Ingest::Gated;
        }
        match self.pricing.add_shock(item.direction, item.impact, now) {
            Ok(shock) => {
                let live = self.pricing.ledger().len();
                log_shock(shock.direction, shock.impact, shock.start_ts, live);
                Ingest::Injected(shock)
            }
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Feed,
                    "news_rejected",
                    obj(&[("news_id", json!(item.id)), ("reason", v_str(&err.to_string()))]),
                );
                Ingest::Rejected(err)
            }
        }
    }

    pub fn buy(&mut self, qty: i64, now: f64) -> SimResult<Fill> {
        self.exec.buy(&mut self.player, &self.pricing, qty, now)
    }

    pub fn sell(&mut self, qty: i64, now: f64) -> SimResult<Fill> {
        self.exec.sell(&mut self.player, &self.pricing, qty, now)
    }

    pub fn flatten(&mut self, now: f64) -> SimResult<Option<Fill>> {
        self.exec.flatten(&mut self.player, &self.pricing, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::FixedNoise;

    const EPS: f64 = 1e-9;

    fn sim() -> MarketSim {
        MarketSim::new(Config::default(), Box::new(FixedNoise(0.0))).unwrap()
    }

    #[test]
    fn test_buy_fills_at_ask_plus_slippage() {
        let mut sim = sim();
        sim.add_shock(1, 0.5, 0.0).unwrap();
        let q = sim.quotes(0.0);
        let fill = sim.buy(3, 0.0).unwrap();
        assert!((fill.price - (q.ask + 0.03 * 0.5)).abs() < EPS);
        assert!((fill.fee - 0.003).abs() < EPS);
        assert_eq!(sim.inventory(), 3);
        assert!((sim.cash() + fill.price * 3.0 + 0.003).abs() < EPS);
    }

    #[test]
    fn test_sell_fills_at_bid_minus_slippage() {
        let mut sim = sim();
        sim.add_shock(-1, 0.4, 0.0).unwrap();
        let q = sim.quotes(0.0);
        let fill = sim.sell(2, 0.0).unwrap();
        assert!((fill.price - (q.bid - 0.03 * 0.4)).abs() < EPS);
        assert_eq!(sim.inventory(), -2);
        assert!((sim.cash() - (fill.price * 2.0 - 0.002)).abs() < EPS);
    }

    #[test]
    fn test_round_trip_costs_spread_slippage_and_fees() {
        let mut sim = sim();
        sim.add_shock(0, 0.6, 0.0).unwrap();
        let now = 1.5;
        let q = sim.quotes(now);
        let qty = 7;
        let cash0 = sim.cash();
        sim.buy(qty, now).unwrap();
        sim.sell(qty, now).unwrap();
        let q_f = qty as f64;
        let expected = q.spread * q_f + 2.0 * 0.03 * q.impact * q_f + 2.0 * 0.001 * q_f;
        assert!((cash0 - sim.cash() - expected).abs() < EPS);
        assert_eq!(sim.inventory(), 0);
    }

    #[test]
    fn test_flatten_from_long_short_and_flat() {
        let mut sim = sim();
        assert_eq!(sim.flatten(0.0).unwrap(), None);

        sim.buy(12, 0.0).unwrap();
        let fill = sim.flatten(0.0).unwrap().unwrap();
        assert_eq!(fill.side, Side::Sell);
        assert_eq!(fill.qty, 12);
        assert_eq!(sim.inventory(), 0);

        sim.sell(5, 0.0).unwrap();
        let fill = sim.flatten(0.0).unwrap().unwrap();
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.qty, 5);
        assert_eq!(sim.inventory(), 0);
    }

    #[test]
    fn test_pnl_equals_cash_when_flat() {
        let mut sim = sim();
        sim.buy(4, 0.0).unwrap();
        sim.tick(0.0).unwrap();
        sim.flatten(0.1).unwrap();
        assert_eq!(sim.pnl(), sim.cash());
    }

    #[test]
    fn test_pnl_marks_inventory_at_mid() {
        let mut sim = sim();
        sim.buy(10, 0.0).unwrap();
        let expected = sim.cash() + 10.0 * sim.mid();
        assert!((sim.pnl() - expected).abs() < EPS);
    }

    #[test]
    fn test_non_positive_qty_rejected_without_side_effects() {
        let mut sim = sim();
        for qty in [0, -3] {
            assert!(matches!(sim.buy(qty, 0.0), Err(SimError::InvalidArgument(_))));
            assert!(matches!(sim.sell(qty, 0.0), Err(SimError::InvalidArgument(_))));
        }
        assert_eq!(sim.player(), Player::default());
    }

    #[test]
    fn test_ingest_gates_and_rejects() {
        let mut sim = sim();
        let item = |direction, impact| NewsItem { id: 1, headline: String::new(), direction, impact };
        assert_eq!(sim.ingest(&item(0, 0.9), 0.15, 0.0), Ingest::Gated);
        assert_eq!(sim.ingest(&item(1, 0.1), 0.15, 0.0), Ingest::Gated);
        assert!(matches!(sim.ingest(&item(2, 0.5), 0.15, 0.0), Ingest::Rejected(_)));
        assert!(sim.pricing().ledger().is_empty());
        match sim.ingest(&item(-1, 0.4), 0.15, 1.0) {
            Ingest::Injected(shock) => assert_eq!(shock.start_ts, 1.0),
            other => panic!("expected injection, got {:?}", other),
        }
        assert_eq!(sim.pricing().ledger().len(), 1);
    }

    #[test]
    fn test_overflow_is_atomic() {
        let mut sim = sim();
        sim.buy(i64::MAX, 0.0).unwrap();
        let before = sim.player();
        assert!(sim.buy(1, 0.0).is_err());
        assert_eq!(sim.player(), before);
    }
}
