//! Mid-price process and quote derivation.
//!
//! The mid follows a log-normal random walk whose drift comes from the
//! directional shocks in the ledger (clamped per tick) and whose volatility
//! scales with aggregate impact:
//!
//! ```text
//! mid' = max(MID_FLOOR, mid * exp(drift*dt + sigma*sqrt(dt)*eps))
//! sigma = base_sigma * (1 + 2.5*impact)
//! spread = base_spread * (1 + 3*impact)
//! ```

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::Serialize;

use crate::config::Config;
use crate::error::{SimError, SimResult};
use crate::logging::log_tick;
use crate::shock::{Shock, ShockLedger};

/// Lowest mid the engine will ever report.
pub const MID_FLOOR: f64 = 0.01;

/// Per-second drift bound applied before integrating a tick.
pub const DRIFT_CLAMP: f64 = 0.25;

const SPREAD_IMPACT_MULT: f64 = 3.0;
const SIGMA_IMPACT_MULT: f64 = 2.5;

/// Source of standard-normal variates for the diffusion term.
pub trait NoiseSource {
    fn standard_normal(&mut self) -> f64;
}

/// Default noise: `StdRng` drawing from `StandardNormal`.
#[derive(Debug, Clone)]
pub struct SeededNoise {
    rng: StdRng,
}

impl SeededNoise {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Seeded when `seed` is set, entropy otherwise.
    pub fn from_config(cfg: &Config) -> Self {
        match cfg.seed {
            Some(seed) => Self::new(seed),
            None => Self::from_entropy(),
        }
    }
}

impl NoiseSource for SeededNoise {
    fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.rng)
    }
}

/// Returns the same variate every draw. Zero gives the pure drift path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedNoise(pub f64);

impl NoiseSource for FixedNoise {
    fn standard_normal(&mut self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub impact: f64,
}

pub struct PricingEngine {
    cfg: Config,
    mid: f64,
    ledger: ShockLedger,
    noise: Box<dyn NoiseSource + Send>,
}

impl std::fmt::Debug for PricingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingEngine")
            .field("mid", &self.mid)
            .field("shocks", &self.ledger.len())
            .finish()
    }
}

impl PricingEngine {
    pub fn new(cfg: Config, noise: Box<dyn NoiseSource + Send>) -> SimResult<Self> {
        cfg.validate()?;
        let ledger = ShockLedger::new(cfg.half_life);
        Ok(Self { mid: cfg.initial_mid, cfg, ledger, noise })
    }

    pub fn mid(&self) -> f64 {
        self.mid
    }

    pub fn ledger(&self) -> &ShockLedger {
        &self.ledger
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn add_shock(&mut self, direction: i8, impact: f64, ts: f64) -> SimResult<Shock> {
        self.ledger.add(direction, impact, ts)
    }

    pub fn quotes(&self, now: f64) -> Quote {
        let impact = self.ledger.aggregate_impact(now);
        let spread = self.cfg.base_spread * (1.0 + SPREAD_IMPACT_MULT * impact);
        Quote {
            bid: self.mid - spread / 2.0,
            ask: self.mid + spread / 2.0,
            spread,
            impact,
        }
    }

    /// Advance the mid by one `dt`. On error the mid is left as it was.
    pub fn tick(&mut self, now: f64) -> SimResult<f64> {
        if !now.is_finite() {
            return Err(SimError::invalid("tick timestamp must be finite"));
        }
        self.ledger.prune(now, self.cfg.half_life);

        let drift = self
            .ledger
            .aggregate_drift(now, self.cfg.alpha)
            .clamp(-DRIFT_CLAMP, DRIFT_CLAMP);
        let impact = self.quotes(now).impact;
        let sigma = self.cfg.base_sigma * (1.0 + SIGMA_IMPACT_MULT * impact);

        let eps = self.noise.standard_normal();
        let dt = self.cfg.dt;
        let next = self.mid * (drift * dt + sigma * dt.sqrt() * eps).exp();
        if next.is_nan() {
            return Err(SimError::invalid("non-finite price update"));
        }
        let next = next.max(MID_FLOOR);
        if !next.is_finite() {
            return Err(SimError::invalid("non-finite price update"));
        }

        self.mid = next;
        log_tick(now, self.mid, drift, sigma, impact);
        Ok(self.mid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn engine(noise: Box<dyn NoiseSource + Send>) -> PricingEngine {
        PricingEngine::new(Config::default(), noise).unwrap()
    }

    #[test]
    fn test_quotes_without_news() {
        let eng = engine(Box::new(FixedNoise(0.0)));
        let q = eng.quotes(0.0);
        assert_eq!(q.impact, 0.0);
        assert!((q.spread - 0.02).abs() < EPS);
        assert!((q.bid - 199.99).abs() < EPS);
        assert!((q.ask - 200.01).abs() < EPS);
    }

    #[test]
    fn test_spread_strictly_increases_with_impact() {
        let mut eng = engine(Box::new(FixedNoise(0.0)));
        let mut prev = eng.quotes(0.0).spread;
        for _ in 0..4 {
            eng.add_shock(0, 0.2, 0.0).unwrap();
            let q = eng.quotes(0.0);
            assert!(q.spread > prev);
            prev = q.spread;
        }
        // impact 0.8 -> 0.02 * 3.4
        assert!((prev - 0.068).abs() < EPS);
    }

    #[test]
    fn test_tick_zero_noise_is_pure_drift() {
        let mut eng = engine(Box::new(FixedNoise(0.0)));
        eng.add_shock(1, 0.5, 0.0).unwrap();
        let mid = eng.tick(0.0).unwrap();
        // drift = 0.15 * 0.5 = 0.075 per second
        let expected = 200.0 * (0.075_f64 * 0.05).exp();
        assert!((mid - expected).abs() < EPS);
    }

    #[test]
    fn test_drift_is_clamped() {
        let cfg = Config { alpha: 10.0, ..Default::default() };
        let mut eng = PricingEngine::new(cfg, Box::new(FixedNoise(0.0))).unwrap();
        eng.add_shock(-1, 1.0, 0.0).unwrap();
        let mid = eng.tick(0.0).unwrap();
        let expected = 200.0 * (-DRIFT_CLAMP * 0.05).exp();
        assert!((mid - expected).abs() < EPS);
    }

    #[test]
    fn test_sigma_scales_with_impact() {
        let mut quiet = engine(Box::new(FixedNoise(1.0)));
        let mut loud = engine(Box::new(FixedNoise(1.0)));
        loud.add_shock(0, 1.0, 0.0).unwrap();
        let q = quiet.tick(0.0).unwrap();
        let l = loud.tick(0.0).unwrap();
        let sqrt_dt = 0.05_f64.sqrt();
        assert!((q - 200.0 * (0.02 * sqrt_dt).exp()).abs() < EPS);
        assert!((l - 200.0 * (0.02 * 3.5 * sqrt_dt).exp()).abs() < EPS);
    }

    #[test]
    fn test_mid_floored() {
        let mut eng = engine(Box::new(FixedNoise(-1.0e6)));
        let mid = eng.tick(0.0).unwrap();
        assert_eq!(mid, MID_FLOOR);
        assert!(eng.mid() > 0.0);
    }

    #[test]
    fn test_mid_stays_positive_under_random_noise() {
        let cfg = Config { base_sigma: 2.0, initial_mid: 1.0, ..Default::default() };
        let mut eng = PricingEngine::new(cfg, Box::new(SeededNoise::new(7))).unwrap();
        for i in 0..5_000 {
            let mid = eng.tick(i as f64 * 0.05).unwrap();
            assert!(mid > 0.0);
        }
    }

    #[test]
    fn test_failed_tick_leaves_mid() {
        let mut eng = engine(Box::new(FixedNoise(f64::NAN)));
        assert!(matches!(eng.tick(0.0), Err(SimError::InvalidArgument(_))));
        assert_eq!(eng.mid(), 200.0);

        let mut eng = engine(Box::new(FixedNoise(0.0)));
        assert!(eng.tick(f64::NAN).is_err());
        assert_eq!(eng.mid(), 200.0);
    }

    #[test]
    fn test_seeded_noise_reproducible() {
        let mut a = SeededNoise::new(42);
        let mut b = SeededNoise::new(42);
        for _ in 0..100 {
            assert_eq!(a.standard_normal(), b.standard_normal());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = Config { dt: 0.0, ..Default::default() };
        let err = PricingEngine::new(cfg, Box::new(FixedNoise(0.0))).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }
}
