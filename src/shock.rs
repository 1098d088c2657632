//! News shocks and the ledger that superposes them.
//!
//! A shock starts at full weight and halves every `half_life` seconds. The
//! ledger answers two questions about the live shocks at a given instant:
//! how much news is in the air (aggregate impact, which drives spread and
//! volatility) and which way it leans (aggregate drift).

use std::f64::consts::LN_2;

use crate::error::{SimError, SimResult};

/// Ledger size above which old shocks get dropped.
pub const PRUNE_CAP: usize = 200;

/// Age cutoff for pruning, in half-lives. Residual weight is 1/64.
pub const PRUNE_HALF_LIVES: f64 = 6.0;

/// Half-life decay weight: `exp(-ln2 * age / half_life)`.
///
/// Negative ages count as zero. A non-positive half-life means the shock has
/// already fully decayed.
pub fn decay_weight(age: f64, half_life: f64) -> f64 {
    if half_life <= 0.0 {
        return 0.0;
    }
    let age = age.max(0.0);
    (-LN_2 * age / half_life).exp()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shock {
    pub direction: i8,
    pub impact: f64,
    pub start_ts: f64,
}

impl Shock {
    /// Decayed impact at `now`.
    pub fn weighted_impact(&self, now: f64, half_life: f64) -> f64 {
        self.impact * decay_weight(now - self.start_ts, half_life)
    }

    /// Only signed, non-zero shocks push the price.
    pub fn is_directional(&self) -> bool {
        self.direction != 0 && self.impact > 0.0
    }
}

#[derive(Debug, Clone)]
pub struct ShockLedger {
    shocks: Vec<Shock>,
    half_life: f64,
}

impl ShockLedger {
    pub fn new(half_life: f64) -> Self {
        Self { shocks: Vec::new(), half_life }
    }

    pub fn half_life(&self) -> f64 {
        self.half_life
    }

    /// Append a shock. Impact is clamped into [0, 1].
    pub fn add(&mut self, direction: i8, impact: f64, ts: f64) -> SimResult<Shock> {
        if !matches!(direction, -1..=1) {
            return Err(SimError::invalid(format!(
                "shock direction must be -1, 0 or 1, got {}",
                direction
            )));
        }
        if !impact.is_finite() {
            return Err(SimError::invalid("shock impact must be finite"));
        }
        if !ts.is_finite() {
            return Err(SimError::invalid("shock timestamp must be finite"));
        }
        let shock = Shock {
            direction,
            impact: impact.clamp(0.0, 1.0),
            start_ts: ts,
        };
        self.shocks.push(shock);
        Ok(shock)
    }

    /// Clamped soft-sum of decayed impacts. Clustered headlines compound.
    pub fn aggregate_impact(&self, now: f64) -> f64 {
        let level: f64 = self
            .shocks
            .iter()
            .map(|s| s.weighted_impact(now, self.half_life))
            .sum();
        level.clamp(0.0, 1.0)
    }

    /// Unclamped directional drift. Zero-direction shocks are excluded here
    /// even though they still count toward impact.
    pub fn aggregate_drift(&self, now: f64, alpha: f64) -> f64 {
        self.shocks
            .iter()
            .filter(|s| s.is_directional())
            .map(|s| alpha * f64::from(s.direction) * s.weighted_impact(now, self.half_life))
            .sum()
    }

    /// Drop shocks older than six half-lives, but only once the ledger has
    /// grown past [`PRUNE_CAP`]. Returns how many were removed.
    pub fn prune(&mut self, now: f64, half_life: f64) -> usize {
        if self.shocks.len() <= PRUNE_CAP {
            return 0;
        }
        let cutoff = now - PRUNE_HALF_LIVES * half_life;
        let before = self.shocks.len();
        self.shocks.retain(|s| s.start_ts >= cutoff);
        before - self.shocks.len()
    }

    pub fn len(&self) -> usize {
        self.shocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shock> {
        self.shocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_weight_at_zero_and_half_life() {
        assert_eq!(decay_weight(0.0, 5.0), 1.0);
        assert!((decay_weight(5.0, 5.0) - 0.5).abs() < EPS);
        assert!((decay_weight(10.0, 5.0) - 0.25).abs() < EPS);
    }

    #[test]
    fn test_weight_strictly_decreasing_and_bounded() {
        for &hl in &[0.1, 1.0, 5.0, 300.0] {
            let mut prev = decay_weight(0.0, hl);
            for i in 1..200 {
                let age = i as f64 * hl / 20.0;
                let w = decay_weight(age, hl);
                assert!(w > 0.0 && w <= 1.0, "w={} out of (0,1]", w);
                assert!(w < prev, "not decreasing at age {}", age);
                prev = w;
            }
        }
    }

    #[test]
    fn test_negative_age_clamped() {
        assert_eq!(decay_weight(-3.0, 5.0), 1.0);
    }

    #[test]
    fn test_non_positive_half_life_fully_decayed() {
        assert_eq!(decay_weight(0.0, 0.0), 0.0);
        assert_eq!(decay_weight(1.0, -2.0), 0.0);
    }

    #[test]
    fn test_impact_soft_sum_not_max() {
        let mut ledger = ShockLedger::new(5.0);
        ledger.add(1, 0.3, 0.0).unwrap();
        ledger.add(-1, 0.4, 0.0).unwrap();
        assert!((ledger.aggregate_impact(0.0) - 0.7).abs() < EPS);
    }

    #[test]
    fn test_impact_clamped_for_many_shocks() {
        let mut ledger = ShockLedger::new(5.0);
        for i in 0..50 {
            ledger.add(1, 0.9, i as f64 * 0.1).unwrap();
        }
        let imp = ledger.aggregate_impact(5.0);
        assert!((0.0..=1.0).contains(&imp));
        assert_eq!(imp, 1.0);
    }

    #[test]
    fn test_empty_ledger_is_quiet() {
        let ledger = ShockLedger::new(5.0);
        assert_eq!(ledger.aggregate_impact(10.0), 0.0);
        assert_eq!(ledger.aggregate_drift(10.0, 0.15), 0.0);
    }

    #[test]
    fn test_zero_direction_widens_without_drift() {
        let mut ledger = ShockLedger::new(5.0);
        ledger.add(0, 0.8, 0.0).unwrap();
        assert!((ledger.aggregate_impact(0.0) - 0.8).abs() < EPS);
        assert_eq!(ledger.aggregate_drift(0.0, 0.15), 0.0);
    }

    #[test]
    fn test_drift_sign_and_decay() {
        let mut ledger = ShockLedger::new(5.0);
        ledger.add(-1, 0.4, 0.0).unwrap();
        let d0 = ledger.aggregate_drift(0.0, 0.15);
        assert!((d0 + 0.06).abs() < EPS);
        let d1 = ledger.aggregate_drift(5.0, 0.15);
        assert!((d1 + 0.03).abs() < EPS);
    }

    #[test]
    fn test_opposing_shocks_cancel_drift_but_add_impact() {
        let mut ledger = ShockLedger::new(5.0);
        ledger.add(1, 0.3, 0.0).unwrap();
        ledger.add(-1, 0.3, 0.0).unwrap();
        assert!(ledger.aggregate_drift(0.0, 0.15).abs() < EPS);
        assert!((ledger.aggregate_impact(0.0) - 0.6).abs() < EPS);
    }

    #[test]
    fn test_add_validates_and_clamps() {
        let mut ledger = ShockLedger::new(5.0);
        assert!(matches!(ledger.add(2, 0.5, 0.0), Err(SimError::InvalidArgument(_))));
        assert!(matches!(ledger.add(1, f64::NAN, 0.0), Err(SimError::InvalidArgument(_))));
        assert!(matches!(ledger.add(1, 0.5, f64::INFINITY), Err(SimError::InvalidArgument(_))));
        assert!(ledger.is_empty());

        let s = ledger.add(1, 1.7, 0.0).unwrap();
        assert_eq!(s.impact, 1.0);
        let s = ledger.add(-1, -0.2, 0.0).unwrap();
        assert_eq!(s.impact, 0.0);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_prune_only_above_cap() {
        let mut ledger = ShockLedger::new(5.0);
        for _ in 0..PRUNE_CAP {
            ledger.add(1, 0.1, 0.0).unwrap();
        }
        assert_eq!(ledger.prune(1000.0, 5.0), 0);
        assert_eq!(ledger.len(), PRUNE_CAP);

        ledger.add(1, 0.1, 995.0).unwrap();
        let removed = ledger.prune(1000.0, 5.0);
        assert_eq!(removed, PRUNE_CAP);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_prune_keeps_recent() {
        let mut ledger = ShockLedger::new(5.0);
        for i in 0..=PRUNE_CAP {
            ledger.add(1, 0.1, i as f64).unwrap();
        }
        // cutoff = 200 - 30 = 170; shocks at 170..=200 survive
        ledger.prune(200.0, 5.0);
        assert_eq!(ledger.len(), 31);
        assert!(ledger.iter().all(|s| s.start_ts >= 170.0));
    }
}
