use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SimError, SimResult};

/// How the interactive host drives the market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Fixed-length scored rounds with a news cadence.
    #[default]
    Round,
    /// Open-ended session; all new news is applied on every tick.
    Stream,
}

impl FromStr for GameMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round" => Ok(GameMode::Round),
            "stream" => Ok(GameMode::Stream),
            other => Err(SimError::config(format!("unknown game mode {}", other))),
        }
    }
}

/// Engine, execution and round settings.
///
/// Every engine object is built from one of these; nothing reads the
/// environment after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub symbol: String,

    // pricing
    pub initial_mid: f64,
    /// Seconds per tick.
    pub dt: f64,
    /// Volatility per sqrt(second) with no active news.
    pub base_sigma: f64,
    /// Drift per second contributed by a full-impact shock.
    pub alpha: f64,
    /// Shock half-life in seconds.
    pub half_life: f64,
    pub base_spread: f64,

    // execution
    pub fee_per_share: f64,
    pub slip0: f64,

    // round
    pub round_secs: f64,
    pub injection_interval: f64,
    pub min_impact: f64,
    pub inv_penalty_lambda: f64,
    pub inv_penalty_power: f64,

    // run
    pub mode: GameMode,
    pub seed: Option<u64>,
    pub feed_batch: usize,
    pub news_db_path: Option<String>,
    pub rounds_db_path: Option<String>,
    pub print_every_secs: f64,
    pub candle_interval: f64,
    pub candle_max_keep: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "AMZN".to_string(),
            initial_mid: 200.0,
            dt: 0.05,
            base_sigma: 0.02,
            alpha: 0.15,
            half_life: 5.0,
            base_spread: 0.02,
            fee_per_share: 0.001,
            slip0: 0.03,
            round_secs: 30.0,
            injection_interval: 15.0,
            min_impact: 0.15,
            inv_penalty_lambda: 0.02,
            inv_penalty_power: 1.3,
            mode: GameMode::Round,
            seed: None,
            feed_batch: 50,
            news_db_path: None,
            rounds_db_path: None,
            print_every_secs: 0.5,
            candle_interval: 0.5,
            candle_max_keep: 300,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            symbol: std::env::var("SYMBOL").unwrap_or(d.symbol),
            initial_mid: env_or("SHOCK_MID0", d.initial_mid),
            dt: env_or("SHOCK_DT", d.dt),
            base_sigma: env_or("SHOCK_BASE_SIGMA", d.base_sigma),
            alpha: env_or("SHOCK_ALPHA", d.alpha),
            half_life: env_or("SHOCK_HALF_LIFE", d.half_life),
            base_spread: env_or("SHOCK_BASE_SPREAD", d.base_spread),
            fee_per_share: env_or("SHOCK_FEE", d.fee_per_share),
            slip0: env_or("SHOCK_SLIP0", d.slip0),
            round_secs: env_or("ROUND_SECS", d.round_secs),
            injection_interval: env_or("ROUND_NEWS_INTERVAL", d.injection_interval),
            min_impact: env_or("ROUND_MIN_IMPACT", d.min_impact),
            inv_penalty_lambda: env_or("ROUND_INV_LAMBDA", d.inv_penalty_lambda),
            inv_penalty_power: env_or("ROUND_INV_POWER", d.inv_penalty_power),
            mode: env_or("GAME_MODE", d.mode),
            seed: std::env::var("SHOCK_SEED").ok().and_then(|v| v.parse().ok()),
            feed_batch: env_or("FEED_BATCH", d.feed_batch),
            news_db_path: std::env::var("NEWS_DB").ok(),
            rounds_db_path: std::env::var("ROUNDS_DB").ok(),
            print_every_secs: env_or("PRINT_EVERY_SECS", d.print_every_secs),
            candle_interval: env_or("CANDLE_SECS", d.candle_interval),
            candle_max_keep: env_or("CANDLE_MAX_KEEP", d.candle_max_keep),
        }
    }

    /// Load from a JSON file; missing keys fall back to defaults.
    pub fn from_json_file(path: &Path) -> SimResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| SimError::config(format!("bad config json {}: {}", path.display(), e)))
    }

    /// Fail fast on values the engine cannot run with.
    pub fn validate(&self) -> SimResult<()> {
        let reals = [
            ("initial_mid", self.initial_mid),
            ("dt", self.dt),
            ("base_sigma", self.base_sigma),
            ("alpha", self.alpha),
            ("half_life", self.half_life),
            ("base_spread", self.base_spread),
            ("fee_per_share", self.fee_per_share),
            ("slip0", self.slip0),
            ("round_secs", self.round_secs),
            ("injection_interval", self.injection_interval),
            ("min_impact", self.min_impact),
            ("inv_penalty_lambda", self.inv_penalty_lambda),
            ("inv_penalty_power", self.inv_penalty_power),
            ("print_every_secs", self.print_every_secs),
            ("candle_interval", self.candle_interval),
        ];
        if let Some((name, _)) = reals.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SimError::config(format!("{} must be finite", name)));
        }

        let positive = [
            ("initial_mid", self.initial_mid),
            ("dt", self.dt),
            ("half_life", self.half_life),
            ("round_secs", self.round_secs),
            ("injection_interval", self.injection_interval),
            ("candle_interval", self.candle_interval),
        ];
        if let Some((name, v)) = positive.iter().find(|(_, v)| *v <= 0.0) {
            return Err(SimError::config(format!("{} must be > 0, got {}", name, v)));
        }

        let non_negative = [
            ("base_sigma", self.base_sigma),
            ("base_spread", self.base_spread),
            ("fee_per_share", self.fee_per_share),
            ("slip0", self.slip0),
            ("inv_penalty_lambda", self.inv_penalty_lambda),
            ("inv_penalty_power", self.inv_penalty_power),
            ("print_every_secs", self.print_every_secs),
        ];
        if let Some((name, v)) = non_negative.iter().find(|(_, v)| *v < 0.0) {
            return Err(SimError::config(format!("{} must be >= 0, got {}", name, v)));
        }

        if !(0.0..=1.0).contains(&self.min_impact) {
            return Err(SimError::config(format!(
                "min_impact must be in [0, 1], got {}",
                self.min_impact
            )));
        }
        if self.feed_batch == 0 {
            return Err(SimError::config("feed_batch must be > 0"));
        }
        Ok(())
    }

    /// Stable short hash of the full configuration, used to tag archived rounds.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        hex::encode(&digest[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_mode_parse() {
        assert_eq!("stream".parse::<GameMode>().unwrap(), GameMode::Stream);
        assert_eq!(" Round ".parse::<GameMode>().unwrap(), GameMode::Round);
        assert!(matches!("live".parse::<GameMode>(), Err(SimError::Configuration(_))));
        let cfg: Config = serde_json::from_str(r#"{"mode": "stream"}"#).unwrap();
        assert_eq!(cfg.mode, GameMode::Stream);
        assert_eq!(cfg.round_secs, 30.0);
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_half_life() {
        let cfg = Config { half_life: 0.0, ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
        assert!(err.to_string().contains("half_life"));
    }

    #[test]
    fn test_rejects_non_positive_dt_and_duration() {
        let cfg = Config { dt: -0.05, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(SimError::Configuration(_))));
        let cfg = Config { round_secs: 0.0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(SimError::Configuration(_))));
    }

    #[test]
    fn test_rejects_nan() {
        let cfg = Config { alpha: f64::NAN, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(SimError::Configuration(_))));
    }

    #[test]
    fn test_rejects_out_of_range_gate() {
        let cfg = Config { min_impact: 1.5, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(SimError::Configuration(_))));
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let a = Config::default();
        let b = Config { alpha: 0.2, ..Default::default() };
        assert_eq!(a.fingerprint(), Config::default().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"round_secs": 90.0, "min_impact": 0.3}"#).unwrap();
        let cfg = Config::from_json_file(&path).unwrap();
        assert_eq!(cfg.round_secs, 90.0);
        assert_eq!(cfg.min_impact, 0.3);
        assert_eq!(cfg.initial_mid, 200.0);
    }
}
