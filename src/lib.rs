//! News-shock market simulator.
//!
//! Scored headlines become decaying shocks; the shocks widen the spread,
//! raise volatility and bias the drift of a single simulated mid. A player
//! trades against those quotes, either inside fixed-length rounds scored on
//! mark-to-market P&L minus an inventory penalty, or in an open-ended stream.

pub mod candles;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod logging;
pub mod pricing;
pub mod round;
pub mod shock;
pub mod storage;
pub mod stream;

pub use config::{Config, GameMode};
pub use error::{SimError, SimResult};
pub use execution::{Fill, Ingest, MarketSim, Player, Side};
pub use feed::{FeedCursor, MemoryFeed, NewsFeed, NewsItem, SqliteFeed};
pub use pricing::{FixedNoise, NoiseSource, PricingEngine, Quote, SeededNoise};
pub use round::{AdvanceOutcome, RoundController, RoundPhase, RoundSummary};
pub use shock::{decay_weight, Shock, ShockLedger};
pub use stream::{StreamController, StreamOutcome};
