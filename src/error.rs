//! Error kinds shared by the engine, the feed and the round controller.
//!
//! Only `Configuration` is fatal (it can only come out of construction).
//! Everything raised while a round is live is recoverable and leaves state
//! untouched.

/// Library error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// Invalid configuration detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Bad input to an operation (non-positive qty, unknown cursor, bad shock).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Shock, trade or tick attempted after the round ended.
    #[error("round finished")]
    RoundFinished,

    /// The news feed could not be queried.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        SimError::InvalidArgument(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        SimError::UpstreamUnavailable(msg.into())
    }

    /// Short machine-friendly name used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::Configuration(_) => "configuration",
            SimError::InvalidArgument(_) => "invalid_argument",
            SimError::RoundFinished => "round_finished",
            SimError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
