use thiserror::Error;

/// Errors surfaced by the engine. Every variant here is fatal for the run;
/// recoverable conditions (unparseable archive file, validation mismatch,
/// snapshot write failure) are handled and logged at the driver boundary and
/// never reach this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("math overflow in fixed-point computation")]
    MathOverflow,

    #[error("tick {0} is outside the supported domain")]
    TickOutOfBounds(i32),

    #[error("sqrt price {0} is outside the supported domain")]
    SqrtPriceOutOfBounds(u128),

    #[error("invalid tick range [{lower}, {upper})")]
    InvalidRange { lower: i32, upper: i32 },

    #[error("tick {tick} is not a multiple of tick spacing {spacing}")]
    InvalidTickSpacing { tick: i32, spacing: u16 },

    #[error("insufficient token_{token} funds: need {needed}, have {available}")]
    InsufficientFunds {
        token: u8,
        needed: u128,
        available: u128,
    },

    #[error("position {0} not found or already closed")]
    PositionNotFound(u64),

    #[error("no liquidity available in the swap direction")]
    NoLiquidity,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("strategy hook failed at {timestamp_ms}ms (step {step_index}): {source}")]
    Strategy {
        timestamp_ms: u64,
        step_index: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
