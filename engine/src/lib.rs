//! Event-replay backtesting engine for concentrated-liquidity market making.
//!
//! The engine replays a historical archive of pool events (swaps, liquidity
//! changes) against a Q64.64 fixed-point CLMM pool model, lets a strategy
//! open, resize and close virtual positions through a restricted capability
//! handle, and streams fund- and position-level telemetry to CSV.

pub mod backtest;
pub mod error;
pub mod events;
pub mod libraries;
pub mod manager;
pub mod performance;
pub mod states;
pub mod strategy;
pub mod swap;
pub mod validation;

pub use backtest::{BacktestConfig, BacktestEngine, BacktestReport};
pub use error::{EngineError, Result};
pub use events::{EventPayload, EventStream, LiquidityEvent, PoolEvent, SwapEvent};
pub use manager::{CloseOutcome, PositionManager, TokenSide};
pub use states::pool::{PoolParams, PoolState};
pub use states::position::VirtualPosition;
pub use strategy::{Strategy, StrategyCtx, StrategyError};
pub use swap::{SwapQuote, SwapResult};
pub use validation::ValidationStats;
