//! The strategy interface. The driver owns the pool and the manager; hooks
//! receive a capability handle that exposes read access to both plus the
//! restricted set of mutations a strategy may perform. Strategies never touch
//! the pool directly.

use crate::events::SwapEvent;
use crate::manager::{CloseOutcome, PositionManager, TokenSide};
use crate::states::pool::PoolState;
use crate::states::position::VirtualPosition;
use crate::swap::{self, SwapQuote};
use crate::Result;

/// Strategies surface their own error types; the driver wraps them with the
/// failing timestamp and step index and aborts the run.
pub type StrategyError = Box<dyn std::error::Error + Send + Sync>;

/// Hooks invoked synchronously by the replay driver. All default to no-ops so
/// a strategy implements only what it needs.
pub trait Strategy {
    /// Called once before the clock starts
    fn on_init(&mut self, _ctx: &mut StrategyCtx) -> std::result::Result<(), StrategyError> {
        Ok(())
    }

    /// Called after each archived swap has been applied to the pool
    fn on_swap_event(
        &mut self,
        _ctx: &mut StrategyCtx,
        _swap: &SwapEvent,
    ) -> std::result::Result<(), StrategyError> {
        Ok(())
    }

    /// Called once per clock step, after the step's events have been applied
    fn on_tick(&mut self, _ctx: &mut StrategyCtx) -> std::result::Result<(), StrategyError> {
        Ok(())
    }

    /// Called once when the clock reaches the end of the run
    fn on_finish(&mut self, _ctx: &mut StrategyCtx) -> std::result::Result<(), StrategyError> {
        Ok(())
    }
}

/// The capability handle passed to strategy hooks
pub struct StrategyCtx<'a> {
    timestamp_ms: u64,
    step_index: u64,
    pool: &'a mut PoolState,
    manager: &'a mut PositionManager,
}

impl<'a> StrategyCtx<'a> {
    pub(crate) fn new(
        timestamp_ms: u64,
        step_index: u64,
        pool: &'a mut PoolState,
        manager: &'a mut PositionManager,
    ) -> Self {
        StrategyCtx {
            timestamp_ms,
            step_index,
            pool,
            manager,
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    /// Read-only view of the replayed pool
    pub fn pool(&self) -> &PoolState {
        self.pool
    }

    /// Read-only view of the manager (cash, positions, costs)
    pub fn manager(&self) -> &PositionManager {
        self.manager
    }

    pub fn position(&self, id: u64) -> Option<&VirtualPosition> {
        self.manager.position(id)
    }

    pub fn open_position_ids(&self) -> Vec<u64> {
        self.manager.open_position_ids()
    }

    /// Simulates a swap without touching pool state
    pub fn quote_swap(&self, amount_in: u128, zero_for_one: bool) -> Result<SwapQuote> {
        swap::quote_swap(self.pool, amount_in, zero_for_one)
    }

    pub fn create_position(
        &mut self,
        tick_lower: i32,
        tick_upper: i32,
        amount_0: u128,
        amount_1: u128,
    ) -> Result<u64> {
        self.manager.create_position(
            self.pool,
            tick_lower,
            tick_upper,
            amount_0,
            amount_1,
            self.timestamp_ms,
        )
    }

    pub fn resize_position(&mut self, id: u64, liquidity_delta: i128) -> Result<(u128, u128)> {
        self.manager.resize_position(self.pool, id, liquidity_delta)
    }

    pub fn close_position(&mut self, id: u64) -> Result<CloseOutcome> {
        self.manager.close_position(self.pool, id, self.timestamp_ms)
    }

    pub fn collect_fees(&mut self, id: u64) -> Result<(u128, u128)> {
        self.manager.collect_fees(self.pool, id)
    }

    pub fn add_liquidity_with_swap(
        &mut self,
        tick_lower: i32,
        tick_upper: i32,
        amount_0: u128,
        amount_1: u128,
        max_slippage_bps: u32,
    ) -> Result<u64> {
        self.manager.add_liquidity_with_swap(
            self.pool,
            tick_lower,
            tick_upper,
            amount_0,
            amount_1,
            max_slippage_bps,
            self.timestamp_ms,
        )
    }

    pub fn record_action_cost(&mut self, token: TokenSide, amount: u128) -> Result<()> {
        self.manager.record_action_cost(token, amount)
    }
}
