///! A strategy-owned liquidity range and its fee checkpoints
use crate::libraries::big_num::U256;
use crate::libraries::full_math::{Downcast256, WrappingMath};
use crate::libraries::{liquidity_amounts, liquidity_math, tick_math};
use crate::Result;

/// One virtual position. The manager is the only writer; strategies observe
/// through accessors.
///
/// Fee accrual keeps Q64.64 precision internally: the checkpoint refresh runs
/// after every replayed event, and flooring to whole tokens on each refresh
/// would silently drop every sub-token fee increment. Whole tokens are
/// floored out only at the reporting/collect boundary.
#[derive(Debug, Clone)]
pub struct VirtualPosition {
    id: u64,
    tick_lower: i32,
    tick_upper: i32,

    /// The amount of liquidity owned by this position
    liquidity: u128,

    /// Fee growth inside the range as of the last checkpoint refresh
    fee_growth_inside_0_last: U256,
    fee_growth_inside_1_last: U256,

    /// Fees realized against the position but not yet collected, Q64.64
    unclaimed_fees_x64_0: U256,
    unclaimed_fees_x64_1: U256,

    /// All fees ever earned by the position, Q64.64; monotonic
    lifetime_fees_x64_0: U256,
    lifetime_fees_x64_1: U256,

    /// Cost basis: the amounts consumed when the position was minted or grown
    initial_amount_0: u128,
    initial_amount_1: u128,

    open_time_ms: u64,
    close_time_ms: Option<u64>,
    closed: bool,

    /// Cumulative wall-clock time the position has spent in range
    in_range_ms: u64,
}

impl VirtualPosition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128,
        fee_growth_inside_0: U256,
        fee_growth_inside_1: U256,
        initial_amount_0: u128,
        initial_amount_1: u128,
        open_time_ms: u64,
    ) -> Self {
        VirtualPosition {
            id,
            tick_lower,
            tick_upper,
            liquidity,
            fee_growth_inside_0_last: fee_growth_inside_0,
            fee_growth_inside_1_last: fee_growth_inside_1,
            unclaimed_fees_x64_0: U256::default(),
            unclaimed_fees_x64_1: U256::default(),
            lifetime_fees_x64_0: U256::default(),
            lifetime_fees_x64_1: U256::default(),
            initial_amount_0,
            initial_amount_1,
            open_time_ms,
            close_time_ms: None,
            closed: false,
            in_range_ms: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tick_lower(&self) -> i32 {
        self.tick_lower
    }

    pub fn tick_upper(&self) -> i32 {
        self.tick_upper
    }

    pub fn liquidity(&self) -> u128 {
        self.liquidity
    }

    /// Realized-but-uncollected fees, in whole tokens
    pub fn unclaimed_fees(&self) -> (u128, u128) {
        (
            (self.unclaimed_fees_x64_0 >> 64).to_underflow_u128(),
            (self.unclaimed_fees_x64_1 >> 64).to_underflow_u128(),
        )
    }

    /// All fees ever earned, in whole tokens
    pub fn lifetime_fees(&self) -> (u128, u128) {
        (
            (self.lifetime_fees_x64_0 >> 64).to_underflow_u128(),
            (self.lifetime_fees_x64_1 >> 64).to_underflow_u128(),
        )
    }

    pub fn initial_amounts(&self) -> (u128, u128) {
        (self.initial_amount_0, self.initial_amount_1)
    }

    pub fn open_time_ms(&self) -> u64 {
        self.open_time_ms
    }

    pub fn close_time_ms(&self) -> Option<u64> {
        self.close_time_ms
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn in_range_ms(&self) -> u64 {
        self.in_range_ms
    }

    pub fn is_in_range(&self, tick_current: i32) -> bool {
        self.tick_lower <= tick_current && tick_current < self.tick_upper
    }

    /// Present token value of the position's liquidity at the given price
    /// (floored, the amounts a burn would pay out)
    pub fn amounts_at(&self, sqrt_price_x64: u128) -> Result<(u128, u128)> {
        let sqrt_lower = tick_math::get_sqrt_price_at_tick(self.tick_lower)?;
        let sqrt_upper = tick_math::get_sqrt_price_at_tick(self.tick_upper)?;
        Ok(liquidity_amounts::get_amounts_for_liquidity(
            sqrt_price_x64,
            sqrt_lower,
            sqrt_upper,
            self.liquidity,
        ))
    }

    /// Settles fee growth since the last checkpoint into the unclaimed
    /// accumulators.
    ///
    /// The deltas use wrapping subtraction. A delta so large that pricing it
    /// overflows can only come from checkpoints inconsistent with the pool;
    /// it credits nothing, matching the on-chain convention of zeroing an
    /// unpriceable reward delta.
    pub(crate) fn update_fees(
        &mut self,
        fee_growth_inside_0: U256,
        fee_growth_inside_1: U256,
    ) -> Result<()> {
        let delta_0 = fee_growth_inside_0.wrapping_sub(self.fee_growth_inside_0_last);
        let delta_1 = fee_growth_inside_1.wrapping_sub(self.fee_growth_inside_1_last);
        let liquidity = U256::from(self.liquidity);

        let earned_0 = delta_0.checked_mul(liquidity).unwrap_or_default();
        let earned_1 = delta_1.checked_mul(liquidity).unwrap_or_default();

        self.unclaimed_fees_x64_0 = self
            .unclaimed_fees_x64_0
            .checked_add(earned_0)
            .ok_or(crate::EngineError::MathOverflow)?;
        self.unclaimed_fees_x64_1 = self
            .unclaimed_fees_x64_1
            .checked_add(earned_1)
            .ok_or(crate::EngineError::MathOverflow)?;
        self.lifetime_fees_x64_0 = self
            .lifetime_fees_x64_0
            .checked_add(earned_0)
            .ok_or(crate::EngineError::MathOverflow)?;
        self.lifetime_fees_x64_1 = self
            .lifetime_fees_x64_1
            .checked_add(earned_1)
            .ok_or(crate::EngineError::MathOverflow)?;

        self.fee_growth_inside_0_last = fee_growth_inside_0;
        self.fee_growth_inside_1_last = fee_growth_inside_1;
        Ok(())
    }

    /// Takes the whole-token part of the unclaimed fees, leaving the
    /// fractional remainder and the lifetime totals untouched
    pub(crate) fn collect(&mut self) -> (u128, u128) {
        let (tokens_0, tokens_1) = self.unclaimed_fees();
        self.unclaimed_fees_x64_0 = self
            .unclaimed_fees_x64_0
            .wrapping_sub(U256::from(tokens_0) << 64);
        self.unclaimed_fees_x64_1 = self
            .unclaimed_fees_x64_1
            .wrapping_sub(U256::from(tokens_1) << 64);
        (tokens_0, tokens_1)
    }

    pub(crate) fn apply_liquidity_delta(&mut self, liquidity_delta: i128) -> Result<()> {
        self.liquidity = liquidity_math::add_delta(self.liquidity, liquidity_delta)?;
        Ok(())
    }

    pub(crate) fn add_cost_basis(&mut self, amount_0: u128, amount_1: u128) {
        self.initial_amount_0 = self.initial_amount_0.saturating_add(amount_0);
        self.initial_amount_1 = self.initial_amount_1.saturating_add(amount_1);
    }

    pub(crate) fn mark_closed(&mut self, now_ms: u64) {
        self.closed = true;
        self.close_time_ms = Some(now_ms);
        self.liquidity = 0;
    }

    pub(crate) fn accrue_in_range(&mut self, step_ms: u64) {
        self.in_range_ms += step_ms;
    }
}
