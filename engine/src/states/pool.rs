///! Pool state: price/liquidity scalars, fee-growth accumulators, and the
///! ordered tick map the swap executor walks.
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::error::EngineError;
use crate::libraries::big_num::U256;
use crate::libraries::{liquidity_math, tick_math};
use crate::states::tick::{self, TickState};
use crate::Result;

/// Fee rates are expressed in parts per million
pub const FEE_RATE_DENOMINATOR_VALUE: u32 = 1_000_000;

/// Static pool parameters
#[derive(Debug, Clone)]
pub struct PoolParams {
    pub decimals_0: u8,
    pub decimals_1: u8,
    /// Swap fee in ppm
    pub fee_rate: u32,
    /// The minimum number of ticks between initialized ticks
    pub tick_spacing: u16,
    /// Starting price as sqrt(token_1/token_0), Q64.64
    pub sqrt_price_x64: u128,
}

/// The replayed pool. All mutation goes through `apply_liquidity_delta`,
/// `reseed` and the swap executor; everything else observes through
/// accessors.
#[derive(Debug, Clone)]
pub struct PoolState {
    decimals_0: u8,
    decimals_1: u8,
    fee_rate: u32,
    tick_spacing: u16,

    pub(crate) sqrt_price_x64: u128,
    pub(crate) tick_current: i32,
    /// The currently in range liquidity available to the pool
    pub(crate) liquidity: u128,
    pub(crate) reserve_0: u128,
    pub(crate) reserve_1: u128,

    /// Fee growth as Q64.64, i.e. fees of token_0 and token_1 collected per
    /// unit of liquidity for the entire life of the pool. Wraps modulo 2^256.
    pub(crate) fee_growth_global_0: U256,
    pub(crate) fee_growth_global_1: U256,

    /// The amounts of token_0 and token_1 owed to the protocol
    pub(crate) protocol_fees_0: u128,
    pub(crate) protocol_fees_1: u128,

    /// The amounts in and out of swap token_0 and token_1
    pub(crate) swap_in_amount_token_0: u128,
    pub(crate) swap_out_amount_token_1: u128,
    pub(crate) swap_in_amount_token_1: u128,
    pub(crate) swap_out_amount_token_0: u128,

    ticks: BTreeMap<i32, TickState>,
}

impl PoolState {
    pub fn new(params: PoolParams) -> Result<Self> {
        if params.tick_spacing == 0 {
            return Err(EngineError::Config(
                "tick spacing must be positive".to_string(),
            ));
        }
        if params.fee_rate >= FEE_RATE_DENOMINATOR_VALUE {
            return Err(EngineError::Config(format!(
                "fee rate {} ppm is not below {}",
                params.fee_rate, FEE_RATE_DENOMINATOR_VALUE
            )));
        }
        let tick_current = tick_math::get_tick_at_sqrt_price(params.sqrt_price_x64)?;
        Ok(PoolState {
            decimals_0: params.decimals_0,
            decimals_1: params.decimals_1,
            fee_rate: params.fee_rate,
            tick_spacing: params.tick_spacing,
            sqrt_price_x64: params.sqrt_price_x64,
            tick_current,
            liquidity: 0,
            reserve_0: 0,
            reserve_1: 0,
            fee_growth_global_0: U256::default(),
            fee_growth_global_1: U256::default(),
            protocol_fees_0: 0,
            protocol_fees_1: 0,
            swap_in_amount_token_0: 0,
            swap_out_amount_token_1: 0,
            swap_in_amount_token_1: 0,
            swap_out_amount_token_0: 0,
            ticks: BTreeMap::new(),
        })
    }

    pub fn decimals_0(&self) -> u8 {
        self.decimals_0
    }

    pub fn decimals_1(&self) -> u8 {
        self.decimals_1
    }

    pub fn fee_rate(&self) -> u32 {
        self.fee_rate
    }

    pub fn tick_spacing(&self) -> u16 {
        self.tick_spacing
    }

    pub fn sqrt_price_x64(&self) -> u128 {
        self.sqrt_price_x64
    }

    pub fn tick_current(&self) -> i32 {
        self.tick_current
    }

    pub fn liquidity(&self) -> u128 {
        self.liquidity
    }

    pub fn reserves(&self) -> (u128, u128) {
        (self.reserve_0, self.reserve_1)
    }

    pub fn fee_growth_global(&self) -> (U256, U256) {
        (self.fee_growth_global_0, self.fee_growth_global_1)
    }

    pub fn protocol_fees(&self) -> (u128, u128) {
        (self.protocol_fees_0, self.protocol_fees_1)
    }

    pub fn tick(&self, index: i32) -> Option<&TickState> {
        self.ticks.get(&index)
    }

    pub fn initialized_tick_count(&self) -> usize {
        self.ticks.len()
    }

    /// Decimal-adjusted spot price token_1/token_0, for telemetry only
    pub fn price(&self) -> f64 {
        let sqrt = self.sqrt_price_x64 as f64 / crate::libraries::fixed_point_64::Q64 as f64;
        sqrt * sqrt * 10f64.powi(self.decimals_0 as i32 - self.decimals_1 as i32)
    }

    /// Updates the liquidity bookkeeping for a `[tick_lower, tick_upper)`
    /// range. Boundary ticks are created on first use and dropped once no
    /// position references them; active liquidity changes only when the
    /// current tick is inside the range. Never moves the price.
    pub fn apply_liquidity_delta(
        &mut self,
        tick_lower: i32,
        tick_upper: i32,
        liquidity_delta: i128,
    ) -> Result<()> {
        tick::check_ticks_order(tick_lower, tick_upper)?;
        tick::check_tick_boundary(tick_lower, self.tick_spacing)?;
        tick::check_tick_boundary(tick_upper, self.tick_spacing)?;
        if liquidity_delta == 0 {
            return Ok(());
        }

        let fee_growth_global_0 = self.fee_growth_global_0;
        let fee_growth_global_1 = self.fee_growth_global_1;
        let tick_current = self.tick_current;

        let lower = self
            .ticks
            .entry(tick_lower)
            .or_insert_with(|| TickState::new(tick_lower));
        lower.update(
            tick_current,
            liquidity_delta,
            fee_growth_global_0,
            fee_growth_global_1,
            false,
        )?;
        if lower.is_clear() {
            self.ticks.remove(&tick_lower);
        }

        let upper = self
            .ticks
            .entry(tick_upper)
            .or_insert_with(|| TickState::new(tick_upper));
        upper.update(
            tick_current,
            liquidity_delta,
            fee_growth_global_0,
            fee_growth_global_1,
            true,
        )?;
        if upper.is_clear() {
            self.ticks.remove(&tick_upper);
        }

        if tick_lower <= tick_current && tick_current < tick_upper {
            self.liquidity = liquidity_math::add_delta(self.liquidity, liquidity_delta)?;
        }

        Ok(())
    }

    /// Fee growth accumulated inside `[tick_lower, tick_upper)`, derived from
    /// the global accumulators and the two outside checkpoints. Boundaries
    /// with no initialized tick contribute zero outside growth.
    pub fn fee_growth_inside(&self, tick_lower: i32, tick_upper: i32) -> (U256, U256) {
        let default_lower = TickState::new(tick_lower);
        let default_upper = TickState::new(tick_upper);
        let lower = self.ticks.get(&tick_lower).unwrap_or(&default_lower);
        let upper = self.ticks.get(&tick_upper).unwrap_or(&default_upper);
        tick::get_fee_growth_inside(
            lower,
            upper,
            self.tick_current,
            self.fee_growth_global_0,
            self.fee_growth_global_1,
        )
    }

    /// Overwrites the mutable scalars with an on-chain snapshot. The replay
    /// cannot reconstruct tick-level liquidity from scratch without the full
    /// position history; accepting event-provided snapshots keeps the replay
    /// exact on the global scalars even when sub-tick state diverges.
    pub fn reseed(
        &mut self,
        sqrt_price_x64: u128,
        liquidity: u128,
        reserve_0: u128,
        reserve_1: u128,
        tick: i32,
    ) -> Result<()> {
        if sqrt_price_x64 < tick_math::MIN_SQRT_PRICE_X64
            || sqrt_price_x64 >= tick_math::MAX_SQRT_PRICE_X64
        {
            return Err(EngineError::SqrtPriceOutOfBounds(sqrt_price_x64));
        }
        if tick < tick_math::MIN_TICK || tick > tick_math::MAX_TICK {
            return Err(EngineError::TickOutOfBounds(tick));
        }
        self.sqrt_price_x64 = sqrt_price_x64;
        self.tick_current = tick;
        self.liquidity = liquidity;
        self.reserve_0 = reserve_0;
        self.reserve_1 = reserve_1;
        Ok(())
    }

    /// The next initialized tick to walk to: at or below `tick` when swapping
    /// token_0 for token_1, strictly above it otherwise.
    pub(crate) fn next_initialized_tick(&self, tick: i32, zero_for_one: bool) -> Option<i32> {
        if zero_for_one {
            self.ticks.range(..=tick).next_back().map(|(t, _)| *t)
        } else {
            self.ticks
                .range((Excluded(tick), Unbounded))
                .next()
                .map(|(t, _)| *t)
        }
    }

    /// Runs the crossing transition for `tick`, returning its liquidity_net.
    /// A boundary that was reseeded away returns no liquidity change.
    pub(crate) fn cross_tick(
        &mut self,
        tick: i32,
        fee_growth_global_0: U256,
        fee_growth_global_1: U256,
    ) -> i128 {
        match self.ticks.get_mut(&tick) {
            Some(state) => state.cross(fee_growth_global_0, fee_growth_global_1),
            None => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::libraries::fixed_point_64;

    fn test_pool() -> PoolState {
        PoolState::new(PoolParams {
            decimals_0: 9,
            decimals_1: 9,
            fee_rate: 100,
            tick_spacing: 2,
            sqrt_price_x64: fixed_point_64::Q64,
        })
        .unwrap()
    }

    #[test]
    fn new_pool_derives_tick_from_price() {
        let pool = test_pool();
        assert_eq!(pool.tick_current(), 0);
        assert_eq!(pool.liquidity(), 0);
        assert_eq!(pool.initialized_tick_count(), 0);
    }

    #[test]
    fn rejects_zero_spacing_and_absurd_fee() {
        let mut params = PoolParams {
            decimals_0: 9,
            decimals_1: 9,
            fee_rate: 100,
            tick_spacing: 0,
            sqrt_price_x64: fixed_point_64::Q64,
        };
        assert!(PoolState::new(params.clone()).is_err());
        params.tick_spacing = 2;
        params.fee_rate = FEE_RATE_DENOMINATOR_VALUE;
        assert!(PoolState::new(params).is_err());
    }

    #[test]
    fn rejects_unaligned_and_inverted_ranges() {
        let mut pool = test_pool();
        assert!(matches!(
            pool.apply_liquidity_delta(3, 10, 100),
            Err(EngineError::InvalidTickSpacing { .. })
        ));
        assert!(matches!(
            pool.apply_liquidity_delta(10, 10, 100),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            pool.apply_liquidity_delta(12, 10, 100),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn active_liquidity_tracks_ranges_containing_current_tick() {
        let mut pool = test_pool();

        pool.apply_liquidity_delta(-10, 10, 1000).unwrap();
        assert_eq!(pool.liquidity(), 1000);

        // above the current tick: bookkeeping only
        pool.apply_liquidity_delta(10, 20, 500).unwrap();
        assert_eq!(pool.liquidity(), 1000);

        // below the current tick: bookkeeping only
        pool.apply_liquidity_delta(-20, -10, 500).unwrap();
        assert_eq!(pool.liquidity(), 1000);

        // nested range containing the tick stacks up
        pool.apply_liquidity_delta(-4, 4, 250).unwrap();
        assert_eq!(pool.liquidity(), 1250);

        pool.apply_liquidity_delta(-10, 10, -1000).unwrap();
        assert_eq!(pool.liquidity(), 250);
    }

    #[test]
    fn net_liquidity_below_current_tick_sums_to_active() {
        let mut pool = test_pool();
        pool.apply_liquidity_delta(-10, 10, 1000).unwrap();
        pool.apply_liquidity_delta(-20, -10, 500).unwrap();
        pool.apply_liquidity_delta(-4, 20, 300).unwrap();

        let net_below: i128 = (tick_math::MIN_TICK..=pool.tick_current())
            .filter_map(|t| pool.tick(t).map(|s| s.liquidity_net))
            .sum();
        assert_eq!(net_below, pool.liquidity() as i128);
    }

    #[test]
    fn ticks_are_dropped_when_last_position_leaves() {
        let mut pool = test_pool();
        pool.apply_liquidity_delta(-10, 10, 1000).unwrap();
        pool.apply_liquidity_delta(-10, 20, 500).unwrap();
        assert_eq!(pool.initialized_tick_count(), 3);

        pool.apply_liquidity_delta(-10, 10, -1000).unwrap();
        assert_eq!(pool.initialized_tick_count(), 2);
        assert!(pool.tick(10).is_none());
        assert!(pool.tick(-10).is_some());

        pool.apply_liquidity_delta(-10, 20, -500).unwrap();
        assert_eq!(pool.initialized_tick_count(), 0);
        assert_eq!(pool.liquidity(), 0);
    }

    #[test]
    fn next_initialized_tick_walks_both_directions() {
        let mut pool = test_pool();
        pool.apply_liquidity_delta(-10, 10, 1000).unwrap();
        pool.apply_liquidity_delta(20, 30, 500).unwrap();

        assert_eq!(pool.next_initialized_tick(0, true), Some(-10));
        assert_eq!(pool.next_initialized_tick(-10, true), Some(-10));
        assert_eq!(pool.next_initialized_tick(-11, true), None);
        assert_eq!(pool.next_initialized_tick(0, false), Some(10));
        assert_eq!(pool.next_initialized_tick(10, false), Some(20));
        assert_eq!(pool.next_initialized_tick(30, false), None);
    }

    #[test]
    fn reseed_overwrites_scalars_only() {
        let mut pool = test_pool();
        pool.apply_liquidity_delta(-10, 10, 1000).unwrap();

        let sqrt = tick_math::get_sqrt_price_at_tick(50).unwrap();
        pool.reseed(sqrt, 777, 11, 22, 50).unwrap();
        assert_eq!(pool.sqrt_price_x64(), sqrt);
        assert_eq!(pool.tick_current(), 50);
        assert_eq!(pool.liquidity(), 777);
        assert_eq!(pool.reserves(), (11, 22));
        // sub-tick state is intentionally untouched
        assert_eq!(pool.initialized_tick_count(), 2);

        assert!(pool
            .reseed(tick_math::MAX_SQRT_PRICE_X64, 0, 0, 0, 0)
            .is_err());
    }
}
