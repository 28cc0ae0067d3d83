//! Swap executor: walks the pool's initialized ticks, applying the fee-split
//! contract and fee-growth distribution. Operates on `PoolState`; owns no
//! state of its own and never logs.

use crate::error::EngineError;
use crate::events::SwapEvent;
use crate::libraries::big_num::U256;
use crate::libraries::full_math::{
    Downcast256, Downcast512, MulDiv, Upcast256, Upcast512, WrappingMath,
};
use crate::libraries::{fixed_point_64, liquidity_math, swap_math, tick_math};
use crate::states::pool::{PoolState, FEE_RATE_DENOMINATOR_VALUE};
use crate::validation::ValidationStats;
use crate::Result;

/// Result of an executed swap
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapResult {
    /// Gross input, fees included
    pub amount_in: u128,
    pub amount_out: u128,
    pub lp_fee: u128,
    pub protocol_fee: u128,
    pub sqrt_price_after: u128,
    pub tick_after: i32,
    pub ticks_crossed: u32,
}

/// A simulated swap: what a strategy would get, without touching pool state
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapQuote {
    pub amount_out: u128,
    /// Total fee charged on the input (LP + protocol share)
    pub fee_amount: u128,
    /// Shortfall of the output against the pre-swap spot price, in output
    /// token units
    pub slippage: u128,
    pub slippage_bps: u32,
    pub sqrt_price_after: u128,
}

// transient swap state, committed to the pool only on success
struct SwapState {
    amount_remaining: u128,
    amount_out: u128,
    sqrt_price_x64: u128,
    tick: i32,
    liquidity: u128,
    ticks_crossed: u32,
}

/// Splits the gross input into (lp_fee, protocol_fee).
///
/// `raw_fee = ceil(amount_in * fee_ppm / 1e6)`; the LP takes
/// `max(ceil(raw_fee * 4 / 5), 1)` and the protocol the remainder, clamped
/// to zero when the LP floor of 1 exceeds the raw fee.
fn split_fee(amount_in: u128, fee_rate: u32) -> Result<(u128, u128)> {
    let raw_fee = amount_in
        .mul_div_ceil(fee_rate as u128, FEE_RATE_DENOMINATOR_VALUE as u128)
        .ok_or(EngineError::MathOverflow)?;
    let lp_fee = raw_fee
        .mul_div_ceil(4, 5)
        .ok_or(EngineError::MathOverflow)?
        .max(1);
    let protocol_fee = raw_fee.saturating_sub(lp_fee);
    Ok((lp_fee, protocol_fee))
}

/// Executes an exact-input swap against the pool.
///
/// Fees come off the top; the crossing loop then consumes the net input.
/// When a step lands exactly on an initialized tick with no input left, the
/// tick is *not* crossed — the crossing runs as a zero-width step the next
/// time the price moves through it.
pub fn execute_swap(
    pool: &mut PoolState,
    amount_in: u128,
    zero_for_one: bool,
) -> Result<SwapResult> {
    if amount_in == 0 {
        return Ok(SwapResult {
            sqrt_price_after: pool.sqrt_price_x64,
            tick_after: pool.tick_current,
            ..Default::default()
        });
    }

    let (lp_fee, protocol_fee) = split_fee(amount_in, pool.fee_rate())?;
    let net_in = amount_in.saturating_sub(lp_fee + protocol_fee);

    let mut state = SwapState {
        amount_remaining: net_in,
        amount_out: 0,
        sqrt_price_x64: pool.sqrt_price_x64,
        tick: pool.tick_current,
        liquidity: pool.liquidity,
        ticks_crossed: 0,
    };

    // The LP fee goes to the liquidity in range when the swap starts. If the
    // pool is momentarily empty the distribution is deferred to whatever
    // liquidity the crossing loop ends in.
    let mut fee_distributed = false;
    if state.liquidity > 0 {
        distribute_lp_fee(pool, lp_fee, state.liquidity, zero_for_one)?;
        fee_distributed = true;
    }

    while state.amount_remaining > 0 {
        let (tick_next, initialized) = match pool.next_initialized_tick(state.tick, zero_for_one)
        {
            Some(t) => (t, true),
            None => {
                if state.liquidity == 0 {
                    return Err(EngineError::NoLiquidity);
                }
                // no more initialized ticks: the price may still drift up to
                // the domain edge on the current liquidity
                let edge = if zero_for_one {
                    tick_math::MIN_TICK
                } else {
                    tick_math::MAX_TICK
                };
                (edge, false)
            }
        };
        let sqrt_price_next = tick_math::get_sqrt_price_at_tick(tick_next)?;

        let sqrt_price_start = state.sqrt_price_x64;
        let step = swap_math::compute_swap_step(
            sqrt_price_start,
            sqrt_price_next,
            state.liquidity,
            state.amount_remaining,
            zero_for_one,
        )?;

        state.amount_remaining -= step.amount_in;
        state.amount_out = state
            .amount_out
            .checked_add(step.amount_out)
            .ok_or(EngineError::MathOverflow)?;
        state.sqrt_price_x64 = step.sqrt_price_next_x64;

        if state.sqrt_price_x64 == sqrt_price_next {
            if state.amount_remaining > 0 {
                if !initialized {
                    // ran off the domain edge with input left
                    return Err(EngineError::NoLiquidity);
                }
                let fee_growth_global_0 = pool.fee_growth_global_0;
                let fee_growth_global_1 = pool.fee_growth_global_1;
                let mut liquidity_net =
                    pool.cross_tick(tick_next, fee_growth_global_0, fee_growth_global_1);
                if zero_for_one {
                    liquidity_net = liquidity_net.checked_neg().ok_or(EngineError::MathOverflow)?;
                }
                state.liquidity = liquidity_math::add_delta(state.liquidity, liquidity_net)?;
                state.ticks_crossed += 1;
                state.tick = if zero_for_one { tick_next - 1 } else { tick_next };
            } else {
                // landed exactly on the boundary with nothing left: leave the
                // tick uncrossed and the liquidity on its current side
                state.tick = if zero_for_one { tick_next } else { tick_next - 1 };
            }
        } else if state.sqrt_price_x64 != sqrt_price_start {
            state.tick = tick_math::get_tick_at_sqrt_price(state.sqrt_price_x64)?;
        }
        // a price left unmoved means the remainder was consumed as dust by
        // the step; amount_remaining is zero and the loop exits
    }

    if !fee_distributed && state.liquidity > 0 {
        distribute_lp_fee(pool, lp_fee, state.liquidity, zero_for_one)?;
    }

    pool.sqrt_price_x64 = state.sqrt_price_x64;
    pool.tick_current = state.tick;
    pool.liquidity = state.liquidity;
    if zero_for_one {
        pool.protocol_fees_0 = pool.protocol_fees_0.saturating_add(protocol_fee);
        pool.reserve_0 = pool
            .reserve_0
            .saturating_add(amount_in.saturating_sub(protocol_fee));
        pool.reserve_1 = pool.reserve_1.saturating_sub(state.amount_out);
        pool.swap_in_amount_token_0 = pool.swap_in_amount_token_0.saturating_add(amount_in);
        pool.swap_out_amount_token_1 = pool.swap_out_amount_token_1.saturating_add(state.amount_out);
    } else {
        pool.protocol_fees_1 = pool.protocol_fees_1.saturating_add(protocol_fee);
        pool.reserve_1 = pool
            .reserve_1
            .saturating_add(amount_in.saturating_sub(protocol_fee));
        pool.reserve_0 = pool.reserve_0.saturating_sub(state.amount_out);
        pool.swap_in_amount_token_1 = pool.swap_in_amount_token_1.saturating_add(amount_in);
        pool.swap_out_amount_token_0 = pool.swap_out_amount_token_0.saturating_add(state.amount_out);
    }

    Ok(SwapResult {
        amount_in,
        amount_out: state.amount_out,
        lp_fee,
        protocol_fee,
        sqrt_price_after: state.sqrt_price_x64,
        tick_after: state.tick,
        ticks_crossed: state.ticks_crossed,
    })
}

fn distribute_lp_fee(
    pool: &mut PoolState,
    lp_fee: u128,
    liquidity: u128,
    zero_for_one: bool,
) -> Result<()> {
    let delta = lp_fee
        .as_u256()
        .mul_div_floor(fixed_point_64::Q64.as_u256(), liquidity.as_u256())
        .ok_or(EngineError::MathOverflow)?;
    if zero_for_one {
        pool.fee_growth_global_0 = pool.fee_growth_global_0.wrapping_add(delta);
    } else {
        pool.fee_growth_global_1 = pool.fee_growth_global_1.wrapping_add(delta);
    }
    Ok(())
}

/// Executes a swap and reconciles the outcome against the archived on-chain
/// values. Differences are recorded in `stats` and never halt the replay;
/// the archive remains authoritative for the reported figures.
pub fn apply_swap_with_validation(
    pool: &mut PoolState,
    stats: &mut ValidationStats,
    amount_in: u128,
    zero_for_one: bool,
    expected: &SwapEvent,
) -> Result<SwapResult> {
    let result = execute_swap(pool, amount_in, zero_for_one)?;
    stats.record(&result, expected);
    Ok(result)
}

/// Simulates a swap on a scratch copy of the pool and reports what the caller
/// would get. The live pool is never touched.
pub fn quote_swap(pool: &PoolState, amount_in: u128, zero_for_one: bool) -> Result<SwapQuote> {
    let spot_sqrt_price = pool.sqrt_price_x64();
    let mut scratch = pool.clone();
    let result = execute_swap(&mut scratch, amount_in, zero_for_one)?;

    let fee_amount = result.lp_fee + result.protocol_fee;
    let net_in = amount_in.saturating_sub(fee_amount);
    let ideal_out = if zero_for_one {
        amount_0_to_1(net_in, spot_sqrt_price)?
    } else {
        amount_1_to_0(net_in, spot_sqrt_price)?
    };
    let slippage = ideal_out.saturating_sub(result.amount_out);
    let slippage_bps = if ideal_out == 0 {
        0
    } else {
        slippage
            .mul_div_floor(10_000, ideal_out)
            .unwrap_or(u128::from(u32::MAX))
            .min(u128::from(u32::MAX)) as u32
    };

    Ok(SwapQuote {
        amount_out: result.amount_out,
        fee_amount,
        slippage,
        slippage_bps,
        sqrt_price_after: result.sqrt_price_after,
    })
}

/// Values a token_0 amount in token_1 at the given sqrt price (floor)
pub(crate) fn amount_0_to_1(amount: u128, sqrt_price_x64: u128) -> Result<u128> {
    let price_x128 = sqrt_price_x64.as_u256() * sqrt_price_x64.as_u256();
    let value = (amount.as_u256().as_u512() * price_x128.as_u512()) >> 128;
    if value > U256::from(u128::MAX).as_u512() {
        Err(EngineError::MathOverflow)
    } else {
        Ok(value.as_u256().as_u128())
    }
}

/// Values a token_1 amount in token_0 at the given sqrt price (floor)
pub(crate) fn amount_1_to_0(amount: u128, sqrt_price_x64: u128) -> Result<u128> {
    let price_x128 = sqrt_price_x64.as_u256() * sqrt_price_x64.as_u256();
    if price_x128.is_zero() {
        return Err(EngineError::MathOverflow);
    }
    let value = (amount.as_u256().as_u512() << 128) / price_x128.as_u512();
    if value > U256::from(u128::MAX).as_u512() {
        Err(EngineError::MathOverflow)
    } else {
        Ok(value.as_u256().as_u128())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::states::pool::PoolParams;

    fn pool_with_range(lower: i32, upper: i32, liquidity: i128) -> PoolState {
        let mut pool = PoolState::new(PoolParams {
            decimals_0: 9,
            decimals_1: 9,
            fee_rate: 100,
            tick_spacing: 2,
            sqrt_price_x64: fixed_point_64::Q64,
        })
        .unwrap();
        pool.apply_liquidity_delta(lower, upper, liquidity).unwrap();
        pool
    }

    mod fee_split {
        use super::*;

        #[test]
        fn identity_holds_unless_floor_clamps() {
            for amount_in in [1u128, 9, 10_000, 123_456_789, 1 << 80] {
                for fee_rate in [100u32, 500, 3000, 10_000] {
                    let (lp_fee, protocol_fee) = split_fee(amount_in, fee_rate).unwrap();
                    let raw_fee = amount_in
                        .mul_div_ceil(fee_rate as u128, FEE_RATE_DENOMINATOR_VALUE as u128)
                        .unwrap();
                    if lp_fee > raw_fee {
                        // floor of 1 engaged on a dust input
                        assert_eq!(lp_fee, 1);
                        assert_eq!(protocol_fee, 0);
                    } else {
                        assert_eq!(lp_fee + protocol_fee, raw_fee);
                    }
                }
            }
        }

        #[test]
        fn lp_share_is_at_least_four_fifths() {
            let (lp_fee, protocol_fee) = split_fee(1_000_000, 10_000).unwrap();
            // raw fee 10_000: 8_000 lp / 2_000 protocol
            assert_eq!(lp_fee, 8000);
            assert_eq!(protocol_fee, 2000);
        }

        #[test]
        fn dust_input_clamps_protocol_to_zero() {
            let (lp_fee, protocol_fee) = split_fee(1, 100).unwrap();
            assert_eq!(lp_fee, 1);
            assert_eq!(protocol_fee, 0);
        }
    }

    #[test]
    fn swap_zero_amount_is_a_no_op() {
        let mut pool = pool_with_range(-100, 100, 1_000_000_000_000);
        let before = pool.sqrt_price_x64();
        let result = execute_swap(&mut pool, 0, true).unwrap();
        assert_eq!(result.amount_out, 0);
        assert_eq!(pool.sqrt_price_x64(), before);
    }

    #[test]
    fn swap_against_empty_pool_fails() {
        let mut pool = PoolState::new(PoolParams {
            decimals_0: 9,
            decimals_1: 9,
            fee_rate: 100,
            tick_spacing: 2,
            sqrt_price_x64: fixed_point_64::Q64,
        })
        .unwrap();
        assert!(matches!(
            execute_swap(&mut pool, 10_000, true),
            Err(EngineError::NoLiquidity)
        ));
    }

    #[test]
    fn zero_for_one_moves_price_down() {
        let mut pool = pool_with_range(-100, 100, 1_000_000_000_000);
        let before = pool.sqrt_price_x64();
        let result = execute_swap(&mut pool, 1_000_000, true).unwrap();
        assert!(result.amount_out > 0);
        assert!(pool.sqrt_price_x64() < before);
        assert!(pool.tick_current() <= 0);
    }

    #[test]
    fn one_for_zero_moves_price_up() {
        let mut pool = pool_with_range(-100, 100, 1_000_000_000_000);
        let before = pool.sqrt_price_x64();
        let result = execute_swap(&mut pool, 1_000_000, false).unwrap();
        assert!(result.amount_out > 0);
        assert!(pool.sqrt_price_x64() > before);
    }

    #[test]
    fn lp_fee_lands_in_fee_growth() {
        let liquidity = 1_000_000_000_000u128;
        let mut pool = pool_with_range(-100, 100, liquidity as i128);
        let result = execute_swap(&mut pool, 1_000_000, true).unwrap();

        let expected = result
            .lp_fee
            .as_u256()
            .mul_div_floor(fixed_point_64::Q64.as_u256(), liquidity.as_u256())
            .unwrap();
        let (fee_growth_0, fee_growth_1) = pool.fee_growth_global();
        assert_eq!(fee_growth_0, expected);
        assert_eq!(fee_growth_1, U256::default());
    }

    #[test]
    fn crossing_picks_up_and_drops_liquidity() {
        // a narrow inner range plus a wide backstop; a large sell walks out
        // of the inner range
        let mut pool = pool_with_range(-1000, 1000, 1_000_000_000);
        pool.apply_liquidity_delta(-10, 10, 5_000_000_000).unwrap();
        assert_eq!(pool.liquidity(), 6_000_000_000);

        let result = execute_swap(&mut pool, 50_000_000, true).unwrap();
        assert!(result.ticks_crossed >= 1);
        assert!(pool.tick_current() < -10);
        assert_eq!(pool.liquidity(), 1_000_000_000);
    }

    #[test]
    fn swap_output_is_monotonic_in_input() {
        let pool = pool_with_range(-1000, 1000, 1_000_000_000_000);
        let mut previous = 0u128;
        for amount_in in [1_000u128, 10_000, 100_000, 1_000_000, 10_000_000] {
            let mut scratch = pool.clone();
            let result = execute_swap(&mut scratch, amount_in, true).unwrap();
            assert!(result.amount_out >= previous);
            previous = result.amount_out;
        }
    }

    #[test]
    fn input_exhausted_on_boundary_defers_the_crossing() {
        let liquidity = 5_000_000_000i128;
        let make_pool = || {
            let mut pool = pool_with_range(-1000, 1000, 1_000_000_000);
            pool.apply_liquidity_delta(-10, 10, liquidity).unwrap();
            pool
        };

        // net input that exactly reaches tick -10
        let boundary = tick_math::get_sqrt_price_at_tick(-10).unwrap();
        let to_boundary = crate::libraries::sqrt_price_math::get_amount_0_delta_unsigned(
            boundary,
            fixed_point_64::Q64,
            6_000_000_000,
            true,
        )
        .unwrap();

        // search for a gross amount whose fee deduction nets to_boundary
        let mut gross = None;
        for candidate in to_boundary..to_boundary + 10_000 {
            let (lp_fee, protocol_fee) = split_fee(candidate, 100).unwrap();
            if candidate - lp_fee - protocol_fee == to_boundary {
                gross = Some(candidate);
                break;
            }
        }
        let gross = gross.expect("a gross amount netting to the boundary exists");

        let mut pool = make_pool();
        let result = execute_swap(&mut pool, gross, true).unwrap();
        assert_eq!(result.sqrt_price_after, boundary);
        // boundary reached but not crossed: inner liquidity still active
        assert_eq!(result.ticks_crossed, 0);
        assert_eq!(pool.liquidity(), 6_000_000_000);
        assert_eq!(pool.tick_current(), -10);

        // the next sell crosses as a zero-width step before moving on
        let result = execute_swap(&mut pool, 1_000_000, true).unwrap();
        assert_eq!(result.ticks_crossed, 1);
        assert_eq!(pool.liquidity(), 1_000_000_000);
        assert!(pool.tick_current() < -10);
    }

    #[test]
    fn quote_leaves_pool_untouched() {
        let pool = pool_with_range(-100, 100, 1_000_000_000_000);
        let before_price = pool.sqrt_price_x64();
        let quote = quote_swap(&pool, 1_000_000, true).unwrap();
        assert!(quote.amount_out > 0);
        assert!(quote.fee_amount > 0);
        assert_eq!(pool.sqrt_price_x64(), before_price);
        assert_eq!(pool.fee_growth_global(), (U256::default(), U256::default()));
    }

    #[test]
    fn quote_slippage_grows_with_size() {
        let pool = pool_with_range(-1000, 1000, 1_000_000_000_000);
        let small = quote_swap(&pool, 10_000, true).unwrap();
        let large = quote_swap(&pool, 100_000_000, true).unwrap();
        assert!(large.slippage_bps >= small.slippage_bps);
    }

    #[test]
    fn spot_conversions_round_trip() {
        let sqrt = fixed_point_64::Q64; // price 1.0
        assert_eq!(amount_0_to_1(12345, sqrt).unwrap(), 12345);
        assert_eq!(amount_1_to_0(12345, sqrt).unwrap(), 12345);

        let sqrt_2 = tick_math::get_sqrt_price_at_tick(6932).unwrap(); // ~price 2
        let as_1 = amount_0_to_1(1_000_000, sqrt_2).unwrap();
        assert!((1_990_000..=2_010_000).contains(&as_1));
    }
}
