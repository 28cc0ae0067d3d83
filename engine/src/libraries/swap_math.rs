//! Helper library to find the result of swapping within a single tick range

use super::sqrt_price_math;
use crate::Result;

/// Result of a swap step
#[derive(Default, Debug)]
pub struct SwapStep {
    /// The price after swapping the amount in, not to exceed the price target
    pub sqrt_price_next_x64: u128,

    /// The amount to be swapped in, of either token_0 or token_1, based on the
    /// direction of the swap
    pub amount_in: u128,

    /// The amount to be received, of either token_0 or token_1, based on the
    /// direction of the swap
    pub amount_out: u128,
}

/// Computes the result of swapping some amount in, given the parameters of the
/// swap. Fees are settled by the caller before the crossing loop runs, so the
/// step works on the net input.
///
/// When the remaining input is not enough to reach the target price, the whole
/// remainder is consumed: the difference between it and the integer amount the
/// price move accounts for is dust absorbed by the pool.
///
/// # Arguments
///
/// * `sqrt_price_current_x64` - The current sqrt price of the pool
/// * `sqrt_price_target_x64` - The price that cannot be exceeded, from which
///   the direction of the swap is inferred
/// * `liquidity` - The usable liquidity
/// * `amount_remaining` - How much net input remains to be swapped in
/// * `zero_for_one` - The swap direction
pub fn compute_swap_step(
    sqrt_price_current_x64: u128,
    sqrt_price_target_x64: u128,
    liquidity: u128,
    amount_remaining: u128,
    zero_for_one: bool,
) -> Result<SwapStep> {
    let mut swap_step = SwapStep::default();

    // round up amount_in so the pool is never short-paid on a full traversal
    let amount_in_to_target = if zero_for_one {
        sqrt_price_math::get_amount_0_delta_unsigned(
            sqrt_price_target_x64,
            sqrt_price_current_x64,
            liquidity,
            true,
        )?
    } else {
        sqrt_price_math::get_amount_1_delta_unsigned(
            sqrt_price_current_x64,
            sqrt_price_target_x64,
            liquidity,
            true,
        )?
    };

    if amount_remaining >= amount_in_to_target {
        swap_step.sqrt_price_next_x64 = sqrt_price_target_x64;
        swap_step.amount_in = amount_in_to_target;
    } else {
        swap_step.sqrt_price_next_x64 = sqrt_price_math::get_next_sqrt_price_from_input(
            sqrt_price_current_x64,
            liquidity,
            amount_remaining,
            zero_for_one,
        )?;
        swap_step.amount_in = amount_remaining;
    }

    // round down amount_out so the pool never over-pays
    swap_step.amount_out = if zero_for_one {
        sqrt_price_math::get_amount_1_delta_unsigned(
            swap_step.sqrt_price_next_x64,
            sqrt_price_current_x64,
            liquidity,
            false,
        )?
    } else {
        sqrt_price_math::get_amount_0_delta_unsigned(
            sqrt_price_current_x64,
            swap_step.sqrt_price_next_x64,
            liquidity,
            false,
        )?
    };

    Ok(swap_step)
}
