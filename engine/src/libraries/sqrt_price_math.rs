///! Helper functions to find price changes for change in token supply and vice versa
use super::big_num::U256;
use super::fixed_point_64;
use super::full_math::{Downcast256, MulDiv, Upcast256};
use super::unsafe_math::UnsafeMathTrait;
use crate::error::EngineError;
use crate::Result;

/// Gets the next sqrt price √P' given an input delta of token_0
///
/// The quotient is floored, matching the truncating division the archived
/// chain state was produced with. A floor landing on the step's target price
/// reads as "target reached", so the crossing loop never walks past a tick
/// boundary because of it.
///
/// # Formula
///
/// * `√P' = floor(√P * L / (L + Δx * √P))`
/// * If denominator construction overflows, use the alternate form
///   `√P' = L / (L/√P + Δx)`
pub fn get_next_sqrt_price_from_amount_0_rounding_down(
    sqrt_p_x64: u128,
    liquidity: u128,
    amount: u128,
) -> Result<u128> {
    // we short circuit amount == 0 because the result is otherwise not
    // guaranteed to equal the input price
    if amount == 0 {
        return Ok(sqrt_p_x64);
    };
    let numerator_1 = liquidity.as_u256() << fixed_point_64::RESOLUTION;

    let product = amount.as_u256() * sqrt_p_x64.as_u256();
    if let Some(denominator) = numerator_1.checked_add(product) {
        let next = numerator_1
            .mul_div_floor(sqrt_p_x64.as_u256(), denominator)
            .ok_or(EngineError::MathOverflow)?;
        return downcast_sqrt_price(next);
    }

    // Alternate form if overflow - `√P' = L / (L/√P + Δx)`
    let denominator = (numerator_1 / sqrt_p_x64.as_u256())
        .checked_add(amount.as_u256())
        .ok_or(EngineError::MathOverflow)?;
    downcast_sqrt_price(numerator_1 / denominator)
}

/// Gets the next sqrt price √P' given an input delta of token_1
///
/// Always rounds down: token 1 supply increases leading to price increase, and
/// the quotient is floored so the price moves no further than the input pays
/// for.
///
/// # Formula
///
/// * `√P' = √P + Δy / L`
pub fn get_next_sqrt_price_from_amount_1_rounding_down(
    sqrt_p_x64: u128,
    liquidity: u128,
    amount: u128,
) -> Result<u128> {
    let quotient = (amount.as_u256() << fixed_point_64::RESOLUTION) / liquidity.as_u256();

    let next = sqrt_p_x64
        .as_u256()
        .checked_add(quotient)
        .ok_or(EngineError::MathOverflow)?;
    downcast_sqrt_price(next)
}

/// Gets the next sqrt price given an input amount of token_0 or token_1
/// Throws if price or liquidity are 0
///
/// # Arguments
///
/// * `sqrt_p_x64` - The starting price `√P`, i.e., before accounting for the input amount
/// * `liquidity` - The amount of usable liquidity
/// * `amount_in` - How much of token_0, or token_1, is being swapped in
/// * `zero_for_one` - Whether the amount in is token_0 or token_1
pub fn get_next_sqrt_price_from_input(
    sqrt_p_x64: u128,
    liquidity: u128,
    amount_in: u128,
    zero_for_one: bool,
) -> Result<u128> {
    if sqrt_p_x64 == 0 || liquidity == 0 {
        return Err(EngineError::MathOverflow);
    }

    if zero_for_one {
        get_next_sqrt_price_from_amount_0_rounding_down(sqrt_p_x64, liquidity, amount_in)
    } else {
        get_next_sqrt_price_from_amount_1_rounding_down(sqrt_p_x64, liquidity, amount_in)
    }
}

/// Gets the amount_0 delta between two prices, for given amount of liquidity
///
/// # Formula
///
/// * `Δx = L * (1 / √P_lower - 1 / √P_upper)`
/// * i.e. `L * (√P_upper - √P_lower) / (√P_upper * √P_lower)`
///
/// # Arguments
///
/// * `sqrt_ratio_a_x64` - A sqrt price
/// * `sqrt_ratio_b_x64` - Another sqrt price
/// * `liquidity` - The amount of usable liquidity
/// * `round_up` - Whether to round the amount up or down
pub fn get_amount_0_delta_unsigned(
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    liquidity: u128,
    round_up: bool,
) -> Result<u128> {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };
    if sqrt_ratio_a_x64 == 0 {
        return Err(EngineError::MathOverflow);
    }

    let numerator_1 = liquidity.as_u256() << fixed_point_64::RESOLUTION;
    let numerator_2 = (sqrt_ratio_b_x64 - sqrt_ratio_a_x64).as_u256();

    let amount = if round_up {
        U256::div_rounding_up(
            numerator_1
                .mul_div_ceil(numerator_2, sqrt_ratio_b_x64.as_u256())
                .ok_or(EngineError::MathOverflow)?,
            sqrt_ratio_a_x64.as_u256(),
        )
    } else {
        numerator_1
            .mul_div_floor(numerator_2, sqrt_ratio_b_x64.as_u256())
            .ok_or(EngineError::MathOverflow)?
            / sqrt_ratio_a_x64.as_u256()
    };
    downcast_amount(amount)
}

/// Gets the amount_1 delta between two prices, for given amount of liquidity
///
/// # Formula
///
/// * `Δy = L (√P_upper - √P_lower)`
pub fn get_amount_1_delta_unsigned(
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    liquidity: u128,
    round_up: bool,
) -> Result<u128> {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };

    let diff = (sqrt_ratio_b_x64 - sqrt_ratio_a_x64).as_u256();
    let amount = if round_up {
        liquidity
            .as_u256()
            .mul_div_ceil(diff, fixed_point_64::Q64.as_u256())
    } else {
        liquidity
            .as_u256()
            .mul_div_floor(diff, fixed_point_64::Q64.as_u256())
    }
    .ok_or(EngineError::MathOverflow)?;
    downcast_amount(amount)
}

/// Token_0 and token_1 deltas for a liquidity change over `[sqrt_lower,
/// sqrt_upper)` with the pool at `sqrt_price_current`, in the three price
/// regimes. `round_up` is true for amounts owed into the pool (mint) and
/// false for amounts paid out of it (burn).
pub fn get_amounts_for_liquidity_delta(
    sqrt_price_current_x64: u128,
    sqrt_price_lower_x64: u128,
    sqrt_price_upper_x64: u128,
    liquidity: u128,
    round_up: bool,
) -> Result<(u128, u128)> {
    if sqrt_price_current_x64 <= sqrt_price_lower_x64 {
        Ok((
            get_amount_0_delta_unsigned(
                sqrt_price_lower_x64,
                sqrt_price_upper_x64,
                liquidity,
                round_up,
            )?,
            0,
        ))
    } else if sqrt_price_current_x64 < sqrt_price_upper_x64 {
        Ok((
            get_amount_0_delta_unsigned(
                sqrt_price_current_x64,
                sqrt_price_upper_x64,
                liquidity,
                round_up,
            )?,
            get_amount_1_delta_unsigned(
                sqrt_price_lower_x64,
                sqrt_price_current_x64,
                liquidity,
                round_up,
            )?,
        ))
    } else {
        Ok((
            0,
            get_amount_1_delta_unsigned(
                sqrt_price_lower_x64,
                sqrt_price_upper_x64,
                liquidity,
                round_up,
            )?,
        ))
    }
}

fn downcast_sqrt_price(value: U256) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        Err(EngineError::MathOverflow)
    } else {
        Ok(value.as_u128())
    }
}

fn downcast_amount(value: U256) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        Err(EngineError::MathOverflow)
    } else {
        Ok(value.as_u128())
    }
}
