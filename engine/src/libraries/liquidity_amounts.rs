///! Liquidity amount functions
///! Provides functions for computing liquidity amounts from token amounts and
///! prices
use super::fixed_point_64;
use super::full_math::{Downcast256, MulDiv, Upcast256};

/// Computes the amount of liquidity received for a given amount of token_0 and
/// price range
///
/// Calculates ΔL = Δx (√P_upper x √P_lower)/(√P_upper - √P_lower)
///
/// # Arguments
///
/// * `sqrt_ratio_a_x64` - A sqrt price representing the first tick boundary
/// * `sqrt_ratio_b_x64` - A sqrt price representing the second tick boundary
/// * `amount_0` - The amount_0 being sent in
pub fn get_liquidity_for_amount_0(
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    amount_0: u128,
) -> u128 {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };
    let intermediate = sqrt_ratio_a_x64
        .as_u256()
        .mul_div_floor(
            sqrt_ratio_b_x64.as_u256(),
            fixed_point_64::Q64.as_u256(),
        )
        .unwrap_or_default();

    amount_0
        .as_u256()
        .mul_div_floor(
            intermediate,
            (sqrt_ratio_b_x64 - sqrt_ratio_a_x64).as_u256(),
        )
        .unwrap_or_default()
        .to_underflow_u128()
}

/// Computes the amount of liquidity received for a given amount of token_1 and
/// price range
///
/// Calculates ΔL = Δy / (√P_upper - √P_lower)
///
/// # Arguments
///
/// * `sqrt_ratio_a_x64` - A sqrt price representing the first tick boundary
/// * `sqrt_ratio_b_x64` - A sqrt price representing the second tick boundary
/// * `amount_1` - The amount_1 being sent in
pub fn get_liquidity_for_amount_1(
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    amount_1: u128,
) -> u128 {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };

    amount_1
        .as_u256()
        .mul_div_floor(
            fixed_point_64::Q64.as_u256(),
            (sqrt_ratio_b_x64 - sqrt_ratio_a_x64).as_u256(),
        )
        .unwrap_or_default()
        .to_underflow_u128()
}

/// Computes the maximum amount of liquidity received for a given amount of
/// token_0, token_1, the current pool prices and the prices at the tick
/// boundaries
///
/// # Arguments
///
/// * `sqrt_ratio_x64` - A sqrt price representing the current pool prices
/// * `sqrt_ratio_a_x64` - A sqrt price representing the first tick boundary
/// * `sqrt_ratio_b_x64` - A sqrt price representing the second tick boundary
/// * `amount_0` - The amount of token_0 being sent in
/// * `amount_1` - The amount of token_1 being sent in
pub fn get_liquidity_for_amounts(
    sqrt_ratio_x64: u128,
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    amount_0: u128,
    amount_1: u128,
) -> u128 {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };

    if sqrt_ratio_x64 <= sqrt_ratio_a_x64 {
        // If P ≤ P_lower, only token_0 liquidity is active
        get_liquidity_for_amount_0(sqrt_ratio_a_x64, sqrt_ratio_b_x64, amount_0)
    } else if sqrt_ratio_x64 < sqrt_ratio_b_x64 {
        // If P_lower < P < P_upper, active liquidity is the minimum of the
        // liquidity provided by token_0 and token_1
        u128::min(
            get_liquidity_for_amount_0(sqrt_ratio_x64, sqrt_ratio_b_x64, amount_0),
            get_liquidity_for_amount_1(sqrt_ratio_a_x64, sqrt_ratio_x64, amount_1),
        )
    } else {
        // If P ≥ P_upper, only token_1 liquidity is active
        get_liquidity_for_amount_1(sqrt_ratio_a_x64, sqrt_ratio_b_x64, amount_1)
    }
}

/// Computes the amount of token_0 for a given amount of liquidity and a price
/// range
///
/// Calculates Δx = ΔL (√P_upper - √P_lower) / (√P_upper x √P_lower)
///     = ΔL (1 / √P_lower - 1 / √P_upper)
pub fn get_amount_0_for_liquidity(
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    liquidity: u128,
) -> u128 {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };
    if sqrt_ratio_a_x64 == 0 {
        return 0;
    }

    ((liquidity.as_u256() << fixed_point_64::RESOLUTION)
        .mul_div_floor(
            (sqrt_ratio_b_x64 - sqrt_ratio_a_x64).as_u256(),
            sqrt_ratio_b_x64.as_u256(),
        )
        .unwrap_or_default()
        / sqrt_ratio_a_x64.as_u256())
    .to_underflow_u128()
}

/// Computes the amount of token_1 for a given amount of liquidity and a price
/// range
///
/// Calculates Δy = ΔL * (√P_upper - √P_lower)
pub fn get_amount_1_for_liquidity(
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    liquidity: u128,
) -> u128 {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };

    liquidity
        .as_u256()
        .mul_div_floor(
            (sqrt_ratio_b_x64 - sqrt_ratio_a_x64).as_u256(),
            fixed_point_64::Q64.as_u256(),
        )
        .unwrap_or_default()
        .to_underflow_u128()
}

/// Computes the token_0 and token_1 value for a given amount of liquidity, the
/// current pool prices and the prices at the tick boundaries
pub fn get_amounts_for_liquidity(
    sqrt_ratio_x64: u128,
    mut sqrt_ratio_a_x64: u128,
    mut sqrt_ratio_b_x64: u128,
    liquidity: u128,
) -> (u128, u128) {
    // sqrt_ratio_a_x64 should hold the smaller value
    if sqrt_ratio_a_x64 > sqrt_ratio_b_x64 {
        std::mem::swap(&mut sqrt_ratio_a_x64, &mut sqrt_ratio_b_x64);
    };

    if sqrt_ratio_x64 <= sqrt_ratio_a_x64 {
        // If P ≤ P_lower, active liquidity is entirely in token_0
        (
            get_amount_0_for_liquidity(sqrt_ratio_a_x64, sqrt_ratio_b_x64, liquidity),
            0,
        )
    } else if sqrt_ratio_x64 < sqrt_ratio_b_x64 {
        // If P_lower < P < P_upper, active liquidity is in token_0 and token_1
        (
            get_amount_0_for_liquidity(sqrt_ratio_x64, sqrt_ratio_b_x64, liquidity),
            get_amount_1_for_liquidity(sqrt_ratio_a_x64, sqrt_ratio_x64, liquidity),
        )
    } else {
        // If P ≥ P_upper, active liquidity is entirely in token_1
        (
            0,
            get_amount_1_for_liquidity(sqrt_ratio_a_x64, sqrt_ratio_b_x64, liquidity),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libraries::tick_math::get_sqrt_price_at_tick;

    #[test]
    fn liquidity_and_amounts_round_trip() {
        let current = get_sqrt_price_at_tick(0).unwrap();
        let lower = get_sqrt_price_at_tick(-100).unwrap();
        let upper = get_sqrt_price_at_tick(100).unwrap();

        let liquidity =
            get_liquidity_for_amounts(current, lower, upper, 1_000_000, 1_000_000);
        assert!(liquidity > 0);

        let (amount_0, amount_1) =
            get_amounts_for_liquidity(current, lower, upper, liquidity);
        // floored amounts never exceed the budget
        assert!(amount_0 <= 1_000_000);
        assert!(amount_1 <= 1_000_000);
        // and the binding side is consumed nearly in full
        assert!(amount_0 >= 999_000 || amount_1 >= 999_000);
    }

    #[test]
    fn below_range_needs_only_token_0() {
        let current = get_sqrt_price_at_tick(-500).unwrap();
        let lower = get_sqrt_price_at_tick(100).unwrap();
        let upper = get_sqrt_price_at_tick(200).unwrap();

        let liquidity = get_liquidity_for_amounts(current, lower, upper, 1_000_000, 0);
        assert!(liquidity > 0);
        let (amount_0, amount_1) = get_amounts_for_liquidity(current, lower, upper, liquidity);
        assert!(amount_0 > 0);
        assert_eq!(amount_1, 0);
    }

    #[test]
    fn above_range_needs_only_token_1() {
        let current = get_sqrt_price_at_tick(500).unwrap();
        let lower = get_sqrt_price_at_tick(100).unwrap();
        let upper = get_sqrt_price_at_tick(200).unwrap();

        let liquidity = get_liquidity_for_amounts(current, lower, upper, 0, 1_000_000);
        assert!(liquidity > 0);
        let (amount_0, amount_1) = get_amounts_for_liquidity(current, lower, upper, liquidity);
        assert_eq!(amount_0, 0);
        assert!(amount_1 > 0);
    }

    #[test]
    fn zero_budget_zero_liquidity() {
        let current = get_sqrt_price_at_tick(0).unwrap();
        let lower = get_sqrt_price_at_tick(-10).unwrap();
        let upper = get_sqrt_price_at_tick(10).unwrap();
        assert_eq!(get_liquidity_for_amounts(current, lower, upper, 0, 0), 0);
    }
}
