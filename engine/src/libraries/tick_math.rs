use crate::error::EngineError;
use crate::libraries::big_num::U256;
use crate::Result;

/// The minimum tick
pub const MIN_TICK: i32 = -887272;
/// The maximum tick
pub const MAX_TICK: i32 = -MIN_TICK;

/// The minimum value that can be returned from #get_sqrt_price_at_tick.
/// Equivalent to get_sqrt_price_at_tick(MIN_TICK)
pub const MIN_SQRT_PRICE_X64: u128 = 1;
/// The maximum value that can be returned from #get_sqrt_price_at_tick.
/// Equivalent to get_sqrt_price_at_tick(MAX_TICK)
pub const MAX_SQRT_PRICE_X64: u128 = 340269576638287423012608907232989748562;

/// The smallest tick from which the tick -> sqrt price map is injective.
/// One Q64.64 ulp spans several ticks once sqrt_price_x64 drops below
/// ~30000, so deeper ticks share an output value and only a one-way
/// conversion exists down there; from this tick upward (and at MIN_TICK
/// itself) the round trip through get_tick_at_sqrt_price is exact.
pub const MIN_LOSSLESS_TICK: i32 = -680978;

const BIT_PRECISION: u32 = 16;

/// Calculates 1.0001^(tick/2) as a U64.64 number representing
/// the square root of the ratio of the two assets (token_1/token_0)
///
/// The decomposition runs at Q128.128: each magic factor is
/// `2^128 / (1.0001^(2^(i - 1)))` for i in `[0, 20)`, multiplied in and
/// shifted down by 128, with the final result floored to X64. Working at
/// 2^128 keeps full precision for large |tick|, where the X64-scale
/// intermediate would have no fractional bits left.
///
/// Throws if |tick| > MAX_TICK
pub fn get_sqrt_price_at_tick(tick: i32) -> Result<u128> {
    let abs_tick = tick.unsigned_abs();
    if abs_tick > MAX_TICK as u32 {
        return Err(EngineError::TickOutOfBounds(tick));
    }

    // i = 0
    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(0xfffcb933bd6fad37aa2d162d1a594001u128)
    } else {
        // 2^128
        U256::from(1u8) << 128
    };
    // i = 1
    if abs_tick & 0x2 != 0 {
        ratio = mul_shift_128(ratio, 0xfff97272373d413259a46990580e213au128)
    };
    // i = 2
    if abs_tick & 0x4 != 0 {
        ratio = mul_shift_128(ratio, 0xfff2e50f5f656932ef12357cf3c7fdccu128)
    };
    // i = 3
    if abs_tick & 0x8 != 0 {
        ratio = mul_shift_128(ratio, 0xffe5caca7e10e4e61c3624eaa0941cd0u128)
    };
    // i = 4
    if abs_tick & 0x10 != 0 {
        ratio = mul_shift_128(ratio, 0xffcb9843d60f6159c9db58835c926644u128)
    };
    // i = 5
    if abs_tick & 0x20 != 0 {
        ratio = mul_shift_128(ratio, 0xff973b41fa98c081472e6896dfb254c0u128)
    };
    // i = 6
    if abs_tick & 0x40 != 0 {
        ratio = mul_shift_128(ratio, 0xff2ea16466c96a3843ec78b326b52861u128)
    };
    // i = 7
    if abs_tick & 0x80 != 0 {
        ratio = mul_shift_128(ratio, 0xfe5dee046a99a2a811c461f1969c3053u128)
    };
    // i = 8
    if abs_tick & 0x100 != 0 {
        ratio = mul_shift_128(ratio, 0xfcbe86c7900a88aedcffc83b479aa3a4u128)
    };
    // i = 9
    if abs_tick & 0x200 != 0 {
        ratio = mul_shift_128(ratio, 0xf987a7253ac413176f2b074cf7815e54u128)
    };
    // i = 10
    if abs_tick & 0x400 != 0 {
        ratio = mul_shift_128(ratio, 0xf3392b0822b70005940c7a398e4b70f3u128)
    };
    // i = 11
    if abs_tick & 0x800 != 0 {
        ratio = mul_shift_128(ratio, 0xe7159475a2c29b7443b29c7fa6e889d9u128)
    };
    // i = 12
    if abs_tick & 0x1000 != 0 {
        ratio = mul_shift_128(ratio, 0xd097f3bdfd2022b8845ad8f792aa5825u128)
    };
    // i = 13
    if abs_tick & 0x2000 != 0 {
        ratio = mul_shift_128(ratio, 0xa9f746462d870fdf8a65dc1f90e061e5u128)
    };
    // i = 14
    if abs_tick & 0x4000 != 0 {
        ratio = mul_shift_128(ratio, 0x70d869a156d2a1b890bb3df62baf32f7u128)
    };
    // i = 15
    if abs_tick & 0x8000 != 0 {
        ratio = mul_shift_128(ratio, 0x31be135f97d08fd981231505542fcfa6u128)
    };
    // i = 16
    if abs_tick & 0x10000 != 0 {
        ratio = mul_shift_128(ratio, 0x9aa508b5b7a84e1c677de54f3e99bc9u128)
    };
    // i = 17
    if abs_tick & 0x20000 != 0 {
        ratio = mul_shift_128(ratio, 0x5d6af8dedb81196699c329225ee604u128)
    };
    // i = 18
    if abs_tick & 0x40000 != 0 {
        ratio = mul_shift_128(ratio, 0x2216e584f5fa1ea926041bedfe98u128)
    };
    // i = 19
    if abs_tick & 0x80000 != 0 {
        ratio = mul_shift_128(ratio, 0x48a170391f7dc42444e8fa2u128)
    }

    // Divide to obtain 1.0001^(2^(i - 1)) * 2^32 in numerator
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    Ok((ratio >> 64).as_u128())
}

// floor(x * y / 2^128) without phantom overflow
fn mul_shift_128(x: U256, y: u128) -> U256 {
    (x * U256::from(y)) >> 128
}

/// Calculates the greatest tick value such that get_sqrt_price_at_tick(tick) <= ratio
/// Throws if sqrt_price_x64 < MIN_SQRT_PRICE_X64 or sqrt_price_x64 >= MAX_SQRT_PRICE_X64
///
/// Below MIN_LOSSLESS_TICK many ticks share one X64 value, so "the greatest
/// such tick" is only defined up to that quantization; the candidates are
/// clamped into the tick domain so the edge values still resolve.
///
/// Formula: `i = log base(√1.0001) (√P)`
pub fn get_tick_at_sqrt_price(sqrt_price_x64: u128) -> Result<i32> {
    // second inequality must be < because the price can never reach the price at the max tick
    if sqrt_price_x64 < MIN_SQRT_PRICE_X64 || sqrt_price_x64 >= MAX_SQRT_PRICE_X64 {
        return Err(EngineError::SqrtPriceOutOfBounds(sqrt_price_x64));
    }

    // Determine log_b(sqrt_ratio). First by calculating integer portion (msb)
    let msb: u32 = 128 - sqrt_price_x64.leading_zeros() - 1;
    let log2p_integer_x32 = (i128::from(msb) - 64) << 32;

    // get fractional value (r/2^msb)
    // We begin the iteration from bit 63 (0.5 in Q64.64)
    let mut bit: i128 = 0x8000_0000_0000_0000i128;
    let mut precision = 0;
    let mut log2p_fraction_x64 = 0;

    // Log2 iterative approximation for the fractional part
    // Go through each 2^(j) bit where j < 64 in a Q64.64 number
    // Append current bit value to fraction result if r^2 Q2.126 is more than 2
    let mut r = if msb >= 64 {
        sqrt_price_x64 >> (msb - 63)
    } else {
        sqrt_price_x64 << (63 - msb)
    };

    while bit > 0 && precision < BIT_PRECISION {
        r *= r;
        let is_r_more_than_two = (r >> 127) as u32;
        r >>= 63 + is_r_more_than_two;
        log2p_fraction_x64 += bit * i128::from(is_r_more_than_two);
        bit >>= 1;
        precision += 1;
    }
    let log2p_fraction_x32 = log2p_fraction_x64 >> 32;
    let log2p_x32 = log2p_integer_x32 + log2p_fraction_x32;

    // 16 bit refinement gives an error margin of 2^-16 / log2 (√1.0001) = 0.8461 < 1
    // Since tick is a decimal, an error under 1 is acceptable

    // Change of base rule: multiply with 2^32 / log2 (√1.0001)
    let log_sqrt_10001_x64 = log2p_x32 * 59543866431248i128;

    // tick - 0.01
    let tick_low = (((log_sqrt_10001_x64 - 184467440737095516i128) >> 64) as i32)
        .clamp(MIN_TICK, MAX_TICK);

    // tick + (2^-14 / log2(√1.001)) + 0.01
    let tick_high = (((log_sqrt_10001_x64 + 15793534762490258745i128) >> 64) as i32)
        .clamp(MIN_TICK, MAX_TICK);

    Ok(if tick_low == tick_high {
        tick_low
    } else if get_sqrt_price_at_tick(tick_high)? <= sqrt_price_x64 {
        tick_high
    } else {
        tick_low
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::libraries::fixed_point_64;
    use proptest::prelude::*;

    mod get_sqrt_price_at_tick_test {
        use super::*;

        #[test]
        fn check_get_sqrt_price_at_tick_at_min_or_max_tick() {
            assert_eq!(
                get_sqrt_price_at_tick(MIN_TICK).unwrap(),
                MIN_SQRT_PRICE_X64
            );
            assert_eq!(
                get_sqrt_price_at_tick(MAX_TICK).unwrap(),
                MAX_SQRT_PRICE_X64
            );
            // the top of the domain uses nearly all of the u128
            assert!(MAX_SQRT_PRICE_X64 > u128::MAX / 2);
        }

        #[test]
        fn tick_zero_is_unit_price() {
            assert_eq!(get_sqrt_price_at_tick(0).unwrap(), fixed_point_64::Q64);
        }

        #[test]
        fn known_values_across_the_domain() {
            assert_eq!(get_sqrt_price_at_tick(-800000).unwrap(), 78);
            assert_eq!(get_sqrt_price_at_tick(-700000).unwrap(), 11651);
            assert_eq!(get_sqrt_price_at_tick(-443636).unwrap(), 4295048016);
            assert_eq!(
                get_sqrt_price_at_tick(-1).unwrap(),
                18445821805675392311
            );
            assert_eq!(get_sqrt_price_at_tick(1).unwrap(), 18447666387855959850);
            assert_eq!(
                get_sqrt_price_at_tick(443636).unwrap(),
                79226673515401279992447579061
            );
            assert_eq!(
                get_sqrt_price_at_tick(800000).unwrap(),
                4333416848654745125582156445438908583
            );
        }

        #[test]
        fn rejects_out_of_domain_ticks() {
            assert!(get_sqrt_price_at_tick(MAX_TICK + 1).is_err());
            assert!(get_sqrt_price_at_tick(MIN_TICK - 1).is_err());
        }

        #[test]
        fn deep_negative_ticks_share_one_ulp() {
            // a Q64.64 ulp spans many ticks at the bottom of the domain
            assert_eq!(get_sqrt_price_at_tick(-887271).unwrap(), 1);
            assert_eq!(
                get_sqrt_price_at_tick(MIN_TICK).unwrap(),
                get_sqrt_price_at_tick(-887271).unwrap()
            );
        }

        #[test]
        fn positive_and_negative_ticks_are_reciprocal() {
            // sqrt(1.0001^t) * sqrt(1.0001^-t) ~ 1, i.e. the X64 values
            // multiply back to ~2^128
            for t in [1i32, 10, 100, 1000, 50000, 400000] {
                let up = get_sqrt_price_at_tick(t).unwrap();
                let down = get_sqrt_price_at_tick(-t).unwrap();
                let product = (U256::from(up) * U256::from(down)) >> 64;
                let one = U256::from(fixed_point_64::Q64);
                let diff = if product > one {
                    product - one
                } else {
                    one - product
                };
                // within a few parts per 2^64
                assert!(diff < U256::from(1u64 << 34), "tick {}", t);
            }
        }
    }

    mod get_tick_at_sqrt_price_test {
        use super::*;

        #[test]
        fn round_trip_at_domain_edges() {
            for t in [
                MIN_TICK,
                MIN_LOSSLESS_TICK,
                MIN_LOSSLESS_TICK + 1,
                -600000,
                -443636,
                -100000,
                -1,
                0,
                1,
                100000,
                443636,
                800000,
                MAX_TICK - 1,
            ] {
                let price = get_sqrt_price_at_tick(t).unwrap();
                assert_eq!(get_tick_at_sqrt_price(price).unwrap(), t, "tick {}", t);
            }
        }

        #[test]
        fn rejects_out_of_domain_prices() {
            assert!(get_tick_at_sqrt_price(MIN_SQRT_PRICE_X64 - 1).is_err());
            assert!(get_tick_at_sqrt_price(MAX_SQRT_PRICE_X64).is_err());
        }

        #[test]
        fn quantized_bottom_resolves_to_min_tick() {
            // every tick below MIN_LOSSLESS_TICK shares its X64 value with
            // neighbors; the shared edge value resolves to the domain edge
            assert_eq!(get_tick_at_sqrt_price(1).unwrap(), MIN_TICK);
            let shared = get_sqrt_price_at_tick(-887271).unwrap();
            assert_eq!(get_tick_at_sqrt_price(shared).unwrap(), MIN_TICK);
        }

        #[test]
        fn floors_between_ticks() {
            let t = 1234;
            let price = get_sqrt_price_at_tick(t).unwrap();
            let next = get_sqrt_price_at_tick(t + 1).unwrap();
            assert_eq!(get_tick_at_sqrt_price(price).unwrap(), t);
            assert_eq!(get_tick_at_sqrt_price(next - 1).unwrap(), t);
            assert_eq!(get_tick_at_sqrt_price(next).unwrap(), t + 1);
        }
    }

    proptest! {
        #[test]
        fn tick_sqrt_price_round_trip(tick in MIN_LOSSLESS_TICK..MAX_TICK) {
            let sqrt_price = get_sqrt_price_at_tick(tick).unwrap();
            prop_assert_eq!(get_tick_at_sqrt_price(sqrt_price).unwrap(), tick);
        }

        #[test]
        fn sqrt_price_is_strictly_monotonic_where_lossless(
            tick in MIN_LOSSLESS_TICK..MAX_TICK,
        ) {
            let here = get_sqrt_price_at_tick(tick).unwrap();
            let above = get_sqrt_price_at_tick(tick + 1).unwrap();
            prop_assert!(above > here);
        }

        #[test]
        fn sqrt_price_never_decreases(tick in MIN_TICK..MAX_TICK) {
            let here = get_sqrt_price_at_tick(tick).unwrap();
            let above = get_sqrt_price_at_tick(tick + 1).unwrap();
            prop_assert!(above >= here);
        }
    }
}
