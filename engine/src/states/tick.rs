///! Tick storage and the fee-growth bookkeeping attached to tick boundaries
use crate::error::EngineError;
use crate::libraries::big_num::U256;
use crate::libraries::full_math::WrappingMath;
use crate::libraries::{liquidity_math, tick_math};
use crate::Result;

/// State of an initialized price tick
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickState {
    /// The price tick
    pub tick: i32,

    /// Amount of net liquidity added (subtracted) when tick is crossed from
    /// left to right (right to left)
    pub liquidity_net: i128,
    /// The total position liquidity that references this tick
    pub liquidity_gross: u128,

    /// Fee growth per unit of liquidity on the _other_ side of this tick
    /// (relative to the current tick). Only has relative meaning, not
    /// absolute — the value depends on when the tick is initialized.
    pub fee_growth_outside_0: U256,
    pub fee_growth_outside_1: U256,
}

impl TickState {
    pub fn new(tick: i32) -> Self {
        TickState {
            tick,
            ..Default::default()
        }
    }

    /// Updates a tick and returns true if the tick was flipped between
    /// initialized and uninitialized
    ///
    /// # Arguments
    ///
    /// * `tick_current` - The current pool tick
    /// * `liquidity_delta` - A new amount of liquidity to be added
    ///   (subtracted) when the tick is crossed from left to right (right to
    ///   left)
    /// * `fee_growth_global_0` - The all-time global fee growth, per unit of
    ///   liquidity, in token_0
    /// * `fee_growth_global_1` - The all-time global fee growth, per unit of
    ///   liquidity, in token_1
    /// * `upper` - true for updating a position's upper tick, false for the
    ///   lower tick
    pub fn update(
        &mut self,
        tick_current: i32,
        liquidity_delta: i128,
        fee_growth_global_0: U256,
        fee_growth_global_1: U256,
        upper: bool,
    ) -> Result<bool> {
        let liquidity_gross_before = self.liquidity_gross;
        let liquidity_gross_after =
            liquidity_math::add_delta(liquidity_gross_before, liquidity_delta)?;

        // Either liquidity_gross_after becomes 0 (uninitialized) XOR
        // liquidity_gross_before was zero (initialized)
        let flipped = (liquidity_gross_after == 0) != (liquidity_gross_before == 0);

        if liquidity_gross_before == 0 {
            // by convention, we assume that all growth before a tick was
            // initialized happened _below_ the tick
            if self.tick <= tick_current {
                self.fee_growth_outside_0 = fee_growth_global_0;
                self.fee_growth_outside_1 = fee_growth_global_1;
            }
        }

        self.liquidity_gross = liquidity_gross_after;

        // when the lower (upper) tick is crossed left to right (right to
        // left), liquidity must be added (removed)
        self.liquidity_net = if upper {
            self.liquidity_net.checked_sub(liquidity_delta)
        } else {
            self.liquidity_net.checked_add(liquidity_delta)
        }
        .ok_or(EngineError::MathOverflow)?;

        Ok(flipped)
    }

    /// Transitions this tick as the price moves across it, returning the
    /// amount of liquidity added (subtracted) when the tick is crossed from
    /// left to right (right to left)
    pub fn cross(&mut self, fee_growth_global_0: U256, fee_growth_global_1: U256) -> i128 {
        self.fee_growth_outside_0 = fee_growth_global_0.wrapping_sub(self.fee_growth_outside_0);
        self.fee_growth_outside_1 = fee_growth_global_1.wrapping_sub(self.fee_growth_outside_1);
        self.liquidity_net
    }

    pub fn is_initialized(&self) -> bool {
        self.liquidity_gross != 0
    }

    pub fn is_clear(&self) -> bool {
        self.liquidity_net == 0 && self.liquidity_gross == 0
    }
}

/// Retrieves the all time fee growth data in token_0 and token_1, per unit of
/// liquidity, inside a position's tick boundaries.
///
/// Calculates `fr = fg - f_below(lower) - f_above(upper)`; all subtraction is
/// modulo 2^256.
///
/// # Arguments
///
/// * `tick_lower` - The lower tick boundary of the position
/// * `tick_upper` - The upper tick boundary of the position
/// * `tick_current` - The current tick
/// * `fee_growth_global_0` - The all-time global fee growth, per unit of
///   liquidity, in token_0
/// * `fee_growth_global_1` - The all-time global fee growth, per unit of
///   liquidity, in token_1
pub fn get_fee_growth_inside(
    tick_lower: &TickState,
    tick_upper: &TickState,
    tick_current: i32,
    fee_growth_global_0: U256,
    fee_growth_global_1: U256,
) -> (U256, U256) {
    // calculate fee growth below
    let (fee_growth_below_0, fee_growth_below_1) = if tick_current >= tick_lower.tick {
        (
            tick_lower.fee_growth_outside_0,
            tick_lower.fee_growth_outside_1,
        )
    } else {
        (
            fee_growth_global_0.wrapping_sub(tick_lower.fee_growth_outside_0),
            fee_growth_global_1.wrapping_sub(tick_lower.fee_growth_outside_1),
        )
    };

    // calculate fee growth above
    let (fee_growth_above_0, fee_growth_above_1) = if tick_current < tick_upper.tick {
        (
            tick_upper.fee_growth_outside_0,
            tick_upper.fee_growth_outside_1,
        )
    } else {
        (
            fee_growth_global_0.wrapping_sub(tick_upper.fee_growth_outside_0),
            fee_growth_global_1.wrapping_sub(tick_upper.fee_growth_outside_1),
        )
    };

    (
        fee_growth_global_0
            .wrapping_sub(fee_growth_below_0)
            .wrapping_sub(fee_growth_above_0),
        fee_growth_global_1
            .wrapping_sub(fee_growth_below_1)
            .wrapping_sub(fee_growth_above_1),
    )
}

/// A tick is valid iff it lies within tick boundaries and it is a multiple of
/// tick spacing
pub fn check_tick_boundary(tick: i32, tick_spacing: u16) -> Result<()> {
    if tick < tick_math::MIN_TICK || tick > tick_math::MAX_TICK {
        return Err(EngineError::TickOutOfBounds(tick));
    }
    if tick % tick_spacing as i32 != 0 {
        return Err(EngineError::InvalidTickSpacing {
            tick,
            spacing: tick_spacing,
        });
    }
    Ok(())
}

/// The lower tick must be below the upper tick
pub fn check_ticks_order(tick_lower_index: i32, tick_upper_index: i32) -> Result<()> {
    if tick_lower_index >= tick_upper_index {
        return Err(EngineError::InvalidRange {
            lower: tick_lower_index,
            upper: tick_upper_index,
        });
    }
    Ok(())
}
