//! Cash balances and the set of virtual positions a strategy owns. The
//! manager is the only writer of position state and the only path through
//! which strategies reach the pool.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::EngineError;
use crate::libraries::full_math::MulDiv;
use crate::libraries::{liquidity_amounts, sqrt_price_math, tick_math};
use crate::states::pool::PoolState;
use crate::states::position::VirtualPosition;
use crate::states::tick;
use crate::swap;
use crate::Result;

/// Swap fractions evaluated by `add_liquidity_with_swap`, in percent
const SWAP_PERCENTS: [u128; 5] = [10, 25, 50, 75, 90];

/// A rebalance swap must buy at least this multiple of its cost in extra
/// liquidity value
const MIN_IMPROVEMENT_PER_COST: u128 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSide {
    Zero,
    One,
}

/// What a closed position paid back
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseOutcome {
    pub amount_0: u128,
    pub amount_1: u128,
    pub fee_0: u128,
    pub fee_1: u128,
}

#[derive(Debug)]
pub struct PositionManager {
    cash_0: u128,
    cash_1: u128,
    /// The recorded initial investment
    initial_amount_0: u128,
    initial_amount_1: u128,

    positions: BTreeMap<u64, VirtualPosition>,
    next_position_id: u64,

    /// Fees ever collected to cash, across all positions
    collected_fees_0: u128,
    collected_fees_1: u128,

    /// Cumulative flat costs charged against cash
    action_cost_0: u128,
    action_cost_1: u128,
    cost_per_action_0: u128,
    cost_per_action_1: u128,
}

impl PositionManager {
    pub fn new(
        initial_amount_0: u128,
        initial_amount_1: u128,
        cost_per_action_0: u128,
        cost_per_action_1: u128,
    ) -> Self {
        PositionManager {
            cash_0: initial_amount_0,
            cash_1: initial_amount_1,
            initial_amount_0,
            initial_amount_1,
            positions: BTreeMap::new(),
            next_position_id: 1,
            collected_fees_0: 0,
            collected_fees_1: 0,
            action_cost_0: 0,
            action_cost_1: 0,
            cost_per_action_0,
            cost_per_action_1,
        }
    }

    pub fn cash(&self) -> (u128, u128) {
        (self.cash_0, self.cash_1)
    }

    pub fn initial_amounts(&self) -> (u128, u128) {
        (self.initial_amount_0, self.initial_amount_1)
    }

    pub fn collected_fees(&self) -> (u128, u128) {
        (self.collected_fees_0, self.collected_fees_1)
    }

    pub fn action_costs(&self) -> (u128, u128) {
        (self.action_cost_0, self.action_cost_1)
    }

    pub fn position(&self, id: u64) -> Option<&VirtualPosition> {
        self.positions.get(&id)
    }

    /// All positions ever opened, closed ones included, in id order
    pub fn positions(&self) -> impl Iterator<Item = &VirtualPosition> {
        self.positions.values()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &VirtualPosition> {
        self.positions.values().filter(|p| !p.is_closed())
    }

    pub fn open_position_ids(&self) -> Vec<u64> {
        self.open_positions().map(|p| p.id()).collect()
    }

    /// Sum of open-position token values at the given price
    pub fn total_amounts_at(&self, sqrt_price_x64: u128) -> Result<(u128, u128)> {
        let mut total_0 = 0u128;
        let mut total_1 = 0u128;
        for position in self.open_positions() {
            let (amount_0, amount_1) = position.amounts_at(sqrt_price_x64)?;
            total_0 = total_0.checked_add(amount_0).ok_or(EngineError::MathOverflow)?;
            total_1 = total_1.checked_add(amount_1).ok_or(EngineError::MathOverflow)?;
        }
        Ok((total_0, total_1))
    }

    /// Sum of open-position unclaimed fees
    pub fn total_unclaimed_fees(&self) -> (u128, u128) {
        self.open_positions()
            .fold((0u128, 0u128), |(a, b), p| {
                let (f0, f1) = p.unclaimed_fees();
                (a.saturating_add(f0), b.saturating_add(f1))
            })
    }

    /// Mints the largest position the budget affords at the current price.
    /// Consumed amounts round up (owed to the pool); the remainder stays in
    /// cash. A range the budget cannot fill on the binding side yields an
    /// empty position rather than an error.
    pub fn create_position(
        &mut self,
        pool: &mut PoolState,
        tick_lower: i32,
        tick_upper: i32,
        amount_0: u128,
        amount_1: u128,
        now_ms: u64,
    ) -> Result<u64> {
        tick::check_ticks_order(tick_lower, tick_upper)?;
        tick::check_tick_boundary(tick_lower, pool.tick_spacing())?;
        tick::check_tick_boundary(tick_upper, pool.tick_spacing())?;
        self.require_cash(TokenSide::Zero, amount_0)?;
        self.require_cash(TokenSide::One, amount_1)?;

        let sqrt_lower = tick_math::get_sqrt_price_at_tick(tick_lower)?;
        let sqrt_upper = tick_math::get_sqrt_price_at_tick(tick_upper)?;
        let liquidity = liquidity_amounts::get_liquidity_for_amounts(
            pool.sqrt_price_x64(),
            sqrt_lower,
            sqrt_upper,
            amount_0,
            amount_1,
        );

        let (consumed_0, consumed_1) = if liquidity > 0 {
            sqrt_price_math::get_amounts_for_liquidity_delta(
                pool.sqrt_price_x64(),
                sqrt_lower,
                sqrt_upper,
                liquidity,
                true,
            )?
        } else {
            (0, 0)
        };
        // ceil rounding can owe one unit past the requested budget
        self.require_cash(TokenSide::Zero, consumed_0)?;
        self.require_cash(TokenSide::One, consumed_1)?;

        if liquidity > 0 {
            let delta = i128::try_from(liquidity).map_err(|_| EngineError::MathOverflow)?;
            pool.apply_liquidity_delta(tick_lower, tick_upper, delta)?;
        }
        self.cash_0 -= consumed_0;
        self.cash_1 -= consumed_1;

        // checkpoint after the boundary ticks exist
        let (fee_growth_inside_0, fee_growth_inside_1) =
            pool.fee_growth_inside(tick_lower, tick_upper);

        let id = self.next_position_id;
        self.next_position_id += 1;
        self.positions.insert(
            id,
            VirtualPosition::new(
                id,
                tick_lower,
                tick_upper,
                liquidity,
                fee_growth_inside_0,
                fee_growth_inside_1,
                consumed_0,
                consumed_1,
                now_ms,
            ),
        );
        self.charge_action_cost()?;

        debug!(
            id,
            tick_lower, tick_upper, liquidity, consumed_0, consumed_1, "position opened"
        );
        Ok(id)
    }

    /// Grows or shrinks a position. Growth draws from cash with ceil
    /// rounding; shrinkage credits cash with floor rounding, after the fee
    /// checkpoint is refreshed.
    pub fn resize_position(
        &mut self,
        pool: &mut PoolState,
        id: u64,
        liquidity_delta: i128,
    ) -> Result<(u128, u128)> {
        if liquidity_delta == 0 {
            return Ok((0, 0));
        }
        let position = self
            .positions
            .get_mut(&id)
            .filter(|p| !p.is_closed())
            .ok_or(EngineError::PositionNotFound(id))?;
        let tick_lower = position.tick_lower();
        let tick_upper = position.tick_upper();

        let (fee_growth_inside_0, fee_growth_inside_1) =
            pool.fee_growth_inside(tick_lower, tick_upper);
        position.update_fees(fee_growth_inside_0, fee_growth_inside_1)?;

        let sqrt_lower = tick_math::get_sqrt_price_at_tick(tick_lower)?;
        let sqrt_upper = tick_math::get_sqrt_price_at_tick(tick_upper)?;

        if liquidity_delta > 0 {
            let (need_0, need_1) = sqrt_price_math::get_amounts_for_liquidity_delta(
                pool.sqrt_price_x64(),
                sqrt_lower,
                sqrt_upper,
                liquidity_delta as u128,
                true,
            )?;
            if need_0 > self.cash_0 {
                return Err(EngineError::InsufficientFunds {
                    token: 0,
                    needed: need_0,
                    available: self.cash_0,
                });
            }
            if need_1 > self.cash_1 {
                return Err(EngineError::InsufficientFunds {
                    token: 1,
                    needed: need_1,
                    available: self.cash_1,
                });
            }
            position.apply_liquidity_delta(liquidity_delta)?;
            position.add_cost_basis(need_0, need_1);
            pool.apply_liquidity_delta(tick_lower, tick_upper, liquidity_delta)?;
            self.cash_0 -= need_0;
            self.cash_1 -= need_1;
            self.charge_action_cost()?;
            Ok((need_0, need_1))
        } else {
            let magnitude = liquidity_delta.unsigned_abs();
            let (out_0, out_1) = sqrt_price_math::get_amounts_for_liquidity_delta(
                pool.sqrt_price_x64(),
                sqrt_lower,
                sqrt_upper,
                magnitude,
                false,
            )?;
            position.apply_liquidity_delta(liquidity_delta)?;
            pool.apply_liquidity_delta(tick_lower, tick_upper, liquidity_delta)?;
            self.cash_0 = self.cash_0.checked_add(out_0).ok_or(EngineError::MathOverflow)?;
            self.cash_1 = self.cash_1.checked_add(out_1).ok_or(EngineError::MathOverflow)?;
            self.charge_action_cost()?;
            Ok((out_0, out_1))
        }
    }

    /// Burns the position's liquidity, credits principal and accrued fees to
    /// cash, and keeps the closed record for reporting.
    pub fn close_position(
        &mut self,
        pool: &mut PoolState,
        id: u64,
        now_ms: u64,
    ) -> Result<CloseOutcome> {
        let position = self
            .positions
            .get_mut(&id)
            .filter(|p| !p.is_closed())
            .ok_or(EngineError::PositionNotFound(id))?;
        let tick_lower = position.tick_lower();
        let tick_upper = position.tick_upper();
        let liquidity = position.liquidity();

        let (fee_growth_inside_0, fee_growth_inside_1) =
            pool.fee_growth_inside(tick_lower, tick_upper);
        position.update_fees(fee_growth_inside_0, fee_growth_inside_1)?;
        let (fee_0, fee_1) = position.collect();
        position.mark_closed(now_ms);

        let (amount_0, amount_1) = if liquidity > 0 {
            let sqrt_lower = tick_math::get_sqrt_price_at_tick(tick_lower)?;
            let sqrt_upper = tick_math::get_sqrt_price_at_tick(tick_upper)?;
            let amounts = sqrt_price_math::get_amounts_for_liquidity_delta(
                pool.sqrt_price_x64(),
                sqrt_lower,
                sqrt_upper,
                liquidity,
                false,
            )?;
            let delta = i128::try_from(liquidity).map_err(|_| EngineError::MathOverflow)?;
            pool.apply_liquidity_delta(tick_lower, tick_upper, -delta)?;
            amounts
        } else {
            (0, 0)
        };

        self.cash_0 = self
            .cash_0
            .checked_add(amount_0)
            .and_then(|c| c.checked_add(fee_0))
            .ok_or(EngineError::MathOverflow)?;
        self.cash_1 = self
            .cash_1
            .checked_add(amount_1)
            .and_then(|c| c.checked_add(fee_1))
            .ok_or(EngineError::MathOverflow)?;
        self.collected_fees_0 = self.collected_fees_0.saturating_add(fee_0);
        self.collected_fees_1 = self.collected_fees_1.saturating_add(fee_1);
        self.charge_action_cost()?;

        debug!(id, amount_0, amount_1, fee_0, fee_1, "position closed");
        Ok(CloseOutcome {
            amount_0,
            amount_1,
            fee_0,
            fee_1,
        })
    }

    /// Moves a position's unclaimed fees to cash
    pub fn collect_fees(&mut self, pool: &PoolState, id: u64) -> Result<(u128, u128)> {
        let position = self
            .positions
            .get_mut(&id)
            .filter(|p| !p.is_closed())
            .ok_or(EngineError::PositionNotFound(id))?;
        let (fee_growth_inside_0, fee_growth_inside_1) =
            pool.fee_growth_inside(position.tick_lower(), position.tick_upper());
        position.update_fees(fee_growth_inside_0, fee_growth_inside_1)?;
        let (fee_0, fee_1) = position.collect();

        self.cash_0 = self.cash_0.checked_add(fee_0).ok_or(EngineError::MathOverflow)?;
        self.cash_1 = self.cash_1.checked_add(fee_1).ok_or(EngineError::MathOverflow)?;
        self.collected_fees_0 = self.collected_fees_0.saturating_add(fee_0);
        self.collected_fees_1 = self.collected_fees_1.saturating_add(fee_1);
        Ok((fee_0, fee_1))
    }

    /// Refreshes every open position's fee checkpoint, in id order
    pub fn update_all_fees(&mut self, pool: &PoolState) -> Result<()> {
        for position in self.positions.values_mut().filter(|p| !p.is_closed()) {
            let (fee_growth_inside_0, fee_growth_inside_1) =
                pool.fee_growth_inside(position.tick_lower(), position.tick_upper());
            position.update_fees(fee_growth_inside_0, fee_growth_inside_1)?;
        }
        Ok(())
    }

    /// Bumps in-range time on open positions; called once per clock step
    pub fn accrue_in_range(&mut self, tick_current: i32, step_ms: u64) {
        for position in self.positions.values_mut().filter(|p| !p.is_closed()) {
            if position.is_in_range(tick_current) {
                position.accrue_in_range(step_ms);
            }
        }
    }

    /// Deducts a flat cost from cash. Cash can never go negative.
    pub fn record_action_cost(&mut self, token: TokenSide, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        match token {
            TokenSide::Zero => {
                self.require_cash(TokenSide::Zero, amount)?;
                self.cash_0 -= amount;
                self.action_cost_0 = self.action_cost_0.saturating_add(amount);
            }
            TokenSide::One => {
                self.require_cash(TokenSide::One, amount)?;
                self.cash_1 -= amount;
                self.action_cost_1 = self.action_cost_1.saturating_add(amount);
            }
        }
        Ok(())
    }

    /// Evaluates whether swapping part of an unbalanced budget buys enough
    /// extra liquidity to be worth its cost, then mints.
    ///
    /// Candidates: no swap, and swapping {10, 25, 50, 75, 90}% of either
    /// token through the quote adapter. Candidates above the slippage cap are
    /// discarded. The best candidate wins only when the extra liquidity it
    /// mints, valued in token_1 over the full range, exceeds twice the swap's
    /// fee-plus-slippage cost; everything else falls back to the no-swap
    /// mint.
    pub fn add_liquidity_with_swap(
        &mut self,
        pool: &mut PoolState,
        tick_lower: i32,
        tick_upper: i32,
        amount_0: u128,
        amount_1: u128,
        max_slippage_bps: u32,
        now_ms: u64,
    ) -> Result<u64> {
        tick::check_ticks_order(tick_lower, tick_upper)?;
        tick::check_tick_boundary(tick_lower, pool.tick_spacing())?;
        tick::check_tick_boundary(tick_upper, pool.tick_spacing())?;
        self.require_cash(TokenSide::Zero, amount_0)?;
        self.require_cash(TokenSide::One, amount_1)?;

        let sqrt_lower = tick_math::get_sqrt_price_at_tick(tick_lower)?;
        let sqrt_upper = tick_math::get_sqrt_price_at_tick(tick_upper)?;
        let spot_sqrt_price = pool.sqrt_price_x64();
        let no_swap_liquidity = liquidity_amounts::get_liquidity_for_amounts(
            spot_sqrt_price,
            sqrt_lower,
            sqrt_upper,
            amount_0,
            amount_1,
        );

        struct Candidate {
            zero_for_one: bool,
            swap_amount: u128,
            quote: swap::SwapQuote,
            liquidity: u128,
        }
        let mut best: Option<Candidate> = None;

        for zero_for_one in [true, false] {
            let budget = if zero_for_one { amount_0 } else { amount_1 };
            for percent in SWAP_PERCENTS {
                let swap_amount = budget
                    .mul_div_floor(percent, 100)
                    .ok_or(EngineError::MathOverflow)?;
                if swap_amount == 0 {
                    continue;
                }
                let quote = match swap::quote_swap(pool, swap_amount, zero_for_one) {
                    Ok(quote) => quote,
                    // nothing to swap against on that side
                    Err(EngineError::NoLiquidity) => continue,
                    Err(err) => return Err(err),
                };
                if quote.slippage_bps > max_slippage_bps {
                    continue;
                }
                let (balance_0, balance_1) = if zero_for_one {
                    (
                        amount_0 - swap_amount,
                        amount_1.checked_add(quote.amount_out).ok_or(EngineError::MathOverflow)?,
                    )
                } else {
                    (
                        amount_0.checked_add(quote.amount_out).ok_or(EngineError::MathOverflow)?,
                        amount_1 - swap_amount,
                    )
                };
                let liquidity = liquidity_amounts::get_liquidity_for_amounts(
                    quote.sqrt_price_after,
                    sqrt_lower,
                    sqrt_upper,
                    balance_0,
                    balance_1,
                );
                if best.as_ref().map(|b| liquidity > b.liquidity).unwrap_or(true) {
                    best = Some(Candidate {
                        zero_for_one,
                        swap_amount,
                        quote,
                        liquidity,
                    });
                }
            }
        }

        if let Some(candidate) = best {
            if candidate.liquidity > no_swap_liquidity {
                let improvement = candidate.liquidity - no_swap_liquidity;
                let improvement_value_1 = liquidity_amounts::get_amount_1_for_liquidity(
                    sqrt_lower,
                    sqrt_upper,
                    improvement,
                );
                // fee is paid in the input token, slippage shows up in the
                // output token; value both in token_1 at spot
                let cost_1 = if candidate.zero_for_one {
                    swap::amount_0_to_1(candidate.quote.fee_amount, spot_sqrt_price)?
                        .saturating_add(candidate.quote.slippage)
                } else {
                    candidate
                        .quote
                        .fee_amount
                        .saturating_add(swap::amount_0_to_1(candidate.quote.slippage, spot_sqrt_price)?)
                };

                if improvement_value_1 > cost_1.saturating_mul(MIN_IMPROVEMENT_PER_COST) {
                    let result =
                        swap::execute_swap(pool, candidate.swap_amount, candidate.zero_for_one)?;
                    let (balance_0, balance_1) = if candidate.zero_for_one {
                        self.cash_0 -= candidate.swap_amount;
                        self.cash_1 = self
                            .cash_1
                            .checked_add(result.amount_out)
                            .ok_or(EngineError::MathOverflow)?;
                        (amount_0 - candidate.swap_amount, amount_1 + result.amount_out)
                    } else {
                        self.cash_1 -= candidate.swap_amount;
                        self.cash_0 = self
                            .cash_0
                            .checked_add(result.amount_out)
                            .ok_or(EngineError::MathOverflow)?;
                        (amount_0 + result.amount_out, amount_1 - candidate.swap_amount)
                    };
                    // the rebalance swap itself moved fee growth
                    self.update_all_fees(pool)?;
                    self.charge_action_cost()?;

                    debug!(
                        swap_amount = candidate.swap_amount,
                        zero_for_one = candidate.zero_for_one,
                        amount_out = result.amount_out,
                        "rebalance swap executed"
                    );
                    return self.create_position(
                        pool, tick_lower, tick_upper, balance_0, balance_1, now_ms,
                    );
                }
            }
        }

        self.create_position(pool, tick_lower, tick_upper, amount_0, amount_1, now_ms)
    }

    fn require_cash(&self, token: TokenSide, needed: u128) -> Result<()> {
        let available = match token {
            TokenSide::Zero => self.cash_0,
            TokenSide::One => self.cash_1,
        };
        if needed > available {
            return Err(EngineError::InsufficientFunds {
                token: match token {
                    TokenSide::Zero => 0,
                    TokenSide::One => 1,
                },
                needed,
                available,
            });
        }
        Ok(())
    }

    fn charge_action_cost(&mut self) -> Result<()> {
        let cost_0 = self.cost_per_action_0;
        let cost_1 = self.cost_per_action_1;
        self.record_action_cost(TokenSide::Zero, cost_0)?;
        self.record_action_cost(TokenSide::One, cost_1)?;
        Ok(())
    }
}
