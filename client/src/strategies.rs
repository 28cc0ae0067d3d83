//! Reference strategies shipped with the CLI. Both are plain consumers of
//! the engine's strategy interface; anything more elaborate belongs in a
//! downstream crate.

use clmm_engine::{Strategy, StrategyCtx, StrategyError};
use tracing::info;

/// Snaps a tick to the nearest initializable boundary at or below it
fn align_tick(tick: i32, spacing: u16) -> i32 {
    let spacing = spacing as i32;
    let mut aligned = (tick / spacing) * spacing;
    if tick < 0 && tick % spacing != 0 {
        aligned -= spacing;
    }
    aligned
}

fn centered_range(tick_current: i32, half_width_ticks: i32, spacing: u16) -> (i32, i32) {
    let lower = align_tick(tick_current - half_width_ticks, spacing);
    let mut upper = align_tick(tick_current + half_width_ticks, spacing);
    if upper <= lower {
        upper = lower + spacing as i32;
    }
    (lower, upper)
}

/// Opens one range around the starting price and holds it to the end
pub struct HoldStrategy {
    half_width_ticks: i32,
    max_slippage_bps: u32,
}

impl HoldStrategy {
    pub fn new(half_width_ticks: i32, max_slippage_bps: u32) -> Self {
        HoldStrategy {
            half_width_ticks,
            max_slippage_bps,
        }
    }
}

impl Strategy for HoldStrategy {
    fn on_init(&mut self, ctx: &mut StrategyCtx) -> Result<(), StrategyError> {
        let (lower, upper) = centered_range(
            ctx.pool().tick_current(),
            self.half_width_ticks,
            ctx.pool().tick_spacing(),
        );
        let (cash_0, cash_1) = ctx.manager().cash();
        let id = ctx.add_liquidity_with_swap(lower, upper, cash_0, cash_1, self.max_slippage_bps)?;
        info!(id, lower, upper, "hold position opened");
        Ok(())
    }
}

/// Re-centers its range whenever the price drifts a configured number of
/// ticks away from the range midpoint
pub struct RebalanceStrategy {
    half_width_ticks: i32,
    threshold_ticks: i32,
    max_slippage_bps: u32,
    position_id: Option<u64>,
    rebalances: u64,
}

impl RebalanceStrategy {
    pub fn new(half_width_ticks: i32, threshold_ticks: i32, max_slippage_bps: u32) -> Self {
        RebalanceStrategy {
            half_width_ticks,
            threshold_ticks,
            max_slippage_bps,
            position_id: None,
            rebalances: 0,
        }
    }

    fn open(&mut self, ctx: &mut StrategyCtx) -> Result<(), StrategyError> {
        let (lower, upper) = centered_range(
            ctx.pool().tick_current(),
            self.half_width_ticks,
            ctx.pool().tick_spacing(),
        );
        let (cash_0, cash_1) = ctx.manager().cash();
        let id = ctx.add_liquidity_with_swap(lower, upper, cash_0, cash_1, self.max_slippage_bps)?;
        self.position_id = Some(id);
        Ok(())
    }
}

impl Strategy for RebalanceStrategy {
    fn on_init(&mut self, ctx: &mut StrategyCtx) -> Result<(), StrategyError> {
        self.open(ctx)
    }

    fn on_tick(&mut self, ctx: &mut StrategyCtx) -> Result<(), StrategyError> {
        let id = match self.position_id {
            Some(id) => id,
            None => return Ok(()),
        };
        let position = match ctx.position(id) {
            Some(p) => p,
            None => return Ok(()),
        };
        let center = (position.tick_lower() + position.tick_upper()) / 2;
        let drift = (ctx.pool().tick_current() - center).abs();
        if drift <= self.threshold_ticks {
            return Ok(());
        }

        ctx.close_position(id)?;
        self.open(ctx)?;
        self.rebalances += 1;
        info!(
            rebalances = self.rebalances,
            tick = ctx.pool().tick_current(),
            "range re-centered"
        );
        Ok(())
    }

    fn on_finish(&mut self, ctx: &mut StrategyCtx) -> Result<(), StrategyError> {
        if let Some(id) = self.position_id.take() {
            if ctx.position(id).map(|p| !p.is_closed()).unwrap_or(false) {
                ctx.close_position(id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn align_rounds_toward_negative_infinity() {
        assert_eq!(align_tick(7, 2), 6);
        assert_eq!(align_tick(-7, 2), -8);
        assert_eq!(align_tick(-8, 2), -8);
        assert_eq!(align_tick(0, 10), 0);
        assert_eq!(align_tick(-1, 10), -10);
    }

    #[test]
    fn centered_range_never_collapses() {
        let (lower, upper) = centered_range(5, 1, 10);
        assert!(lower < upper);
        assert_eq!((lower - upper).abs() % 10, 0);
    }
}
