//! The replay driver: a monotonic clock that interleaves archived events with
//! strategy ticks. Single-threaded and deterministic; identical inputs
//! produce byte-identical telemetry.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::events::{self, EventPayload, EventStream, PoolEvent, SwapEvent};
use crate::libraries::tick_math;
use crate::manager::PositionManager;
use crate::performance::{PerformanceSummary, PerformanceTracker};
use crate::states::pool::{PoolParams, PoolState};
use crate::strategy::{Strategy, StrategyCtx};
use crate::swap;
use crate::validation::ValidationStats;
use crate::Result;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub archive_dir: PathBuf,
    pub pool_id: String,
    /// Replay window, both ends inclusive
    pub start_ms: u64,
    pub end_ms: u64,
    /// Clock step
    pub step_ms: u64,
    /// Cadence of fund/position CSV rows
    pub snapshot_interval_ms: u64,

    pub decimals_0: u8,
    pub decimals_1: u8,
    pub fee_rate: u32,
    pub tick_spacing: u16,
    pub initial_sqrt_price_x64: u128,

    pub initial_amount_0: u128,
    pub initial_amount_1: u128,
    pub cost_per_action_0: u128,
    pub cost_per_action_1: u128,

    /// Consume the first archived event to seed pool state. The seed event
    /// never distributes fees.
    pub seed_from_first_event: bool,
    /// Reseed around each archived swap and reconcile computed values
    /// against the chain. Off, events replay as plain swaps against the
    /// simulated pool.
    pub validate_against_archive: bool,

    pub output_dir: PathBuf,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            archive_dir: PathBuf::new(),
            pool_id: String::new(),
            start_ms: 0,
            end_ms: 0,
            step_ms: 1000,
            snapshot_interval_ms: 60_000,
            decimals_0: 9,
            decimals_1: 9,
            fee_rate: 100,
            tick_spacing: 2,
            initial_sqrt_price_x64: crate::libraries::fixed_point_64::Q64,
            initial_amount_0: 0,
            initial_amount_1: 0,
            cost_per_action_0: 0,
            cost_per_action_1: 0,
            seed_from_first_event: true,
            validate_against_archive: true,
            output_dir: PathBuf::new(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.start_ms >= self.end_ms {
            return Err(EngineError::Config(format!(
                "start {} must be before end {}",
                self.start_ms, self.end_ms
            )));
        }
        if self.step_ms == 0 {
            return Err(EngineError::Config("step_ms must be positive".into()));
        }
        if self.snapshot_interval_ms == 0 {
            return Err(EngineError::Config(
                "snapshot_interval_ms must be positive".into(),
            ));
        }
        if self.initial_amount_0 == 0 && self.initial_amount_1 == 0 {
            return Err(EngineError::Config(
                "initial investment must be positive on at least one side".into(),
            ));
        }
        Ok(())
    }
}

/// Final run artifact: performance summary, reconciliation counters, and the
/// state of every position ever opened
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub summary: PerformanceSummary,
    pub validation: ValidationStats,
    pub positions: Vec<PositionReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionReport {
    pub id: u64,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub amount_0: u128,
    pub amount_1: u128,
    pub unclaimed_fees_0: u128,
    pub unclaimed_fees_1: u128,
    pub lifetime_fees_0: u128,
    pub lifetime_fees_1: u128,
    pub open_time_ms: u64,
    pub close_time_ms: Option<u64>,
    pub closed: bool,
    pub in_range_ms: u64,
}

pub struct BacktestEngine<S: Strategy> {
    config: BacktestConfig,
    pool: PoolState,
    manager: PositionManager,
    strategy: S,
    events: EventStream,
    performance: PerformanceTracker,
    validation: ValidationStats,
    clock_ms: u64,
    step_index: u64,
}

impl<S: Strategy> BacktestEngine<S> {
    /// Loads the archive and assembles the run
    pub fn new(config: BacktestConfig, strategy: S) -> Result<Self> {
        config.validate()?;
        let events = events::load_archive(
            &config.archive_dir,
            &config.pool_id,
            config.start_ms,
            config.end_ms,
        )?;
        Self::with_events(config, strategy, events)
    }

    /// Assembles the run against an already-built event stream. This is the
    /// seam callers with their own loaders plug into.
    pub fn with_events(
        config: BacktestConfig,
        strategy: S,
        events: EventStream,
    ) -> Result<Self> {
        config.validate()?;
        let pool = PoolState::new(PoolParams {
            decimals_0: config.decimals_0,
            decimals_1: config.decimals_1,
            fee_rate: config.fee_rate,
            tick_spacing: config.tick_spacing,
            sqrt_price_x64: config.initial_sqrt_price_x64,
        })?;
        let manager = PositionManager::new(
            config.initial_amount_0,
            config.initial_amount_1,
            config.cost_per_action_0,
            config.cost_per_action_1,
        );
        let performance = PerformanceTracker::new(&config.output_dir)?;
        Ok(BacktestEngine {
            clock_ms: config.start_ms,
            config,
            pool,
            manager,
            strategy,
            events,
            performance,
            validation: ValidationStats::default(),
            step_index: 0,
        })
    }

    pub fn pool(&self) -> &PoolState {
        &self.pool
    }

    pub fn manager(&self) -> &PositionManager {
        &self.manager
    }

    pub fn validation(&self) -> &ValidationStats {
        &self.validation
    }

    /// Drives the clock from start to end and returns the final report
    pub fn run(&mut self) -> Result<BacktestReport> {
        info!(
            start_ms = self.config.start_ms,
            end_ms = self.config.end_ms,
            events = self.events.total(),
            "backtest starting"
        );

        if self.config.seed_from_first_event {
            if let Some(event) = self.events.next_event() {
                // seed populates scalars only; no fees are distributed on it
                self.seed_pool(&event)?;
                debug!(timestamp_ms = event.timestamp_ms, "pool seeded from archive");
            }
        }

        {
            let mut ctx = StrategyCtx::new(
                self.clock_ms,
                self.step_index,
                &mut self.pool,
                &mut self.manager,
            );
            self.strategy
                .on_init(&mut ctx)
                .map_err(|source| EngineError::Strategy {
                    timestamp_ms: self.clock_ms,
                    step_index: self.step_index,
                    source,
                })?;
        }

        let mut next_snapshot_ms = self.config.start_ms;
        loop {
            // apply every event in this step's window, in archive order
            while self
                .events
                .peek_timestamp()
                .map(|t| t <= self.clock_ms)
                .unwrap_or(false)
            {
                match self.events.next_event() {
                    Some(event) => self.apply_event(&event)?,
                    None => break,
                }
            }

            {
                let mut ctx = StrategyCtx::new(
                    self.clock_ms,
                    self.step_index,
                    &mut self.pool,
                    &mut self.manager,
                );
                self.strategy
                    .on_tick(&mut ctx)
                    .map_err(|source| EngineError::Strategy {
                        timestamp_ms: self.clock_ms,
                        step_index: self.step_index,
                        source,
                    })?;
            }
            self.manager
                .accrue_in_range(self.pool.tick_current(), self.config.step_ms);

            let at_end = self.clock_ms >= self.config.end_ms;
            let emit = at_end || self.clock_ms >= next_snapshot_ms;
            if self.clock_ms >= next_snapshot_ms {
                while next_snapshot_ms <= self.clock_ms {
                    next_snapshot_ms += self.config.snapshot_interval_ms;
                }
            }
            self.performance
                .sample(self.clock_ms, &self.pool, &self.manager, emit)?;

            if at_end {
                break;
            }
            self.clock_ms = (self.clock_ms + self.config.step_ms).min(self.config.end_ms);
            self.step_index += 1;
        }

        {
            let mut ctx = StrategyCtx::new(
                self.clock_ms,
                self.step_index,
                &mut self.pool,
                &mut self.manager,
            );
            self.strategy
                .on_finish(&mut ctx)
                .map_err(|source| EngineError::Strategy {
                    timestamp_ms: self.clock_ms,
                    step_index: self.step_index,
                    source,
                })?;
        }
        self.performance.flush();

        info!(validation = %self.validation, "replay reconciliation");

        let report = self.build_report()?;
        let report_path = self.config.output_dir.join("report.json");
        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&report_path, json) {
                    warn!(error = %err, "final report write failed");
                }
            }
            Err(err) => warn!(error = %err, "final report serialization failed"),
        }
        Ok(report)
    }

    fn seed_pool(&mut self, event: &PoolEvent) -> Result<()> {
        match &event.payload {
            EventPayload::Swap(ev) => self.pool.reseed(
                ev.sqrt_price_after,
                ev.liquidity_after,
                ev.reserve_after_0,
                ev.reserve_after_1,
                ev.tick_after,
            ),
            EventPayload::AddLiquidity(ev) | EventPayload::RemoveLiquidity(ev) => {
                let sqrt_price = self.pool.sqrt_price_x64();
                let tick = self.pool.tick_current();
                self.pool.reseed(
                    sqrt_price,
                    ev.liquidity_after,
                    ev.reserve_after_0,
                    ev.reserve_after_1,
                    tick,
                )
            }
        }
    }

    fn apply_event(&mut self, event: &PoolEvent) -> Result<()> {
        let swap_payload = match &event.payload {
            EventPayload::Swap(ev) => {
                self.apply_swap_event(ev)?;
                Some(ev.clone())
            }
            EventPayload::AddLiquidity(ev) | EventPayload::RemoveLiquidity(ev) => {
                self.pool
                    .apply_liquidity_delta(ev.tick_lower, ev.tick_upper, ev.liquidity_delta)?;
                // event-provided scalars are authoritative
                let sqrt_price = self.pool.sqrt_price_x64();
                let tick = self.pool.tick_current();
                self.pool.reseed(
                    sqrt_price,
                    ev.liquidity_after,
                    ev.reserve_after_0,
                    ev.reserve_after_1,
                    tick,
                )?;
                None
            }
        };

        // checkpoints refresh after every state-changing mutation, never
        // lazily
        self.manager.update_all_fees(&self.pool)?;

        if let Some(swap_event) = swap_payload {
            let mut ctx = StrategyCtx::new(
                self.clock_ms,
                self.step_index,
                &mut self.pool,
                &mut self.manager,
            );
            self.strategy
                .on_swap_event(&mut ctx, &swap_event)
                .map_err(|source| EngineError::Strategy {
                    timestamp_ms: self.clock_ms,
                    step_index: self.step_index,
                    source,
                })?;
        }
        Ok(())
    }

    fn apply_swap_event(&mut self, ev: &SwapEvent) -> Result<()> {
        if self.config.validate_against_archive {
            // start exactly where the chain did; the archive does not carry
            // the pre-swap liquidity, so the post-swap value stands in (exact
            // unless the swap crossed a tick)
            let tick_before = tick_math::get_tick_at_sqrt_price(ev.sqrt_price_before)?;
            self.pool.reseed(
                ev.sqrt_price_before,
                ev.liquidity_after,
                ev.reserve_after_0,
                ev.reserve_after_1,
                tick_before,
            )?;
            swap::apply_swap_with_validation(
                &mut self.pool,
                &mut self.validation,
                ev.amount_in,
                ev.a_to_b,
                ev,
            )?;
            // chain values stay authoritative for the carried-forward state
            self.pool.reseed(
                ev.sqrt_price_after,
                ev.liquidity_after,
                ev.reserve_after_0,
                ev.reserve_after_1,
                ev.tick_after,
            )?;
        } else {
            swap::execute_swap(&mut self.pool, ev.amount_in, ev.a_to_b)?;
        }
        Ok(())
    }

    fn build_report(&self) -> Result<BacktestReport> {
        let sqrt_price = self.pool.sqrt_price_x64();
        let mut positions = Vec::new();
        for position in self.manager.positions() {
            let (amount_0, amount_1) = position.amounts_at(sqrt_price)?;
            let (unclaimed_fees_0, unclaimed_fees_1) = position.unclaimed_fees();
            let (lifetime_fees_0, lifetime_fees_1) = position.lifetime_fees();
            positions.push(PositionReport {
                id: position.id(),
                tick_lower: position.tick_lower(),
                tick_upper: position.tick_upper(),
                liquidity: position.liquidity(),
                amount_0,
                amount_1,
                unclaimed_fees_0,
                unclaimed_fees_1,
                lifetime_fees_0,
                lifetime_fees_1,
                open_time_ms: position.open_time_ms(),
                close_time_ms: position.close_time_ms(),
                closed: position.is_closed(),
                in_range_ms: position.in_range_ms(),
            });
        }
        Ok(BacktestReport {
            summary: self.performance.summary(),
            validation: self.validation.clone(),
            positions,
        })
    }
}
