mod strategies;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use clmm_engine::{BacktestConfig, BacktestEngine, BacktestReport, Strategy};
use strategies::{HoldStrategy, RebalanceStrategy};

#[derive(Parser)]
#[command(
    name = "clmm-backtest",
    about = "Replay a CLMM event archive against a liquidity strategy",
    version
)]
struct Args {
    /// Directory of paginated event-archive JSON files
    #[arg(long)]
    archive: PathBuf,

    /// Pool object id; events for other pools are filtered out
    #[arg(long)]
    pool_id: String,

    /// Window start, unix milliseconds or RFC3339
    #[arg(long)]
    start: String,

    /// Window end, unix milliseconds or RFC3339
    #[arg(long)]
    end: String,

    #[arg(long, default_value_t = 1000)]
    step_ms: u64,

    #[arg(long, default_value_t = 60_000)]
    snapshot_interval_ms: u64,

    #[arg(long, default_value_t = 9)]
    decimals_0: u8,

    #[arg(long, default_value_t = 9)]
    decimals_1: u8,

    /// Swap fee in parts per million
    #[arg(long, default_value_t = 100)]
    fee_rate_ppm: u32,

    #[arg(long, default_value_t = 2)]
    tick_spacing: u16,

    /// Starting sqrt price, Q64.64; superseded by the seed event unless
    /// --no-seed is set
    #[arg(long, default_value_t = 1u128 << 64)]
    sqrt_price_x64: u128,

    #[arg(long, default_value_t = 0)]
    initial_amount_0: u128,

    #[arg(long, default_value_t = 0)]
    initial_amount_1: u128,

    /// Flat token_0 cost charged per position action
    #[arg(long, default_value_t = 0)]
    action_cost_0: u128,

    /// Flat token_1 cost charged per position action
    #[arg(long, default_value_t = 0)]
    action_cost_1: u128,

    /// Do not consume the first archived event to seed pool state
    #[arg(long)]
    no_seed: bool,

    /// Replay swaps purely simulated instead of reconciling against the
    /// archived on-chain values
    #[arg(long)]
    no_validate: bool,

    /// Directory the CSV streams and report.json are written to
    #[arg(long, default_value = "out")]
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = StrategyKind::Hold)]
    strategy: StrategyKind,

    /// Half-width of the strategy range, in ticks
    #[arg(long, default_value_t = 100)]
    range_ticks: i32,

    /// Rebalance when the price drifts this many ticks from the range
    /// center (rebalance strategy only)
    #[arg(long, default_value_t = 60)]
    rebalance_threshold_ticks: i32,

    #[arg(long, default_value_t = 100)]
    max_slippage_bps: u32,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StrategyKind {
    /// Open one range at the start and hold it
    Hold,
    /// Re-center the range when price drifts
    Rebalance,
}

fn parse_time(input: &str) -> Result<u64> {
    if let Ok(ms) = input.parse::<u64>() {
        return Ok(ms);
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(input)
        .with_context(|| format!("`{input}` is neither unix milliseconds nor RFC3339"))?;
    u64::try_from(parsed.timestamp_millis())
        .map_err(|_| anyhow::anyhow!("`{input}` is before the unix epoch"))
}

fn run_with<S: Strategy>(config: BacktestConfig, strategy: S) -> Result<BacktestReport> {
    let mut engine = BacktestEngine::new(config, strategy).context("backtest setup failed")?;
    engine.run().context("backtest run failed")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BacktestConfig {
        archive_dir: args.archive.clone(),
        pool_id: args.pool_id.clone(),
        start_ms: parse_time(&args.start)?,
        end_ms: parse_time(&args.end)?,
        step_ms: args.step_ms,
        snapshot_interval_ms: args.snapshot_interval_ms,
        decimals_0: args.decimals_0,
        decimals_1: args.decimals_1,
        fee_rate: args.fee_rate_ppm,
        tick_spacing: args.tick_spacing,
        initial_sqrt_price_x64: args.sqrt_price_x64,
        initial_amount_0: args.initial_amount_0,
        initial_amount_1: args.initial_amount_1,
        cost_per_action_0: args.action_cost_0,
        cost_per_action_1: args.action_cost_1,
        seed_from_first_event: !args.no_seed,
        validate_against_archive: !args.no_validate,
        output_dir: args.output.clone(),
    };

    let report = match args.strategy {
        StrategyKind::Hold => run_with(
            config,
            HoldStrategy::new(args.range_ticks, args.max_slippage_bps),
        )?,
        StrategyKind::Rebalance => run_with(
            config,
            RebalanceStrategy::new(
                args.range_ticks,
                args.rebalance_threshold_ticks,
                args.max_slippage_bps,
            ),
        )?,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report.summary).context("summary serialization failed")?
    );
    if report.validation.swaps_checked > 0 {
        println!(
            "validation: {} swaps, {} exact, {} amount-out mismatches",
            report.validation.swaps_checked,
            report.validation.exact_matches,
            report.validation.amount_out_mismatches
        );
    }
    println!("reports written to {}", args.output.display());
    Ok(())
}
