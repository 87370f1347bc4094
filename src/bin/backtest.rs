//! Backtest CLI: replays exchange history through the decision pipeline on
//! the simulated exchange and prints the performance report.

use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use std::str::FromStr;
use tradepilot::application::backtest::engine::{BacktestConfig, BacktestEngine};
use tradepilot::domain::market::Timeframe;
use tradepilot::domain::ports::MarketDataService;
use tradepilot::infrastructure::binance::BinanceMarketDataService;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay history through the trading pipeline")]
struct Args {
    /// Trading pair, e.g. BTC/USDT
    #[arg(long, default_value = "BTC/USDT")]
    symbol: String,

    /// Candle interval (1m..1d)
    #[arg(long, default_value = "1h")]
    timeframe: String,

    /// Days of history to replay
    #[arg(long, default_value_t = 30)]
    days: u32,

    /// Starting capital in USD
    #[arg(long, default_value = "10000")]
    initial_capital: String,

    /// Fraction of cash committed per entry
    #[arg(long, default_value_t = 0.95)]
    position_size_ratio: f64,

    /// Taker fee fraction
    #[arg(long, default_value = "0.001")]
    fee_rate: String,

    /// Slippage fraction per fill
    #[arg(long, default_value = "0.0005")]
    slippage_rate: String,

    /// Minimum signal confidence to enter
    #[arg(long, default_value_t = 0.65)]
    min_confidence: f64,

    /// RNG seed for reproducible runs
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Exchange REST endpoint
    #[arg(long, default_value = "https://api.binance.com")]
    base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = BacktestConfig {
        symbol: args.symbol.clone(),
        timeframe: Timeframe::from_str(&args.timeframe)?,
        days: args.days,
        initial_capital: Decimal::from_str_exact(&args.initial_capital)?,
        position_size_ratio: args.position_size_ratio,
        fee_rate: Decimal::from_str_exact(&args.fee_rate)?,
        slippage_rate: Decimal::from_str_exact(&args.slippage_rate)?,
        min_confidence: args.min_confidence,
        seed: args.seed,
    };

    let market = BinanceMarketDataService::new(args.base_url);
    let candles = market
        .fetch_ohlcv(&config.symbol, config.timeframe, config.candle_count())
        .await
        .map_err(|e| anyhow::anyhow!("history fetch failed: {}", e))?;

    let report = BacktestEngine::new(config).run(&candles);

    let m = &report.metrics;
    println!("=== Backtest: {} ({} days @ {}) ===", args.symbol, args.days, args.timeframe);
    println!("Initial equity      : {:.2}", m.initial_equity);
    println!("Final equity        : {:.2}", m.final_equity);
    println!("Total return        : {:+.2}%", m.total_return_pct);
    println!("Max drawdown        : {:.2}%", m.max_drawdown_pct);
    println!("Sharpe ratio        : {:.2}", m.sharpe_ratio);
    println!("Sortino ratio       : {:.2}", m.sortino_ratio);
    println!("Win rate            : {:.1}%", m.win_rate * 100.0);
    println!("Profit factor       : {:.2}", m.profit_factor);
    println!("Fills / round trips : {} / {}", m.total_trades, m.completed_trades);

    if !report.trades.is_empty() {
        println!("--- Round trips ---");
        for trade in &report.trades {
            println!(
                "{} -> {} | entry {:.2} exit {:.2} | net {:+.2} ({:+.2}%) | {:.0}m",
                trade.entry_time.format("%Y-%m-%d %H:%M"),
                trade.exit_time.format("%Y-%m-%d %H:%M"),
                trade.entry_price,
                trade.exit_price,
                trade.net_pnl,
                trade.pnl_pct,
                trade.hold_minutes,
            );
        }
    }

    Ok(())
}
