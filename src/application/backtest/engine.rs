use crate::application::backtest::exchange::{SimPosition, SimulatedExchange};
use crate::application::backtest::portfolio::{BacktestMetrics, BacktestPortfolio, EquityPoint};
use crate::application::pipeline::{Action, AnalysisInput, DecisionPipeline};
use crate::domain::market::{Regime, Timeframe};
use crate::domain::performance::PerformanceTracker;
use crate::domain::trading::types::{Candle, OrderSide, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub days: u32,
    pub initial_capital: Decimal,
    pub position_size_ratio: f64,
    pub fee_rate: Decimal,
    pub slippage_rate: Decimal,
    pub min_confidence: f64,
    /// Seed for any stochastic strategy component. The replay itself is
    /// fully deterministic; this only exists so runs stay reproducible when
    /// a randomized strategy is plugged in.
    pub seed: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::OneHour,
            days: 30,
            initial_capital: dec!(10000),
            position_size_ratio: 0.95,
            fee_rate: dec!(0.001),
            slippage_rate: dec!(0.0005),
            min_confidence: 0.65,
            seed: 0,
        }
    }
}

impl BacktestConfig {
    /// Number of candles covering `days` of history at `timeframe`, capped
    /// at the exchange's single-request limit.
    pub fn candle_count(&self) -> usize {
        let per_day = (1440 / self.timeframe.to_minutes().max(1)) as usize;
        (per_day * self.days as usize).clamp(100, 1000)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub config: BacktestConfig,
}

/// Exit levels captured when a position opens; every later bar is checked
/// against them.
#[derive(Debug, Clone)]
struct EntryLevels {
    stop_loss_pct: f64,
    take_profit_pct: f64,
    confidence: f64,
    regime: Regime,
}

/// The four event kinds flowing through the single replay queue.
#[derive(Debug)]
enum BacktestEvent {
    Market {
        index: usize,
    },
    Signal {
        side: OrderSide,
        size_usd: Decimal,
        confidence: f64,
        reason: String,
        levels: Option<EntryLevels>,
    },
    Order {
        side: OrderSide,
        size_usd: Decimal,
        reason: String,
        levels: Option<EntryLevels>,
    },
    Fill {
        side: OrderSide,
        reason: String,
    },
}

const WARMUP_BARS: usize = 50;
const WINDOW_BARS: usize = 100;

/// Deterministic event-driven replay: each historical candle becomes a
/// MARKET event, the decision pipeline may emit a SIGNAL, signals become
/// ORDERs, and the simulated exchange converts orders to FILLs. No wall
/// clock is read anywhere on this path; time comes from the candle feed.
pub struct BacktestEngine {
    config: BacktestConfig,
    pipeline: DecisionPipeline,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            pipeline: DecisionPipeline::new(),
        }
    }

    pub fn run(&self, candles: &[Candle]) -> BacktestReport {
        let mut exchange = SimulatedExchange::new(
            self.config.initial_capital,
            self.config.fee_rate,
            self.config.slippage_rate,
        );
        let mut portfolio = BacktestPortfolio::new();
        let mut tracker = PerformanceTracker::new();
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut entry_levels: Option<EntryLevels> = None;
        let mut queue: VecDeque<BacktestEvent> = VecDeque::new();

        info!(
            "BacktestEngine: replaying {} candles of {} ({})",
            candles.len(),
            self.config.symbol,
            self.config.timeframe
        );

        for bar in WARMUP_BARS..candles.len() {
            let candle = &candles[bar];
            let ts = candle_time(candle);
            queue.push_back(BacktestEvent::Market { index: bar });

            while let Some(event) = queue.pop_front() {
                match event {
                    BacktestEvent::Market { index } => {
                        self.on_market(index, candles, &exchange, &entry_levels, &tracker, &mut queue);
                    }
                    BacktestEvent::Signal { side, size_usd, confidence, reason, levels } => {
                        debug!(
                            "BacktestEngine: {} signal ({:.0}%): {}",
                            side,
                            confidence * 100.0,
                            reason
                        );
                        queue.push_back(BacktestEvent::Order { side, size_usd, reason, levels });
                    }
                    BacktestEvent::Order { side, size_usd, reason, levels } => match side {
                        OrderSide::Buy => {
                            match exchange.execute_buy(&self.config.symbol, size_usd, candle.close, ts) {
                                Ok(_) => {
                                    entry_levels = levels;
                                    queue.push_back(BacktestEvent::Fill { side, reason });
                                }
                                Err(e) => debug!("BacktestEngine: buy refused: {}", e),
                            }
                        }
                        OrderSide::Sell => {
                            match exchange.execute_sell(&self.config.symbol, candle.close, ts) {
                                Ok((fill, position)) => {
                                    let record = close_record(
                                        &self.config.symbol,
                                        &position,
                                        fill.fill_price,
                                        fill.commission,
                                        ts,
                                        entry_levels.as_ref(),
                                    );
                                    tracker.record(record.clone());
                                    trades.push(record);
                                    entry_levels = None;
                                    queue.push_back(BacktestEvent::Fill { side, reason });
                                }
                                Err(e) => debug!("BacktestEngine: sell refused: {}", e),
                            }
                        }
                    },
                    BacktestEvent::Fill { side, reason } => {
                        debug!("BacktestEngine: {} filled ({})", side, reason);
                    }
                }
            }

            portfolio.observe(candle.timestamp, exchange.equity(candle.close));
        }

        let metrics = portfolio.metrics(&trades, exchange.fills().len());
        BacktestReport {
            metrics,
            equity_curve: portfolio.into_curve(),
            trades,
            config: self.config.clone(),
        }
    }

    /// MARKET handler: exit checks against the captured entry levels while a
    /// position is open, otherwise a pipeline evaluation over the trailing
    /// window.
    fn on_market(
        &self,
        index: usize,
        candles: &[Candle],
        exchange: &SimulatedExchange,
        entry_levels: &Option<EntryLevels>,
        tracker: &PerformanceTracker,
        queue: &mut VecDeque<BacktestEvent>,
    ) {
        let candle = &candles[index];
        let window_start = (index + 1).saturating_sub(WINDOW_BARS);
        let window = &candles[window_start..=index];
        let now = candle_time(candle);

        if let Some(position) = exchange.position() {
            let Some(levels) = entry_levels else { return };
            let entry = position.entry_price.to_f64().unwrap_or(0.0);
            let price = candle.close_f64();
            if entry <= 0.0 {
                return;
            }
            let pnl_pct = (price - entry) / entry * 100.0;

            if pnl_pct >= levels.take_profit_pct {
                queue.push_back(sell_signal(1.0, "Take Profit"));
                return;
            }
            if pnl_pct <= -levels.stop_loss_pct {
                queue.push_back(sell_signal(1.0, "Stop Loss"));
                return;
            }

            let stats = tracker.statistics(30, now);
            let rec = self.pipeline.analyze(&AnalysisInput {
                symbol: &self.config.symbol,
                candles: window,
                timeframes: None,
                order_book: None,
                balance: exchange.equity(candle.close),
                stats: &stats,
                confidence_override: None,
            });
            if rec.action == Action::Sell && rec.confidence > 0.7 {
                queue.push_back(sell_signal(rec.confidence, "Exit signal"));
            }
            return;
        }

        let stats = tracker.statistics(30, now);
        let rec = self.pipeline.analyze(&AnalysisInput {
            symbol: &self.config.symbol,
            candles: window,
            timeframes: None,
            order_book: None,
            balance: exchange.cash(),
            stats: &stats,
            confidence_override: None,
        });

        if rec.action == Action::Buy && rec.confidence >= self.config.min_confidence {
            let ratio =
                Decimal::from_f64_retain(self.config.position_size_ratio).unwrap_or_default();
            let size_usd = exchange.cash() * ratio;
            queue.push_back(BacktestEvent::Signal {
                side: OrderSide::Buy,
                size_usd,
                confidence: rec.confidence,
                reason: rec.reason.clone(),
                levels: Some(EntryLevels {
                    stop_loss_pct: rec.stop_loss_pct,
                    take_profit_pct: rec.take_profit_pct,
                    confidence: rec.confidence,
                    regime: rec.modules.regime.regime,
                }),
            });
        }
    }
}

fn sell_signal(confidence: f64, reason: &str) -> BacktestEvent {
    BacktestEvent::Signal {
        side: OrderSide::Sell,
        size_usd: Decimal::ZERO,
        confidence,
        reason: reason.to_string(),
        levels: None,
    }
}

fn candle_time(candle: &Candle) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(candle.timestamp).unwrap_or_default()
}

fn close_record(
    symbol: &str,
    position: &SimPosition,
    fill_price: Decimal,
    exit_fee: Decimal,
    exit_time: DateTime<Utc>,
    levels: Option<&EntryLevels>,
) -> TradeRecord {
    let gross = (fill_price - position.entry_price) * position.quantity;
    let fees = position.entry_fee + exit_fee;
    let net = gross - fees;
    let size = position.entry_price * position.quantity;
    let pnl_pct = if size.is_zero() {
        0.0
    } else {
        (net / size * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
    };

    TradeRecord {
        symbol: symbol.to_string(),
        entry_price: position.entry_price,
        exit_price: fill_price,
        quantity: position.quantity,
        entry_time: position.entry_time,
        exit_time,
        gross_pnl: gross,
        fees,
        net_pnl: net,
        pnl_pct,
        hold_minutes: (exit_time - position.entry_time).num_seconds() as f64 / 60.0,
        confidence_at_entry: levels.map(|l| l.confidence).unwrap_or(0.0),
        regime_at_entry: levels.map(|l| l.regime).unwrap_or(Regime::Sideways),
    }
}
