use crate::application::analysis::onchain::OnChainFilter;
use crate::application::pipeline::{Action, AnalysisInput, DecisionPipeline, Recommendation};
use crate::application::risk::adaptive_stop::AdaptiveStop;
use crate::application::risk::fee_gate::{BreakevenLevels, FeeProtection};
use crate::application::trader::activity::{ActivityLevel, ActivityLog};
use crate::domain::errors::MarketDataError;
use crate::domain::market::{Regime, Timeframe};
use crate::domain::performance::{PerformanceTracker, TradeStats};
use crate::domain::ports::{
    MarketDataService, NotificationService, TradeRepository, TradeStatus, TradingService,
};
use crate::domain::trading::fees::FeeSettings;
use crate::domain::trading::types::{BotConfig, Candle, OrderBook, OrderSide, Position, TradeRecord};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior, timeout};
use tracing::{error, info, warn};

const MARKET_DATA_TIMEOUT: Duration = Duration::from_secs(10);
const ORDER_BOOK_TIMEOUT: Duration = Duration::from_secs(5);
const OHLCV_LIMIT: usize = 100;
const STATS_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BotState {
    Idle,
    Running,
    Stopped,
    Crashed,
}

/// State shared between the scheduler task (single writer) and status
/// readers. Readers always get a snapshot; none of these locks are held
/// across awaits.
pub struct BotShared {
    pub state: RwLock<BotState>,
    pub activity: RwLock<ActivityLog>,
    pub fee_settings: RwLock<FeeSettings>,
    pub last_check: RwLock<Option<chrono::DateTime<Utc>>>,
    pub last_recommendation: RwLock<Option<Recommendation>>,
    pub performance: RwLock<TradeStats>,
    pub position: RwLock<Option<Position>>,
    pub breakeven: RwLock<Option<BreakevenLevels>>,
}

impl BotShared {
    pub fn new(fee_settings: FeeSettings) -> Self {
        Self {
            state: RwLock::new(BotState::Idle),
            activity: RwLock::new(ActivityLog::default()),
            fee_settings: RwLock::new(fee_settings),
            last_check: RwLock::new(None),
            last_recommendation: RwLock::new(None),
            performance: RwLock::new(TradeStats::empty(STATS_LOOKBACK_DAYS)),
            position: RwLock::new(None),
            breakeven: RwLock::new(None),
        }
    }

    pub fn state(&self) -> BotState {
        self.state.read().map(|s| *s).unwrap_or(BotState::Crashed)
    }
}

/// The per-config trading control loop. Owns every piece of mutable trading
/// state; other tasks observe it only through [`BotShared`].
pub struct AutoTrader {
    config: BotConfig,
    interval: Duration,
    market: Arc<dyn MarketDataService>,
    trading: Arc<dyn TradingService>,
    trades: Arc<dyn TradeRepository>,
    notifier: Arc<dyn NotificationService>,
    pipeline: DecisionPipeline,
    onchain: OnChainFilter,
    fee_gate: FeeProtection,
    tracker: PerformanceTracker,
    position: Option<Position>,
    trailing_stop: Option<AdaptiveStop>,
    open_trade_id: Option<i64>,
    entry_confidence: f64,
    entry_regime: Regime,
    /// Trade row whose completion failed to commit; retried next tick.
    pending_db_close: Option<(i64, Decimal)>,
    shared: Arc<BotShared>,
}

impl AutoTrader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfig,
        interval: Duration,
        market: Arc<dyn MarketDataService>,
        trading: Arc<dyn TradingService>,
        trades: Arc<dyn TradeRepository>,
        notifier: Arc<dyn NotificationService>,
        onchain: OnChainFilter,
        shared: Arc<BotShared>,
    ) -> Self {
        let fee_settings = shared
            .fee_settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        Self {
            config,
            interval,
            market,
            trading,
            trades,
            notifier,
            pipeline: DecisionPipeline::new(),
            onchain,
            fee_gate: FeeProtection::new(fee_settings),
            tracker: PerformanceTracker::new(),
            position: None,
            trailing_stop: None,
            open_trade_id: None,
            entry_confidence: 0.0,
            entry_regime: Regime::Sideways,
            pending_db_close: None,
            shared,
        }
    }

    /// The scheduler loop. The stop signal is checked both between ticks and
    /// while sleeping, so cancellation latency is bounded by one interval
    /// and an in-flight tick always completes.
    pub async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        self.set_state(BotState::Running);
        info!("AutoTrader[{}]: started for {}", self.config.id, self.config.symbol);
        self.log_activity(ActivityLevel::Success, "Auto trading started", json!({}));

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    if let Err(e) = self.tick().await {
                        // Errors never cross the scheduler boundary: this is
                        // the last line of defence and demotes the loop.
                        error!("AutoTrader[{}]: unhandled tick error: {:#}", self.config.id, e);
                        self.log_activity(
                            ActivityLevel::Error,
                            format!("Trading loop crashed: {e:#}"),
                            json!({}),
                        );
                        self.set_state(BotState::Crashed);
                        return;
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("AutoTrader[{}]: stopped", self.config.id);
        self.log_activity(ActivityLevel::Info, "Auto trading stopped", json!({}));
        self.set_state(BotState::Stopped);
    }

    /// One trading cycle. Expected failures (market data, orders, DB) are
    /// handled and logged here; an `Err` escaping this function crashes the
    /// loop.
    async fn tick(&mut self) -> Result<()> {
        self.log_activity(ActivityLevel::Info, "Trading cycle started", json!({}));

        self.refresh_fee_settings();
        self.retry_pending_db().await;

        let candles = match self.fetch_candles().await {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => {
                self.log_activity(
                    ActivityLevel::Error,
                    "Market data returned no candles, skipping cycle",
                    json!({"symbol": self.config.symbol}),
                );
                return Ok(());
            }
            Err(e) => {
                let level = if e.is_rate_limit() { ActivityLevel::Warning } else { ActivityLevel::Error };
                self.log_activity(
                    level,
                    format!("Market data fetch failed: {}", e),
                    json!({"symbol": self.config.symbol}),
                );
                return Ok(());
            }
        };

        let price = candles.last().map(|c| c.close).unwrap_or(Decimal::ZERO);
        info!("AutoTrader[{}]: {} @ {}", self.config.id, self.config.symbol, price);

        self.sync_position_from_store().await;

        if self.position.is_some() {
            self.monitor_position(price, &candles).await;
        } else {
            self.find_entry(price, &candles).await;
        }

        if let Ok(mut last) = self.shared.last_check.write() {
            *last = Some(Utc::now());
        }
        self.log_activity(
            ActivityLevel::Info,
            "Trading cycle complete",
            json!({"price": price.to_f64()}),
        );
        Ok(())
    }

    /// Steps 4a-4f: manage an open position (TP, SL, trailing stop, exit
    /// signal), all through the fee gate except the stop-loss path.
    async fn monitor_position(&mut self, price: Decimal, candles: &[Candle]) {
        let Some(position) = self.position.clone() else { return };

        if let Some(ref mut pos) = self.position {
            pos.update_extreme(price);
        }
        self.publish_position();

        let order_book = self.fetch_order_book_best_effort().await;
        let stats = self.tracker.statistics(STATS_LOOKBACK_DAYS, Utc::now());
        let rec = self.pipeline.analyze(&AnalysisInput {
            symbol: &self.config.symbol,
            candles,
            timeframes: None,
            order_book: order_book.as_ref(),
            balance: self.config.budget,
            stats: &stats,
            confidence_override: None,
        });

        let pnl_pct = position.pnl_pct(price);
        let size_usd = position.notional();
        info!(
            "AutoTrader[{}]: position P/L {:+.2}% (TP {:.2}%, SL {:.2}%)",
            self.config.id, pnl_pct, rec.take_profit_pct, rec.stop_loss_pct
        );

        // Trailing stop from the adaptive stop engine; exits here are forced
        let trailing_triggered = if let Some(ref mut stop) = self.trailing_stop {
            let price_f = price.to_f64().unwrap_or(0.0);
            stop.update(candles, price_f);
            stop.should_exit(price_f)
        } else {
            None
        };

        if let Some(trigger_reason) = trailing_triggered {
            self.log_activity(ActivityLevel::Warning, trigger_reason, json!({"pnl_pct": pnl_pct}));
            self.close_position(price, "Trailing Stop", true).await;
            return;
        }

        if pnl_pct >= rec.take_profit_pct {
            let decision =
                self.fee_gate
                    .can_close(position.entry_price, price, size_usd, false, Utc::now());
            if decision.allowed {
                self.close_position(price, "Take Profit", false).await;
            } else {
                warn!("AutoTrader[{}]: TP blocked: {}", self.config.id, decision.reason);
                self.log_activity(
                    ActivityLevel::Warning,
                    format!("Take profit blocked: {}", decision.reason),
                    json!({"pnl_pct": pnl_pct}),
                );
            }
            self.store_recommendation(rec);
            return;
        }

        if pnl_pct <= -rec.stop_loss_pct {
            // Stop loss is never blocked by the fee gate
            self.log_activity(
                ActivityLevel::Warning,
                format!("Stop loss triggered at {:+.2}%", pnl_pct),
                json!({"stop_loss_pct": rec.stop_loss_pct}),
            );
            self.close_position(price, "Stop Loss", true).await;
            self.store_recommendation(rec);
            return;
        }

        if rec.action == Action::Sell && rec.confidence > 0.7 {
            let decision =
                self.fee_gate
                    .can_close(position.entry_price, price, size_usd, false, Utc::now());
            if decision.allowed {
                self.close_position(price, "AI Signal", false).await;
            } else {
                self.log_activity(
                    ActivityLevel::Warning,
                    format!("Exit signal blocked: {}", decision.reason),
                    json!({"confidence": rec.confidence}),
                );
            }
        }

        self.store_recommendation(rec);
    }

    /// Steps 5a-5e: look for a new entry, honouring the on-chain veto, the
    /// frequency gate and the confidence threshold.
    async fn find_entry(&mut self, price: Decimal, candles: &[Candle]) {
        let onchain = self.onchain.analyze(&self.config.symbol).await;
        if onchain.veto_buy {
            self.log_activity(
                ActivityLevel::Warning,
                format!("Entry vetoed by on-chain filter: {}", onchain.reasoning),
                json!({"netflow_score": onchain.netflow_score}),
            );
            return;
        }

        let order_book = self.fetch_order_book_best_effort().await;
        let frames = self.fetch_alignment_frames().await;
        let stats = self.tracker.statistics(STATS_LOOKBACK_DAYS, Utc::now());

        let rec = self.pipeline.analyze(&AnalysisInput {
            symbol: &self.config.symbol,
            candles,
            timeframes: Some(&frames),
            order_book: order_book.as_ref(),
            balance: self.config.budget,
            stats: &stats,
            confidence_override: None,
        });

        info!(
            "AutoTrader[{}]: decision {} (confidence {:.0}%): {}",
            self.config.id,
            rec.action,
            rec.confidence * 100.0,
            rec.reason
        );

        let decision = self.fee_gate.can_open(Utc::now());
        if !decision.allowed {
            self.log_activity(
                ActivityLevel::Warning,
                format!("Entry blocked: {}", decision.reason),
                json!({}),
            );
            self.store_recommendation(rec);
            return;
        }

        if rec.action == Action::Buy && rec.confidence >= self.config.min_confidence {
            self.open_position(price, &rec).await;
        }
        self.store_recommendation(rec);
    }

    async fn open_position(&mut self, price: Decimal, rec: &Recommendation) {
        let ratio = Decimal::from_f64_retain(self.config.position_size_ratio).unwrap_or_default();
        let budget = self.config.budget * ratio;
        if price.is_zero() {
            return;
        }
        let quantity = (budget / price).round_dp(6);

        self.log_activity(
            ActivityLevel::Info,
            "Opening position",
            json!({
                "quantity": quantity.to_f64(),
                "price": price.to_f64(),
                "confidence": rec.confidence,
            }),
        );

        let order = match self
            .trading
            .place_market(&self.config.symbol, OrderSide::Buy, quantity)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!("AutoTrader[{}]: failed to open position: {}", self.config.id, e);
                self.log_activity(
                    ActivityLevel::Error,
                    format!("Failed to open position: {}", e),
                    json!({}),
                );
                return;
            }
        };

        let fill_price = order.fill_price.unwrap_or(price);
        let now = Utc::now();

        // Exchange first, then the local store; a failed insert is logged
        // and the position is still tracked in memory
        match self
            .trades
            .insert(
                &self.config.symbol,
                OrderSide::Buy,
                quantity,
                price,
                Some(fill_price),
                TradeStatus::Open,
                now,
            )
            .await
        {
            Ok(id) => self.open_trade_id = Some(id),
            Err(e) => {
                error!("AutoTrader[{}]: trade insert failed: {:#}", self.config.id, e);
                self.log_activity(
                    ActivityLevel::Error,
                    format!("Trade store insert failed: {e:#}"),
                    json!({}),
                );
            }
        }

        let size_usd = fill_price * quantity;
        self.fee_gate
            .record_trade(OrderSide::Buy, fill_price, size_usd, None, now);

        let breakeven = self.fee_gate.breakeven(fill_price, size_usd);
        if let Ok(mut be) = self.shared.breakeven.write() {
            *be = Some(breakeven.clone());
        }

        self.position = Some(Position::open(self.config.symbol.clone(), fill_price, quantity, now));
        self.trailing_stop = Some(AdaptiveStop::new(
            fill_price.to_f64().unwrap_or(0.0),
            OrderSide::Buy,
        ));
        self.entry_confidence = rec.confidence;
        self.entry_regime = rec.modules.regime.regime;
        self.publish_position();

        self.log_activity(
            ActivityLevel::Success,
            "Position opened",
            json!({
                "entry_price": fill_price.to_f64(),
                "quantity": quantity.to_f64(),
                "breakeven_price": breakeven.breakeven_price.to_f64(),
            }),
        );
        self.notifier
            .notify(&format!(
                "BUY {} @ {} (qty {})",
                self.config.symbol, fill_price, quantity
            ))
            .await;
    }

    async fn close_position(&mut self, price: Decimal, reason: &str, force: bool) {
        let Some(position) = self.position.clone() else { return };

        let order = match self
            .trading
            .place_market(&self.config.symbol, OrderSide::Sell, position.quantity)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // Position stays open; the next tick retries the exit
                error!("AutoTrader[{}]: failed to close position: {}", self.config.id, e);
                self.log_activity(
                    ActivityLevel::Error,
                    format!("Failed to close position: {}", e),
                    json!({"reason": reason}),
                );
                return;
            }
        };

        let fill_price = order.fill_price.unwrap_or(price);
        let now = Utc::now();
        let size_usd = position.notional();
        let profit = self.fee_gate.net_profit(position.entry_price, fill_price, size_usd);

        if let Some(id) = self.open_trade_id.take() {
            if let Err(e) = self
                .trades
                .update_status(id, TradeStatus::Completed, Some(fill_price))
                .await
            {
                // Never re-submit the exchange order; retry the commit later
                error!("AutoTrader[{}]: trade completion commit failed: {:#}", self.config.id, e);
                self.pending_db_close = Some((id, fill_price));
            }
        }

        self.fee_gate
            .record_trade(OrderSide::Sell, fill_price, size_usd, Some(profit.net), now);

        let hold_minutes = (now - position.entry_time).num_seconds() as f64 / 60.0;
        self.tracker.record(TradeRecord {
            symbol: position.symbol.clone(),
            entry_price: position.entry_price,
            exit_price: fill_price,
            quantity: position.quantity,
            entry_time: position.entry_time,
            exit_time: now,
            gross_pnl: profit.gross,
            fees: profit.fees,
            net_pnl: profit.net,
            pnl_pct: profit.net_pct,
            hold_minutes,
            confidence_at_entry: self.entry_confidence,
            regime_at_entry: self.entry_regime,
        });
        if let Ok(mut perf) = self.shared.performance.write() {
            *perf = self.tracker.statistics(STATS_LOOKBACK_DAYS, now);
        }

        self.position = None;
        self.trailing_stop = None;
        if let Ok(mut be) = self.shared.breakeven.write() {
            *be = None;
        }
        self.publish_position();

        let level = if profit.net > Decimal::ZERO {
            ActivityLevel::Success
        } else {
            ActivityLevel::Warning
        };
        self.log_activity(
            level,
            "Position closed",
            json!({
                "reason": reason,
                "forced": force,
                "exit_price": fill_price.to_f64(),
                "gross_pnl": profit.gross.to_f64(),
                "fees": profit.fees.to_f64(),
                "net_pnl": profit.net.to_f64(),
                "net_pnl_pct": profit.net_pct,
            }),
        );
        self.notifier
            .notify(&format!(
                "SELL {} @ {} | net {} ({:+.2}%) | {}",
                self.config.symbol, fill_price, profit.net, profit.net_pct, reason
            ))
            .await;
    }

    async fn fetch_candles(&self) -> Result<Vec<Candle>, MarketDataError> {
        match timeout(
            MARKET_DATA_TIMEOUT,
            self.market
                .fetch_ohlcv(&self.config.symbol, Timeframe::FiveMin, OHLCV_LIMIT),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                duration_ms: MARKET_DATA_TIMEOUT.as_millis() as u64,
            }),
        }
    }

    /// A missing order book degrades pattern confirmation, never the tick.
    async fn fetch_order_book_best_effort(&self) -> Option<OrderBook> {
        match timeout(
            ORDER_BOOK_TIMEOUT,
            self.market.fetch_order_book(&self.config.symbol, None),
        )
        .await
        {
            Ok(Ok(book)) if !book.is_empty() => Some(book),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!("AutoTrader[{}]: order book fetch failed: {}", self.config.id, e);
                None
            }
            Err(_) => {
                warn!("AutoTrader[{}]: order book fetch timed out", self.config.id);
                None
            }
        }
    }

    /// Candles for the multi-timeframe confluence check. Failed frames are
    /// simply absent; the analyzer treats them as neutral.
    async fn fetch_alignment_frames(&self) -> HashMap<Timeframe, Vec<Candle>> {
        let mut frames = HashMap::new();
        for (tf, _) in Timeframe::alignment_set() {
            match timeout(
                MARKET_DATA_TIMEOUT,
                self.market.fetch_ohlcv(&self.config.symbol, tf, OHLCV_LIMIT),
            )
            .await
            {
                Ok(Ok(candles)) if candles.len() >= 50 => {
                    frames.insert(tf, candles);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(
                        "AutoTrader[{}]: {} frame fetch failed: {}",
                        self.config.id, tf, e
                    );
                }
                Err(_) => {
                    warn!("AutoTrader[{}]: {} frame fetch timed out", self.config.id, tf);
                }
            }
        }
        frames
    }

    /// Reconciles the in-memory position with the trade store (the store is
    /// authoritative after a restart; memory wins within a run).
    async fn sync_position_from_store(&mut self) {
        if self.position.is_some() {
            return;
        }
        match self.trades.find_open(&self.config.symbol).await {
            Ok(Some(row)) => {
                let entry_price = row.filled_price.unwrap_or(row.price);
                self.position = Some(Position::open(
                    row.symbol.clone(),
                    entry_price,
                    row.quantity,
                    row.timestamp,
                ));
                self.trailing_stop = Some(AdaptiveStop::new(
                    entry_price.to_f64().unwrap_or(0.0),
                    OrderSide::Buy,
                ));
                self.open_trade_id = Some(row.id);
                self.publish_position();
                info!(
                    "AutoTrader[{}]: recovered open position from store (trade {})",
                    self.config.id, row.id
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!("AutoTrader[{}]: trade store read failed: {:#}", self.config.id, e);
            }
        }
    }

    async fn retry_pending_db(&mut self) {
        if let Some((id, fill_price)) = self.pending_db_close.take() {
            if let Err(e) = self
                .trades
                .update_status(id, TradeStatus::Completed, Some(fill_price))
                .await
            {
                warn!("AutoTrader[{}]: pending commit retry failed: {:#}", self.config.id, e);
                self.pending_db_close = Some((id, fill_price));
            }
        }
    }

    fn refresh_fee_settings(&mut self) {
        if let Ok(settings) = self.shared.fee_settings.read() {
            if settings.clone() != *self.fee_gate.settings() {
                self.fee_gate.update_settings(settings.clone());
                info!("AutoTrader[{}]: fee settings updated", self.config.id);
            }
        }
    }

    fn store_recommendation(&self, rec: Recommendation) {
        if let Ok(mut last) = self.shared.last_recommendation.write() {
            *last = Some(rec);
        }
    }

    fn publish_position(&self) {
        if let Ok(mut pos) = self.shared.position.write() {
            *pos = self.position.clone();
        }
    }

    fn set_state(&self, state: BotState) {
        if let Ok(mut s) = self.shared.state.write() {
            *s = state;
        }
    }

    fn log_activity(&self, level: ActivityLevel, message: impl Into<String>, data: serde_json::Value) {
        if let Ok(mut log) = self.shared.activity.write() {
            log.push(level, message, data);
        }
    }
}
