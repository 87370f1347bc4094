use crate::application::analysis::onchain::{MockOnChainProvider, OnChainFilter, OnChainProvider};
use crate::application::backtest::engine::{BacktestConfig, BacktestEngine, BacktestReport};
use crate::application::pipeline::Recommendation;
use crate::application::risk::fee_gate::BreakevenLevels;
use crate::application::trader::activity::ActivityEntry;
use crate::application::trader::bot::{AutoTrader, BotShared, BotState};
use crate::domain::errors::BotError;
use crate::domain::performance::TradeStats;
use crate::domain::ports::{
    MarketDataService, NotificationService, TradeRepository, TradingService,
};
use crate::domain::trading::fees::{FeeSettings, FeeSettingsPatch};
use crate::domain::trading::types::{BotConfig, Position};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Status snapshot returned by the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub config_id: i64,
    pub state: BotState,
    pub last_check: Option<chrono::DateTime<Utc>>,
    pub current_position: Option<Position>,
    pub activity_log: Vec<ActivityEntry>,
    pub last_recommendation: Option<Recommendation>,
    pub performance: TradeStats,
    pub fee_settings: FeeSettings,
    pub breakeven: Option<BreakevenLevels>,
}

struct BotHandle {
    config: BotConfig,
    shared: Arc<BotShared>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Lifecycle manager for all trading bots: a map keyed by config id with
/// explicit create/start/stop/drop, replacing any notion of a process-global
/// trader instance.
pub struct BotRegistry {
    market: Arc<dyn MarketDataService>,
    trading: Arc<dyn TradingService>,
    trades: Arc<dyn TradeRepository>,
    notifier: Arc<dyn NotificationService>,
    onchain_provider: Arc<dyn OnChainProvider>,
    tick_interval: Duration,
    default_fee_settings: FeeSettings,
    bots: Mutex<HashMap<i64, BotHandle>>,
    next_id: AtomicI64,
}

impl BotRegistry {
    pub fn new(
        market: Arc<dyn MarketDataService>,
        trading: Arc<dyn TradingService>,
        trades: Arc<dyn TradeRepository>,
        notifier: Arc<dyn NotificationService>,
        tick_interval: Duration,
        default_fee_settings: FeeSettings,
    ) -> Self {
        Self {
            market,
            trading,
            trades,
            notifier,
            onchain_provider: Arc::new(MockOnChainProvider),
            tick_interval,
            default_fee_settings,
            bots: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn with_onchain_provider(mut self, provider: Arc<dyn OnChainProvider>) -> Self {
        self.onchain_provider = provider;
        self
    }

    /// Registers a configuration and returns its id. The bot stays idle
    /// until `start_bot`.
    pub fn create_bot(&self, mut config: BotConfig) -> Result<i64, BotError> {
        config.validate().map_err(|e| BotError::InvalidConfig { reason: e.to_string() })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        config.id = id;

        let shared = Arc::new(BotShared::new(self.default_fee_settings.clone()));
        let mut bots = self.bots.lock().expect("bot registry lock poisoned");
        bots.insert(
            id,
            BotHandle { config, shared, stop_tx: None, task: None },
        );
        info!("BotRegistry: created bot config {}", id);
        Ok(id)
    }

    /// Starts the control loop for a configuration. Fails with
    /// `AlreadyRunning` while a run is active; restarting after a stop or
    /// crash begins a fresh run with a cleared activity log.
    pub fn start_bot(&self, config_id: i64) -> Result<(), BotError> {
        let mut bots = self.bots.lock().expect("bot registry lock poisoned");
        let handle = bots
            .get_mut(&config_id)
            .ok_or(BotError::NotFound { config_id })?;

        if handle.shared.state() == BotState::Running {
            return Err(BotError::AlreadyRunning { config_id });
        }

        if let Ok(mut log) = handle.shared.activity.write() {
            log.clear();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let trader = AutoTrader::new(
            handle.config.clone(),
            self.tick_interval,
            self.market.clone(),
            self.trading.clone(),
            self.trades.clone(),
            self.notifier.clone(),
            OnChainFilter::new(self.onchain_provider.clone()),
            handle.shared.clone(),
        );

        handle.stop_tx = Some(stop_tx);
        handle.task = Some(tokio::spawn(trader.run(stop_rx)));
        info!("BotRegistry: started bot {}", config_id);
        Ok(())
    }

    /// Signals the loop to stop after its current tick. Idempotent: stopping
    /// a bot that is not running is a no-op.
    pub fn stop_bot(&self, config_id: i64) -> Result<(), BotError> {
        let mut bots = self.bots.lock().expect("bot registry lock poisoned");
        let handle = bots
            .get_mut(&config_id)
            .ok_or(BotError::NotFound { config_id })?;

        if let Some(stop_tx) = handle.stop_tx.take() {
            let _ = stop_tx.send(true);
            info!("BotRegistry: stop requested for bot {}", config_id);
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        let mut bots = self.bots.lock().expect("bot registry lock poisoned");
        for (id, handle) in bots.iter_mut() {
            if let Some(stop_tx) = handle.stop_tx.take() {
                let _ = stop_tx.send(true);
                info!("BotRegistry: stop requested for bot {}", id);
            }
        }
    }

    /// Removes a configuration entirely. The loop is signalled first; the
    /// task is aborted outright since nothing can observe it afterwards.
    pub fn drop_bot(&self, config_id: i64) -> Result<(), BotError> {
        let mut bots = self.bots.lock().expect("bot registry lock poisoned");
        let handle = bots
            .remove(&config_id)
            .ok_or(BotError::NotFound { config_id })?;
        if let Some(stop_tx) = handle.stop_tx {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = handle.task {
            task.abort();
        }
        Ok(())
    }

    pub fn bot_status(&self, config_id: i64, activity_limit: usize) -> Result<BotStatus, BotError> {
        let bots = self.bots.lock().expect("bot registry lock poisoned");
        let handle = bots.get(&config_id).ok_or(BotError::NotFound { config_id })?;
        let shared = &handle.shared;

        Ok(BotStatus {
            config_id,
            state: shared.state(),
            last_check: shared.last_check.read().map(|v| *v).unwrap_or(None),
            current_position: shared.position.read().map(|v| v.clone()).unwrap_or(None),
            activity_log: shared
                .activity
                .read()
                .map(|log| log.snapshot(activity_limit))
                .unwrap_or_default(),
            last_recommendation: shared
                .last_recommendation
                .read()
                .map(|v| v.clone())
                .unwrap_or(None),
            performance: shared
                .performance
                .read()
                .map(|v| v.clone())
                .unwrap_or_else(|_| TradeStats::empty(30)),
            fee_settings: shared
                .fee_settings
                .read()
                .map(|v| v.clone())
                .unwrap_or_default(),
            breakeven: shared.breakeven.read().map(|v| v.clone()).unwrap_or(None),
        })
    }

    /// Applies a partial fee-settings update; the running loop picks it up
    /// at the top of its next tick.
    pub fn update_fee_settings(
        &self,
        config_id: i64,
        patch: FeeSettingsPatch,
    ) -> Result<FeeSettings, BotError> {
        let bots = self.bots.lock().expect("bot registry lock poisoned");
        let handle = bots.get(&config_id).ok_or(BotError::NotFound { config_id })?;

        let mut settings = handle
            .shared
            .fee_settings
            .write()
            .map_err(|_| BotError::NotFound { config_id })?;
        settings.apply(patch);
        Ok(settings.clone())
    }

    /// Replays history through the same decision pipeline on the simulated
    /// exchange.
    pub async fn run_backtest(&self, config: BacktestConfig) -> Result<BacktestReport> {
        let bars_needed = config.candle_count();
        let candles = self
            .market
            .fetch_ohlcv(&config.symbol, config.timeframe, bars_needed)
            .await
            .with_context(|| format!("Failed to fetch history for {}", config.symbol))?;

        let engine = BacktestEngine::new(config);
        Ok(engine.run(&candles))
    }

    pub fn list_bots(&self) -> Vec<i64> {
        let bots = self.bots.lock().expect("bot registry lock poisoned");
        let mut ids: Vec<i64> = bots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

