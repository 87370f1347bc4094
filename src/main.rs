use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tradepilot::application::trader::BotRegistry;
use tradepilot::config::Settings;
use tradepilot::domain::ports::{MarketDataService, NotificationService, TradingService};
use tradepilot::infrastructure::binance::{
    BinanceExecutionService, BinanceMarketDataService, Credentials,
};
use tradepilot::infrastructure::notification::LogNotifier;
use tradepilot::infrastructure::paper::PaperTradingService;
use tradepilot::infrastructure::persistence::{Database, SqliteTradeRepository};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    info!(
        "Starting tradepilot: {} (paper_trading={})",
        settings.symbol, settings.paper_trading
    );

    let database = Database::new(&settings.database_url).await?;
    let trades = Arc::new(SqliteTradeRepository::new(database));

    let market: Arc<dyn MarketDataService> =
        Arc::new(BinanceMarketDataService::new(settings.binance_base_url.clone()));

    let trading: Arc<dyn TradingService> = if settings.paper_trading {
        info!("Paper trading enabled: orders fill against the simulated exchange");
        Arc::new(PaperTradingService::new(market.clone(), settings.budget))
    } else {
        if settings.binance_api_key.is_empty() || settings.binance_api_secret.is_empty() {
            anyhow::bail!("Live trading requires BINANCE_API_KEY and BINANCE_SECRET_KEY");
        }
        Arc::new(BinanceExecutionService::new(
            Credentials {
                api_key: settings.binance_api_key.clone(),
                api_secret: settings.binance_api_secret.clone(),
            },
            settings.binance_base_url.clone(),
        ))
    };

    let notifier: Arc<dyn NotificationService> = Arc::new(LogNotifier);

    let registry = Arc::new(BotRegistry::new(
        market,
        trading,
        trades,
        notifier,
        Duration::from_secs(settings.tick_interval_secs),
        settings.fee_settings.clone(),
    ));

    let config_id = registry
        .create_bot(settings.default_bot_config())
        .map_err(|e| anyhow::anyhow!(e))?;
    registry
        .start_bot(config_id)
        .map_err(|e| anyhow::anyhow!(e))?;
    info!("Bot {} running; press Ctrl-C to stop", config_id);

    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping bots...");
    registry.stop_all();

    // Let in-flight ticks finish before the runtime is torn down
    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Goodbye");
    Ok(())
}
