use crate::domain::ports::NotificationService;
use async_trait::async_trait;
use tracing::info;

/// Notification sink that writes to the structured log. Stands in for the
/// Telegram/email channels; the port contract is fire-and-forget either way.
pub struct LogNotifier;

#[async_trait]
impl NotificationService for LogNotifier {
    async fn notify(&self, message: &str) {
        info!("Notification: {}", message);
    }
}

/// Drops every message. Used by tests and backtest tooling.
pub struct NullNotifier;

#[async_trait]
impl NotificationService for NullNotifier {
    async fn notify(&self, _message: &str) {}
}
