use crate::domain::ports::{TradeRepository, TradeRow, TradeStatus};
use crate::domain::trading::types::OrderSide;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

/// Trade store adapter over SQLite. Prices and quantities are stored as
/// decimal strings to avoid float drift; timestamps as epoch milliseconds.
pub struct SqliteTradeRepository {
    db: Database,
}

impl SqliteTradeRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn insert(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        filled_price: Option<Decimal>,
        status: TradeStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (symbol, side, quantity, price, filled_price, status, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(side.to_string())
        .bind(quantity.to_string())
        .bind(price.to_string())
        .bind(filled_price.map(|p| p.to_string()))
        .bind(status.as_str())
        .bind(timestamp.timestamp_millis())
        .execute(&self.db.pool)
        .await
        .context("Failed to insert trade")?;

        Ok(result.last_insert_rowid())
    }

    async fn update_status(
        &self,
        id: i64,
        status: TradeStatus,
        filled_price: Option<Decimal>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = ?, filled_price = COALESCE(?, filled_price)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(filled_price.map(|p| p.to_string()))
        .bind(id)
        .execute(&self.db.pool)
        .await
        .context("Failed to update trade status")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Trade {} not found", id));
        }
        Ok(())
    }

    async fn find_open(&self, symbol: &str) -> Result<Option<TradeRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, symbol, side, quantity, price, filled_price, status, timestamp
            FROM trades
            WHERE symbol = ? AND status = 'open'
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.db.pool)
        .await
        .context("Failed to query open trade")?;

        row.map(parse_row).transpose()
    }

    async fn recent(&self, limit: i64) -> Result<Vec<TradeRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, side, quantity, price, filled_price, status, timestamp
            FROM trades
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await
        .context("Failed to query recent trades")?;

        rows.into_iter().map(parse_row).collect()
    }
}

fn parse_row(row: sqlx::sqlite::SqliteRow) -> Result<TradeRow> {
    let side_str: String = row.try_get("side")?;
    let side = match side_str.as_str() {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        other => return Err(anyhow!("Unknown trade side: {}", other)),
    };

    let status_str: String = row.try_get("status")?;
    let status = match status_str.as_str() {
        "open" => TradeStatus::Open,
        "completed" => TradeStatus::Completed,
        "failed" => TradeStatus::Failed,
        other => return Err(anyhow!("Unknown trade status: {}", other)),
    };

    let quantity: String = row.try_get("quantity")?;
    let price: String = row.try_get("price")?;
    let filled_price: Option<String> = row.try_get("filled_price")?;
    let timestamp_ms: i64 = row.try_get("timestamp")?;

    Ok(TradeRow {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        side,
        quantity: quantity.parse().context("bad quantity in trade row")?,
        price: price.parse().context("bad price in trade row")?,
        filled_price: filled_price.map(|p| p.parse()).transpose().context("bad filled_price")?,
        status,
        timestamp: DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or_else(|| anyhow!("bad timestamp in trade row"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn repo() -> SqliteTradeRepository {
        let db = Database::new("sqlite::memory:").await.unwrap();
        SqliteTradeRepository::new(db)
    }

    #[tokio::test]
    async fn test_insert_and_find_open() {
        let repo = repo().await;
        let id = repo
            .insert(
                "BTC/USDT",
                OrderSide::Buy,
                dec!(0.19),
                dec!(50000),
                Some(dec!(50010)),
                TradeStatus::Open,
                Utc::now(),
            )
            .await
            .unwrap();

        let open = repo.find_open("BTC/USDT").await.unwrap().unwrap();
        assert_eq!(open.id, id);
        assert_eq!(open.quantity, dec!(0.19));
        assert_eq!(open.filled_price, Some(dec!(50010)));
        assert_eq!(open.status, TradeStatus::Open);

        // Other symbols see nothing
        assert!(repo.find_open("ETH/USDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completion_clears_open_query() {
        let repo = repo().await;
        let id = repo
            .insert(
                "BTC/USDT",
                OrderSide::Buy,
                dec!(1),
                dec!(100),
                None,
                TradeStatus::Open,
                Utc::now(),
            )
            .await
            .unwrap();

        repo.update_status(id, TradeStatus::Completed, Some(dec!(105)))
            .await
            .unwrap();

        assert!(repo.find_open("BTC/USDT").await.unwrap().is_none());
        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, TradeStatus::Completed);
        assert_eq!(recent[0].filled_price, Some(dec!(105)));
    }

    #[tokio::test]
    async fn test_update_missing_trade_errors() {
        let repo = repo().await;
        assert!(repo.update_status(999, TradeStatus::Failed, None).await.is_err());
    }

    #[tokio::test]
    async fn test_recent_orders_newest_first() {
        let repo = repo().await;
        let t0 = Utc::now();
        for i in 0..3 {
            repo.insert(
                "BTC/USDT",
                OrderSide::Buy,
                dec!(1),
                Decimal::from(100 + i),
                None,
                TradeStatus::Completed,
                t0 + chrono::Duration::seconds(i),
            )
            .await
            .unwrap();
        }
        let recent = repo.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].price, dec!(102));
    }
}
