use crate::domain::errors::TradingError;
use crate::domain::trading::types::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Execution record produced by the simulated exchange.
#[derive(Debug, Clone, Serialize)]
pub struct SimFill {
    pub timestamp: DateTime<Utc>,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub fill_price: Decimal,
    pub commission: Decimal,
}

#[derive(Debug, Clone)]
pub struct SimPosition {
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_fee: Decimal,
    pub entry_time: DateTime<Utc>,
}

/// Deterministic exchange model for backtests and paper trading: market
/// fills at the tick price adjusted by slippage, a flat commission rate, and
/// single-position accounting. Cash and position update atomically with the
/// fill.
#[derive(Debug)]
pub struct SimulatedExchange {
    cash: Decimal,
    position: Option<SimPosition>,
    fee_rate: Decimal,
    slippage_rate: Decimal,
    fills: Vec<SimFill>,
}

impl SimulatedExchange {
    pub fn new(initial_cash: Decimal, fee_rate: Decimal, slippage_rate: Decimal) -> Self {
        Self {
            cash: initial_cash,
            position: None,
            fee_rate,
            slippage_rate,
            fills: Vec::new(),
        }
    }

    pub fn with_defaults(initial_cash: Decimal) -> Self {
        Self::new(initial_cash, dec!(0.001), dec!(0.0005))
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self) -> Option<&SimPosition> {
        self.position.as_ref()
    }

    pub fn fills(&self) -> &[SimFill] {
        &self.fills
    }

    /// Mark-to-market equity at the given price.
    pub fn equity(&self, price: Decimal) -> Decimal {
        let held = self
            .position
            .as_ref()
            .map(|p| p.quantity * price)
            .unwrap_or(Decimal::ZERO);
        self.cash + held
    }

    /// Buys with the full `size_usd` notionally at `price` plus slippage.
    /// Refused while a position is open or when cash cannot cover cost+fee.
    pub fn execute_buy(
        &mut self,
        symbol: &str,
        size_usd: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<SimFill, TradingError> {
        if self.position.is_some() {
            return Err(TradingError::AlreadyInPosition { symbol: symbol.to_string() });
        }
        if price <= Decimal::ZERO || size_usd <= Decimal::ZERO {
            return Err(TradingError::InvalidOrder {
                reason: format!("non-positive price ({price}) or size ({size_usd})"),
            });
        }

        let fill_price = price * (Decimal::ONE + self.slippage_rate);
        let quantity = (size_usd / fill_price).round_dp(8);
        let cost = quantity * fill_price;
        let commission = cost * self.fee_rate;
        let total = cost + commission;

        if total > self.cash {
            return Err(TradingError::InsufficientFunds {
                need: total,
                available: self.cash,
            });
        }

        self.cash -= total;
        self.position = Some(SimPosition {
            quantity,
            entry_price: fill_price,
            entry_fee: commission,
            entry_time: timestamp,
        });

        let fill = SimFill {
            timestamp,
            side: OrderSide::Buy,
            quantity,
            fill_price,
            commission,
        };
        self.fills.push(fill.clone());
        Ok(fill)
    }

    /// Sells the entire open position at `price` minus slippage. Refused
    /// when flat.
    pub fn execute_sell(
        &mut self,
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(SimFill, SimPosition), TradingError> {
        let position = self
            .position
            .take()
            .ok_or_else(|| TradingError::NoPosition { symbol: symbol.to_string() })?;

        let fill_price = price * (Decimal::ONE - self.slippage_rate);
        let proceeds = position.quantity * fill_price;
        let commission = proceeds * self.fee_rate;
        self.cash += proceeds - commission;

        let fill = SimFill {
            timestamp,
            side: OrderSide::Sell,
            quantity: position.quantity,
            fill_price,
            commission,
        };
        self.fills.push(fill.clone());
        Ok((fill, position))
    }
}
