use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnChainStatus {
    Accumulation,
    Neutral,
    Distribution,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnChainAssessment {
    pub status: OnChainStatus,
    /// Distribution by smart money vetoes new BUY entries.
    pub veto_buy: bool,
    pub netflow_score: f64,
    pub reasoning: String,
}

/// Source of exchange netflow data. Positive score means coins are moving
/// onto exchanges (sell pressure), negative means accumulation off-exchange.
#[async_trait]
pub trait OnChainProvider: Send + Sync {
    async fn exchange_netflow(&self, symbol: &str) -> anyhow::Result<f64>;
}

/// Entry filter with veto power over BUY signals.
pub struct OnChainFilter {
    provider: Arc<dyn OnChainProvider>,
    distribution_threshold: f64,
    accumulation_threshold: f64,
}

impl OnChainFilter {
    pub fn new(provider: Arc<dyn OnChainProvider>) -> Self {
        Self {
            provider,
            distribution_threshold: 0.6,
            accumulation_threshold: -0.3,
        }
    }

    pub async fn analyze(&self, symbol: &str) -> OnChainAssessment {
        let netflow = match self.provider.exchange_netflow(symbol).await {
            Ok(v) => v,
            Err(e) => {
                // Provider failure never blocks trading; fall back to neutral
                debug!("OnChainFilter: provider failed for {}: {}", symbol, e);
                return OnChainAssessment {
                    status: OnChainStatus::Neutral,
                    veto_buy: false,
                    netflow_score: 0.0,
                    reasoning: "On-chain data unavailable, treating as neutral".to_string(),
                };
            }
        };

        let (status, veto_buy, reasoning) = if netflow >= self.distribution_threshold {
            (
                OnChainStatus::Distribution,
                true,
                format!("Heavy exchange inflows (score {:.2}): smart money distributing", netflow),
            )
        } else if netflow <= self.accumulation_threshold {
            (
                OnChainStatus::Accumulation,
                false,
                format!("Exchange outflows (score {:.2}): accumulation", netflow),
            )
        } else {
            (
                OnChainStatus::Neutral,
                false,
                format!("Balanced exchange flows (score {:.2})", netflow),
            )
        };

        OnChainAssessment {
            status,
            veto_buy,
            netflow_score: netflow,
            reasoning,
        }
    }
}

/// Deterministic stand-in used until a real on-chain data vendor is wired up.
/// Always reports balanced flows.
pub struct MockOnChainProvider;

#[async_trait]
impl OnChainProvider for MockOnChainProvider {
    async fn exchange_netflow(&self, _symbol: &str) -> anyhow::Result<f64> {
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(f64);

    #[async_trait]
    impl OnChainProvider for FixedProvider {
        async fn exchange_netflow(&self, _symbol: &str) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl OnChainProvider for FailingProvider {
        async fn exchange_netflow(&self, _symbol: &str) -> anyhow::Result<f64> {
            anyhow::bail!("vendor down")
        }
    }

    #[tokio::test]
    async fn test_distribution_vetoes_buy() {
        let filter = OnChainFilter::new(Arc::new(FixedProvider(0.8)));
        let assessment = filter.analyze("BTC/USDT").await;
        assert_eq!(assessment.status, OnChainStatus::Distribution);
        assert!(assessment.veto_buy);
    }

    #[tokio::test]
    async fn test_accumulation_allows_buy() {
        let filter = OnChainFilter::new(Arc::new(FixedProvider(-0.5)));
        let assessment = filter.analyze("BTC/USDT").await;
        assert_eq!(assessment.status, OnChainStatus::Accumulation);
        assert!(!assessment.veto_buy);
    }

    #[tokio::test]
    async fn test_provider_failure_is_neutral_not_veto() {
        let filter = OnChainFilter::new(Arc::new(FailingProvider));
        let assessment = filter.analyze("BTC/USDT").await;
        assert_eq!(assessment.status, OnChainStatus::Neutral);
        assert!(!assessment.veto_buy);
    }

    #[tokio::test]
    async fn test_mock_provider_is_neutral() {
        let filter = OnChainFilter::new(Arc::new(MockOnChainProvider));
        let assessment = filter.analyze("BTC/USDT").await;
        assert_eq!(assessment.status, OnChainStatus::Neutral);
    }
}
