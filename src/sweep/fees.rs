//! Fee estimation
//!
//! Every remote fee input has a fallback: base fee falls back to the legacy gas
//! price, the priority-fee suggestion falls back to a configured tip. Only the
//! gas estimate itself, and the legacy price when nothing else is left, can fail
//! a quote.

use std::sync::Arc;

use ethers::types::{Address, U256};

use crate::configure::SweepConfig;
use crate::sweep::error::SweepError;
use crate::sweep::retry::RetryPolicy;
use crate::sweep::rpc::ChainClient;
use crate::sweep::types::{FeeMode, FeeQuote, PROTOCOL_MIN_GAS};

const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSettings {
    pub use_dynamic_fee: bool,
    /// Fixed legacy price in wei; `None` asks the node
    pub gas_price_override: Option<U256>,
    pub priority_fee_fallback: U256,
    /// Gas buffer in basis points, >= 10_000
    pub gas_buffer_bps: u64,
}

impl FeeSettings {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            use_dynamic_fee: config.use_dynamic_fee,
            gas_price_override: config.gas_price_override_wei(),
            priority_fee_fallback: config.priority_fee_fallback_wei(),
            gas_buffer_bps: config.gas_buffer_bps(),
        }
    }
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            use_dynamic_fee: false,
            gas_price_override: None,
            priority_fee_fallback: U256::from(2_000_000_000u64),
            gas_buffer_bps: 11_000,
        }
    }
}

pub struct FeeEstimator {
    client: Arc<dyn ChainClient>,
    retry: RetryPolicy,
    recipient: Address,
    settings: FeeSettings,
}

impl FeeEstimator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        retry: RetryPolicy,
        recipient: Address,
        settings: FeeSettings,
    ) -> Self {
        Self {
            client,
            retry,
            recipient,
            settings,
        }
    }

    pub fn settings(&self) -> &FeeSettings {
        &self.settings
    }

    /// Raw node estimate for a 1 wei transfer from `sender` to the recipient.
    pub async fn estimate_gas_limit(&self, sender: Address) -> Result<U256, SweepError> {
        self.retry
            .run("estimate_gas", || {
                self.client.estimate_gas(sender, self.recipient, U256::one())
            })
            .await
    }

    pub async fn legacy_gas_price(&self) -> Result<U256, SweepError> {
        if let Some(price) = self.settings.gas_price_override {
            return Ok(price);
        }
        self.retry
            .run("get_gas_price", || self.client.get_gas_price())
            .await
    }

    /// Returns `(max_fee_per_gas, max_priority_fee_per_gas)`.
    ///
    /// The base fee is doubled so the transaction stays includable while the
    /// base fee rises over the blocks it may wait in.
    pub async fn dynamic_fees(&self) -> Result<(U256, U256), SweepError> {
        let base_fee = match self
            .retry
            .run("get_latest_base_fee", || self.client.get_latest_base_fee())
            .await
        {
            Ok(fee) => fee,
            Err(e) => {
                log::warn!("Base fee unavailable ({}), using gas price as base", e);
                self.legacy_gas_price().await?
            }
        };

        let priority_fee = match self
            .retry
            .run("get_suggested_priority_fee", || {
                self.client.get_suggested_priority_fee()
            })
            .await
        {
            Ok(fee) => fee,
            Err(e) => {
                log::warn!(
                    "Priority fee suggestion unavailable ({}), using fallback {} wei",
                    e,
                    self.settings.priority_fee_fallback
                );
                self.settings.priority_fee_fallback
            }
        };

        let max_fee = base_fee.saturating_mul(U256::from(2u64)).saturating_add(priority_fee);
        Ok((max_fee, priority_fee))
    }

    pub async fn quote(&self, sender: Address, use_dynamic: bool) -> Result<FeeQuote, SweepError> {
        let estimate = self.estimate_gas_limit(sender).await?;
        let gas_limit = apply_buffer(estimate, self.settings.gas_buffer_bps);

        let fees = if use_dynamic {
            let (max_fee_per_gas, max_priority_fee_per_gas) = self.dynamic_fees().await?;
            FeeMode::Dynamic {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }
        } else {
            FeeMode::Legacy {
                gas_price: self.legacy_gas_price().await?,
            }
        };

        Ok(FeeQuote { gas_limit, fees })
    }
}

/// ceil(estimate * bps / 10_000), never below the protocol minimum.
pub fn apply_buffer(estimate: U256, buffer_bps: u64) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let scaled = estimate
        .saturating_mul(U256::from(buffer_bps))
        .saturating_add(denominator - U256::one())
        / denominator;
    scaled.max(U256::from(PROTOCOL_MIN_GAS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::mock::{MockChainClient, MockOp};
    use std::time::Duration;

    const GWEI: u64 = 1_000_000_000;

    fn sender() -> Address {
        Address::repeat_byte(0x01)
    }

    fn estimator(mock: Arc<MockChainClient>, settings: FeeSettings) -> FeeEstimator {
        FeeEstimator::new(
            mock,
            RetryPolicy::new(2, Duration::from_secs(1)),
            Address::repeat_byte(0xee),
            settings,
        )
    }

    #[test]
    fn test_apply_buffer_rounds_up_and_floors() {
        assert_eq!(apply_buffer(U256::from(21_000u64), 10_000), U256::from(21_000u64));
        // 30001 * 1.1 = 33001.1 -> 33002
        assert_eq!(apply_buffer(U256::from(30_001u64), 11_000), U256::from(33_002u64));
        // Below the protocol minimum
        assert_eq!(apply_buffer(U256::from(5_000u64), 11_000), U256::from(21_000u64));
    }

    #[tokio::test]
    async fn test_legacy_quote_uses_override_without_querying() {
        let mock = Arc::new(MockChainClient::new(1));
        let settings = FeeSettings {
            gas_price_override: Some(U256::from(10 * GWEI)),
            gas_buffer_bps: 10_000,
            ..FeeSettings::default()
        };
        let quote = estimator(mock.clone(), settings).quote(sender(), false).await.unwrap();

        assert_eq!(quote.gas_limit, U256::from(21_000u64));
        assert_eq!(quote.fees, FeeMode::Legacy { gas_price: U256::from(10 * GWEI) });
        assert_eq!(quote.fee_cost(), U256::from(210_000_000_000_000u64));
        assert_eq!(mock.calls(MockOp::GasPrice), 0);
    }

    #[tokio::test]
    async fn test_legacy_quote_queries_node_price() {
        let mock = Arc::new(MockChainClient::new(1));
        mock.set_gas_price(U256::from(3 * GWEI));
        mock.set_gas_estimate(U256::from(50_000u64));

        let quote = estimator(mock.clone(), FeeSettings::default())
            .quote(sender(), false)
            .await
            .unwrap();

        assert_eq!(quote.gas_limit, U256::from(55_000u64));
        assert_eq!(quote.fees.max_price_per_gas(), U256::from(3 * GWEI));
        assert_eq!(mock.calls(MockOp::GasPrice), 1);
    }

    #[tokio::test]
    async fn test_dynamic_fees_double_base_fee() {
        let mock = Arc::new(MockChainClient::new(1));
        mock.set_base_fee(U256::from(20 * GWEI));
        mock.set_priority_fee(U256::from(GWEI));

        let (max_fee, tip) = estimator(mock, FeeSettings::default()).dynamic_fees().await.unwrap();
        assert_eq!(max_fee, U256::from(41 * GWEI));
        assert_eq!(tip, U256::from(GWEI));
    }

    #[tokio::test]
    async fn test_priority_fee_falls_back_when_unsupported() {
        let mock = Arc::new(MockChainClient::new(1));
        mock.set_base_fee(U256::from(10 * GWEI));
        mock.fail_always(
            MockOp::PriorityFee,
            None,
            SweepError::RpcRejection("Method not found".into()),
        );

        let (max_fee, tip) = estimator(mock.clone(), FeeSettings::default())
            .dynamic_fees()
            .await
            .unwrap();
        assert_eq!(tip, U256::from(2 * GWEI));
        assert_eq!(max_fee, U256::from(22 * GWEI));
        // Rejections are not retried
        assert_eq!(mock.calls(MockOp::PriorityFee), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_fee_falls_back_to_gas_price() {
        let mock = Arc::new(MockChainClient::new(1));
        mock.set_gas_price(U256::from(7 * GWEI));
        mock.set_priority_fee(U256::from(GWEI));
        mock.fail_always(MockOp::BaseFee, None, SweepError::RpcTransient("timeout".into()));

        let (max_fee, _) = estimator(mock.clone(), FeeSettings::default())
            .dynamic_fees()
            .await
            .unwrap();
        assert_eq!(max_fee, U256::from(15 * GWEI));
        assert_eq!(mock.calls(MockOp::BaseFee), 3);
        assert_eq!(mock.calls(MockOp::GasPrice), 1);
    }

    #[tokio::test]
    async fn test_dynamic_fails_only_when_every_source_fails() {
        let mock = Arc::new(MockChainClient::new(1));
        mock.fail_always(MockOp::BaseFee, None, SweepError::RpcRejection("no base fee".into()));
        mock.fail_always(MockOp::GasPrice, None, SweepError::RpcRejection("down".into()));

        let result = estimator(mock, FeeSettings::default()).quote(sender(), true).await;
        assert!(matches!(result, Err(SweepError::RpcRejection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimate_gas_is_retried() {
        let mock = Arc::new(MockChainClient::new(1));
        mock.fail_next(
            MockOp::EstimateGas,
            Some(sender()),
            2,
            SweepError::RpcTransient("timeout".into()),
        );

        let gas = estimator(mock.clone(), FeeSettings::default())
            .estimate_gas_limit(sender())
            .await
            .unwrap();
        assert_eq!(gas, U256::from(21_000u64));
        assert_eq!(mock.calls(MockOp::EstimateGas), 3);
    }
}
