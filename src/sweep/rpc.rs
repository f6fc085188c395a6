//! Remote node collaborator
//!
//! `ChainClient` is the seam between the pipeline and the node. `EthersClient`
//! talks JSON-RPC over HTTP; `mock::MockChainClient` stands in for it in tests.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, Eip1559TransactionRequest, TransactionRequest, H256,
    U256,
};
use tokio::time::timeout;

use crate::sweep::error::{classify_node_error, SweepError};
use crate::sweep::types::{FeeMode, ReceiptStatus, TransferRequest};

/// Operations the sweep needs from the node. Every call is independently retryable.
///
/// Implementations must be safe to share across all workers.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: Address) -> Result<U256, SweepError>;

    /// Nonce including transactions still in the pool
    async fn get_pending_nonce(&self, address: Address) -> Result<U256, SweepError>;

    async fn estimate_gas(&self, from: Address, to: Address, value: U256) -> Result<U256, SweepError>;

    async fn get_gas_price(&self) -> Result<U256, SweepError>;

    async fn get_latest_base_fee(&self) -> Result<U256, SweepError>;

    /// Optional node capability; callers fall back when it errors.
    async fn get_suggested_priority_fee(&self) -> Result<U256, SweepError>;

    /// Local signing, no network access.
    fn sign(&self, tx: &TransferRequest, signing_key: &str) -> Result<Bytes, SweepError>;

    async fn broadcast(&self, signed: Bytes) -> Result<H256, SweepError>;

    /// `None` while the transaction is not mined yet
    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptStatus>, SweepError>;

    async fn get_chain_id(&self) -> Result<u64, SweepError>;

    /// Get client name for logging
    fn name(&self) -> &str;
}

/// `ChainClient` over an ethers HTTP provider.
///
/// `Provider<Http>` pools its connections, so one instance serves every worker.
#[derive(Debug, Clone)]
pub struct EthersClient {
    provider: Provider<Http>,
    call_timeout: Duration,
}

impl EthersClient {
    pub fn new(rpc_url: &str, call_timeout: Duration) -> Result<Self, SweepError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| SweepError::Config(format!("invalid rpc_url {}: {}", rpc_url, e)))?;
        Ok(Self {
            provider,
            call_timeout,
        })
    }

    async fn call<T, Fut>(&self, op: &str, fut: Fut) -> Result<T, SweepError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_provider_error(op, e)),
            Err(_) => Err(SweepError::RpcTransient(format!(
                "{} timed out after {:?}",
                op, self.call_timeout
            ))),
        }
    }
}

fn classify_provider_error(op: &str, err: ProviderError) -> SweepError {
    match &err {
        ProviderError::JsonRpcClientError(inner) => {
            if let Some(resp) = inner.as_error_response() {
                classify_node_error(resp.code, &format!("{}: {}", op, resp.message))
            } else if inner.as_serde_error().is_some() {
                SweepError::RpcRejection(format!("{}: unexpected response: {}", op, err))
            } else {
                // Transport-level: connection reset, HTTP 5xx, ...
                SweepError::RpcTransient(format!("{}: {}", op, err))
            }
        }
        _ => SweepError::RpcRejection(format!("{}: {}", op, err)),
    }
}

/// Maps a transfer onto the matching ethers transaction envelope.
pub fn to_typed_transaction(req: &TransferRequest) -> TypedTransaction {
    match req.fees {
        FeeMode::Legacy { gas_price } => TransactionRequest::new()
            .from(req.from)
            .to(req.to)
            .value(req.value)
            .nonce(req.nonce)
            .gas(req.gas_limit)
            .gas_price(gas_price)
            .chain_id(req.chain_id)
            .into(),
        FeeMode::Dynamic {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => Eip1559TransactionRequest::new()
            .from(req.from)
            .to(req.to)
            .value(req.value)
            .nonce(req.nonce)
            .gas(req.gas_limit)
            .max_fee_per_gas(max_fee_per_gas)
            .max_priority_fee_per_gas(max_priority_fee_per_gas)
            .chain_id(req.chain_id)
            .into(),
    }
}

/// Parses a hex secp256k1 secret, with or without `0x`.
pub fn parse_signing_key(signing_key: &str) -> Result<LocalWallet, SweepError> {
    let trimmed = signing_key.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex.parse::<LocalWallet>()
        .map_err(|e| SweepError::Signing(format!("invalid signing key: {}", e)))
}

#[async_trait]
impl ChainClient for EthersClient {
    async fn get_balance(&self, address: Address) -> Result<U256, SweepError> {
        self.call("get_balance", self.provider.get_balance(address, None))
            .await
    }

    async fn get_pending_nonce(&self, address: Address) -> Result<U256, SweepError> {
        let pending: BlockId = BlockNumber::Pending.into();
        self.call(
            "get_transaction_count",
            self.provider.get_transaction_count(address, Some(pending)),
        )
        .await
    }

    async fn estimate_gas(&self, from: Address, to: Address, value: U256) -> Result<U256, SweepError> {
        let probe: TypedTransaction = TransactionRequest::new().from(from).to(to).value(value).into();
        self.call("estimate_gas", self.provider.estimate_gas(&probe, None))
            .await
    }

    async fn get_gas_price(&self) -> Result<U256, SweepError> {
        self.call("get_gas_price", self.provider.get_gas_price()).await
    }

    async fn get_latest_base_fee(&self) -> Result<U256, SweepError> {
        let block = self
            .call("get_block", self.provider.get_block(BlockNumber::Latest))
            .await?
            .ok_or_else(|| SweepError::RpcTransient("get_block: latest block not found".to_string()))?;
        block
            .base_fee_per_gas
            .ok_or_else(|| SweepError::RpcRejection("get_block: latest block has no base fee".to_string()))
    }

    async fn get_suggested_priority_fee(&self) -> Result<U256, SweepError> {
        self.call(
            "eth_maxPriorityFeePerGas",
            self.provider.request::<_, U256>("eth_maxPriorityFeePerGas", ()),
        )
        .await
    }

    fn sign(&self, tx: &TransferRequest, signing_key: &str) -> Result<Bytes, SweepError> {
        let wallet = parse_signing_key(signing_key)?.with_chain_id(tx.chain_id);
        if wallet.address() != tx.from {
            return Err(SweepError::Signing(format!(
                "signing key does not control {:?}",
                tx.from
            )));
        }
        let typed = to_typed_transaction(tx);
        let signature = wallet
            .sign_transaction_sync(&typed)
            .map_err(|e| SweepError::Signing(e.to_string()))?;
        Ok(typed.rlp_signed(&signature))
    }

    async fn broadcast(&self, signed: Bytes) -> Result<H256, SweepError> {
        let pending = self
            .call("send_raw_transaction", self.provider.send_raw_transaction(signed))
            .await?;
        Ok(pending.tx_hash())
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptStatus>, SweepError> {
        let receipt = self
            .call(
                "get_transaction_receipt",
                self.provider.get_transaction_receipt(tx_hash),
            )
            .await?;
        Ok(receipt.map(|r| ReceiptStatus {
            // Pre-Byzantium receipts carry no status; treat them as success
            success: r.status.map_or(true, |s| s.as_u64() == 1),
            block: r.block_number.map(|b| b.as_u64()),
        }))
    }

    async fn get_chain_id(&self) -> Result<u64, SweepError> {
        let id = self.call("get_chainid", self.provider.get_chainid()).await?;
        if id > U256::from(u64::MAX) {
            return Err(SweepError::RpcRejection(format!("chain id {} out of range", id)));
        }
        Ok(id.as_u64())
    }

    fn name(&self) -> &str {
        "ethers-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn request(fees: FeeMode, from: Address) -> TransferRequest {
        TransferRequest {
            from,
            to: Address::repeat_byte(0xaa),
            nonce: U256::from(7u64),
            value: U256::from(1_000u64),
            gas_limit: U256::from(21_000u64),
            fees,
            chain_id: 1,
        }
    }

    #[test]
    fn test_typed_transaction_envelopes() {
        let legacy = to_typed_transaction(&request(
            FeeMode::Legacy { gas_price: U256::from(5u64) },
            Address::zero(),
        ));
        assert!(matches!(legacy, TypedTransaction::Legacy(_)));
        assert_eq!(legacy.gas_price(), Some(U256::from(5u64)));
        assert_eq!(legacy.nonce(), Some(&U256::from(7u64)));

        let dynamic = to_typed_transaction(&request(
            FeeMode::Dynamic {
                max_fee_per_gas: U256::from(40u64),
                max_priority_fee_per_gas: U256::from(2u64),
            },
            Address::zero(),
        ));
        assert!(matches!(dynamic, TypedTransaction::Eip1559(_)));
        assert_eq!(dynamic.gas(), Some(&U256::from(21_000u64)));
    }

    #[test]
    fn test_parse_signing_key_accepts_prefix() {
        let a = parse_signing_key(KEY).unwrap();
        let b = parse_signing_key(KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(a.address(), b.address());
        assert!(matches!(parse_signing_key("zz"), Err(SweepError::Signing(_))));
    }

    #[test]
    fn test_sign_rejects_foreign_key() {
        let client = EthersClient::new("http://localhost:8545", Duration::from_secs(1)).unwrap();
        let req = request(FeeMode::Legacy { gas_price: U256::one() }, Address::repeat_byte(0x11));
        assert!(matches!(client.sign(&req, KEY), Err(SweepError::Signing(_))));
    }

    #[test]
    fn test_sign_produces_raw_transaction() {
        let client = EthersClient::new("http://localhost:8545", Duration::from_secs(1)).unwrap();
        let owner = parse_signing_key(KEY).unwrap().address();
        let req = request(FeeMode::Legacy { gas_price: U256::one() }, owner);
        let raw = client.sign(&req, KEY).unwrap();
        assert!(!raw.is_empty());
    }
}
