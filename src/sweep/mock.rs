//! Mock chain client for testing
//!
//! Holds balances in memory, lets tests inject failures per operation and
//! counts every call so tests can assert which steps ran.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use ethers::types::{Address, Bytes, H256, U256};

use super::cancel::CancellationController;
use super::error::SweepError;
use super::rpc::ChainClient;
use super::types::{ReceiptStatus, TransferRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Balance,
    Nonce,
    EstimateGas,
    GasPrice,
    BaseFee,
    PriorityFee,
    Sign,
    Broadcast,
    Receipt,
    ChainId,
}

struct FailurePlan {
    remaining: u32,
    error: SweepError,
}

/// Mock client for testing
pub struct MockChainClient {
    chain_id: u64,
    balances: Mutex<HashMap<Address, U256>>,
    nonces: Mutex<HashMap<Address, U256>>,
    gas_estimate: Mutex<U256>,
    gas_price: Mutex<U256>,
    base_fee: Mutex<U256>,
    priority_fee: Mutex<U256>,
    /// `None`: never mined
    receipt: Mutex<Option<ReceiptStatus>>,
    /// Polls answered with "not mined yet" before `receipt` is returned
    receipt_delay_polls: Mutex<u32>,
    receipt_latency: Mutex<Duration>,
    failures: Mutex<HashMap<(MockOp, Option<Address>), FailurePlan>>,
    calls: Mutex<HashMap<(MockOp, Option<Address>), u32>>,
    signed: Mutex<Vec<TransferRequest>>,
    broadcasts: Mutex<Vec<TransferRequest>>,
    cancel_on_balance: Mutex<Option<(Address, CancellationController)>>,
    panic_on_balance: Mutex<Option<Address>>,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            balances: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            gas_estimate: Mutex::new(U256::from(21_000u64)),
            gas_price: Mutex::new(U256::from(10_000_000_000u64)),
            base_fee: Mutex::new(U256::from(20_000_000_000u64)),
            priority_fee: Mutex::new(U256::from(1_000_000_000u64)),
            receipt: Mutex::new(Some(ReceiptStatus {
                success: true,
                block: Some(1),
            })),
            receipt_delay_polls: Mutex::new(0),
            receipt_latency: Mutex::new(Duration::ZERO),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            signed: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            cancel_on_balance: Mutex::new(None),
            panic_on_balance: Mutex::new(None),
        }
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.balances.lock().unwrap().insert(address, balance);
    }

    pub fn set_nonce(&self, address: Address, nonce: U256) {
        self.nonces.lock().unwrap().insert(address, nonce);
    }

    pub fn set_gas_estimate(&self, gas: U256) {
        *self.gas_estimate.lock().unwrap() = gas;
    }

    pub fn set_gas_price(&self, price: U256) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn set_base_fee(&self, fee: U256) {
        *self.base_fee.lock().unwrap() = fee;
    }

    pub fn set_priority_fee(&self, fee: U256) {
        *self.priority_fee.lock().unwrap() = fee;
    }

    /// Receipt returned once `delay_polls` lookups have come back empty
    pub fn set_receipt(&self, receipt: Option<ReceiptStatus>, delay_polls: u32) {
        *self.receipt.lock().unwrap() = receipt;
        *self.receipt_delay_polls.lock().unwrap() = delay_polls;
    }

    /// Each receipt lookup takes this long before answering
    pub fn set_receipt_latency(&self, latency: Duration) {
        *self.receipt_latency.lock().unwrap() = latency;
    }

    /// Fail the next `times` calls of `op` (for `address`, or for any caller when `None`)
    pub fn fail_next(&self, op: MockOp, address: Option<Address>, times: u32, error: SweepError) {
        self.failures.lock().unwrap().insert(
            (op, address),
            FailurePlan {
                remaining: times,
                error,
            },
        );
    }

    pub fn fail_always(&self, op: MockOp, address: Option<Address>, error: SweepError) {
        self.fail_next(op, address, u32::MAX, error);
    }

    /// Request cancellation when `address`'s balance is read
    pub fn cancel_when_balance_read(&self, address: Address, controller: CancellationController) {
        *self.cancel_on_balance.lock().unwrap() = Some((address, controller));
    }

    /// Panic inside the caller's task when `address`'s balance is read
    pub fn panic_when_balance_read(&self, address: Address) {
        *self.panic_on_balance.lock().unwrap() = Some(address);
    }

    /// Total calls of `op` across all addresses
    pub fn calls(&self, op: MockOp) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|((o, _), _)| *o == op)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn calls_for(&self, op: MockOp, address: Address) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&(op, Some(address)))
            .copied()
            .unwrap_or(0)
    }

    pub fn broadcasts(&self) -> Vec<TransferRequest> {
        self.broadcasts.lock().unwrap().clone()
    }

    fn record(&self, op: MockOp, address: Option<Address>) -> Result<(), SweepError> {
        *self.calls.lock().unwrap().entry((op, address)).or_insert(0) += 1;

        let mut failures = self.failures.lock().unwrap();
        for key in [(op, address), (op, None)] {
            if let Some(plan) = failures.get_mut(&key) {
                if plan.remaining > 0 {
                    plan.remaining -= 1;
                    return Err(plan.error.clone());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_balance(&self, address: Address) -> Result<U256, SweepError> {
        log::debug!("[mock] get_balance({:?})", address);
        if let Some((target, controller)) = self.cancel_on_balance.lock().unwrap().as_ref() {
            if *target == address {
                controller.cancel();
            }
        }
        self.record(MockOp::Balance, Some(address))?;
        let panic_target = *self.panic_on_balance.lock().unwrap();
        if panic_target == Some(address) {
            panic!("mock: balance read for {:?}", address);
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_pending_nonce(&self, address: Address) -> Result<U256, SweepError> {
        self.record(MockOp::Nonce, Some(address))?;
        Ok(self
            .nonces
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn estimate_gas(&self, from: Address, to: Address, value: U256) -> Result<U256, SweepError> {
        log::debug!("[mock] estimate_gas({:?} -> {:?}, value={})", from, to, value);
        self.record(MockOp::EstimateGas, Some(from))?;
        Ok(*self.gas_estimate.lock().unwrap())
    }

    async fn get_gas_price(&self) -> Result<U256, SweepError> {
        self.record(MockOp::GasPrice, None)?;
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn get_latest_base_fee(&self) -> Result<U256, SweepError> {
        self.record(MockOp::BaseFee, None)?;
        Ok(*self.base_fee.lock().unwrap())
    }

    async fn get_suggested_priority_fee(&self) -> Result<U256, SweepError> {
        self.record(MockOp::PriorityFee, None)?;
        Ok(*self.priority_fee.lock().unwrap())
    }

    fn sign(&self, tx: &TransferRequest, _signing_key: &str) -> Result<Bytes, SweepError> {
        self.record(MockOp::Sign, Some(tx.from))?;
        let mut signed = self.signed.lock().unwrap();
        signed.push(tx.clone());
        // The raw bytes are just an index into `signed`
        Ok(Bytes::from((signed.len() as u64 - 1).to_be_bytes().to_vec()))
    }

    async fn broadcast(&self, raw: Bytes) -> Result<H256, SweepError> {
        let id = u64::from_be_bytes(
            raw.to_vec()
                .as_slice()
                .try_into()
                .map_err(|_| SweepError::RpcRejection("rlp: malformed transaction".to_string()))?,
        );
        let tx = self
            .signed
            .lock()
            .unwrap()
            .get(id as usize)
            .cloned()
            .ok_or_else(|| SweepError::RpcRejection("unknown transaction".to_string()))?;

        self.record(MockOp::Broadcast, Some(tx.from))?;

        *self.nonces.lock().unwrap().entry(tx.from).or_default() += U256::one();
        self.broadcasts.lock().unwrap().push(tx);
        Ok(H256::from_low_u64_be(id + 1))
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptStatus>, SweepError> {
        log::debug!("[mock] get_receipt({:?})", tx_hash);
        self.record(MockOp::Receipt, None)?;
        let latency = *self.receipt_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut delay = self.receipt_delay_polls.lock().unwrap();
        if *delay > 0 {
            *delay -= 1;
            return Ok(None);
        }
        Ok(*self.receipt.lock().unwrap())
    }

    async fn get_chain_id(&self) -> Result<u64, SweepError> {
        self.record(MockOp::ChainId, None)?;
        Ok(self.chain_id)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
