//! Per-account transfer pipeline
//!
//! balance -> quote -> build -> sign -> broadcast -> (confirm). Every error is
//! caught at `run` and turned into `Outcome::Failed` for that account only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{format_ether, keccak256};
use tokio::time::sleep;

use crate::configure::SweepConfig;
use crate::sweep::cancel::CancellationController;
use crate::sweep::error::SweepError;
use crate::sweep::fees::{FeeEstimator, FeeSettings};
use crate::sweep::receipt::ReceiptWaiter;
use crate::sweep::retry::RetryPolicy;
use crate::sweep::rpc::ChainClient;
use crate::sweep::state::{transition, PipelineEvent, PipelineState};
use crate::sweep::types::{
    AccountCredential, AccountReport, Confirmation, Outcome, SkipReason, TransferRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub dry_run: bool,
    pub use_dynamic_fee: bool,
    /// Pause after each broadcast, independent of retry backoff
    pub tx_delay: Duration,
}

pub struct TransferPipeline {
    client: Arc<dyn ChainClient>,
    fees: FeeEstimator,
    retry: RetryPolicy,
    receipts: Option<ReceiptWaiter>,
    cancel: CancellationController,
    recipient: Address,
    chain_id: u64,
    options: PipelineOptions,
}

impl TransferPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChainClient>,
        fees: FeeEstimator,
        retry: RetryPolicy,
        receipts: Option<ReceiptWaiter>,
        cancel: CancellationController,
        recipient: Address,
        chain_id: u64,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            fees,
            retry,
            receipts,
            cancel,
            recipient,
            chain_id,
            options,
        }
    }

    pub fn from_config(
        client: Arc<dyn ChainClient>,
        config: &SweepConfig,
        chain_id: u64,
        cancel: CancellationController,
    ) -> Result<Self, SweepError> {
        let recipient = config.recipient_address()?;
        let retry = RetryPolicy::new(config.retry_limit, config.retry_cap());
        let fees = FeeEstimator::new(
            client.clone(),
            retry,
            recipient,
            FeeSettings::from_config(config),
        );
        let receipts = config.wait_for_receipt.then(|| {
            ReceiptWaiter::new(
                client.clone(),
                config.receipt_timeout(),
                config.receipt_poll_interval(),
            )
        });
        let options = PipelineOptions {
            dry_run: config.dry_run,
            use_dynamic_fee: config.use_dynamic_fee,
            tx_delay: config.tx_delay(),
        };
        Ok(Self::new(
            client, fees, retry, receipts, cancel, recipient, chain_id, options,
        ))
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    /// Sweep one account. Never returns an error; failures become `Outcome::Failed`.
    pub async fn run(&self, index: usize, account: &AccountCredential) -> AccountReport {
        let mut state = PipelineState::Init;

        let (outcome, confirmation) = match self.execute(index, account, &mut state).await {
            Ok(result) => result,
            Err(e) => {
                log::error!(
                    "[{}] Transfer from {:?} failed at {}: {}",
                    index,
                    account.address,
                    state.as_str(),
                    e
                );
                advance(index, &mut state, PipelineEvent::Fail);
                (Outcome::Failed { error: e }, None)
            }
        };

        AccountReport {
            index,
            address: account.address,
            outcome,
            confirmation,
        }
    }

    async fn execute(
        &self,
        index: usize,
        account: &AccountCredential,
        state: &mut PipelineState,
    ) -> Result<(Outcome, Option<Confirmation>), SweepError> {
        let address = account.address;

        let balance = self
            .retry
            .run("get_balance", || self.client.get_balance(address))
            .await?;
        if balance.is_zero() {
            log::warn!("[{}] Wallet {:?} has zero balance.", index, address);
            advance(index, state, PipelineEvent::Skip);
            return Ok(skipped(SkipReason::ZeroBalance));
        }
        advance(index, state, PipelineEvent::BalanceOk);

        let quote = self.fees.quote(address, self.options.use_dynamic_fee).await?;
        let fee = quote.fee_cost();
        let value = match sweep_value(balance, fee) {
            Some(value) => value,
            None => {
                log::warn!(
                    "[{}] Insufficient balance in {:?}. Balance: {} ETH, Estimated fee: {} ETH.",
                    index,
                    address,
                    format_ether(balance),
                    format_ether(fee)
                );
                advance(index, state, PipelineEvent::Skip);
                return Ok(skipped(SkipReason::InsufficientFunds));
            }
        };
        advance(index, state, PipelineEvent::QuoteOk);

        let nonce = self
            .retry
            .run("get_pending_nonce", || self.client.get_pending_nonce(address))
            .await?;
        let request = TransferRequest {
            from: address,
            to: self.recipient,
            nonce,
            value,
            gas_limit: quote.gas_limit,
            fees: quote.fees,
            chain_id: self.chain_id,
        };
        advance(index, state, PipelineEvent::BuildOk);

        if self.cancel.is_cancelled() {
            log::warn!("[{}] Interrupted before signing, {:?} left untouched.", index, address);
            advance(index, state, PipelineEvent::Skip);
            return Ok(skipped(SkipReason::Cancelled));
        }

        if self.options.dry_run {
            log::info!(
                "[{}] Dry run: would send {} ETH from {:?} (gas {}, max {} wei/gas).",
                index,
                format_ether(value),
                address,
                request.gas_limit,
                request.fees.max_price_per_gas()
            );
            advance(index, state, PipelineEvent::Finish);
            return Ok((Outcome::DryRun { intended_value: value }, None));
        }

        // Local signing is not retried: a bad key stays bad
        let raw = self.client.sign(&request, &account.signing_key)?;
        advance(index, state, PipelineEvent::SignOk);

        let (tx_hash, settled) = self.broadcast(&raw).await?;
        advance(index, state, PipelineEvent::BroadcastOk);
        log::info!(
            "[{}] Sent {} ETH from {:?} with gas {} at {} wei/gas. Transaction hash: {:?}",
            index,
            format_ether(value),
            address,
            request.gas_limit,
            request.fees.max_price_per_gas(),
            tx_hash
        );

        let confirmation = match (&self.receipts, settled) {
            (_, Some(status)) => Some(status),
            (Some(waiter), None) => Some(waiter.wait(tx_hash).await),
            (None, None) => None,
        };
        if let Some(status) = confirmation {
            log::info!("[{}] Confirmation for {:?}: {:?}", index, tx_hash, status);
            advance(index, state, PipelineEvent::ConfirmWaitDone);
        }

        if !self.options.tx_delay.is_zero() {
            sleep(self.options.tx_delay).await;
        }
        advance(index, state, PipelineEvent::Finish);

        Ok((Outcome::Sent { tx_hash, value }, confirmation))
    }

    /// Submits the same signed bytes on every attempt, so a retry can never
    /// produce a second transaction. A node that already holds them has accepted it.
    ///
    /// Once an attempt has failed transiently, an earlier submit may have landed.
    /// A later nonce conflict is then settled by looking the hash up instead of
    /// failing the account; the returned confirmation is set when that lookup ran.
    async fn broadcast(&self, raw: &Bytes) -> Result<(H256, Option<Confirmation>), SweepError> {
        let local_hash = H256::from(keccak256(raw));
        let maybe_delivered = AtomicBool::new(false);

        let result = self
            .retry
            .run("broadcast", || async {
                match self.client.broadcast(raw.clone()).await {
                    Err(SweepError::RpcRejection(msg)) if msg.contains("already known") => {
                        Ok(local_hash)
                    }
                    Err(e) if e.is_retryable() => {
                        maybe_delivered.store(true, Ordering::Relaxed);
                        Err(e)
                    }
                    other => other,
                }
            })
            .await;

        match result {
            Ok(hash) => Ok((hash, None)),
            Err(SweepError::RpcRejection(msg))
                if maybe_delivered.load(Ordering::Relaxed) && is_nonce_conflict(&msg) =>
            {
                self.resolve_nonce_conflict(local_hash, msg).await
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_nonce_conflict(
        &self,
        tx_hash: H256,
        msg: String,
    ) -> Result<(H256, Option<Confirmation>), SweepError> {
        let underpriced = msg.contains("underpriced");
        match self.client.get_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                log::warn!("Broadcast retry hit '{}' but {:?} is mined", msg, tx_hash);
                let confirmation = if receipt.success {
                    Confirmation::Confirmed { block: receipt.block }
                } else {
                    Confirmation::Reverted { block: receipt.block }
                };
                Ok((tx_hash, Some(confirmation)))
            }
            // Our own copy still pending in the pool
            Ok(None) if underpriced => Ok((tx_hash, Some(Confirmation::Unknown))),
            Ok(None) => Err(SweepError::RpcRejection(msg)),
            Err(e) => {
                log::warn!(
                    "Broadcast retry hit '{}' and lookup of {:?} failed ({}), treating as sent",
                    msg,
                    tx_hash,
                    e
                );
                Ok((tx_hash, Some(Confirmation::Unknown)))
            }
        }
    }
}

/// Rejections that mean the nonce is already taken, possibly by our own earlier submit.
fn is_nonce_conflict(msg: &str) -> bool {
    msg.contains("nonce too low") || msg.contains("replacement transaction underpriced")
}

fn skipped(reason: SkipReason) -> (Outcome, Option<Confirmation>) {
    (Outcome::Skipped { reason }, None)
}

fn advance(index: usize, state: &mut PipelineState, event: PipelineEvent) {
    let next = transition(*state, event);
    log::debug!("[{}] {} --{:?}--> {}", index, state.as_str(), event, next.as_str());
    *state = next;
}

/// Value actually swept for a balance and quote, `None` when fees eat all of it.
pub fn sweep_value(balance: U256, fee_cost: U256) -> Option<U256> {
    balance.checked_sub(fee_cost).filter(|v| !v.is_zero())
}
