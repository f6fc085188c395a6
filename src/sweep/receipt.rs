//! Post-broadcast confirmation polling

use std::sync::Arc;
use std::time::Duration;

use ethers::types::H256;
use tokio::time::{sleep, timeout, Instant};

use crate::sweep::rpc::ChainClient;
use crate::sweep::types::Confirmation;

pub struct ReceiptWaiter {
    client: Arc<dyn ChainClient>,
    timeout: Duration,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(client: Arc<dyn ChainClient>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            client,
            timeout,
            poll_interval,
        }
    }

    /// Poll until the receipt shows up or the deadline passes.
    ///
    /// Lookup errors are treated like "not mined yet": the transaction is
    /// already out, so the only honest answer on a flaky node is `Unknown`.
    pub async fn wait(&self, tx_hash: H256) -> Confirmation {
        let deadline = Instant::now() + self.timeout;

        loop {
            // A slow lookup may not outlive the deadline
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.client.get_receipt(tx_hash)).await {
                Ok(Ok(Some(receipt))) if receipt.success => {
                    return Confirmation::Confirmed { block: receipt.block };
                }
                Ok(Ok(Some(receipt))) => {
                    return Confirmation::Reverted { block: receipt.block };
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => log::debug!("Receipt lookup for {:?} failed: {}", tx_hash, e),
                Err(_) => log::debug!("Receipt lookup for {:?} cut off by deadline", tx_hash),
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "No receipt for {:?} after {:?}, confirmation unknown",
                    tx_hash,
                    self.timeout
                );
                return Confirmation::Unknown;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
