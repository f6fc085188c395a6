//! Core types for the sweep pipeline
//!
//! All currency amounts are wei held in `U256`; nothing here touches floating point.

use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Serialize, Serializer};

use crate::sweep::error::SweepError;

/// Gas consumed by a plain value transfer; no quote may go below it.
pub const PROTOCOL_MIN_GAS: u64 = 21_000;

/// One source account. Loaded once, shared read-only by every pipeline run.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredential {
    pub address: Address,
    pub signing_key: String,
}

impl AccountCredential {
    pub fn new(address: Address, signing_key: impl Into<String>) -> Self {
        Self {
            address,
            signing_key: signing_key.into(),
        }
    }
}

impl fmt::Debug for AccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredential")
            .field("address", &self.address)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Fee fields of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    Legacy {
        gas_price: U256,
    },
    Dynamic {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl FeeMode {
    /// Highest price per gas unit the transaction can be charged.
    pub fn max_price_per_gas(&self) -> U256 {
        match self {
            FeeMode::Legacy { gas_price } => *gas_price,
            FeeMode::Dynamic { max_fee_per_gas, .. } => *max_fee_per_gas,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, FeeMode::Dynamic { .. })
    }
}

/// Gas limit plus fee fields. Built fresh for every account, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub gas_limit: U256,
    pub fees: FeeMode,
}

impl FeeQuote {
    /// Upper bound on what the transfer can cost. Saturates so an absurd quote
    /// reads as "more than any balance" instead of wrapping.
    pub fn fee_cost(&self) -> U256 {
        self.gas_limit.saturating_mul(self.fees.max_price_per_gas())
    }
}

/// Fully specified transfer, ready to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    pub nonce: U256,
    pub value: U256,
    pub gas_limit: U256,
    pub fees: FeeMode,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ZeroBalance,
    InsufficientFunds,
    /// Interrupt observed before signing
    Cancelled,
}

/// Result of one account's pipeline run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Sent {
        tx_hash: H256,
        #[serde(serialize_with = "u256_decimal")]
        value: U256,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        error: SweepError,
    },
    DryRun {
        #[serde(serialize_with = "u256_decimal")]
        intended_value: U256,
    },
}

impl Outcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Outcome::Sent { .. } => "sent",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
            Outcome::DryRun { .. } => "dry_run",
        }
    }
}

/// Post-broadcast status. Secondary to `Outcome::Sent`, never replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed { block: Option<u64> },
    Reverted { block: Option<u64> },
    /// Deadline passed without a receipt; the transaction may still land.
    Unknown,
}

/// Receipt as reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub success: bool,
    pub block: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub index: usize,
    pub address: Address,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<Confirmation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub dry_run: u64,
    /// Accounts never dispatched because of an interrupt
    pub not_started: u64,
    pub elapsed_seconds: f64,
    pub finished_at: DateTime<Utc>,
}

impl SweepSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub summary: SweepSummary,
    pub accounts: Vec<AccountReport>,
}

impl Serialize for SweepError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

fn u256_decimal<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_cost_legacy_and_dynamic() {
        let legacy = FeeQuote {
            gas_limit: U256::from(21_000u64),
            fees: FeeMode::Legacy {
                gas_price: U256::from(10_000_000_000u64),
            },
        };
        assert_eq!(legacy.fee_cost(), U256::from(210_000_000_000_000u64));

        let dynamic = FeeQuote {
            gas_limit: U256::from(21_000u64),
            fees: FeeMode::Dynamic {
                max_fee_per_gas: U256::from(30u64),
                max_priority_fee_per_gas: U256::from(2u64),
            },
        };
        assert_eq!(dynamic.fee_cost(), U256::from(630_000u64));
    }

    #[test]
    fn test_fee_cost_saturates() {
        let quote = FeeQuote {
            gas_limit: U256::MAX,
            fees: FeeMode::Legacy { gas_price: U256::from(2u64) },
        };
        assert_eq!(quote.fee_cost(), U256::MAX);
    }

    #[test]
    fn test_credential_debug_hides_key() {
        let cred = AccountCredential::new(Address::zero(), "deadbeef");
        let dbg = format!("{:?}", cred);
        assert!(!dbg.contains("deadbeef"));
        assert!(dbg.contains("redacted"));
    }

    #[test]
    fn test_report_json() {
        let report = AccountReport {
            index: 3,
            address: Address::zero(),
            outcome: Outcome::DryRun {
                intended_value: U256::from(999_790_000_000_000_000u64),
            },
            confirmation: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"outcome\":\"dry_run\""));
        assert!(json.contains("\"intended_value\":\"999790000000000000\""));
        assert!(!json.contains("confirmation"));

        let failed = Outcome::Failed {
            error: SweepError::RpcRejection("nonce too low".into()),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"error\":\"RPC rejected request: nonce too low\""));
    }
}
