//! Sweep module - main module file
//!
//! Per-account transfer pipeline, fee estimation, retry policy, cancellation
//! and the bounded worker pool that drives them.

pub mod cancel;
pub mod error;
pub mod fees;
pub mod mock;
pub mod pipeline;
pub mod receipt;
pub mod retry;
pub mod rpc;
pub mod scheduler;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use cancel::CancellationController;
pub use error::SweepError;
pub use fees::{FeeEstimator, FeeSettings};
pub use pipeline::{PipelineOptions, TransferPipeline};
pub use receipt::ReceiptWaiter;
pub use retry::RetryPolicy;
pub use rpc::{ChainClient, EthersClient};
pub use scheduler::{Scheduler, SweepStats};
pub use state::PipelineState;
pub use types::{
    AccountCredential, AccountReport, Confirmation, FeeMode, FeeQuote, Outcome, SkipReason,
    SweepReport, SweepSummary, TransferRequest,
};
