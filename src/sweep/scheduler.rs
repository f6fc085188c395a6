//! Bounded worker pool over the account list
//!
//! One pipeline run per account, at most `max_workers` at a time. An interrupt
//! stops new dispatches; runs already started finish normally.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ethers::types::Address;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::sweep::cancel::CancellationController;
use crate::sweep::error::SweepError;
use crate::sweep::pipeline::TransferPipeline;
use crate::sweep::types::{AccountCredential, AccountReport, Outcome, SweepReport, SweepSummary};

/// Outcome counters shared by all workers
#[derive(Debug, Default)]
pub struct SweepStats {
    sent: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    dry_run: AtomicU64,
}

impl SweepStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Sent { .. } => &self.sent,
            Outcome::Skipped { .. } => &self.skipped,
            Outcome::Failed { .. } => &self.failed,
            Outcome::DryRun { .. } => &self.dry_run,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dry_run(&self) -> u64 {
        self.dry_run.load(Ordering::Relaxed)
    }
}

pub struct Scheduler {
    pipeline: Arc<TransferPipeline>,
    cancel: CancellationController,
    max_workers: usize,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<TransferPipeline>,
        cancel: CancellationController,
        max_workers: usize,
    ) -> Self {
        Self {
            pipeline,
            cancel,
            max_workers: max_workers.max(1),
        }
    }

    /// Sweep every account. Only an empty account list is an error; per-account
    /// failures are counted in the report.
    pub async fn run(&self, accounts: Vec<AccountCredential>) -> Result<SweepReport, SweepError> {
        if accounts.is_empty() {
            return Err(SweepError::NoValidAccounts);
        }

        let start = Instant::now();
        let total = accounts.len();
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let stats = SweepStats::new();
        let mut tasks = JoinSet::new();
        let mut dispatched: Vec<(usize, Address)> = Vec::with_capacity(total);

        log::info!(
            "Sweeping {} accounts to {:?} with {} workers",
            total,
            self.pipeline.recipient(),
            self.max_workers
        );

        for (index, account) in accounts.into_iter().enumerate() {
            // Waiting for a free worker is the backpressure on dispatch
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    log::error!("Worker pool closed: {}", e);
                    break;
                }
            };
            if self.cancel.is_cancelled() {
                log::warn!(
                    "Interrupt requested: {} of {} accounts not started",
                    total - index,
                    total
                );
                break;
            }

            dispatched.push((index, account.address));
            let pipeline = self.pipeline.clone();
            let stats = stats.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let report = pipeline.run(index, &account).await;
                stats.record(&report.outcome);
                report
            });
        }

        let mut reports: Vec<AccountReport> = Vec::with_capacity(dispatched.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log::error!("Sweep task aborted: {}", e);
                    stats.record_failure();
                }
            }
        }
        // A task that died never produced its report; fill the gap
        let reported: HashSet<usize> = reports.iter().map(|r| r.index).collect();
        for (index, address) in &dispatched {
            if !reported.contains(index) {
                reports.push(AccountReport {
                    index: *index,
                    address: *address,
                    outcome: Outcome::Failed {
                        error: SweepError::TaskAborted("no report from worker".to_string()),
                    },
                    confirmation: None,
                });
            }
        }
        reports.sort_by_key(|r| r.index);

        let summary = SweepSummary {
            sent: stats.sent(),
            skipped: stats.skipped(),
            failed: stats.failed(),
            dry_run: stats.dry_run(),
            not_started: (total - dispatched.len()) as u64,
            elapsed_seconds: start.elapsed().as_secs_f64(),
            finished_at: chrono::Utc::now(),
        };
        log::info!(
            "All transfers completed in {:.2} seconds. sent={} skipped={} failed={} dry_run={} not_started={}",
            summary.elapsed_seconds,
            summary.sent,
            summary.skipped,
            summary.failed,
            summary.dry_run,
            summary.not_started
        );

        Ok(SweepReport {
            summary,
            accounts: reports,
        })
    }
}
