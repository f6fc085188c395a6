use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use eyre::{Result, WrapErr};
use log::{error, info};

use sweeper::configure::{load_config, DEFAULT_CONFIG_FILE};
use sweeper::logger;
use sweeper::sweep::{
    CancellationController, ChainClient, EthersClient, Outcome, RetryPolicy, Scheduler,
    SweepReport, TransferPipeline,
};
use sweeper::wallets::load_wallets;

/// Exit status when the sweep ran but at least one account failed
const EXIT_ACCOUNT_FAILURES: u8 = 2;

#[derive(Parser)]
#[clap(author, version, about = "Sweep account balances to a single recipient", long_about = None)]
struct Args {
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    /// Overrides `wallet_file`
    #[clap(long)]
    wallets: Option<String>,
    /// Overrides `max_workers`
    #[clap(long)]
    workers: Option<usize>,
    /// Compute everything, sign and send nothing
    #[clap(long, action = clap::ArgAction::SetTrue)]
    dry_run: bool,
    /// Write the per-account report as JSON
    #[clap(long)]
    report: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();

    let args = Args::parse();
    let mut config = load_config(&args.config).wrap_err("Failed to load configuration")?;
    if let Some(wallets) = args.wallets {
        config.wallet_file = wallets;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    config.dry_run |= args.dry_run;

    logger::setup_logger(&config).map_err(|e| eyre::eyre!("Failed to set up logger: {}", e))?;

    config.validate()?;
    let accounts = load_wallets(&config.wallet_file)?;

    let client = Arc::new(EthersClient::new(config.rpc_url()?, config.rpc_timeout())?);
    let retry = RetryPolicy::new(config.retry_limit, config.retry_cap());
    let chain_id = retry
        .run("get_chain_id", || client.get_chain_id())
        .await
        .wrap_err("Unable to reach the node")?;
    info!(
        "Connected to chain {} via {} (dry_run={}, dynamic_fee={})",
        chain_id,
        client.name(),
        config.dry_run,
        config.use_dynamic_fee
    );

    let cancel = CancellationController::new();
    let _ctrl_c = cancel.install_ctrl_c();

    let pipeline = TransferPipeline::from_config(client, &config, chain_id, cancel.clone())?;
    let scheduler = Scheduler::new(Arc::new(pipeline), cancel, config.max_workers);
    let report = scheduler.run(accounts).await?;

    print_report(&report);
    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json).wrap_err_with(|| format!("Failed to write report to {}", path))?;
        info!("Report written to {}", path);
    }

    if report.summary.has_failures() {
        error!("{} account(s) failed", report.summary.failed);
        return Ok(ExitCode::from(EXIT_ACCOUNT_FAILURES));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &SweepReport) {
    for account in &report.accounts {
        let detail = match &account.outcome {
            Outcome::Sent { tx_hash, value } => format!("value={} tx={:?}", value, tx_hash),
            Outcome::Skipped { reason } => format!("reason={:?}", reason),
            Outcome::Failed { error } => format!("error={}", error),
            Outcome::DryRun { intended_value } => format!("value={}", intended_value),
        };
        let confirmation = account
            .confirmation
            .map(|c| format!(" confirmation={:?}", c))
            .unwrap_or_default();
        println!(
            "[{}] {:?} {} {}{}",
            account.index,
            account.address,
            account.outcome.tag(),
            detail,
            confirmation
        );
    }
    let s = &report.summary;
    println!(
        "sent={} skipped={} failed={} dry_run={} not_started={} elapsed={:.2}s",
        s.sent, s.skipped, s.failed, s.dry_run, s.not_started, s.elapsed_seconds
    );
}
