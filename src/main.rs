//! escrowd - payment escrow automation daemon
//!
//! Runs the retry scheduler and payout sweep against the configured store and adapters,
//! and exposes one-shot operator commands (sweep, manual recovery, inspection).
//!
//! Only the `local` environment is wired to adapters (the simulated fiat rail and escrow
//! chain); other environments need real integrations behind the adapter traits.
//!
//! The simulators keep their state in process memory while the store is persistent. Every
//! invocation starts with an empty rail and chain, so a one-shot `sweep`, `metrics` or
//! `recover` against a database written by an earlier process will not find the transfers
//! and escrows that process created, and in-flight payments can end up `failed`. Locally,
//! drive a payment end to end inside a single `escrowd run`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use escrow_automation_adapters::{EscrowChain, FiatRail, SimulatedChain, SimulatedFiatRail};
use escrow_automation_config::{
    validate_config, AppConfig, ConfigLoader, Environment, LogFormat, DEFAULT_ENV_PREFIX,
};
use escrow_automation_metrics::{init_tracing, MetricsCollector, TracingFormat, WorkerId};
use escrow_automation_orchestrator::{
    current_timestamp, OrchestratorConfig, OrchestratorContext, PaymentRequest, RetryScheduler,
};
use escrow_automation_store::{PaymentStore, SqliteStore};
use escrow_automation_types::PaymentId;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Payment escrow automation daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(long, default_value = "config/local.toml")]
    config: PathBuf,

    /// Prefix of environment variables overriding the file
    #[arg(long, default_value = DEFAULT_ENV_PREFIX)]
    env_prefix: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Run,

    /// Run one pass of every timer and exit
    Sweep,

    /// Run one pass and print the prometheus exposition
    Metrics,

    /// Open a payment and print its deposit account
    Open {
        #[arg(long)]
        id: u64,

        #[arg(long)]
        amount: Decimal,

        #[arg(long)]
        payout_account: String,

        /// Share held in custody, in percent
        #[arg(long)]
        custody_percent: Option<Decimal>,

        /// Custody period override in seconds
        #[arg(long)]
        custody_period: Option<i64>,
    },

    /// Retry a failed payment from its last completed step
    Recover {
        id: u64,

        /// Operator name recorded in the ledger
        #[arg(long)]
        operator: String,
    },

    /// Print a payment and its escrow
    Status { id: u64 },

    /// Print a payment's ledger
    Events { id: u64 },
}

impl Command {
    /// One-shot commands that call the rail or the chain for existing payments
    fn drives_existing_payments(&self) -> bool {
        matches!(
            self,
            Command::Sweep | Command::Metrics | Command::Recover { .. }
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::from_file_with_env(&args.config, &args.env_prefix)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    validate_config(&config)?;

    let format = match config.service.log_format {
        LogFormat::Json => TracingFormat::Json,
        LogFormat::Pretty => TracingFormat::Pretty,
    };
    init_tracing(format, &config.service.log_level)?;

    info!(
        environment = ?config.service.environment,
        database_url = %config.storage.database_url,
        "starting escrowd"
    );

    if config.service.environment == Environment::Local && args.command.drives_existing_payments()
    {
        warn!(
            "simulated rail and chain start empty in this process; payments created by \
             another escrowd process may fail against them"
        );
    }

    let scheduler = build_scheduler(&config).await?;
    let ctx = scheduler.context().clone();

    match args.command {
        Command::Run => {
            let scheduler = Arc::new(scheduler);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = scheduler.clone().spawn(shutdown_rx);

            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
            shutdown_tx.send(true)?;
            handle.await?;
        }
        Command::Sweep => {
            let report = scheduler.sweep(current_timestamp()).await?;
            println!("{report:#?}");
        }
        Command::Metrics => {
            scheduler.sweep(current_timestamp()).await?;
            print!("{}", ctx.metrics.render()?);
        }
        Command::Open {
            id,
            amount,
            payout_account,
            custody_percent,
            custody_period,
        } => {
            let mut request = PaymentRequest::new(PaymentId(id), amount, payout_account);
            if let Some(percent) = custody_percent {
                request = request.with_custody_percent(percent);
            }
            if let Some(period) = custody_period {
                request = request.with_custody_period(period);
            }
            let payment = scheduler
                .deposits()
                .open_payment(request, current_timestamp())
                .await?;
            println!("{}", serde_json::to_string_pretty(&payment)?);
        }
        Command::Recover { id, operator } => {
            let report = scheduler
                .recover(PaymentId(id), &operator, current_timestamp())
                .await?;
            println!(
                "payment {} is {} after recovery ({})",
                report.payment_id,
                report.status,
                report.detail.as_deref().unwrap_or(report.state.as_str())
            );
        }
        Command::Status { id } => {
            let payment = ctx.payment(PaymentId(id)).await?;
            let escrow = ctx.store.get_escrow(PaymentId(id)).await?;
            let status = serde_json::json!({ "payment": payment, "escrow": escrow });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Events { id } => {
            for event in ctx.events(PaymentId(id)).await? {
                let at = chrono::DateTime::from_timestamp(event.created_at as i64, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| event.created_at.to_string());
                println!(
                    "{:>6}  {at}  {:<28} {:<20} {}",
                    event.sequence,
                    event.kind,
                    event.reference.as_deref().unwrap_or("-"),
                    event.description
                );
            }
        }
    }

    Ok(())
}

async fn build_scheduler(config: &AppConfig) -> anyhow::Result<RetryScheduler> {
    let (fiat, chain): (Arc<dyn FiatRail>, Arc<dyn EscrowChain>) =
        match config.service.environment {
            Environment::Local => {
                info!("using simulated fiat rail and escrow chain");
                (
                    Arc::new(SimulatedFiatRail::new()),
                    Arc::new(SimulatedChain::new()),
                )
            }
            other => bail!("no adapter integrations available for the {other:?} environment"),
        };

    let store = SqliteStore::connect(&config.storage.database_url)
        .await
        .context("failed to open the payment store")?;
    let worker = config
        .service
        .worker_id
        .clone()
        .map(WorkerId::named)
        .unwrap_or_else(WorkerId::generate);

    let ctx = OrchestratorContext::new(
        Arc::new(store),
        fiat,
        chain,
        OrchestratorConfig::from(config),
        MetricsCollector::new()?,
    )
    .with_worker(worker);

    Ok(RetryScheduler::new(Arc::new(ctx)))
}
