use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wallet_ledger::application::engine::{EngineParts, SettlementEngine, WebhookOutcome};
use wallet_ledger::config::SettlementConfig;
use wallet_ledger::domain::plan::{PlanId, PlanType};
use wallet_ledger::domain::ports::{ClaimStoreBox, TransactionStoreBox, WalletStoreBox};
use wallet_ledger::infrastructure::in_memory::{
    InMemoryCheckoutSessions, InMemoryClaimStore, InMemoryPlanCatalog, InMemoryTransactionStore,
    InMemoryWalletStore, RecordingSubscriptionActivator,
};
#[cfg(feature = "storage-rocksdb")]
use wallet_ledger::infrastructure::rocksdb::RocksDBStore;
use wallet_ledger::interfaces::csv::command_reader::{CommandReader, SettlementCommand};
use wallet_ledger::interfaces::csv::plan_reader::PlanReader;
use wallet_ledger::interfaces::csv::wallet_writer::WalletWriter;
use wallet_ledger::logging::init_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settlement commands CSV file
    input: PathBuf,

    /// Plan catalog CSV file
    #[arg(long)]
    plans: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Seconds before an unfinished settlement claim may be taken over
    #[arg(long, default_value_t = 30)]
    claim_lease_secs: u64,
}

type Stores = (TransactionStoreBox, WalletStoreBox, ClaimStoreBox);

fn in_memory_stores() -> Stores {
    (
        Box::new(InMemoryTransactionStore::new()),
        Box::new(InMemoryWalletStore::new()),
        Box::new(InMemoryClaimStore::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok((
                Box::new(store.clone()),
                Box::new(store.clone()),
                Box::new(store),
            ))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

fn load_plans(path: Option<&Path>) -> Result<InMemoryPlanCatalog> {
    let Some(path) = path else {
        return Ok(InMemoryPlanCatalog::new());
    };
    let file = File::open(path).into_diagnostic()?;
    let mut plans = Vec::new();
    for plan in PlanReader::new(file).plans() {
        match plan {
            Ok(plan) => plans.push(plan),
            Err(e) => eprintln!("Error reading plan: {}", e),
        }
    }
    Ok(InMemoryPlanCatalog::with_plans(plans))
}

async fn replay(
    engine: &SettlementEngine,
    plan_types: &HashMap<PlanId, PlanType>,
    command: SettlementCommand,
) -> wallet_ledger::error::Result<()> {
    match command {
        SettlementCommand::Checkout(checkout) => {
            // An unknown plan is flagged by the engine before the type is compared.
            let plan_type = plan_types
                .get(&checkout.plan_id)
                .copied()
                .unwrap_or(PlanType::WalletRecharge);
            let ack = engine.settle_event(checkout.into_event(plan_type)?).await?;
            if let WebhookOutcome::NeedsReconciliation { reason, .. } = ack.outcome {
                eprintln!("Checkout {} needs reconciliation: {}", ack.event_id, reason);
            }
        }
        SettlementCommand::Credit { user_id, request } => {
            engine.credit(&user_id, request).await?;
        }
        SettlementCommand::Debit { user_id, request } => {
            engine.debit(&user_id, request).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    let config =
        SettlementConfig::default().with_claim_lease(Duration::from_secs(cli.claim_lease_secs));
    let (transactions, wallets, claims) = open_stores(cli.db_path.as_deref())?;
    let catalog = load_plans(cli.plans.as_deref())?;

    let plan_types: HashMap<PlanId, PlanType> = catalog
        .all()
        .await
        .into_iter()
        .map(|plan| (plan.id, plan.plan_type))
        .collect();

    let engine = SettlementEngine::new(
        EngineParts {
            transactions,
            wallets,
            claims,
            plans: Box::new(catalog),
            // Replayed checkouts are trusted input; nothing arrives signed.
            verifier: None,
            sessions: Box::new(InMemoryCheckoutSessions::new()),
            subscriptions: Box::new(RecordingSubscriptionActivator::new()),
        },
        config,
    );

    // Process commands
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = replay(&engine, &plan_types, command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let wallets = engine.into_results().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    Ok(())
}
