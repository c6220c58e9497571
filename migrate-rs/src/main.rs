use anyhow::Context;
use clap::{Parser, Subcommand};
use migrate_rs::config::Config;
use migrate_rs::credentials::CredentialVault;
use migrate_rs::engine::{MigrationEngine, MigrationPlan};
use migrate_rs::events::EventKind;
use migrate_rs::store::{MigrationMode, ProgressStore};
use migrate_rs::transport::ImapTransport;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "migrate-rs", about = "IMAP mailbox migration engine")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a job from a plan file and run it
    Run {
        /// Path to the migration plan (TOML)
        plan: PathBuf,
    },
    /// Discover and count messages without copying anything
    DryRun {
        /// Path to the migration plan (TOML)
        plan: PathBuf,
    },
    /// Print the durable state of a job
    Status {
        /// Job ID
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    };

    // Initialize logging
    let level = Level::from_str(&config.logging.level).unwrap_or(Level::INFO);
    if config.logging.format == "json" {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }

    info!("Database: {}", config.storage.database_url);

    // Initialize storage
    let options = SqliteConnectOptions::from_str(&config.storage.database_url)?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = ProgressStore::new(pool);
    store.init_db().await?;

    let engine = Arc::new(MigrationEngine::new(
        store.clone(),
        migrate_rs::events::EventBus::new(),
        CredentialVault::new(),
        Arc::new(ImapTransport::new()),
        config.engine.default_batch_size,
    ));

    match cli.command {
        Command::Run { plan } => run_plan(&engine, &plan, None).await?,
        Command::DryRun { plan } => run_plan(&engine, &plan, Some(MigrationMode::DryRun)).await?,
        Command::Status { job_id } => print_status(&store, &job_id).await?,
    }

    Ok(())
}

async fn run_plan(
    engine: &Arc<MigrationEngine>,
    plan_path: &PathBuf,
    mode_override: Option<MigrationMode>,
) -> anyhow::Result<()> {
    let mut plan = MigrationPlan::from_file(plan_path)
        .with_context(|| format!("loading plan {}", plan_path.display()))?;
    if let Some(mode) = mode_override {
        plan.mode = mode;
    }

    let job = engine.create_job(&plan).await?;
    println!("Created job {}", job.id);

    let mut events = engine.events().subscribe(&job.id).await;
    let mut handle = engine.spawn_job(&job.id);

    loop {
        tokio::select! {
            event = events.recv() => {
                if let Ok(event) = event {
                    match event.kind {
                        EventKind::JobStatus => println!(
                            "job    {} {}/{} moved, {} errors",
                            event.payload["status"].as_str().unwrap_or("?"),
                            event.payload["moved_messages"],
                            event.payload["total_messages"],
                            event.payload["error_count"],
                        ),
                        EventKind::AccountStatus => println!(
                            "  row {} {} {}/{}",
                            event.payload["row_index"],
                            event.payload["status"].as_str().unwrap_or("?"),
                            event.payload["moved_messages"],
                            event.payload["total_messages"],
                        ),
                        EventKind::FolderStatus => println!(
                            "    {} {} {}/{}",
                            event.payload["source_path"].as_str().unwrap_or("?"),
                            event.payload["status"].as_str().unwrap_or("?"),
                            event.payload["moved_messages"],
                            event.payload["total_messages"],
                        ),
                        EventKind::Log => println!(
                            "    [{}] {}",
                            event.payload["level"].as_str().unwrap_or("info"),
                            event.payload["message"].as_str().unwrap_or(""),
                        ),
                    }
                }
            }
            result = &mut handle => {
                result??;
                break;
            }
        }
    }

    Ok(())
}

async fn print_status(store: &ProgressStore, job_id: &str) -> anyhow::Result<()> {
    let job = store
        .get_job(job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {job_id} not found"))?;

    println!(
        "Job {} [{}] {}: {}/{} moved, {} errors",
        job.id, job.mode, job.status, job.moved_messages, job.total_messages, job.error_count
    );

    for account in store.get_accounts_by_job(job_id).await? {
        println!(
            "  row {} {} -> {} [{}] {}/{}{}",
            account.row_index,
            account.source.username,
            account.destination.username,
            account.status,
            account.moved_messages,
            account.total_messages,
            account
                .last_error
                .map(|e| format!(" ({e})"))
                .unwrap_or_default(),
        );

        for folder in store
            .get_folders_by_account(job_id, account.row_index)
            .await?
        {
            println!(
                "    {} [{}] {}/{} (cursor {})",
                folder.source_path,
                folder.status,
                folder.moved_messages,
                folder.total_messages,
                folder.last_uid,
            );
        }
    }

    Ok(())
}
