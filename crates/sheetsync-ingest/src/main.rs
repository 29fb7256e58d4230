//! SheetSync - remote spreadsheet ingestion

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sheetsync_common::logging::{init_logging, LogConfig, LogLevel};
use sheetsync_ingest::config::IngestConfig;
use sheetsync_ingest::directory::MemoryDirectory;
use sheetsync_ingest::orchestrator::{IngestOrchestrator, ProfileReport};
use sheetsync_ingest::registry::FileTypeRegistry;
use sheetsync_ingest::store::{IngestStore, JsonStore};
use sheetsync_ingest::transport::NetworkConnector;
use sheetsync_ingest::workspace::WorkspaceFile;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "sheetsync")]
#[command(author, version, about = "Remote spreadsheet ingestion to sales orders")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import connection profiles and file types from a TOML file
    Seed {
        file: PathBuf,
    },

    /// Run one ingestion cycle
    Run {
        /// Only this profile, even when inactive
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Open and close a session, recording the result on the profile
    TestConnection {
        #[arg(short, long)]
        profile: String,
    },

    /// Map a stored file record to orders
    Transform {
        record_id: Uuid,
    },

    /// Show which file type a file name (and headers) resolves to
    Identify {
        filename: String,

        /// Header of the first row, repeatable
        #[arg(long = "header")]
        headers: Vec<String>,
    },

    /// List stored file records
    Records {
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Run cycles for profiles whose poll interval has elapsed, until interrupted
    Watch {
        /// Seconds between due checks
        #[arg(long, default_value_t = 60)]
        tick_secs: u64,
    },
}

struct App {
    config: IngestConfig,
    store: Arc<JsonStore>,
    directory: Arc<MemoryDirectory>,
    orchestrator: Arc<IngestOrchestrator>,
}

impl App {
    fn open(config: IngestConfig) -> Result<Self> {
        let store = Arc::new(
            JsonStore::open(&config.state_file)
                .with_context(|| format!("Failed to open state file {}", config.state_file.display()))?,
        );
        let directory = Arc::new(
            MemoryDirectory::load(&config.directory_file)
                .with_context(|| format!("Failed to load directory file {}", config.directory_file.display()))?,
        );
        let connector = Arc::new(NetworkConnector::new(config.connect_timeout()));
        let orchestrator = Arc::new(IngestOrchestrator::new(
            store.clone(),
            connector,
            directory.clone(),
            config.orchestrator_settings(),
        ));
        Ok(Self {
            config,
            store,
            directory,
            orchestrator,
        })
    }

    /// Write created partners and orders back to the directory file
    fn save_directory(&self) -> Result<()> {
        self.directory
            .save(&self.config.directory_file)
            .with_context(|| format!("Failed to save directory file {}", self.config.directory_file.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sheetsync")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config)?;

    let config = IngestConfig::from_env()?;
    let app = App::open(config)?;

    if let Err(e) = execute(&app, cli.command).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn execute(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Seed { file } => {
            let workspace = WorkspaceFile::load(&file)
                .with_context(|| format!("Failed to read workspace file {}", file.display()))?;
            let report = workspace.apply(app.store.as_ref())?;
            println!(
                "Seeded {} profile(s) and {} file type(s)",
                report.profiles.len(),
                report.file_types.len()
            );
            for (name, reason) in &report.rejected {
                println!("  rejected {}: {}", name, reason);
            }
        },

        Command::Run { profile } => {
            let orchestrator = app.orchestrator.clone();
            let reports = tokio::task::spawn_blocking(move || match profile {
                Some(name) => orchestrator.run_profile_by_name(&name).map(|r| vec![r]),
                None => orchestrator.run_cycle(),
            })
            .await??;
            app.save_directory()?;
            print_reports(&reports);
        },

        Command::TestConnection { profile } => {
            let orchestrator = app.orchestrator.clone();
            let test = tokio::task::spawn_blocking(move || orchestrator.test_connection(&profile)).await??;
            if test.success {
                println!("OK: {}", test.message);
            } else {
                anyhow::bail!("Connection failed: {}", test.message);
            }
        },

        Command::Transform { record_id } => {
            let result = app.orchestrator.transform(record_id)?;
            app.save_directory()?;
            println!("{}", result.summary());
            if let Some(detail) = result.error_detail() {
                println!("{}", detail);
            }
        },

        Command::Identify { filename, headers } => {
            let registry = FileTypeRegistry::new(app.store.file_types()?);
            let headers = (!headers.is_empty()).then_some(headers);
            match registry.identify(&filename, headers.as_deref()) {
                Some(descriptor) => println!(
                    "{} (code '{}', {} column(s), {})",
                    descriptor.name,
                    descriptor.code,
                    descriptor.columns.len(),
                    if descriptor.create_per_group { "one order per group" } else { "one order per row" }
                ),
                None => println!("unmapped: columns will be auto-detected"),
            }
        },

        Command::Records { profile } => {
            let profile_id = match profile {
                Some(name) => Some(app.store.profile_by_name(&name)?.id),
                None => None,
            };
            let records = app.store.records(profile_id)?;
            if records.is_empty() {
                println!("No records");
            }
            for record in records {
                println!(
                    "{}  {:<9}  {:>5} rows  {:>3} orders  {}  {}",
                    record.id,
                    record.status.to_string(),
                    record.row_count,
                    record.orders_created,
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.filename
                );
            }
        },

        Command::Watch { tick_secs } => watch(app, Duration::from_secs(tick_secs.max(1))).await?,
    }
    Ok(())
}

/// Poll for due profiles until Ctrl-C; cycles never overlap
async fn watch(app: &App, tick: Duration) -> Result<()> {
    info!(tick_secs = tick.as_secs(), "Watching for due profiles");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let orchestrator = app.orchestrator.clone();
                match tokio::task::spawn_blocking(move || orchestrator.run_due(Utc::now())).await? {
                    Ok(reports) if !reports.is_empty() => {
                        app.save_directory()?;
                        print_reports(&reports);
                    },
                    Ok(_) => {},
                    Err(e) => error!(error = %e, "Scheduled cycle failed"),
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                return Ok(());
            },
        }
    }
}

fn print_reports(reports: &[ProfileReport]) {
    if reports.is_empty() {
        println!("No active profiles");
    }
    for report in reports {
        println!("{}", report.summary());
        for file in &report.files {
            match &file.message {
                Some(message) => println!("  {} -> {} ({})", file.filename, file.status, message),
                None => println!("  {} -> {}", file.filename, file.status),
            }
        }
    }
}
