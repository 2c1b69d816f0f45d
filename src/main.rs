use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mailsink::auth::InstalledFlowSupplier;
use mailsink::config::Config;
use mailsink::models::SyncReport;
use mailsink::store::MailStore;
use mailsink::sync::SyncEngine;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailsink", version, about = "Pull-based mailbox ingestion engine")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mailsink.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a principal (created on first authentication upstream;
    /// explicit here since the engine runs stand-alone)
    AddPrincipal {
        email: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// List registered principals and their checkpoints
    Principals,
    /// Synchronize one principal's mailbox
    Sync { email: String },
    /// Synchronize every registered principal
    SyncAll,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: mailsink --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs (better performance, FIPS support)
    // On Windows, use ring (better compatibility, no NASM/CMake required)
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailsink=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mailsink=info,warn,error"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(&cli.config).await?;
    let store = Arc::new(MailStore::open(&config.storage.database_path)?);

    match cli.command {
        Commands::AddPrincipal {
            email,
            display_name,
        } => {
            let principal = store.add_principal(&email, display_name.as_deref())?;
            println!("Registered principal {} (id {})", principal.email, principal.id);
        }

        Commands::Principals => {
            let principals = store.list_principals()?;
            if principals.is_empty() {
                println!("No principals registered. Use: mailsink add-principal <email>");
                return Ok(());
            }
            for principal in principals {
                let checkpoint = principal
                    .last_synced_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:>4}  {}  last synced: {}",
                    principal.id, principal.email, checkpoint
                );
            }
        }

        Commands::Sync { email } => {
            let principal = store
                .principal_by_email(&email)?
                .ok_or_else(|| anyhow::anyhow!("Principal {} is not registered", email))?;

            let supplier = Arc::new(InstalledFlowSupplier::from_config(&config));
            let engine = SyncEngine::new(supplier, Arc::clone(&store), config.sync.clone());

            let spinner = sync_spinner(&format!("Syncing {}", email));
            let result = engine.run_sync(principal.id).await;
            spinner.finish_and_clear();

            match result {
                Ok(report) => print_report(&email, &report),
                Err(e) => {
                    if e.requires_reauth() {
                        eprintln!("Reauthentication required for {}: {}", email, e);
                    }
                    return Err(e.into());
                }
            }
        }

        Commands::SyncAll => {
            let supplier = Arc::new(InstalledFlowSupplier::from_config(&config));
            let engine = SyncEngine::new(supplier, Arc::clone(&store), config.sync.clone());

            let spinner = sync_spinner("Syncing all principals");
            let results = engine.run_sync_all().await?;
            spinner.finish_and_clear();

            let mut failures = 0;
            for (principal, result) in results {
                match result {
                    Ok(report) => print_report(&principal.email, &report),
                    Err(e) => {
                        failures += 1;
                        if e.requires_reauth() {
                            eprintln!(
                                "{}: reauthentication required ({})",
                                principal.email, e
                            );
                        } else {
                            eprintln!("{}: sync failed ({})", principal.email, e);
                        }
                    }
                }
            }

            if failures > 0 {
                return Err(anyhow::anyhow!("{} principal(s) failed to sync", failures));
            }
        }
    }

    Ok(())
}

fn sync_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn print_report(email: &str, report: &SyncReport) {
    println!(
        "{}: {} synced, {} failed ({} total) since {}",
        email,
        report.success_count,
        report.error_count,
        report.total_count,
        report.window_start.format("%Y-%m-%d %H:%M:%S")
    );
}
