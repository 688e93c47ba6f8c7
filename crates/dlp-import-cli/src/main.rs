//! dlp-import CLI - database to warehouse import with column de-identification.

use clap::{Parser, Subcommand};
use dlp_import::error::EXIT_CANCELLED;
use dlp_import::{Config, MigrateError, MigrationResult, Orchestrator, TablePlan};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dlp-import")]
#[command(about = "Import database tables into a warehouse dataset with de-identified columns")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the import
    Run {
        /// Override destination dataset
        #[arg(long)]
        dataset: Option<String>,

        /// Override number of tables processed concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Override rows per source page
        #[arg(long)]
        page_size: Option<usize>,

        /// Dry run: resolve tables and policy without transferring data
        #[arg(long)]
        dry_run: bool,
    },

    /// Show tables, row estimates and per-column strategies
    Plan,

    /// Validate row counts between source and target
    Validate,

    /// Test database connections and the de-identification service
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    // SIGINT and SIGTERM cancel the run
    let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;

    match cli.command {
        Commands::Run {
            dataset,
            workers,
            page_size,
            dry_run,
        } => {
            if let Some(dataset) = dataset {
                config.target.dataset = dataset;
            }
            if let Some(w) = workers {
                config.migration.workers = Some(w);
            }
            if let Some(p) = page_size {
                config.migration.page_size = Some(p);
            }
            config.validate()?;

            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(cancel_token, dry_run).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_result(&result, dry_run);
            }
            result.ensure_success()?;
        }

        Commands::Plan => {
            let orchestrator = Orchestrator::new(config).await?;
            let plan = orchestrator.plan().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Row count validation:");
                for r in &results {
                    let target = r
                        .target_rows
                        .map_or_else(|| "missing".to_string(), |n| n.to_string());
                    println!(
                        "  {} {}: source={} target={}",
                        if r.matches { "OK      " } else { "MISMATCH" },
                        r.table,
                        r.source_rows,
                        target
                    );
                }
            }

            let mismatched: Vec<&str> = results
                .iter()
                .filter(|r| !r.matches)
                .map(|r| r.table.as_str())
                .collect();
            if !mismatched.is_empty() {
                return Err(MigrateError::TablesFailed {
                    failed: mismatched.len(),
                    total: results.len(),
                    tables: mismatched.join(", "),
                });
            }
            if !cli.output_json {
                println!("Validation completed successfully");
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  De-identification ({}): {} ({}ms)",
                    result.dlp_service,
                    if result.dlp_connected { "OK" } else { "FAILED" },
                    result.dlp_latency_ms
                );
                if let Some(ref err) = result.dlp_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Policy document: {}",
                    if result.policy_loaded { "OK" } else { "FAILED" }
                );
                if let Some(ref err) = result.policy_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.target_kind,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn print_result(result: &MigrationResult, dry_run: bool) {
    if dry_run {
        println!("\nDry run completed!");
        print_plan(&result.plan);
        return;
    }

    println!("\nImport {}!", result.status.replace('_', " "));
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {}/{}",
        result.tables_completed, result.tables_total
    );
    println!(
        "  Rows: {} written, {} read, {} failed",
        result.rows_written, result.rows_read, result.rows_failed
    );
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    println!(
        "  Token cache: {} entries, {} hits",
        result.token_cache.entries, result.token_cache.hits
    );
    for report in &result.tables {
        if let Some(ref err) = report.error {
            println!("  {} ({:?}): {}", report.table, report.status, err);
        }
    }
    let failed = result.failed_tables();
    if !failed.is_empty() {
        println!("  Failed tables: {:?}", failed);
    }
}

fn print_plan(plan: &[TablePlan]) {
    for table in plan {
        println!(
            "{} <- {} (~{} rows)",
            table.table, table.source, table.estimated_rows
        );
        if let Some(ref err) = table.error {
            println!("  ERROR: {}", err);
            continue;
        }
        for col in &table.columns {
            println!(
                "  {:<24} -> {:<24} {:<10} {}",
                col.source, col.target, col.target_type, col.strategy
            );
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        "trace" => "trace",
        _ => "info",
    };

    // RUST_LOG takes precedence over --verbosity
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().try_init().map_err(|e| e.to_string())
    } else {
        subscriber.try_init().map_err(|e| e.to_string())
    }
}

/// Force the process down if in-flight tables do not stop within the timeout.
fn spawn_shutdown_deadline(shutdown_timeout: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        eprintln!(
            "Shutdown did not finish within {}s, exiting",
            shutdown_timeout
        );
        std::process::exit(i32::from(EXIT_CANCELLED));
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (orchestrator shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
        spawn_shutdown_deadline(shutdown_timeout);
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
            spawn_shutdown_deadline(shutdown_timeout);
        }
    });

    Ok(cancel_token)
}
