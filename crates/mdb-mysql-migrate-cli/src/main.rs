//! mdb-mysql-migrate CLI - batch migration of Access databases into MySQL.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mdb_mysql_migrate::{
    Config, MigrateError, Orchestrator, RunConfig, RunSummary, SourceConfig, TargetConfig,
};

#[derive(Parser)]
#[command(name = "mdb-mysql-migrate")]
#[command(about = "Migrate Microsoft Access databases (.mdb/.accdb) into MySQL")]
#[command(version)]
struct Cli {
    /// Directory scanned recursively for Access files
    #[arg(value_name = "SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// YAML configuration file; explicit flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MySQL server host
    #[arg(long)]
    host: Option<String>,

    /// MySQL server port
    #[arg(long)]
    port: Option<u16>,

    /// MySQL user
    #[arg(short, long)]
    user: Option<String>,

    /// MySQL password (prefer MYSQL_PWD over the command line)
    #[arg(short, long, env = "MYSQL_PWD", hide_env_values = true)]
    password: Option<String>,

    /// Directory for reports and the event log
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Seconds between progress lines
    #[arg(long)]
    progress_interval: Option<u64>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    /// Print the run summary as JSON to stdout
    #[arg(long)]
    output_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = resolve_config(&cli)?;
    info!(
        root = %config.source.root_dir.display(),
        target = %format!("{}:{}", config.target.host, config.target.port),
        "configuration resolved"
    );

    let cancel = spawn_signal_handler()?;

    let orchestrator = Orchestrator::new(config);
    let summary = orchestrator.run(cancel).await?;

    if cli.output_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(ExitCode::from(summary.exit_code()))
}

/// Merge the optional config file with command-line overrides.
fn resolve_config(cli: &Cli) -> Result<Config, MigrateError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config {
            source: SourceConfig::default(),
            target: TargetConfig::default(),
            run: RunConfig::default(),
        },
    };

    if let Some(dir) = &cli.source_dir {
        config.source.root_dir = dir.clone();
    }
    if let Some(host) = &cli.host {
        config.target.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.target.port = port;
    }
    if let Some(user) = &cli.user {
        config.target.user = user.clone();
    }
    if let Some(password) = &cli.password {
        config.target.password = password.clone();
    }
    if let Some(dir) = &cli.log_dir {
        config.run.log_dir = dir.clone();
    }
    if let Some(secs) = cli.progress_interval {
        config.run.progress_interval_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    println!("\nMigration finished");
    println!("  Run ID: {}", summary.run_id);
    println!("  Duration: {}s", summary.duration_secs);
    println!(
        "  Databases: {}/{} completed, {} locked, {} failed",
        summary.databases_completed,
        summary.databases_total,
        summary.databases_locked,
        summary.databases_failed
    );
    println!(
        "  Tables: {} completed, {} skipped, {} failed (of {})",
        summary.tables_completed, summary.tables_skipped, summary.tables_failed, summary.tables_total
    );
    println!(
        "  Rows: {} loaded, {} skipped",
        summary.rows_loaded, summary.rows_skipped
    );
    if let Some(path) = &summary.report_path {
        println!("  Report: {}", path.display());
    }
    if let Some(path) = &summary.summary_path {
        println!("  Summary: {}", path.display());
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let default_directive = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    // RUST_LOG wins over the flag when set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // logs to stderr; stdout carries only the summary
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on SIGINT or SIGTERM. The orchestrator finishes the
/// table in flight, writes its report and exits with a partial tally.
#[cfg(unix)]
fn spawn_signal_handler() -> Result<CancellationToken, MigrateError> {
    use tokio::signal::unix::{signal, SignalKind};

    let cancel = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                eprintln!("\nReceived SIGINT; finishing the current table, then stopping...");
            }
            _ = sigterm.recv() => {
                eprintln!("\nReceived SIGTERM; finishing the current table, then stopping...");
            }
        }
        token.cancel();
    });
    Ok(cancel)
}

#[cfg(not(unix))]
fn spawn_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C; finishing the current table, then stopping...");
            token.cancel();
        }
    });
    Ok(cancel)
}
