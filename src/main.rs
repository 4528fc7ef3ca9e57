//! stockscan: batch stock scanner.
//!
//! Entry point. Loads `.env` and configuration, initialises structured
//! logging, then either runs a one-shot scan from the command line or
//! serves the JSON API.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use stockscan::config::AppConfig;
use stockscan::dashboard::{self, DashboardState, ScanDefaults};
use stockscan::data::cache::CachedProvider;
use stockscan::data::yahoo::YahooChartClient;
use stockscan::data::PriceDataProvider;
use stockscan::engine::{RowStatus, ScanOrchestrator, ScanReport, ScanRequest};
use stockscan::export;
use stockscan::license::{self, gumroad::GumroadVerifier, SessionContext};
use stockscan::scoring::ScoringStrategy;
use stockscan::storage;
use stockscan::types::{AnalysisMode, Timeframe};

const LICENSE_KEY_ENV: &str = "STOCKSCAN_LICENSE_KEY";

#[derive(Parser)]
#[command(name = "stockscan")]
#[command(about = "Scan a batch of tickers for momentum, moving averages, volatility and rank them", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan tickers and print the results
    Scan {
        /// Comma-separated tickers, e.g. AAPL,TSLA,NVDA
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// momentum, moving_averages, volatility, fundamentals
        #[arg(long)]
        mode: Option<String>,
        /// 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y
        #[arg(long)]
        timeframe: Option<String>,
        /// Rank with this strategy: composite or breakout
        #[arg(long)]
        score: Option<String>,
        /// Write the ranked table as CSV to this path
        #[arg(long)]
        export: Option<String>,
        /// License key (falls back to STOCKSCAN_LICENSE_KEY)
        #[arg(long)]
        license_key: Option<String>,
    },
    /// Serve the JSON API
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show today's saved usage
    Session {
        /// Forget the saved usage counter
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    let cfg = if Path::new(&cli.config).exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };
    init_logging();
    cfg.validate()?;
    info!(config = %cli.config, "Configuration loaded");

    match cli.command {
        Commands::Scan {
            symbols,
            mode,
            timeframe,
            score,
            export: export_path,
            license_key,
        } => {
            let mode = match mode {
                Some(m) => m.parse::<AnalysisMode>()?,
                None => cfg.scanner.default_mode,
            };
            let timeframe = match timeframe {
                Some(t) => t.parse::<Timeframe>()?,
                None => cfg.scanner.default_timeframe,
            };
            let mut request = ScanRequest::new(symbols.as_slice(), timeframe, mode);
            if request.symbols.is_empty() {
                bail!("Please enter at least one ticker.");
            }
            // Exporting needs a ranking, so fall back to the configured strategy.
            let strategy = match score {
                Some(s) => Some(s.parse::<ScoringStrategy>()?),
                None if export_path.is_some() => Some(cfg.scoring.strategy),
                None => None,
            };
            if let Some(strategy) = strategy {
                request = request.with_scoring(strategy);
            }

            let key = license_key.or_else(|| std::env::var(LICENSE_KEY_ENV).ok());
            run_scan(&cfg, request, key, export_path.as_deref()).await
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(cfg.dashboard.port);
            run_server(&cfg, port).await
        }
        Commands::Session { reset } => {
            let path = cfg.quota.state_file.as_str();
            if reset {
                storage::delete_session(Some(path))?;
                println!("Session reset.");
            } else {
                let session = storage::load_or_new(Some(path), cfg.quota.max_uses_per_day)?;
                match session.remaining() {
                    Some(left) => println!(
                        "{}: {} / {} scans used, {left} left",
                        session.day_stamp, session.uses_today, session.max_uses_per_day
                    ),
                    None => println!("{}: {} scans used (unlimited)", session.day_stamp, session.uses_today),
                }
            }
            Ok(())
        }
    }
}

/// Yahoo client, wrapped in the TTL cache unless disabled.
fn build_provider(cfg: &AppConfig) -> Result<Arc<dyn PriceDataProvider>> {
    let yahoo = YahooChartClient::new(
        Some(&cfg.provider.base_url),
        cfg.provider.timeout_secs,
        cfg.provider.user_agent.as_deref(),
    )?;

    if cfg.scanner.cache_ttl_secs == 0 {
        Ok(Arc::new(yahoo))
    } else {
        Ok(Arc::new(CachedProvider::new(yahoo, cfg.scanner.cache_ttl_secs)))
    }
}

async fn run_scan(
    cfg: &AppConfig,
    request: ScanRequest,
    license_key: Option<String>,
    export_path: Option<&str>,
) -> Result<()> {
    let state_file = cfg.quota.state_file.as_str();
    let mut session = storage::load_or_new(Some(state_file), cfg.quota.max_uses_per_day)?;

    // Only the usage counter is saved, so every run verifies the key again.
    let verifier = GumroadVerifier::new(cfg.gumroad_settings())?;
    let key = SecretString::new(license_key.unwrap_or_default());
    let verdict = license::unlock(&mut session, &verifier, &key).await?;
    if verdict.dev_mode {
        warn!("No license product configured, running in dev mode");
    }

    let orchestrator = ScanOrchestrator::new(build_provider(cfg)?, cfg.scanner_settings());
    let report = orchestrator.scan(&request, &session).await?;

    session.record_use();
    storage::save_session(&session, Some(state_file))?;

    print_report(&report, &session);

    if let Some(path) = export_path {
        match &report.ranking {
            Some(table) => export::save(table, path, ',')?,
            None => warn!(path, "Nothing to export: scan produced no ranking"),
        }
    }
    Ok(())
}

async fn run_server(cfg: &AppConfig, port: u16) -> Result<()> {
    let sessions = storage::load_sessions(Some(&cfg.dashboard.session_file), cfg.quota.max_uses_per_day)?;
    let verifier = GumroadVerifier::new(cfg.gumroad_settings())?;
    let orchestrator = ScanOrchestrator::new(build_provider(cfg)?, cfg.scanner_settings());
    let defaults = ScanDefaults {
        timeframe: cfg.scanner.default_timeframe,
        mode: cfg.scanner.default_mode,
        strategy: cfg.scoring.strategy,
    };

    info!(
        restored_sessions = sessions.len(),
        max_uses_per_day = cfg.quota.max_uses_per_day,
        "Starting API server"
    );
    let state = Arc::new(
        DashboardState::new(orchestrator, Arc::new(verifier), cfg.quota.max_uses_per_day, defaults)
            .with_sessions(sessions)
            .with_session_file(cfg.dashboard.session_file.clone()),
    );

    tokio::select! {
        result = dashboard::serve(state, port) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }
    Ok(())
}

fn print_report(report: &ScanReport, session: &SessionContext) {
    println!(
        "\n{} | {} | {} symbols ({} failed)\n",
        report.mode,
        report.timeframe,
        report.rows.len(),
        report.failed_count()
    );

    match &report.ranking {
        Some(table) => {
            let header: Vec<&str> = table.columns.iter().map(String::as_str).collect();
            println!("{:>4}  {:<8} {:>10}  {}", "#", "SYMBOL", "SCORE", header.join("  "));
            for (i, row) in table.rows.iter().enumerate() {
                let values: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| row.fields.get(c).map(|v| v.to_string()).unwrap_or_default())
                    .collect();
                println!(
                    "{:>4}  {:<8} {:>10}  {}",
                    i + 1,
                    row.symbol,
                    row.score.to_string(),
                    values.join("  ")
                );
            }
        }
        None => {
            for row in &report.rows {
                let values: Vec<String> = row
                    .metrics
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                println!("{:<8} {:<14} {}", row.symbol, status_label(&row.status), values.join("  "));
            }
        }
    }

    println!("\nSession: {session}");
}

fn status_label(status: &RowStatus) -> String {
    match status {
        RowStatus::Ok => "ok".to_string(),
        RowStatus::NoData => "no data".to_string(),
        RowStatus::ProviderError(msg) => format!("error: {msg}"),
        RowStatus::TimedOut => "timed out".to_string(),
    }
}

/// Initialise the tracing subscriber.
///
/// Uses `RUST_LOG` env var for filtering (default: `stockscan=info`).
/// JSON output when `STOCKSCAN_LOG_JSON` is set.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stockscan=info"));

    let json_logging = std::env::var("STOCKSCAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
