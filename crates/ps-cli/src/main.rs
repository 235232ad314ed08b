//! CLI entry point for the passive-scan tool.
//!
//! This binary replays captured HTTP traffic through the passive scan
//! pipeline and reports what the analysis model found.
//!
//! # Usage
//!
//! ```bash
//! passive-scan [OPTIONS] <COMMAND>
//!
//! # Replay a browser HAR export and show a summary
//! passive-scan replay capture.har
//!
//! # Write a CSV report of medium-and-above findings
//! passive-scan replay capture.har --format csv --min-risk medium -o findings.csv
//!
//! # Analyse one request directly
//! passive-scan analyze "https://shop.test/search?q=1" -H "Cookie: sid=abc"
//!
//! # Show the effective configuration
//! passive-scan --threads 8 config
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod har;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{WrapErr, bail, eyre};
use ps_analysis::{AnalysisClient, AnalysisError, OpenAiClient, PromptBuilder, ScriptedClient};
use ps_core::{
    API_KEY_ENV, Config, Exchange, HttpRequest, RiskLevel, ScanConfig, ScanResult, ScanStatus,
};
use ps_scanner::{MemoryTrafficSource, ScanManager, ScanReport};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Reply used in place of the model when `--dry-run` is set.
const DRY_RUN_REPLY: &str = "Dry run: exchange was not sent for analysis.\nRisk level: none";

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Passive vulnerability scanner for captured HTTP traffic.
///
/// Each captured exchange is filtered, deduplicated and sent to an
/// OpenAI-compatible model, whose answer is classified into a risk level.
#[derive(Parser)]
#[command(name = "passive-scan", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file. Missing sections use defaults.
    #[arg(short, long, global = true, env = "PASSIVE_SCAN_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// API key for the analysis endpoint.
    #[arg(long, global = true, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Model name sent with every request.
    #[arg(long, global = true, env = "PASSIVE_SCAN_MODEL")]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[arg(long, global = true, env = "PASSIVE_SCAN_BASE_URL")]
    base_url: Option<String>,

    /// Worker pool size. Values outside 1..=10 are clamped.
    #[arg(short = 't', long, global = true, allow_negative_numbers = true)]
    threads: Option<i64>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Replay a HAR capture through the scan pipeline.
    Replay {
        /// HAR file exported from a browser or proxy.
        har: Utf8PathBuf,

        /// Classify a canned reply instead of calling the model.
        #[arg(long)]
        dry_run: bool,

        /// Print streamed analysis text to stderr as it arrives.
        #[arg(long)]
        stream: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Summary)]
        format: ReportFormat,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,

        /// Give up waiting for outstanding analyses after this many seconds.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// Only report findings at or above this risk level.
        #[arg(long, value_parser = parse_risk)]
        min_risk: Option<RiskLevel>,
    },

    /// Analyse a single request without queueing it.
    Analyze {
        /// Request URL.
        url: String,

        /// Request method.
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header in `Name: value` form. Repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body.
        #[arg(short, long)]
        data: Option<String>,

        /// Print the rendered prompt instead of calling the model.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration as JSON.
    Config,
}

/// Report output format.
#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    /// Human-readable summary.
    Summary,
    /// JSON format.
    Json,
    /// CSV format.
    Csv,
}

fn parse_risk(value: &str) -> Result<RiskLevel, String> {
    RiskLevel::parse_label(value).ok_or_else(|| {
        format!("unknown risk level '{value}' (expected none, info, low, medium, high or critical)")
    })
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// Noisy HTTP crates are filtered to `warn` level.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the optional config file and CLI overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the result is invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .wrap_err_with(|| format!("failed to load configuration from {path}"))?,
        None => Config::default(),
    };

    if let Some(key) = &cli.api_key {
        config.api.api_key = Some(key.clone());
    }
    if let Some(model) = &cli.model {
        config.api.model.clone_from(model);
    }
    if let Some(base_url) = &cli.base_url {
        config.api.base_url.clone_from(base_url);
    }
    if let Some(threads) = cli.threads {
        config.scan.thread_count = ScanConfig::clamp_thread_count(threads);
    }

    config.validate()?;
    Ok(config)
}

/// Creates the analysis client, or `None` when no API key is available.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
fn build_client(config: &Config) -> color_eyre::Result<Option<Arc<dyn AnalysisClient>>> {
    match OpenAiClient::from_config(&config.api) {
        Ok(client) => Ok(Some(Arc::new(client))),
        Err(AnalysisError::NotConfigured(message)) => {
            warn!(%message, "Analysis client not configured");
            Ok(None)
        }
        Err(e) => Err(eyre!("Failed to create analysis client: {e}")),
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Options of the `replay` command.
struct ReplayOptions {
    har: Utf8PathBuf,
    dry_run: bool,
    stream: bool,
    format: ReportFormat,
    output: Option<Utf8PathBuf>,
    timeout: Duration,
    min_risk: Option<RiskLevel>,
}

/// Replays a HAR capture and writes the resulting report.
///
/// # Errors
///
/// Returns an error if the capture cannot be loaded, no client is
/// available, or the report cannot be written.
async fn run_replay(mut config: Config, opts: ReplayOptions) -> color_eyre::Result<()> {
    let exchanges = har::load(&opts.har)?;
    info!(path = %opts.har, entries = exchanges.len(), "Loaded capture");

    // Replay publishes the whole capture at once; the queue must hold it.
    config.scan.queue_capacity = config.scan.queue_capacity.max(exchanges.len());

    let client: Arc<dyn AnalysisClient> = if opts.dry_run {
        Arc::new(ScriptedClient::new(DRY_RUN_REPLY).with_model("dry-run"))
    } else {
        build_client(&config)?.ok_or_else(|| {
            eyre!("no API key available; set {API_KEY_ENV} or pass --api-key, or use --dry-run")
        })?
    };

    let source = Arc::new(MemoryTrafficSource::new());
    let manager = ScanManager::new(
        &config,
        Arc::clone(&source) as _,
        tokio::runtime::Handle::current(),
    )?;
    manager.set_api_client(Some(client));

    if opts.stream {
        manager.on_streaming_chunk(|id, chunk| {
            let stderr = std::io::stderr();
            let mut handle = stderr.lock();
            let _ = write!(handle, "[{id}] {chunk}");
        });
    }
    manager.on_result_updated(|result| {
        if result.status() == ScanStatus::Error {
            warn!(
                url = result.url(),
                error = result.error_message().unwrap_or_default(),
                "Analysis failed"
            );
        } else {
            info!(url = result.short_url(), risk = result.risk_level().label(), "Analysed");
        }
    });

    manager.start();
    let mut delivered = 0_usize;
    for exchange in exchanges {
        delivered += source.publish(exchange);
    }
    let stats = manager.stats();
    info!(
        delivered,
        queued = stats.total,
        skipped = delivered.saturating_sub(usize::try_from(stats.total).unwrap_or(usize::MAX)),
        "Capture replayed"
    );

    tokio::select! {
        idle = manager.wait_idle(opts.timeout) => {
            if !idle {
                warn!(timeout_secs = opts.timeout.as_secs(), "Timed out waiting for analyses");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, cancelling outstanding analyses");
        }
    }
    manager.shutdown().await;

    let report = manager.snapshot();
    let content = match opts.format {
        ReportFormat::Summary => render_summary(&report, opts.min_risk.unwrap_or(RiskLevel::Low)),
        ReportFormat::Json => {
            let mut report = report;
            if let Some(min) = opts.min_risk {
                report.results.retain(|r| r.risk_level() >= min);
            }
            let mut json = serde_json::to_string_pretty(&report)?;
            json.push('\n');
            json
        }
        ReportFormat::Csv => {
            let mut report = report;
            if let Some(min) = opts.min_risk {
                report.results.retain(|r| r.risk_level() >= min);
            }
            report.to_csv()
        }
    };

    write_output(opts.output.as_ref(), &content)
}

/// Analyses one hand-built request.
///
/// # Errors
///
/// Returns an error if a header is malformed or the analysis fails.
async fn run_analyze(
    config: &Config,
    method: String,
    url: String,
    headers: &[String],
    data: Option<String>,
    dry_run: bool,
) -> color_eyre::Result<()> {
    let mut request = HttpRequest::new(method, url);
    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| eyre!("malformed header '{raw}' (expected 'Name: value')"))?;
        request = request.with_header(name.trim(), value.trim());
    }
    if let Some(body) = data {
        request = request.with_body(body);
    }
    let exchange = Exchange::new(request, None);

    if dry_run {
        let prompts = PromptBuilder::new(config.scan.body_budget_bytes);
        return write_output(None, &format!("{}\n", prompts.build(&exchange)));
    }

    let source = Arc::new(MemoryTrafficSource::new());
    let manager = ScanManager::new(config, source, tokio::runtime::Handle::current())?;
    manager.set_api_client(build_client(config)?);

    let text = manager.analyze_request(&exchange).await?;
    let level = config.risk.classify(&text);

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "Risk: {}", level.label())?;
    writeln!(handle)?;
    writeln!(handle, "{}", text.trim_end())?;
    Ok(())
}

/// Prints the effective configuration with the API key redacted.
///
/// # Errors
///
/// Returns an error if serialization fails.
fn run_config(config: &Config) -> color_eyre::Result<()> {
    let mut shown = config.clone();
    if shown.api.resolved_api_key().is_some() {
        shown.api.api_key = Some("<redacted>".to_owned());
    }
    let mut json = serde_json::to_string_pretty(&shown)?;
    json.push('\n');
    write_output(None, &json)
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Writes `content` to `output`, or to stdout when no file is given.
fn write_output(output: Option<&Utf8PathBuf>, content: &str) -> color_eyre::Result<()> {
    if let Some(path) = output {
        std::fs::write(path.as_std_path(), content)
            .wrap_err_with(|| format!("failed to write {path}"))?;
        info!(%path, "Report written");
    } else {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        write!(handle, "{content}")?;
    }
    Ok(())
}

/// Renders counters, per-risk counts and findings at or above `min`.
fn render_summary(report: &ScanReport, min: RiskLevel) -> String {
    use std::fmt::Write as _;

    let stats = &report.stats;
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(out, "Passive Scan Summary");
    let _ = writeln!(out, "====================");
    let _ = writeln!(out);
    let _ = writeln!(out, "Model:      {}", report.model.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "Threads:    {}", report.thread_count);
    let _ = writeln!(out, "Scanned:    {}", stats.total);
    let _ = writeln!(out, "Completed:  {}", stats.succeeded());
    let _ = writeln!(out, "Errors:     {}", stats.errors);
    let _ = writeln!(out, "Cancelled:  {}", stats.cancelled);
    let _ = writeln!(out, "Progress:   {:.0}%", stats.progress() * 100.0);
    let _ = writeln!(out);
    let _ = writeln!(out, "By risk level:");
    for level in RiskLevel::ALL.iter().rev() {
        let count = report.risk_counts.get(level).copied().unwrap_or(0);
        let _ = writeln!(out, "  {:<10} {count}", level.label());
    }

    let findings = report.findings(min);
    let _ = writeln!(out);
    if findings.is_empty() {
        let _ = writeln!(out, "No findings at {} or above.", min.label());
    } else {
        let _ = writeln!(out, "Findings ({}):", findings.len());
        for result in findings {
            let _ = writeln!(out, "  {}", finding_line(result));
        }
    }
    out
}

fn finding_line(result: &ScanResult) -> String {
    let summary = result
        .analysis_result()
        .and_then(|text| text.lines().map(str::trim).find(|line| !line.is_empty()))
        .unwrap_or_default();
    format!(
        "[{:<8}] {} {} - {summary}",
        result.risk_level().label(),
        result.method(),
        result.short_url()
    )
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.no_color);

    let config = build_config(&cli)?;

    match cli.command {
        Commands::Replay {
            har,
            dry_run,
            stream,
            format,
            output,
            timeout_secs,
            min_risk,
        } => {
            let opts = ReplayOptions {
                har,
                dry_run,
                stream,
                format,
                output,
                timeout: Duration::from_secs(timeout_secs),
                min_risk,
            };
            run_replay(config, opts).await?;
        }
        Commands::Analyze {
            url,
            method,
            headers,
            data,
            dry_run,
        } => {
            if url.trim().is_empty() {
                bail!("url must not be empty");
            }
            run_analyze(&config, method, url, &headers, data, dry_run).await?;
        }
        Commands::Config => run_config(&config)?,
    }

    Ok(())
}
