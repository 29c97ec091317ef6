use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use metrond::agent::Agent;
use metrond::config::{Config, Percentile};

/// StatsD-compatible metrics aggregation daemon.
#[derive(Parser)]
#[command(name = "metrond", about)]
struct Cli {
    /// Path to a YAML configuration file; replaces the other flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// UDP service address.
    #[arg(long, default_value = "0.0.0.0:8125")]
    address: String,

    /// TCP service address, if set.
    #[arg(long = "tcpaddr", default_value = "")]
    tcp_address: String,

    /// Graphite service address, or "-" to disable sending.
    #[arg(long, default_value = "127.0.0.1:2003")]
    graphite: String,

    /// Flush interval in seconds.
    #[arg(long, default_value_t = 10)]
    flush_interval: u64,

    /// Maximum UDP packet size in bytes.
    #[arg(long, default_value_t = 1472)]
    max_udp_packet_size: usize,

    /// Drop gauges after emission instead of re-sending the previous value.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    delete_gauges: bool,

    /// Number of flush intervals to persist drained count keys at zero.
    #[arg(long, default_value_t = 60)]
    persist_count_keys: u32,

    /// Number of flush intervals to persist drained timer count keys at zero.
    #[arg(long, default_value_t = 0)]
    persist_timer_counts: u32,

    /// Metric name for total observations received per interval.
    #[arg(long, default_value = "")]
    receive_counter: String,

    /// Prefix for all stats.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Postfix for all stats.
    #[arg(long, default_value = "")]
    postfix: String,

    /// Percentile for timers (signed, may be given multiple times).
    #[arg(long = "percent-threshold", allow_hyphen_values = true)]
    percent_threshold: Vec<Percentile>,

    /// Log every line sent to graphite.
    #[arg(long)]
    debug: bool,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or the environment.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            target_os(),
            target_arch(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("metrond {}", version::full());
        return Ok(());
    }

    // Initialize tracing; --debug wins over --log-level so flush dumps are
    // always visible when requested.
    let directive = if cli.debug {
        "debug".to_string()
    } else {
        cli.log_level.clone()
    };
    let filter =
        EnvFilter::try_new(&directive).with_context(|| format!("invalid log level: {directive}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = if let Some(path) = &cli.config {
        Config::load(path).with_context(|| format!("loading config from {}", path.display()))?
    } else {
        Config {
            address: cli.address,
            tcp_address: cli.tcp_address,
            graphite: cli.graphite,
            flush_interval: Duration::from_secs(cli.flush_interval),
            max_udp_packet_size: cli.max_udp_packet_size,
            delete_gauges: cli.delete_gauges,
            persist_count_keys: cli.persist_count_keys,
            persist_timer_counts: cli.persist_timer_counts,
            receive_counter: cli.receive_counter,
            prefix: cli.prefix,
            postfix: cli.postfix,
            percentiles: cli.percent_threshold,
            debug: cli.debug,
        }
        .finalize()?
    };

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting metrond",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    // Start the agent.
    let mut agent = Agent::new(cfg);
    agent.start().await?;

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown with a final flush.
    agent.stop().await?;

    tracing::info!("metrond stopped");

    Ok(())
}
