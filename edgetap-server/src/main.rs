// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  edgetap: edge request capture → delivery channel → bulk ingest
//
//  Roles:   gateway | ingest | api | dashboard | all-in-one
//  Config:  YAML file + EDGETAP_* env overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod components;

use clap::{Parser, Subcommand, ValueEnum};
use components::{
    DashboardView, open_channel, open_store, shutdown_future, warn_if_process_local,
};
use edgetap_core::EdgetapConfig;
use edgetap_dashboard::{StatusFilter, ViewFilter};
use edgetap_observability::MetricsCollector;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "edgetap", version, about = "edgetap: edge request telemetry pipeline")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/edgetap/edgetap.yaml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture-and-proxy gateway
    Gateway,
    /// Batch consumer writing to the log store
    Ingest,
    /// Cursor-paginated query service
    Api,
    /// Terminal dashboard polling the query service
    Dashboard {
        /// Status class to show in the row table: all, 2, 3, 4 or 5
        #[arg(long, default_value = "all")]
        status: StatusFilter,
        /// Case-insensitive path substring for the row table
        #[arg(long, default_value = "")]
        path: String,
        /// Rows to print per refresh
        #[arg(long, default_value_t = 20)]
        rows: usize,
        /// Older pages to load after the newest one
        #[arg(long, default_value_t = 0)]
        pages: usize,
        /// Render once and exit
        #[arg(long)]
        once: bool,
        /// Print one request in full and exit; searches the newest page
        /// plus `--pages` older ones
        #[arg(long, value_name = "REQUEST_ID")]
        detail: Option<String>,
    },
    /// Gateway, ingest workers and query service in one process (default)
    AllInOne,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "edgetap starting");

    #[cfg(unix)]
    raise_fd_limit();

    // ── Config ──
    if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
    } else {
        info!(path = %cli.config.display(), "No config file found, using defaults and EDGETAP_* env");
    }
    let config = EdgetapConfig::load(&cli.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("edgetap")
        .build()?;
    runtime.block_on(run(cli.command.unwrap_or(Command::AllInOne), config))
}

async fn run(command: Command, config: EdgetapConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, stopping...");
        let _ = shutdown_tx.send(true);
    });

    let metrics = Arc::new(MetricsCollector::new(
        config.observability.prometheus.enabled,
    )?);

    let mut handles = Vec::new();
    match command {
        Command::Gateway => {
            warn_if_process_local(&config, "gateway");
            let channel = open_channel(&config, &metrics).await?;
            handles.push(components::spawn_gateway(
                &config,
                channel.producer,
                metrics,
                shutdown_rx.clone(),
            )?);
        }
        Command::Ingest => {
            warn_if_process_local(&config, "ingest");
            let channel = open_channel(&config, &metrics).await?;
            let store = open_store(&config).await?;
            handles.extend(components::spawn_ingest(
                &config,
                channel.consumer,
                store,
                metrics,
                shutdown_rx.clone(),
            ));
        }
        Command::Api => {
            warn_if_process_local(&config, "api");
            let store = open_store(&config).await?;
            handles.push(components::spawn_api(
                &config,
                store,
                metrics,
                shutdown_rx.clone(),
            ));
        }
        Command::Dashboard {
            status,
            path,
            rows,
            pages,
            once,
            detail,
        } => {
            let view = DashboardView {
                filter: ViewFilter { status, path },
                rows,
                pages,
                once,
                detail,
            };
            return components::run_dashboard(&config, view, shutdown_rx).await;
        }
        Command::AllInOne => {
            let channel = open_channel(&config, &metrics).await?;
            let store = open_store(&config).await?;
            handles.extend(components::spawn_ingest(
                &config,
                channel.consumer,
                Arc::clone(&store),
                Arc::clone(&metrics),
                shutdown_rx.clone(),
            ));
            handles.push(components::spawn_api(
                &config,
                store,
                Arc::clone(&metrics),
                shutdown_rx.clone(),
            ));
            handles.push(components::spawn_gateway(
                &config,
                channel.producer,
                metrics,
                shutdown_rx.clone(),
            )?);
        }
    }

    info!(
        gateway_addr = %config.gateway.listen_addr,
        api_addr = %config.api.listen_addr,
        "edgetap is ready"
    );

    shutdown_future(shutdown_rx).await;
    for handle in handles {
        let _ = handle.await;
    }
    info!("edgetap stopped");
    Ok(())
}

/// SIGTERM (docker stop) or SIGINT (Ctrl+C).
async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Raise RLIMIT_NOFILE to min(hard_limit, 65536). The gateway holds an
/// inbound and an origin socket per in-flight request.
#[cfg(unix)]
fn raise_fd_limit() {
    unsafe {
        let mut rl = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) != 0 {
            tracing::warn!("getrlimit(RLIMIT_NOFILE) failed, fd limit unchanged");
            return;
        }
        let hard = rl.rlim_max;
        let target: libc::rlim_t = if hard == libc::RLIM_INFINITY || hard > 65536 {
            65536
        } else {
            hard
        };
        if rl.rlim_cur >= target {
            tracing::debug!(limit = rl.rlim_cur, "fd limit already sufficient");
            return;
        }
        rl.rlim_cur = target;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &rl) != 0 {
            tracing::warn!(tried = target, "setrlimit(RLIMIT_NOFILE) failed, run 'ulimit -n 65536'");
        } else {
            tracing::info!(limit = target, "File descriptor limit raised");
        }
    }
}
