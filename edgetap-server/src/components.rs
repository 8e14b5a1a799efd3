//! Backend selection and per-role start-up.

use edgetap_api::ApiState;
use edgetap_channel::{BatchSource, DeliveryChannel, MemoryQueue, RedisStreamQueue};
use edgetap_core::EdgetapConfig;
use edgetap_core::config::{ChannelBackend, StoreBackend};
use edgetap_dashboard::{Dashboard, HttpLogsClient, ViewFilter};
use edgetap_ingest::{IngestWorker, spawn_workers};
use edgetap_observability::MetricsCollector;
use edgetap_proxy::GatewayState;
use edgetap_store::{ClickHouseStore, LogStore, MemoryStore};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Both ends of the delivery channel. For the memory backend they are the
/// same queue, so producer and consumer must live in one process. The redis
/// backend reads on connections of its own, so sharing one queue value
/// never puts producer writes behind a blocking read.
pub struct Channel {
    pub producer: Arc<dyn DeliveryChannel>,
    pub consumer: Arc<dyn BatchSource>,
}

pub async fn open_channel(
    config: &EdgetapConfig,
    metrics: &Arc<MetricsCollector>,
) -> anyhow::Result<Channel> {
    match config.channel.backend {
        ChannelBackend::Memory => {
            let queue = Arc::new(MemoryQueue::from_config(&config.channel, Arc::clone(metrics)));
            info!(capacity = config.channel.capacity, "Delivery channel: in-memory queue");
            Ok(Channel {
                producer: queue.clone(),
                consumer: queue,
            })
        }
        ChannelBackend::Redis => {
            let queue =
                Arc::new(RedisStreamQueue::connect(&config.channel, Arc::clone(metrics)).await?);
            info!(
                url = %config.channel.redis.url,
                stream = %config.channel.redis.stream,
                "Delivery channel: redis stream"
            );
            Ok(Channel {
                producer: queue.clone(),
                consumer: queue,
            })
        }
    }
}

pub async fn open_store(config: &EdgetapConfig) -> anyhow::Result<Arc<dyn LogStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Log store: in-memory");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Clickhouse => {
            let store = ClickHouseStore::connect(&config.store.clickhouse).await?;
            info!(
                url = %config.store.clickhouse.url,
                table = %format!("{}.{}", config.store.clickhouse.database, config.store.clickhouse.table),
                "Log store: clickhouse"
            );
            Ok(Arc::new(store))
        }
    }
}

/// Resolves once the shutdown flag flips (or its sender is gone).
pub fn shutdown_future(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Warn when a split deployment would leave the two ends of an in-memory
/// channel or store in different processes.
pub fn warn_if_process_local(config: &EdgetapConfig, role: &str) {
    if role != "api" && config.channel.backend == ChannelBackend::Memory {
        warn!(
            role,
            "in-memory channel is process-local; use the redis backend to run roles separately"
        );
    }
    if role != "gateway" && config.store.backend == StoreBackend::Memory {
        warn!(role, "in-memory store is process-local; use the clickhouse backend");
    }
}

pub fn spawn_gateway(
    config: &EdgetapConfig,
    channel: Arc<dyn DeliveryChannel>,
    metrics: Arc<MetricsCollector>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    let state = Arc::new(GatewayState::new(&config.gateway, channel, metrics)?);
    let addr = config.gateway.listen_addr.clone();
    info!(origin = %config.gateway.origin_url, "Starting gateway");
    Ok(tokio::spawn(async move {
        if let Err(e) = edgetap_proxy::serve(&addr, state, shutdown_future(shutdown)).await {
            error!(error = %e, "Gateway failed");
        }
    }))
}

pub fn spawn_api(
    config: &EdgetapConfig,
    store: Arc<dyn LogStore>,
    metrics: Arc<MetricsCollector>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let state = Arc::new(ApiState::new(&config.api, store, metrics));
    let api_config = config.api.clone();
    tokio::spawn(async move {
        if let Err(e) = edgetap_api::serve(&api_config, state, shutdown_future(shutdown)).await {
            error!(error = %e, "Query API failed");
        }
    })
}

pub fn spawn_ingest(
    config: &EdgetapConfig,
    source: Arc<dyn BatchSource>,
    store: Arc<dyn LogStore>,
    metrics: Arc<MetricsCollector>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let worker = Arc::new(IngestWorker::new(
        source,
        store,
        metrics,
        &config.channel,
        &config.ingest,
    ));
    spawn_workers(worker, config.ingest.workers, shutdown)
}

/// What the `dashboard` subcommand shows.
pub struct DashboardView {
    pub filter: ViewFilter,
    pub rows: usize,
    /// Older pages to load after the first one.
    pub pages: usize,
    pub once: bool,
    /// Print this request's detail instead of the table.
    pub detail: Option<String>,
}

/// Poll the query service and redraw the terminal view on every refresh.
pub async fn run_dashboard(
    config: &EdgetapConfig,
    view: DashboardView,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client = Arc::new(HttpLogsClient::new(&config.dashboard)?);
    info!(api_url = client.api_url(), "Starting dashboard");
    let dashboard = Dashboard::new(client, &config.dashboard);

    if let Some(request_id) = view.detail {
        dashboard.initial_load().await;
        let detail = dashboard.find_row(&request_id, view.pages).await;
        let Some(detail) = detail else {
            let state = dashboard.state().await;
            if let Some(err) = state.last_error() {
                anyhow::bail!("request {request_id} not found: {err}");
            }
            anyhow::bail!(
                "request {request_id} not among the newest {} rows; raise --pages to look further back",
                state.buffer().len()
            );
        };
        print!("{}", edgetap_dashboard::render_detail(&detail));
        return Ok(());
    }

    if view.once {
        dashboard.initial_load().await;
        dashboard.load_pages(view.pages).await;
        let state = dashboard.state().await;
        print!("{}", edgetap_dashboard::render(&state, &view.filter, view.rows));
        return Ok(());
    }

    let (filter, rows) = (view.filter, view.rows);
    dashboard
        .run(view.pages, shutdown, |state| {
            let text = edgetap_dashboard::render(state, &filter, rows);
            let mut out = std::io::stdout().lock();
            // Clear screen, cursor home.
            let _ = write!(out, "\x1b[2J\x1b[H{text}");
            let _ = out.flush();
        })
        .await;
    Ok(())
}
