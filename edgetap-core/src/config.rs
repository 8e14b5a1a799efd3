use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration shared by every edgetap process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgetapConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Capture & proxy gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_addr")]
    pub listen_addr: String,
    /// Base URL of the origin; the inbound path and query are appended.
    #[serde(default = "default_origin_url")]
    pub origin_url: String,
    #[serde(default = "default_origin_timeout")]
    pub origin_timeout_ms: u64,
    /// Request bodies longer than this are truncated in the snapshot (the
    /// origin still receives the full body).
    #[serde(default = "default_body_snapshot")]
    pub max_body_snapshot_bytes: usize,
    /// Largest request body the gateway buffers and forwards. Larger
    /// requests are answered with 413 and still recorded.
    #[serde(default = "default_max_request_body")]
    pub max_request_body_bytes: usize,
    /// Emit telemetry for requests whose origin call failed.
    #[serde(default = "default_true")]
    pub emit_on_origin_failure: bool,
    #[serde(default)]
    pub emit: EmitPolicy,
}

/// Bounded retry-or-drop policy applied when the channel refuses an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitPolicy {
    #[serde(default = "default_emit_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_emit_backoff")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelBackend {
    Memory,
    Redis,
}

/// Delivery channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_backend")]
    pub backend: ChannelBackend,
    /// Max queued messages (memory backend).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long a consumer waits to fill a batch before taking what it has.
    #[serde(default = "default_batch_wait")]
    pub batch_wait_ms: u64,
    /// Deliveries after which a message is dead-lettered instead of retried.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    /// Unsettled batches become visible again after this long.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    #[serde(default)]
    pub redis: RedisChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisChannelConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_stream")]
    pub stream: String,
    #[serde(default = "default_redis_group")]
    pub group: String,
    #[serde(default = "default_redis_consumer")]
    pub consumer: String,
    /// Approximate cap on stream length (XADD MAXLEN ~).
    #[serde(default = "default_redis_maxlen")]
    pub max_len: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Clickhouse,
}

/// Analytical store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_clickhouse_database")]
    pub database: String,
    #[serde(default = "default_clickhouse_table")]
    pub table: String,
    #[serde(default = "default_clickhouse_user")]
    pub user: String,
    pub password: Option<String>,
    #[serde(default = "default_clickhouse_timeout")]
    pub timeout_ms: u64,
    /// Run `CREATE TABLE IF NOT EXISTS` on start-up.
    #[serde(default = "default_true")]
    pub create_table: bool,
}

/// Batch ingest worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_workers")]
    pub workers: usize,
    /// Pause after a failed batch or channel error.
    #[serde(default = "default_ingest_backoff")]
    pub error_backoff_ms: u64,
}

/// Query service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Requested limits above this are clamped.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// `["*"]` means any origin.
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,
}

/// Client aggregation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Full URL of the query endpoint.
    #[serde(default = "default_dashboard_api_url")]
    pub api_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// When false, no counters are updated on the hot path.
    #[serde(default)]
    pub enabled: bool,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_gateway_addr() -> String { "0.0.0.0:8080".into() }
fn default_origin_url() -> String { "http://127.0.0.1:3000".into() }
fn default_origin_timeout() -> u64 { 10_000 }
fn default_body_snapshot() -> usize { 64 * 1024 }
fn default_max_request_body() -> usize { 32 * 1024 * 1024 }
fn default_true() -> bool { true }
fn default_emit_attempts() -> u32 { 3 }
fn default_emit_backoff() -> u64 { 50 }
fn default_channel_backend() -> ChannelBackend { ChannelBackend::Memory }
fn default_capacity() -> usize { 10_000 }
fn default_batch_size() -> usize { 100 }
fn default_batch_wait() -> u64 { 1000 }
fn default_max_deliveries() -> u32 { 5 }
fn default_visibility_timeout() -> u64 { 30 }
fn default_redis_url() -> String { "redis://127.0.0.1:6379/".into() }
fn default_redis_stream() -> String { "edgetap:events".into() }
fn default_redis_group() -> String { "edgetap-ingest".into() }
fn default_redis_consumer() -> String { "ingest-1".into() }
fn default_redis_maxlen() -> usize { 1_000_000 }
fn default_store_backend() -> StoreBackend { StoreBackend::Memory }
fn default_clickhouse_url() -> String { "http://127.0.0.1:8123".into() }
fn default_clickhouse_database() -> String { "observability".into() }
fn default_clickhouse_table() -> String { "raw_request_logs".into() }
fn default_clickhouse_user() -> String { "default".into() }
fn default_clickhouse_timeout() -> u64 { 10_000 }
fn default_ingest_workers() -> usize { 1 }
fn default_ingest_backoff() -> u64 { 1000 }
fn default_api_addr() -> String { "0.0.0.0:8081".into() }
fn default_limit() -> usize { 10 }
fn default_max_limit() -> usize { 500 }
fn default_cors_origins() -> Vec<String> { vec!["*".into()] }
fn default_cors_methods() -> Vec<String> { vec!["GET".into(), "OPTIONS".into()] }
fn default_cors_headers() -> Vec<String> { vec!["content-type".into()] }
fn default_dashboard_api_url() -> String { "http://127.0.0.1:8081/logs".into() }
fn default_page_size() -> usize { 20 }
fn default_poll_interval() -> u64 { 5000 }
fn default_poll_timeout() -> u64 { 3000 }

// ── Impls ─────────────────────────────────────────────────────

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_gateway_addr(),
            origin_url: default_origin_url(),
            origin_timeout_ms: default_origin_timeout(),
            max_body_snapshot_bytes: default_body_snapshot(),
            max_request_body_bytes: default_max_request_body(),
            emit_on_origin_failure: true,
            emit: EmitPolicy::default(),
        }
    }
}

impl Default for EmitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_emit_attempts(),
            backoff_ms: default_emit_backoff(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backend: default_channel_backend(),
            capacity: default_capacity(),
            batch_size: default_batch_size(),
            batch_wait_ms: default_batch_wait(),
            max_deliveries: default_max_deliveries(),
            visibility_timeout_secs: default_visibility_timeout(),
            redis: RedisChannelConfig::default(),
        }
    }
}

impl Default for RedisChannelConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            stream: default_redis_stream(),
            group: default_redis_group(),
            consumer: default_redis_consumer(),
            max_len: default_redis_maxlen(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            clickhouse: ClickHouseConfig::default(),
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            database: default_clickhouse_database(),
            table: default_clickhouse_table(),
            user: default_clickhouse_user(),
            password: None,
            timeout_ms: default_clickhouse_timeout(),
            create_table: true,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_ingest_workers(),
            error_backoff_ms: default_ingest_backoff(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_cors_origins(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: default_dashboard_api_url(),
            page_size: default_page_size(),
            poll_interval_ms: default_poll_interval(),
            poll_timeout_ms: default_poll_timeout(),
        }
    }
}

impl EdgetapConfig {
    /// Load configuration from YAML file + env overrides.
    ///
    /// A missing file contributes nothing, so env-only deployments work.
    /// Env keys use `__` as the nesting separator so that field names keep
    /// their underscores: `EDGETAP_GATEWAY__ORIGIN_URL`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: EdgetapConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("EDGETAP_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a component misbehave rather than fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gateway.max_request_body_bytes == 0 {
            anyhow::bail!("gateway.max_request_body_bytes must be at least 1");
        }
        if self.channel.batch_size == 0 {
            anyhow::bail!("channel.batch_size must be at least 1");
        }
        if self.channel.max_deliveries == 0 {
            anyhow::bail!("channel.max_deliveries must be at least 1");
        }
        if self.api.max_limit == 0 {
            anyhow::bail!("api.max_limit must be at least 1");
        }
        if self.api.default_limit == 0 || self.api.default_limit > self.api.max_limit {
            anyhow::bail!("api.default_limit must be between 1 and api.max_limit");
        }
        if self.dashboard.page_size == 0 {
            anyhow::bail!("dashboard.page_size must be at least 1");
        }
        Ok(())
    }
}

impl GatewayConfig {
    pub fn origin_timeout(&self) -> Duration {
        Duration::from_millis(self.origin_timeout_ms)
    }
}

impl ChannelConfig {
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl DashboardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
