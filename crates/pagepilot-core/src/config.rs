//! Engine configuration schema.
//!
//! Deserialized from TOML by the binary; every field has a default so a
//! partial (or missing) file yields a runnable configuration.

use serde::{Deserialize, Serialize};

/// Anti-detection profile applied to a context on acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintProfile {
    /// User agent string.
    pub user_agent: String,
    /// Viewport width in CSS pixels.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    /// Viewport height in CSS pixels.
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

/// HTTP API bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Browser context pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard ceiling on concurrently active contexts.
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// How long `acquire` waits before failing with `PoolExhausted`, ms.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Idle contexts older than this are evicted by the sweep, seconds.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Contexts older than this are destroyed on release or sweep, seconds.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// Sweep interval, seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Run the browser headless.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Chrome remote debugging port.
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,

    /// Fingerprint profiles rotated across acquisitions.
    #[serde(default)]
    pub profiles: Vec<FingerprintProfile>,
}

fn default_pool_max_size() -> usize {
    5
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_idle_ttl_secs() -> u64 {
    300
}

fn default_max_lifetime_secs() -> u64 {
    1_800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_headless() -> bool {
    true
}

fn default_debug_port() -> u16 {
    9222
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_ttl_secs: default_idle_ttl_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            headless: default_headless(),
            debug_port: default_debug_port(),
            profiles: Vec::new(),
        }
    }
}

/// Worker pool and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Default whole-task retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff applied before re-queueing a failed task.
    #[serde(default)]
    pub retry_backoff: crate::backoff::BackoffPolicy,
}

fn default_worker_count() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            max_retries: default_max_retries(),
            retry_backoff: crate::backoff::BackoffPolicy::default(),
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live, seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// A configured webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Destination URL for the POST.
    pub url: String,
    /// Restrict this endpoint to one owner; `None` receives all events.
    #[serde(default)]
    pub owner: Option<String>,
}

/// Webhook dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Configured endpoints.
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,

    /// Per-request timeout, milliseconds.
    #[serde(default = "default_webhook_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Delivery retry policy.
    #[serde(default)]
    pub retry: crate::backoff::BackoffPolicy,
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            request_timeout_ms: default_webhook_timeout_ms(),
            retry: crate::backoff::BackoffPolicy::default(),
        }
    }
}

/// Semantic parser configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Default navigation timeout, milliseconds.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// How long to wait for network idle when requested, milliseconds.
    #[serde(default = "default_network_idle_timeout_ms")]
    pub network_idle_timeout_ms: u64,

    /// Upper bound on extracted interactive elements.
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,

    /// Upper bound on extracted content blocks.
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_network_idle_timeout_ms() -> u64 {
    10_000
}

fn default_max_elements() -> usize {
    200
}

fn default_max_blocks() -> usize {
    50
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: default_navigation_timeout_ms(),
            network_idle_timeout_ms: default_network_idle_timeout_ms(),
            max_elements: default_max_elements(),
            max_blocks: default_max_blocks(),
        }
    }
}

/// Action executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Target-resolution attempts per step.
    #[serde(default = "default_resolve_attempts")]
    pub resolve_attempts: u32,

    /// Delay between resolution attempts, milliseconds.
    #[serde(default = "default_resolve_retry_delay_ms")]
    pub resolve_retry_delay_ms: u64,
}

fn default_resolve_attempts() -> u32 {
    3
}

fn default_resolve_retry_delay_ms() -> u64 {
    250
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            resolve_attempts: default_resolve_attempts(),
            resolve_retry_delay_ms: default_resolve_retry_delay_ms(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}
