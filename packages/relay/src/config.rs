use common::retry::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Queue processor settings.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Poll cadence for due jobs. Default: 5s.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound on jobs drained per poll cycle. Default: 10.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Inner retry budget used when invoking the primary provider within
    /// one poll-cycle attempt. Defaults to a single fail-fast try; the
    /// outer backoff schedule owns the pacing.
    #[serde(default = "default_provider_retry")]
    pub provider_retry: RetryPolicy,
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_batch_size() -> u64 {
    10
}
fn default_provider_retry() -> RetryPolicy {
    RetryPolicy::single_try()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            provider_retry: default_provider_retry(),
        }
    }
}

/// Degraded-mode health check settings.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Health check cadence. Default: 60s.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// A job counts as failing once its attempts reach this. Default: 3.
    #[serde(default = "default_failing_attempts")]
    pub failing_attempts: i32,
    /// Alert when the failing-job count exceeds this. Default: 20.
    #[serde(default = "default_failing_jobs_threshold")]
    pub failing_jobs_threshold: u64,
}

fn default_health_interval_secs() -> u64 {
    60
}
fn default_failing_attempts() -> i32 {
    3
}
fn default_failing_jobs_threshold() -> u64 {
    20
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval_secs(),
            failing_attempts: default_failing_attempts(),
            failing_jobs_threshold: default_failing_jobs_threshold(),
        }
    }
}

/// Idempotency-key sweep settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IdempotencyConfig {
    /// Sweep cadence for expired keys. Default: 1h.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Operator escalation settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    /// Fixed address receiving SLA-breach and degraded-mode alerts.
    pub operator_email: String,
    /// Retry budget for alert sends (alerts go through the same provider
    /// capability as ordinary notifications).
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Delivery provider endpoints.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Transactional email HTTP API endpoint (primary channel).
    pub email_endpoint: String,
    #[serde(default)]
    pub email_api_key: String,
    /// Optional generic webhook used as the failover channel.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Per-request timeout for provider calls. Default: 10s.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    pub alerts: AlertsConfig,
    pub provider: ProviderConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            // Load from config/config.toml
            .add_source(File::with_name("config/config").required(false))
            // Override from environment (e.g., RELAY__ALERTS__OPERATOR_EMAIL)
            .add_source(Environment::with_prefix("RELAY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
