//! Core configuration structures for the escrow automation service

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service identity and logging
    #[serde(default)]
    pub service: ServiceConfig,

    /// Custody period and share defaults
    #[serde(default)]
    pub custody: CustodyConfig,

    /// Retry and recovery scheduler
    #[serde(default)]
    pub retry: RetryConfig,

    /// Payout sweep
    #[serde(default)]
    pub payout: PayoutConfig,

    /// External adapter settings
    #[serde(default)]
    pub adapters: AdapterConfig,

    /// Persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Environment type (production, staging, local)
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Lease owner name; a random one is generated when absent
    #[serde(default)]
    pub worker_id: Option<String>,
}

/// Environment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Local,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Custody period used when a payment carries no override
    #[serde(default = "default_custody_period_secs")]
    pub default_period_secs: i64,

    /// Shortest custody period accepted before any on-chain call
    #[serde(default = "default_min_custody_period_secs")]
    pub min_period_secs: i64,

    /// Share of each payment held in custody, in percent
    #[serde(default = "default_custody_percent")]
    pub default_custody_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_steady_interval_secs")]
    pub steady_interval_secs: u64,

    /// Interval of the insufficient-balance timer
    #[serde(default = "default_quick_interval_secs")]
    pub quick_interval_secs: u64,

    /// Age after which a `processing` payment counts as stuck
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,

    /// Failures without progress before a payment is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Processing lease lifetime; an abandoned lease is reclaimable after this
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Page size when scanning payments by status
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Deadline applied to every adapter call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Platform account deposits settle into
    #[serde(default)]
    pub custodial_account: String,

    /// Intermediary wallet between fiat withdrawal and escrow funding
    #[serde(default)]
    pub bridge_wallet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl RetryConfig {
    pub fn steady_interval(&self) -> Duration {
        Duration::from_secs(self.steady_interval_secs)
    }

    pub fn quick_interval(&self) -> Duration {
        Duration::from_secs(self.quick_interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

impl PayoutConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AdapterConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

// Default value functions
fn default_environment() -> Environment {
    Environment::Local
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_custody_period_secs() -> i64 {
    432_000 // 5 days
}

fn default_min_custody_period_secs() -> i64 {
    3_600 // 1 hour
}

fn default_custody_percent() -> Decimal {
    Decimal::ONE_HUNDRED
}

fn default_steady_interval_secs() -> u64 {
    120 // 2 minutes
}

fn default_quick_interval_secs() -> u64 {
    30
}

fn default_stuck_threshold_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_attempts() -> u32 {
    20
}

fn default_backoff_initial_secs() -> u64 {
    30
}

fn default_backoff_max_secs() -> u64 {
    3_600 // 1 hour
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_scan_limit() -> usize {
    100
}

fn default_sweep_interval_secs() -> u64 {
    120
}

fn default_batch_size() -> usize {
    100
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_database_url() -> String {
    "sqlite://escrow-automation.db".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            worker_id: None,
        }
    }
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            default_period_secs: default_custody_period_secs(),
            min_period_secs: default_min_custody_period_secs(),
            default_custody_percent: default_custody_percent(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            steady_interval_secs: default_steady_interval_secs(),
            quick_interval_secs: default_quick_interval_secs(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            max_attempts: default_max_attempts(),
            backoff_initial_secs: default_backoff_initial_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
            scan_limit: default_scan_limit(),
        }
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            custodial_account: String::new(),
            bridge_wallet: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}
