use std::time::Duration;

use escrow_automation_config::AppConfig;
use escrow_automation_retry::{ExponentialBackoff, RetryPolicy};
use rust_decimal::Decimal;

/// Runtime settings shared by the orchestrators and the scheduler
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Custody period used when a payment carries no override
    pub default_custody_period_secs: i64,

    /// Shortest custody period accepted before any on-chain call
    pub min_custody_period_secs: i64,

    pub default_custody_percent: Decimal,

    /// Platform account deposits settle into
    pub custodial_account: String,

    pub bridge_wallet: String,

    /// Deadline for every adapter call
    pub call_timeout: Duration,

    pub lease_ttl_secs: u64,

    /// Quiet time after which a `processing` payment counts as stuck
    pub stuck_threshold_secs: u64,

    /// Page size when scanning payments by status
    pub scan_limit: usize,

    pub payout_batch_size: usize,

    pub steady_interval: Duration,
    pub quick_interval: Duration,
    pub sweep_interval: Duration,

    pub retry: RetryPolicy,
}

impl OrchestratorConfig {
    pub fn with_accounts(
        mut self,
        custodial_account: impl Into<String>,
        bridge_wallet: impl Into<String>,
    ) -> Self {
        self.custodial_account = custodial_account.into();
        self.bridge_wallet = bridge_wallet.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        let backoff =
            ExponentialBackoff::new(config.retry.backoff_initial(), config.retry.backoff_max());

        Self {
            default_custody_period_secs: config.custody.default_period_secs,
            min_custody_period_secs: config.custody.min_period_secs,
            default_custody_percent: config.custody.default_custody_percent,
            custodial_account: config.adapters.custodial_account.clone(),
            bridge_wallet: config.adapters.bridge_wallet.clone(),
            call_timeout: config.adapters.call_timeout(),
            lease_ttl_secs: config.retry.lease_ttl_secs,
            stuck_threshold_secs: config.retry.stuck_threshold_secs,
            scan_limit: config.retry.scan_limit,
            payout_batch_size: config.payout.batch_size,
            steady_interval: config.retry.steady_interval(),
            quick_interval: config.retry.quick_interval(),
            sweep_interval: config.payout.sweep_interval(),
            retry: RetryPolicy::new(
                config.retry.max_attempts,
                backoff,
                config.retry.quick_interval(),
            ),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}
