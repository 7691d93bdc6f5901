//! Configuration validation

use crate::{AppConfig, ConfigError, Result};
use rust_decimal::Decimal;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration
///
/// Every violated rule is collected so a broken file reports all of its problems at once.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    // Service
    if let Err(e) = validate_log_level(&config.service.log_level) {
        errors.push(e);
    }

    if let Some(worker_id) = &config.service.worker_id {
        if worker_id.trim().is_empty() {
            errors.push(ValidationError::new(
                "service.worker_id",
                "worker id must not be blank when set",
            ));
        }
    }

    // Custody
    if config.custody.min_period_secs <= 0 {
        errors.push(ValidationError::new(
            "custody.min_period_secs",
            "must be greater than 0",
        ));
    }

    if config.custody.default_period_secs < config.custody.min_period_secs {
        errors.push(ValidationError::new(
            "custody.default_period_secs",
            format!(
                "default period {} is below the minimum {}",
                config.custody.default_period_secs, config.custody.min_period_secs
            ),
        ));
    }

    let percent = config.custody.default_custody_percent;
    if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        errors.push(ValidationError::new(
            "custody.default_custody_percent",
            format!("must be in (0, 100], got {percent}"),
        ));
    }

    // Retry
    if config.retry.quick_interval_secs == 0 {
        errors.push(ValidationError::new(
            "retry.quick_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.retry.quick_interval_secs >= config.retry.steady_interval_secs {
        errors.push(ValidationError::new(
            "retry.quick_interval_secs",
            "quick retry interval must be shorter than the steady interval",
        ));
    }

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::new(
            "retry.max_attempts",
            "must be greater than 0",
        ));
    }

    if config.retry.backoff_initial_secs == 0 {
        errors.push(ValidationError::new(
            "retry.backoff_initial_secs",
            "must be greater than 0",
        ));
    }

    if config.retry.backoff_max_secs < config.retry.backoff_initial_secs {
        errors.push(ValidationError::new(
            "retry.backoff_max_secs",
            "must not be smaller than backoff_initial_secs",
        ));
    }

    // A lease must outlive the slowest adapter call it covers
    if config.retry.lease_ttl_secs.saturating_mul(1000) <= config.adapters.call_timeout_ms {
        errors.push(ValidationError::new(
            "retry.lease_ttl_secs",
            format!(
                "lease ttl must exceed the adapter call timeout ({} ms)",
                config.adapters.call_timeout_ms
            ),
        ));
    }

    if config.retry.scan_limit == 0 {
        errors.push(ValidationError::new(
            "retry.scan_limit",
            "must be greater than 0",
        ));
    }

    // Payout
    if config.payout.batch_size == 0 {
        errors.push(ValidationError::new(
            "payout.batch_size",
            "must be greater than 0",
        ));
    }

    if config.payout.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "payout.sweep_interval_secs",
            "must be greater than 0",
        ));
    }

    // Adapters
    if config.adapters.call_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "adapters.call_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.adapters.custodial_account.is_empty() {
        errors.push(ValidationError::new(
            "adapters.custodial_account",
            "custodial account is required",
        ));
    }

    if config.adapters.bridge_wallet.is_empty() {
        errors.push(ValidationError::new(
            "adapters.bridge_wallet",
            "bridge wallet is required",
        ));
    }

    // Storage
    if let Err(e) = validate_database_url(&config.storage.database_url) {
        errors.push(ValidationError::new("storage.database_url", e));
    }

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate a database URL
pub fn validate_database_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("database URL cannot be empty".to_string());
    }

    if !url.starts_with("sqlite:") {
        return Err("database URL must start with sqlite:".to_string());
    }

    Ok(())
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "service.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdapterConfig, CustodyConfig, RetryConfig};

    fn valid_config() -> AppConfig {
        AppConfig {
            adapters: AdapterConfig {
                custodial_account: "646180157000000000".to_string(),
                bridge_wallet: "0xbridge".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn error_message(config: &AppConfig) -> String {
        match validate_config(config) {
            Err(ConfigError::ValidationError(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_defaults_require_accounts() {
        let msg = error_message(&AppConfig::default());
        assert!(msg.contains("adapters.custodial_account"));
        assert!(msg.contains("adapters.bridge_wallet"));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = valid_config();
        config.service.log_level = "verbose".to_string();
        assert!(error_message(&config).contains("service.log_level"));

        config.service.log_level = "WARN".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_default_period_below_minimum() {
        let mut config = valid_config();
        config.custody = CustodyConfig {
            default_period_secs: 60,
            min_period_secs: 3_600,
            ..Default::default()
        };
        assert!(error_message(&config).contains("custody.default_period_secs"));
    }

    #[test]
    fn test_zero_minimum_period() {
        let mut config = valid_config();
        config.custody.min_period_secs = 0;
        assert!(error_message(&config).contains("custody.min_period_secs"));
    }

    #[test]
    fn test_custody_percent_bounds() {
        let mut config = valid_config();
        config.custody.default_custody_percent = Decimal::ZERO;
        assert!(error_message(&config).contains("custody.default_custody_percent"));

        config.custody.default_custody_percent = Decimal::from(101);
        assert!(error_message(&config).contains("custody.default_custody_percent"));

        config.custody.default_custody_percent = Decimal::from(25);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_quick_interval_must_be_shorter() {
        let mut config = valid_config();
        config.retry = RetryConfig {
            quick_interval_secs: 120,
            steady_interval_secs: 120,
            ..Default::default()
        };
        assert!(error_message(&config).contains("retry.quick_interval_secs"));
    }

    #[test]
    fn test_lease_must_outlive_call_timeout() {
        let mut config = valid_config();
        config.retry.lease_ttl_secs = 30;
        config.adapters.call_timeout_ms = 30_000;
        assert!(error_message(&config).contains("retry.lease_ttl_secs"));
    }

    #[test]
    fn test_zero_batch_sizes() {
        let mut config = valid_config();
        config.payout.batch_size = 0;
        config.retry.scan_limit = 0;
        config.retry.max_attempts = 0;
        let msg = error_message(&config);
        assert!(msg.contains("payout.batch_size"));
        assert!(msg.contains("retry.scan_limit"));
        assert!(msg.contains("retry.max_attempts"));
    }

    #[test]
    fn test_validate_database_url() {
        assert!(validate_database_url("sqlite://escrow.db").is_ok());
        assert!(validate_database_url("sqlite::memory:").is_ok());
        assert!(validate_database_url("").is_err());
        assert!(validate_database_url("postgres://localhost/escrow").is_err());
    }
}
