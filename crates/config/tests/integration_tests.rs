//! Integration tests for the config crate

use escrow_automation_config::{
    validate_config, AppConfig, ConfigError, ConfigLoader, Environment, LogFormat,
};
use rust_decimal::Decimal;
use std::io::Write;
use std::path::PathBuf;

fn bundled(name: &str) -> PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../config")
        .join(name)
}

#[test]
fn test_load_production_config() {
    let config = ConfigLoader::from_file(bundled("production.toml").as_path())
        .expect("Failed to load production config");

    assert_eq!(config.service.environment, Environment::Production);
    assert_eq!(config.service.log_format, LogFormat::Json);
    assert_eq!(config.custody.default_period_secs, 432_000);
    assert_eq!(config.retry.quick_interval_secs, 30);
    // Account identifiers come from the environment in production
    assert!(config.adapters.custodial_account.is_empty());
}

#[test]
fn test_load_local_config() {
    let config = ConfigLoader::from_file(bundled("local.toml").as_path())
        .expect("Failed to load local config");

    assert_eq!(config.service.environment, Environment::Local);
    assert_eq!(config.service.log_level, "debug");
    assert_eq!(config.service.worker_id.as_deref(), Some("local-worker"));
    validate_config(&config).expect("local config should validate");
}

#[test]
fn test_production_config_needs_accounts_from_env() {
    let config = ConfigLoader::from_file(bundled("production.toml").as_path()).unwrap();
    let result = validate_config(&config);
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_env_overrides_file() {
    let prefix = "ESCROW_AUTOMATION_ITEST";
    std::env::set_var(format!("{prefix}_RETRY__MAX_ATTEMPTS"), "5");
    std::env::set_var(format!("{prefix}_ADAPTERS__BRIDGE_WALLET"), "0xfeed");
    std::env::set_var(format!("{prefix}_CUSTODY__DEFAULT_CUSTODY_PERCENT"), "50");

    let config =
        ConfigLoader::from_file_with_env(bundled("production.toml").as_path(), prefix).unwrap();

    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.adapters.bridge_wallet, "0xfeed");
    assert_eq!(config.custody.default_custody_percent, Decimal::from(50));
    // Values absent from the environment still come from the file
    assert_eq!(config.service.environment, Environment::Production);
    assert_eq!(config.retry.steady_interval_secs, 120);

    std::env::remove_var(format!("{prefix}_RETRY__MAX_ATTEMPTS"));
    std::env::remove_var(format!("{prefix}_ADAPTERS__BRIDGE_WALLET"));
    std::env::remove_var(format!("{prefix}_CUSTODY__DEFAULT_CUSTODY_PERCENT"));
}

#[test]
fn test_env_only_falls_back_to_defaults() {
    let prefix = "ESCROW_AUTOMATION_ENVONLY";
    std::env::set_var(format!("{prefix}_PAYOUT__BATCH_SIZE"), "7");

    let config = ConfigLoader::from_env_with_prefix(prefix).unwrap();
    assert_eq!(config.payout.batch_size, 7);
    assert_eq!(config.custody.default_period_secs, 432_000);

    std::env::remove_var(format!("{prefix}_PAYOUT__BATCH_SIZE"));
}

#[test]
fn test_roundtrip_through_toml_file() {
    let mut config = AppConfig::default();
    config.adapters.custodial_account = "646180000000000009".to_string();
    config.adapters.bridge_wallet = "0xbridge".to_string();
    config.custody.default_custody_percent = Decimal::from(40);

    let rendered = toml::to_string(&config).unwrap();
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(rendered.as_bytes()).unwrap();

    let loaded = ConfigLoader::from_file(file.path()).unwrap();
    assert_eq!(loaded, config);
    validate_config(&loaded).unwrap();
}

#[test]
fn test_invalid_toml_reports_parse_error() {
    let result = ConfigLoader::from_toml("[retry\nmax_attempts = ");
    assert!(matches!(result, Err(ConfigError::TomlError(_))));
}

#[test]
fn test_missing_file() {
    let result = ConfigLoader::from_file(bundled("does-not-exist.toml").as_path());
    assert!(matches!(result, Err(ConfigError::IoError(_))));
}
