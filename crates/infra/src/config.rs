//! Engine configuration.
//!
//! Sources are layered in this order (later wins):
//! 1. built-in defaults
//! 2. `stockroom.toml` in the working directory (optional)
//! 3. environment variables prefixed `STOCKROOM_` (e.g. `STOCKROOM_LOCK_TIMEOUT_MS=2000`)

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use stockroom_core::EngineError;
use stockroom_inventory::NegativeStockPolicy;
use stockroom_sscc::{CheckDigitMode, SsccLayout};

const CONFIG_FILE: &str = "stockroom";
const ENV_PREFIX: &str = "STOCKROOM";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::misconfigured(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// Any actor may drive outbound / production-issue stock below zero.
    pub allow_outbound_negative: bool,
    /// Admins may drive stock below zero.
    pub admin_override_negative: bool,
    /// `cell_code` of the work-in-process location used by production documents.
    pub production_location_code: String,
    pub gs1_company_prefix: String,
    pub sscc_extension_digit: String,
    pub sscc_serial_length: usize,
    pub sscc_validate_check_digit: bool,
    /// Upper bound on a single row-lock wait.
    pub lock_timeout_ms: u64,
    /// Selects the PostgreSQL store when set.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_outbound_negative: false,
            admin_override_negative: true,
            production_location_code: "PROD-01".to_string(),
            gs1_company_prefix: "460704615".to_string(),
            sscc_extension_digit: "0".to_string(),
            sscc_serial_length: 7,
            sscc_validate_check_digit: true,
            lock_timeout_ms: 5000,
            database_url: None,
        }
    }
}

impl Settings {
    /// Load and validate settings from defaults, `stockroom.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let config = Config::builder()
            .set_default("allow_outbound_negative", defaults.allow_outbound_negative)?
            .set_default("admin_override_negative", defaults.admin_override_negative)?
            .set_default("production_location_code", defaults.production_location_code)?
            .set_default("gs1_company_prefix", defaults.gs1_company_prefix)?
            .set_default("sscc_extension_digit", defaults.sscc_extension_digit)?
            .set_default("sscc_serial_length", defaults.sscc_serial_length as i64)?
            .set_default("sscc_validate_check_digit", defaults.sscc_validate_check_digit)?
            .set_default("lock_timeout_ms", defaults.lock_timeout_ms as i64)?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        info!(
            company_prefix = %settings.gs1_company_prefix,
            production_location = %settings.production_location_code,
            postgres = settings.database_url.is_some(),
            "configuration loaded"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sscc_layout()?;
        if self.production_location_code.trim().is_empty() {
            return Err(ConfigError::Validation(
                "production_location_code must not be empty".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Validation("lock_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Allocator parameters.
    pub fn sscc_layout(&self) -> Result<SsccLayout, ConfigError> {
        SsccLayout::new(
            self.sscc_extension_digit.clone(),
            self.gs1_company_prefix.clone(),
            self.sscc_serial_length,
        )
        .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn check_digit_mode(&self) -> CheckDigitMode {
        CheckDigitMode::from_flag(self.sscc_validate_check_digit)
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            negative_stock: NegativeStockPolicy {
                allow_outbound_negative: self.allow_outbound_negative,
                admin_override_negative: self.admin_override_negative,
            },
            production_location_code: self.production_location_code.clone(),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Ledger-facing slice of the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub negative_stock: NegativeStockPolicy,
    pub production_location_code: String,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Settings::default().ledger_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.sscc_layout().unwrap().max_serial(), 9_999_999);
        assert_eq!(settings.lock_timeout(), Duration::from_secs(5));
        assert_eq!(settings.check_digit_mode(), CheckDigitMode::Verify);
    }

    #[test]
    fn layout_must_total_seventeen_digits() {
        let settings = Settings {
            sscc_serial_length: 9,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Validation(_))));

        let err: EngineError = settings.validate().unwrap_err().into();
        assert!(matches!(err, EngineError::Misconfiguration(_)));
    }

    #[test]
    fn ledger_policy_projects_negative_stock_flags() {
        let settings = Settings {
            allow_outbound_negative: true,
            admin_override_negative: false,
            ..Settings::default()
        };
        let policy = settings.ledger_policy();
        assert!(policy.negative_stock.allow_outbound_negative);
        assert!(!policy.negative_stock.admin_override_negative);
        assert_eq!(policy.production_location_code, "PROD-01");
    }

    #[test]
    fn zero_lock_timeout_is_rejected() {
        let settings = Settings {
            lock_timeout_ms: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
