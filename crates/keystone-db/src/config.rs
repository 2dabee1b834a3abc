//! # Configuration
//!
//! Settings for the database, ledger rules, numbering and logging.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KEYSTONE_DB_PATH=/var/lib/keystone/keystone.db                     │
//! │     KEYSTONE_VAT_RATE_BPS=1500                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/keystone/keystone.toml (Linux)                           │
//! │     ~/Library/Application Support/com.keystone.keystone/ (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     15% VAT, 30 day terms, ./keystone.db                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "./keystone.db"
//! max_connections = 5
//! busy_timeout_secs = 5
//!
//! [ledger]
//! vat_rate_bps = 1500
//! default_payment_terms_days = 30
//! currency_code = "ZAR"
//!
//! [numbering]
//! order_prefix = "ORD"
//!
//! [report]
//! default_top_n = 5
//!
//! [logging]
//! filter = "info,keystone_db=debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use keystone_core::validation::{validate_payment_terms, validate_tax_rate_bps};
use keystone_core::{DocumentKind, LedgerSettings, TaxRate};

use crate::pool::DbConfig;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path, or ":memory:".
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How long a writer waits on SQLite's write lock before failing.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./keystone.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_busy_timeout() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

/// Money rules applied to new documents.
///
/// Existing documents keep the VAT rate they were created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_vat_rate")]
    pub vat_rate_bps: u32,

    /// Used when a customer has no terms of their own.
    #[serde(default = "default_payment_terms")]
    pub default_payment_terms_days: u32,

    /// ISO 4217 code. Display only; amounts are never converted.
    #[serde(default = "default_currency")]
    pub currency_code: String,
}

fn default_vat_rate() -> u32 {
    keystone_core::DEFAULT_VAT_RATE_BPS
}

fn default_payment_terms() -> u32 {
    keystone_core::DEFAULT_PAYMENT_TERMS_DAYS
}

fn default_currency() -> String {
    "ZAR".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            vat_rate_bps: default_vat_rate(),
            default_payment_terms_days: default_payment_terms(),
            currency_code: default_currency(),
        }
    }
}

/// Document number prefixes: `<PREFIX>-<YEAR>-<SEQ>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberingConfig {
    #[serde(default = "default_order_prefix")]
    pub order_prefix: String,
    #[serde(default = "default_quote_prefix")]
    pub quote_prefix: String,
    #[serde(default = "default_invoice_prefix")]
    pub invoice_prefix: String,
    #[serde(default = "default_po_prefix")]
    pub purchase_order_prefix: String,
}

fn default_order_prefix() -> String {
    "ORD".to_string()
}

fn default_quote_prefix() -> String {
    "QUO".to_string()
}

fn default_invoice_prefix() -> String {
    "INV".to_string()
}

fn default_po_prefix() -> String {
    "PO".to_string()
}

impl Default for NumberingConfig {
    fn default() -> Self {
        NumberingConfig {
            order_prefix: default_order_prefix(),
            quote_prefix: default_quote_prefix(),
            invoice_prefix: default_invoice_prefix(),
            purchase_order_prefix: default_po_prefix(),
        }
    }
}

impl NumberingConfig {
    pub fn prefix(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Order => &self.order_prefix,
            DocumentKind::Quote => &self.quote_prefix,
            DocumentKind::Invoice => &self.invoice_prefix,
            DocumentKind::PurchaseOrder => &self.purchase_order_prefix,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Length of the top products / top customers lists.
    #[serde(default = "default_top_n")]
    pub default_top_n: usize,
}

fn default_top_n() -> usize {
    5
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            default_top_n: default_top_n(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: default_filter(),
        }
    }
}

// =============================================================================
// Keystone Config
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeystoneConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub numbering: NumberingConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KeystoneConfig {
    /// Defaults with an in-memory database.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.database.path = PathBuf::from(":memory:");
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (keystone.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_tax_rate_bps(self.ledger.vat_rate_bps)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        validate_payment_terms(self.ledger.default_payment_terms_days)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let currency = &self.ledger.currency_code;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid(format!(
                "currency_code must be a 3-letter ISO code, got: {}",
                currency
            )));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "min_connections must not exceed max_connections".into(),
            ));
        }

        for kind in [
            DocumentKind::Order,
            DocumentKind::Quote,
            DocumentKind::Invoice,
            DocumentKind::PurchaseOrder,
        ] {
            let prefix = self.numbering.prefix(kind);
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid(format!(
                    "{} prefix must be non-empty and alphanumeric, got: '{}'",
                    kind, prefix
                )));
            }
        }

        if self.report.default_top_n == 0 {
            return Err(ConfigError::Invalid(
                "default_top_n must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("KEYSTONE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("KEYSTONE_DB_MAX_CONNECTIONS") {
            if let Ok(m) = max.parse::<u32>() {
                self.database.max_connections = m;
            }
        }

        if let Ok(rate) = std::env::var("KEYSTONE_VAT_RATE_BPS") {
            match rate.parse::<u32>() {
                Ok(bps) => {
                    debug!(bps, "Overriding VAT rate from environment");
                    self.ledger.vat_rate_bps = bps;
                }
                Err(_) => warn!(value = %rate, "Ignoring unparseable KEYSTONE_VAT_RATE_BPS"),
            }
        }

        if let Ok(days) = std::env::var("KEYSTONE_PAYMENT_TERMS_DAYS") {
            if let Ok(d) = days.parse::<u32>() {
                self.ledger.default_payment_terms_days = d;
            }
        }

        if let Ok(code) = std::env::var("KEYSTONE_CURRENCY") {
            self.ledger.currency_code = code.to_uppercase();
        }

        if let Ok(filter) = std::env::var("KEYSTONE_LOG") {
            self.logging.filter = filter;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "keystone", "keystone")
            .map(|dirs| dirs.config_dir().join("keystone.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The pure subset handed to keystone-core.
    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            vat_rate: TaxRate::from_bps(self.ledger.vat_rate_bps),
            default_payment_terms_days: self.ledger.default_payment_terms_days,
        }
    }

    pub fn db_config(&self) -> DbConfig {
        let db = &self.database;
        if db.path.as_os_str() == ":memory:" {
            return DbConfig::in_memory();
        }
        DbConfig::new(&db.path)
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .connect_timeout(Duration::from_secs(db.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(db.idle_timeout_secs))
            .busy_timeout(Duration::from_secs(db.busy_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KeystoneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.vat_rate_bps, 1500);
        assert_eq!(config.numbering.prefix(DocumentKind::Invoice), "INV");
        assert_eq!(config.ledger_settings().vat_rate, TaxRate::STANDARD_VAT);
    }

    #[test]
    fn test_config_validation() {
        let mut config = KeystoneConfig::default();

        config.ledger.vat_rate_bps = 10_001;
        assert!(config.validate().is_err());

        config.ledger.vat_rate_bps = 1500;
        config.ledger.currency_code = "rand".to_string();
        assert!(config.validate().is_err());

        config.ledger.currency_code = "USD".to_string();
        config.numbering.order_prefix = "OR-D".to_string();
        assert!(config.validate().is_err());

        config.numbering.order_prefix = "SO".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: KeystoneConfig = toml::from_str(
            r#"
            [ledger]
            vat_rate_bps = 1400

            [numbering]
            quote_prefix = "Q"
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.vat_rate_bps, 1400);
        assert_eq!(config.ledger.default_payment_terms_days, 30);
        assert_eq!(config.numbering.prefix(DocumentKind::Quote), "Q");
        assert_eq!(config.numbering.prefix(DocumentKind::Order), "ORD");
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_toml_serialization() {
        let config = KeystoneConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[ledger]"));
        assert!(toml_str.contains("[numbering]"));
    }
}
