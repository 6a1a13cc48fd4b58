//! Configuration for the ledger
//!
//! Settings are layered, lowest priority first:
//! 1. Defaults (the `default_*` functions below)
//! 2. TOML file (`config/loan_ledger.toml`, or the path in `LOAN_LEDGER_CONFIG`)
//! 3. Environment variables `LOAN_LEDGER__<key>`, e.g. `LOAN_LEDGER__DEFAULT_LOAN_DAYS=7`
use super::error::{Result, ValidationError};
use ::config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "LOAN_LEDGER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/loan_ledger.toml";
const ENV_PREFIX: &str = "LOAN_LEDGER";
const ENV_SEPARATOR: &str = "__";

pub const MIN_LOAN_DAYS: u32 = 1;
pub const MAX_LOAN_DAYS: u32 = 30;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LedgerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Loan period used when a loan request carries no due date.
    #[serde(default = "default_loan_days")]
    pub default_loan_days: u32,
    #[serde(default = "default_reconcile_on_startup")]
    pub reconcile_on_startup: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            default_loan_days: default_loan_days(),
            reconcile_on_startup: default_reconcile_on_startup(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/loan_ledger.db")
}

fn default_loan_days() -> u32 {
    3
}

fn default_reconcile_on_startup() -> bool {
    true
}

impl LedgerConfig {
    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(config_path)
    }

    pub fn load_from(config_path: PathBuf) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if config_path.exists() {
            tracing::info!("Loading configuration from: {}", config_path.display());
            builder = builder.add_source(File::from(config_path).required(false));
        } else {
            tracing::debug!(
                "Configuration file not found at {}, using defaults and environment overrides",
                config_path.display()
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: LedgerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !(MIN_LOAN_DAYS..=MAX_LOAN_DAYS).contains(&self.default_loan_days) {
            return Err(ValidationError::InvalidConfig {
                field: "default_loan_days",
                value: self.default_loan_days.to_string(),
            });
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(ValidationError::InvalidConfig {
                field: "db_path",
                value: String::new(),
            });
        }
        Ok(())
    }

    /// Desk session for `operator` using the configured loan period.
    pub fn session(&self, operator: &str) -> Session {
        Session::new(operator, self.default_loan_days)
    }
}

/// Who is operating the desk and the loan period they default to. Passed into
/// every write instead of living in process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub operator: String,
    pub default_loan_days: u32,
}

impl Session {
    pub fn new(operator: &str, default_loan_days: u32) -> Self {
        Self {
            operator: operator.trim().to_string(),
            default_loan_days,
        }
    }
}
