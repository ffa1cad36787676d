//! Service configuration
//!
//! Loaded from `BILLING_*` environment variables, nested with `__`:
//!
//! ```text
//! BILLING_DATABASE__URL=postgres://billing:secret@db/billing
//! BILLING_MIDTRANS__SERVER_KEY=SB-Mid-server-...
//! BILLING_MIDTRANS__CORE_BASE_URL=https://api.midtrans.com
//! BILLING_SWEEPER__STALE_AFTER_HOURS=24
//! BILLING_LOG_LEVEL=debug
//! ```

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use domain_billing::{LedgerConfig, OrchestratorConfig, SweeperConfig};
use infra_db::DatabaseConfig;
use infra_gateway::MidtransConfig;

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    pub midtrans: MidtransConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub sweeper: SweeperSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    /// Apply pending migrations on startup
    pub migrate: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/billing".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 30,
            migrate: true,
        }
    }
}

impl DatabaseSettings {
    pub fn pool_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.url.clone())
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub gateway_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            gateway_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperSettings {
    pub enabled: bool,
    pub stale_after_hours: i64,
    pub interval_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after_hours: 24,
            interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub batch_size: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

impl ServiceConfig {
    /// Loads configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("BILLING")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_config(config)
    }

    /// Deserializes and validates an already-built configuration
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // a pending charge pins one connection for up to the gateway timeout
        if self.database.max_connections < 2 {
            return Err(ConfigError::Message("database.max_connections must be at least 2".into()));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "database.min_connections must not exceed database.max_connections".into(),
            ));
        }
        if self.ledger.batch_size == 0 {
            return Err(ConfigError::Message("ledger.batch_size must be positive".into()));
        }
        if self.sweeper.stale_after_hours <= 0 {
            return Err(ConfigError::Message("sweeper.stale_after_hours must be positive".into()));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Message("sweeper.interval_secs must be positive".into()));
        }
        if self.orchestrator.gateway_timeout_secs == 0 {
            return Err(ConfigError::Message("orchestrator.gateway_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            gateway_timeout: Duration::from_secs(self.orchestrator.gateway_timeout_secs),
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            stale_after: chrono::Duration::hours(self.sweeper.stale_after_hours),
            interval: Duration::from_secs(self.sweeper.interval_secs),
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            batch_size: self.ledger.batch_size,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
