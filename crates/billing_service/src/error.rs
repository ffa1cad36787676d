//! Service startup errors

use thiserror::Error;

use domain_billing::GatewayError;
use infra_db::DatabaseError;

/// Errors raised while assembling the engine from configuration
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway setup error: {0}")]
    Gateway(#[from] GatewayError),
}
