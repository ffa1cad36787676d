//! Billing Service
//!
//! Assembles the school billing engine from configuration and runs its
//! background work.
//!
//! # Components
//!
//! - [`config::ServiceConfig`]: `BILLING_*` environment configuration
//! - [`engine::BillingEngine`]: resolver, ledger, orchestrator, reconciler
//!   and sweeper over one store and one gateway
//! - [`scheduler::run_sweeper`]: the periodic expiry sweep
//!
//! # Example
//!
//! ```rust,ignore
//! use billing_service::{connect, ServiceConfig};
//!
//! let config = ServiceConfig::from_env()?;
//! let engine = connect(&config).await?;
//! let outcome = engine.handle_notification_body(&body).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use config::ServiceConfig;
pub use engine::{connect, BillingEngine, EngineConfig};
pub use error::ServiceError;
pub use scheduler::run_sweeper;
