//! Infrastructure Gateway Layer
//!
//! Outbound payment gateway adapter for the school billing engine.
//!
//! [`MidtransAdapter`] implements `domain_billing::PaymentGatewayPort` over
//! `reqwest`, guarded by a [`CircuitBreaker`]. Notification signatures are
//! checked in [`signature`].
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_gateway::{MidtransAdapter, MidtransConfig};
//!
//! let gateway = MidtransAdapter::new(
//!     MidtransConfig::sandbox().with_server_key(std::env::var("MIDTRANS_SERVER_KEY")?),
//! )?;
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod midtrans;
pub mod signature;

pub use circuit_breaker::CircuitBreaker;
pub use config::MidtransConfig;
pub use midtrans::MidtransAdapter;
