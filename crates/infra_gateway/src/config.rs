//! Midtrans adapter configuration

use core_kernel::CircuitBreakerConfig;
use secrecy::SecretString;
use serde::Deserialize;

pub const SANDBOX_CORE_URL: &str = "https://api.sandbox.midtrans.com";
pub const SANDBOX_SNAP_URL: &str = "https://app.sandbox.midtrans.com";

/// Connection settings for the Midtrans APIs
///
/// ```rust,ignore
/// let config = MidtransConfig {
///     server_key: SecretString::new(std::env::var("MIDTRANS_SERVER_KEY")?),
///     ..MidtransConfig::sandbox()
/// };
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MidtransConfig {
    /// Core API base URL, used for bank transfer and bill payment charges
    #[serde(default = "default_core_url")]
    pub core_base_url: String,

    /// Snap base URL, used for card and e-wallet charges
    #[serde(default = "default_snap_url")]
    pub snap_base_url: String,

    /// Server key; used for basic auth and notification signatures
    pub server_key: SecretString,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long the payer has to complete a payment, in hours
    #[serde(default = "default_expiry_hours")]
    pub payment_expiry_hours: u32,

    /// `None` disables the breaker
    #[serde(default = "default_circuit_breaker")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl MidtransConfig {
    /// Sandbox endpoints with default limits and an empty server key
    pub fn sandbox() -> Self {
        Self {
            core_base_url: default_core_url(),
            snap_base_url: default_snap_url(),
            server_key: SecretString::new(String::new()),
            timeout_secs: default_timeout_secs(),
            payment_expiry_hours: default_expiry_hours(),
            circuit_breaker: default_circuit_breaker(),
        }
    }

    /// Points both APIs at one base URL, for tests against a local mock
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.core_base_url = url.clone();
        self.snap_base_url = url;
        self
    }

    pub fn with_server_key(mut self, key: impl Into<String>) -> Self {
        self.server_key = SecretString::new(key.into());
        self
    }
}

fn default_core_url() -> String {
    SANDBOX_CORE_URL.to_string()
}

fn default_snap_url() -> String {
    SANDBOX_SNAP_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_expiry_hours() -> u32 {
    24
}

fn default_circuit_breaker() -> Option<CircuitBreakerConfig> {
    Some(CircuitBreakerConfig::default())
}
