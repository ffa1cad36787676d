//! Payment gateway port
//!
//! The orchestrator charges through this port and the webhook transport
//! verifies notifications with it. Adapters report the raw payloads they
//! exchanged so every call can be audited whether it succeeded or not.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use core_kernel::{DomainPort, Money};

use crate::payment::PaymentChannel;
use crate::reconciler::WebhookNotification;
use crate::transaction::{GatewayReference, OrderId};

/// Errors reported by a payment gateway
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway answered with a non-success status
    #[error("Gateway rejected charge ({status_code}): {message}")]
    Rejected { status_code: String, message: String },

    /// No answer within the configured bound
    #[error("Gateway timed out after {0:?}")]
    Timeout(Duration),

    /// The gateway could not be reached
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    /// The gateway answered with something we cannot interpret
    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),

    /// Calls are short-circuited after repeated failures
    #[error("Gateway circuit breaker is open")]
    CircuitOpen,
}

/// Line item sent along with a charge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeItem {
    pub id: String,
    pub name: String,
    pub price: Money,
}

/// A request to open a payment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub channel: PaymentChannel,
    pub items: Vec<ChargeItem>,
    pub customer_name: Option<String>,
}

/// An accepted charge
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeResponse {
    pub reference: GatewayReference,
    pub expires_at: Option<DateTime<Utc>>,
    /// Gateway's own transaction id, when it reports one
    pub gateway_transaction_id: Option<String>,
    pub raw_request: serde_json::Value,
    pub raw_response: serde_json::Value,
}

/// A failed charge with whatever payloads were exchanged before it failed
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ChargeFailure {
    pub error: GatewayError,
    pub raw_request: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
}

impl ChargeFailure {
    pub fn new(error: GatewayError) -> Self {
        Self {
            error,
            raw_request: None,
            raw_response: None,
        }
    }

    pub fn with_payloads(
        mut self,
        request: Option<serde_json::Value>,
        response: Option<serde_json::Value>,
    ) -> Self {
        self.raw_request = request;
        self.raw_response = response;
        self
    }
}

impl From<GatewayError> for ChargeFailure {
    fn from(error: GatewayError) -> Self {
        ChargeFailure::new(error)
    }
}

/// Port to an external payment gateway
#[async_trait]
pub trait PaymentGatewayPort: DomainPort {
    /// Opens a payment for the order
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, ChargeFailure>;

    /// Returns true if the notification's signature is authentic
    fn verify_notification(&self, notification: &WebhookNotification) -> bool;
}
