//! Midtrans Adapter
//!
//! Implements `PaymentGatewayPort` against the Midtrans HTTP APIs:
//!
//! - **Core API** `POST /v2/charge` for bank transfer virtual accounts,
//!   Permata virtual accounts and Mandiri bill payment. The answer carries
//!   the payment code directly.
//! - **Snap** `POST /snap/v1/transactions` for card and e-wallet payments.
//!   The answer is a token and a hosted-page URL.
//!
//! Both use HTTP basic auth with the server key as user name. The Core API
//! reports failures in the body's `status_code` even on HTTP 200, so the
//! body is always inspected.
//!
//! # Error Handling
//!
//! - non-success `status_code` -> `GatewayError::Rejected`
//! - request timeout -> `GatewayError::Timeout`
//! - connection failure -> `GatewayError::Unreachable`
//! - unparseable or incomplete body -> `GatewayError::MalformedResponse`
//! - breaker open -> `GatewayError::CircuitOpen`
//!
//! Timeouts, connection failures and 5xx answers count against the circuit
//! breaker; rejections do not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use core_kernel::{AdapterHealth, Currency, DomainPort, HealthCheckResult, HealthCheckable};
use domain_billing::{
    parse_gateway_time, ChargeFailure, ChargeRequest, ChargeResponse, GatewayError, GatewayReference,
    PaymentChannel, PaymentGatewayPort, VaNumber, WebhookNotification,
};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::MidtransConfig;
use crate::signature;

const ADAPTER_ID: &str = "midtrans-gateway";
const CORE_CHARGE_PATH: &str = "/v2/charge";
const SNAP_TRANSACTIONS_PATH: &str = "/snap/v1/transactions";
const MAX_ITEM_NAME_LEN: usize = 50;

/// Which Midtrans API a channel is charged through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
    Core,
    Snap,
}

/// Midtrans Core API charge answer
#[derive(Debug, Deserialize)]
struct CoreChargeBody {
    status_code: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    va_numbers: Vec<VaNumber>,
    #[serde(default)]
    permata_va_number: Option<String>,
    #[serde(default)]
    biller_code: Option<String>,
    #[serde(default)]
    bill_key: Option<String>,
    #[serde(default)]
    expiry_time: Option<String>,
}

/// Snap transaction answer
#[derive(Debug, Deserialize)]
struct SnapBody {
    token: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct SnapErrorBody {
    #[serde(default)]
    error_messages: Vec<String>,
}

/// Accepted charge, before the raw payloads are attached
struct Accepted {
    reference: GatewayReference,
    expires_at: Option<DateTime<Utc>>,
    gateway_transaction_id: Option<String>,
}

/// Midtrans implementation of `PaymentGatewayPort`
///
/// ```rust,ignore
/// use infra_gateway::{MidtransAdapter, MidtransConfig};
///
/// let gateway = MidtransAdapter::new(MidtransConfig::sandbox().with_server_key(key))?;
/// let response = gateway.charge(&request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct MidtransAdapter {
    client: Client,
    config: MidtransConfig,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl MidtransAdapter {
    /// Builds the adapter and its HTTP client
    pub fn new(config: MidtransConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Unreachable(format!("cannot build HTTP client: {e}")))?;
        let circuit_breaker = config
            .circuit_breaker
            .clone()
            .map(|cb| Arc::new(CircuitBreaker::new(cb)));

        Ok(Self {
            client,
            config,
            circuit_breaker,
        })
    }

    pub fn config(&self) -> &MidtransConfig {
        &self.config
    }

    /// Checks if the circuit breaker is currently rejecting calls
    pub async fn is_circuit_open(&self) -> bool {
        match self.circuit_breaker {
            Some(ref cb) => !cb.is_available().await,
            None => false,
        }
    }

    async fn record_failure(&self) {
        if let Some(ref cb) = self.circuit_breaker {
            cb.record_failure().await;
        }
    }

    fn record_success(&self) {
        if let Some(ref cb) = self.circuit_breaker {
            cb.record_success();
        }
    }

    /// Builds the endpoint and JSON body for a charge
    fn build_charge(&self, request: &ChargeRequest) -> Result<(Api, String, Value), GatewayError> {
        if request.amount.currency() != Currency::IDR {
            return Err(GatewayError::Rejected {
                status_code: "400".to_string(),
                message: format!("unsupported currency {}", request.amount.currency()),
            });
        }
        let gross_amount = minor_units(&request.amount)?;
        let items = request
            .items
            .iter()
            .map(|item| {
                Ok(json!({
                    "id": item.id,
                    "price": minor_units(&item.price)?,
                    "quantity": 1,
                    "name": truncate(&item.name, MAX_ITEM_NAME_LEN),
                }))
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        let mut body = json!({
            "transaction_details": {
                "order_id": request.order_id.as_str(),
                "gross_amount": gross_amount,
            },
            "item_details": items,
        });
        if let Some(ref name) = request.customer_name {
            body["customer_details"] = json!({ "first_name": name });
        }

        let hours = self.config.payment_expiry_hours;
        let api = match &request.channel {
            PaymentChannel::BankTransfer { bank } => {
                body["payment_type"] = json!("bank_transfer");
                body["bank_transfer"] = json!({ "bank": bank.to_lowercase() });
                Api::Core
            }
            PaymentChannel::PermataVa => {
                body["payment_type"] = json!("bank_transfer");
                body["bank_transfer"] = json!({ "bank": "permata" });
                Api::Core
            }
            PaymentChannel::MandiriBill => {
                body["payment_type"] = json!("echannel");
                body["echannel"] = json!({ "bill_info1": "Payment:", "bill_info2": "School fees" });
                Api::Core
            }
            PaymentChannel::CreditCard => {
                body["enabled_payments"] = json!(["credit_card"]);
                body["credit_card"] = json!({ "secure": true });
                Api::Snap
            }
            PaymentChannel::EWallet { provider } => {
                body["enabled_payments"] = json!([provider.to_lowercase()]);
                Api::Snap
            }
        };

        let url = match api {
            Api::Core => {
                body["custom_expiry"] = json!({ "expiry_duration": hours, "unit": "hour" });
                format!("{}{}", self.config.core_base_url, CORE_CHARGE_PATH)
            }
            Api::Snap => {
                body["expiry"] = json!({ "unit": "hours", "duration": hours });
                format!("{}{}", self.config.snap_base_url, SNAP_TRANSACTIONS_PATH)
            }
        };
        Ok((api, url, body))
    }

    /// Posts a JSON body; a non-JSON answer is returned as a JSON string
    async fn post(&self, url: &str, body: &Value) -> Result<(u16, Value), GatewayError> {
        let response = self
            .client
            .post(url)
            .basic_auth(self.config.server_key.expose_secret(), Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(status, body = %text, "Gateway answered");

        let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok((status, value))
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(Duration::from_secs(self.config.timeout_secs))
        } else {
            GatewayError::Unreachable(e.to_string())
        }
    }

    fn default_expiry(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(i64::from(self.config.payment_expiry_hours))
    }

    fn parse_core(&self, channel: &PaymentChannel, http_status: u16, body: &Value) -> Result<Accepted, GatewayError> {
        let parsed: CoreChargeBody = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::MalformedResponse(format!("HTTP {http_status}: {e}")))?;

        if !matches!(parsed.status_code.as_str(), "200" | "201") {
            return Err(GatewayError::Rejected {
                status_code: parsed.status_code,
                message: parsed.status_message.unwrap_or_default(),
            });
        }

        let reference = match channel {
            PaymentChannel::BankTransfer { .. } => parsed.va_numbers.into_iter().next().map(|va| {
                GatewayReference::VirtualAccount {
                    bank: va.bank,
                    va_number: va.va_number,
                }
            }),
            PaymentChannel::PermataVa => parsed
                .permata_va_number
                .map(|va_number| GatewayReference::PermataVirtualAccount { va_number }),
            PaymentChannel::MandiriBill => match (parsed.biller_code, parsed.bill_key) {
                (Some(biller_code), Some(bill_key)) => Some(GatewayReference::BillPayment { biller_code, bill_key }),
                _ => None,
            },
            PaymentChannel::CreditCard | PaymentChannel::EWallet { .. } => None,
        }
        .ok_or_else(|| GatewayError::MalformedResponse("charge accepted without a payment code".to_string()))?;

        let expires_at = parsed
            .expiry_time
            .as_deref()
            .and_then(parse_gateway_time)
            .unwrap_or_else(|| self.default_expiry());

        Ok(Accepted {
            reference,
            expires_at: Some(expires_at),
            gateway_transaction_id: parsed.transaction_id,
        })
    }

    fn parse_snap(&self, http_status: u16, body: &Value) -> Result<Accepted, GatewayError> {
        if !(200..300).contains(&http_status) {
            let message = serde_json::from_value::<SnapErrorBody>(body.clone())
                .map(|e| e.error_messages.join("; "))
                .unwrap_or_else(|_| body.to_string());
            return Err(GatewayError::Rejected {
                status_code: http_status.to_string(),
                message,
            });
        }

        let parsed: SnapBody = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        Ok(Accepted {
            reference: GatewayReference::Redirect {
                token: parsed.token,
                redirect_url: parsed.redirect_url,
            },
            expires_at: Some(self.default_expiry()),
            gateway_transaction_id: None,
        })
    }
}

impl DomainPort for MidtransAdapter {}

#[async_trait]
impl HealthCheckable for MidtransAdapter {
    /// Reports the breaker state; no request is sent to the gateway
    async fn health_check(&self) -> HealthCheckResult {
        let open = self.is_circuit_open().await;
        HealthCheckResult {
            adapter_id: ADAPTER_ID.to_string(),
            status: if open { AdapterHealth::Degraded } else { AdapterHealth::Healthy },
            latency_ms: 0,
            message: open.then(|| "Circuit breaker is open".to_string()),
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl PaymentGatewayPort for MidtransAdapter {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, ChargeFailure> {
        if self.is_circuit_open().await {
            warn!("Charge short-circuited");
            return Err(GatewayError::CircuitOpen.into());
        }

        let (api, url, body) = self.build_charge(request)?;
        let (http_status, response) = match self.post(&url, &body).await {
            Ok(answer) => answer,
            Err(e) => {
                self.record_failure().await;
                warn!(error = %e, "Charge request failed");
                return Err(ChargeFailure::new(e).with_payloads(Some(body), None));
            }
        };

        let parsed = match api {
            Api::Core => self.parse_core(&request.channel, http_status, &response),
            Api::Snap => self.parse_snap(http_status, &response),
        };

        match parsed {
            Ok(accepted) => {
                self.record_success();
                info!(gateway_transaction_id = ?accepted.gateway_transaction_id, "Charge accepted");
                Ok(ChargeResponse {
                    reference: accepted.reference,
                    expires_at: accepted.expires_at,
                    gateway_transaction_id: accepted.gateway_transaction_id,
                    raw_request: body,
                    raw_response: response,
                })
            }
            Err(e) => {
                if is_server_side(http_status, &e) {
                    self.record_failure().await;
                } else {
                    self.record_success();
                }
                warn!(error = %e, http_status, "Charge not accepted");
                Err(ChargeFailure::new(e).with_payloads(Some(body), Some(response)))
            }
        }
    }

    fn verify_notification(&self, notification: &WebhookNotification) -> bool {
        signature::verify(notification, self.config.server_key.expose_secret())
    }
}

fn minor_units(amount: &core_kernel::Money) -> Result<i64, GatewayError> {
    amount.to_minor_units().map_err(|e| GatewayError::Rejected {
        status_code: "400".to_string(),
        message: e.to_string(),
    })
}

fn truncate(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}

fn is_server_side(http_status: u16, error: &GatewayError) -> bool {
    http_status >= 500
        || matches!(error, GatewayError::Rejected { status_code, .. } if status_code.starts_with('5'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Money;
    use domain_billing::{ChargeItem, OrderId};

    fn adapter() -> MidtransAdapter {
        MidtransAdapter::new(MidtransConfig::sandbox().with_server_key("key")).unwrap()
    }

    fn request(channel: PaymentChannel) -> ChargeRequest {
        ChargeRequest {
            order_id: OrderId::new("ORDER-1"),
            amount: Money::idr(300_000),
            channel,
            items: vec![
                ChargeItem {
                    id: "a".into(),
                    name: "SPP Januari - NIS-1001".into(),
                    price: Money::idr(150_000),
                },
                ChargeItem {
                    id: "b".into(),
                    name: "SPP Februari - NIS-1001".into(),
                    price: Money::idr(150_000),
                },
            ],
            customer_name: Some("Siti".into()),
        }
    }

    #[test]
    fn test_bank_transfer_goes_to_core_api() {
        let (api, url, body) = adapter()
            .build_charge(&request(PaymentChannel::BankTransfer { bank: "BNI".into() }))
            .unwrap();

        assert_eq!(api, Api::Core);
        assert!(url.ends_with("/v2/charge"));
        assert_eq!(body["payment_type"], "bank_transfer");
        assert_eq!(body["bank_transfer"]["bank"], "bni");
        assert_eq!(body["transaction_details"]["gross_amount"], 300_000);
        assert_eq!(body["item_details"][1]["price"], 150_000);
    }

    #[test]
    fn test_mandiri_bill_uses_echannel() {
        let (_, _, body) = adapter().build_charge(&request(PaymentChannel::MandiriBill)).unwrap();
        assert_eq!(body["payment_type"], "echannel");
        assert!(body["echannel"]["bill_info1"].is_string());
    }

    #[test]
    fn test_card_goes_to_snap() {
        let (api, url, body) = adapter().build_charge(&request(PaymentChannel::CreditCard)).unwrap();
        assert_eq!(api, Api::Snap);
        assert!(url.ends_with("/snap/v1/transactions"));
        assert_eq!(body["enabled_payments"][0], "credit_card");
        assert!(body.get("payment_type").is_none());
    }

    #[test]
    fn test_non_rupiah_is_rejected_locally() {
        let mut req = request(PaymentChannel::PermataVa);
        req.amount = Money::from_minor(1000, Currency::USD);
        assert!(matches!(adapter().build_charge(&req), Err(GatewayError::Rejected { .. })));
    }

    #[test]
    fn test_item_names_are_truncated() {
        assert_eq!(truncate(&"x".repeat(80), MAX_ITEM_NAME_LEN).len(), 50);
        assert_eq!(truncate("SPP", MAX_ITEM_NAME_LEN), "SPP");
    }

    #[test]
    fn test_core_rejection_in_body_of_http_200() {
        let body = json!({ "status_code": "406", "status_message": "Duplicate order ID" });
        let err = adapter()
            .parse_core(&PaymentChannel::PermataVa, 200, &body)
            .err()
            .unwrap();
        assert_eq!(
            err,
            GatewayError::Rejected {
                status_code: "406".into(),
                message: "Duplicate order ID".into()
            }
        );
        assert!(!is_server_side(200, &err));
    }

    #[test]
    fn test_core_accept_without_code_is_malformed() {
        let body = json!({ "status_code": "201", "transaction_status": "pending" });
        let err = adapter()
            .parse_core(&PaymentChannel::MandiriBill, 200, &body)
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::MalformedResponse(_)));
    }
}
