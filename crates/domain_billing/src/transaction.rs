//! Payment transactions
//!
//! A transaction groups ledger entries that a payer settles in one gateway
//! charge. It starts `pending` and ends either `paid` or `failed`; terminal
//! states never change again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use core_kernel::{
    BillingStudentId, GatewayExchangeId, Money, PaymentMethodId, StudentId, TransactionHistoryId,
    TransactionId, UserId,
};

use crate::audit::AuditInfo;

/// Gateway-facing order identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates `ORDER-<epoch millis>-<random>`
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(format!("ORDER-{}-{}", now.timestamp_millis(), random_suffix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates the human-facing reference (invoice) number
pub fn generate_reference_number(now: DateTime<Utc>) -> String {
    format!("INV-{}-{}", now.format("%Y%m%d%H%M%S%3f"), random_suffix().to_uppercase())
}

fn random_suffix() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..8].to_string()
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Only pending transactions may move, and only to a terminal state
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Paid)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }

    /// Maps a gateway `transaction_status` value
    ///
    /// Returns `None` for values the engine does not act on, such as
    /// `deny` or `refund`.
    pub fn from_gateway(status: &str) -> Option<Self> {
        match status {
            "settlement" | "capture" => Some(TransactionStatus::Paid),
            "expire" | "failure" | "cancel" => Some(TransactionStatus::Failed),
            "pending" => Some(TransactionStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "paid" => Ok(TransactionStatus::Paid),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Where the payer completes the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayReference {
    VirtualAccount { bank: String, va_number: String },
    PermataVirtualAccount { va_number: String },
    BillPayment { biller_code: String, bill_key: String },
    Redirect { token: String, redirect_url: String },
}

/// A payment attempt over one or more ledger entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub student_id: StudentId,
    pub order_id: OrderId,
    /// Referenced entries in the order the payer selected them
    pub ledger_entry_ids: Vec<BillingStudentId>,
    pub total: Money,
    pub status: TransactionStatus,
    pub reference_number: String,
    pub gateway_reference: Option<GatewayReference>,
    pub expires_at: Option<DateTime<Utc>>,
    pub audit: AuditInfo,
}

impl Transaction {
    /// Creates a pending transaction
    pub fn pending(
        student_id: StudentId,
        ledger_entry_ids: Vec<BillingStudentId>,
        total: Money,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new_v7(),
            student_id,
            order_id: OrderId::generate(now),
            ledger_entry_ids,
            total,
            status: TransactionStatus::Pending,
            reference_number: generate_reference_number(now),
            gateway_reference: None,
            expires_at: None,
            audit: AuditInfo::created_at(now, Some(created_by)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Payment channel details of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub transaction_id: TransactionId,
    pub payment_method_id: PaymentMethodId,
    pub bank: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Append-only audit row, one per observed status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHistory {
    pub id: TransactionHistoryId,
    pub transaction_id: TransactionId,
    pub order_id: OrderId,
    pub status: TransactionStatus,
    /// Always the transaction's reference number
    pub invoice_number: String,
    pub recorded_at: DateTime<Utc>,
}

impl TransactionHistory {
    pub fn record(transaction: &Transaction, status: TransactionStatus, at: DateTime<Utc>) -> Self {
        Self {
            id: TransactionHistoryId::new_v7(),
            transaction_id: transaction.id,
            order_id: transaction.order_id.clone(),
            status,
            invoice_number: transaction.reference_number.clone(),
            recorded_at: at,
        }
    }
}

/// A guarded status change
///
/// Adapters apply it only while the stored status is still `pending`,
/// together with the history row and, for payments, the payment timestamp.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub transaction_id: TransactionId,
    pub to: TransactionStatus,
    pub history: TransactionHistory,
    pub gateway_reference: Option<GatewayReference>,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl StatusTransition {
    pub fn new(transaction: &Transaction, to: TransactionStatus, at: DateTime<Utc>) -> Self {
        Self {
            transaction_id: transaction.id,
            to,
            history: TransactionHistory::record(transaction, to, at),
            gateway_reference: None,
            expires_at: None,
            paid_at: (to == TransactionStatus::Paid).then_some(at),
        }
    }

    pub fn with_gateway_reference(mut self, reference: Option<GatewayReference>, expires_at: Option<DateTime<Utc>>) -> Self {
        self.gateway_reference = reference;
        self.expires_at = expires_at;
        self
    }

    pub fn paid_at(mut self, at: DateTime<Utc>) -> Self {
        if self.to == TransactionStatus::Paid {
            self.paid_at = Some(at);
        }
        self
    }
}

/// Raw payloads of one gateway call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayExchange {
    pub id: GatewayExchangeId,
    pub order_id: OrderId,
    pub operation: String,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
