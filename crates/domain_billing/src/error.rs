//! Billing domain errors

use thiserror::Error;

use core_kernel::{
    BillingDetailId, BillingId, BillingStudentId, MoneyError, PaymentMethodId, PortError,
    StudentId,
};

use crate::gateway::GatewayError;
use crate::transaction::TransactionStatus;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Input rejected before anything was persisted
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ledger entry is missing or soft-deleted
    #[error("Ledger entry not found: {0}")]
    LedgerEntryNotFound(BillingStudentId),

    /// Ledger entry belongs to a different student
    #[error("Ledger entry {entry_id} does not belong to student {student_id}")]
    LedgerEntryNotOwned {
        entry_id: BillingStudentId,
        student_id: StudentId,
    },

    /// Ledger entry has already been paid
    #[error("Ledger entry already paid: {0}")]
    LedgerEntryAlreadyPaid(BillingStudentId),

    /// Payment method not found
    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(PaymentMethodId),

    /// Billing definition not found or deleted
    #[error("Billing not found: {0}")]
    BillingNotFound(BillingId),

    /// Student not found
    #[error("Student not found: {0}")]
    StudentNotFound(StudentId),

    /// Student already has a ledger entry for this billing item
    #[error("Duplicate assignment: student {student_id} already assigned billing {billing_id} (detail {detail_id:?})")]
    DuplicateAssignment {
        student_id: StudentId,
        billing_id: BillingId,
        detail_id: Option<BillingDetailId>,
    },

    /// Payment gateway failed or refused the charge
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// No transaction carries this order id
    #[error("Transaction not found for order {0}")]
    TransactionNotFound(String),

    /// Gateway status string has no mapping
    #[error("Unknown gateway status: {0}")]
    UnknownStatus(String),

    /// Terminal transaction received a conflicting status
    #[error("Transaction {order_id} is already {current}, refusing {requested}")]
    TransactionFinalized {
        order_id: String,
        current: TransactionStatus,
        requested: TransactionStatus,
    },

    /// Notification signature did not verify
    #[error("Invalid notification signature for order {0}")]
    InvalidSignature(String),

    /// Stored data breaks a uniqueness invariant
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Persistence or collaborator failure
    #[error("Port error: {0}")]
    Port(#[from] PortError),
}

impl From<MoneyError> for BillingError {
    fn from(err: MoneyError) -> Self {
        BillingError::Validation(err.to_string())
    }
}

impl BillingError {
    /// Returns true if the caller sent something the engine refuses outright
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::Validation(_)
                | BillingError::LedgerEntryNotFound(_)
                | BillingError::LedgerEntryNotOwned { .. }
                | BillingError::LedgerEntryAlreadyPaid(_)
                | BillingError::PaymentMethodNotFound(_)
                | BillingError::BillingNotFound(_)
                | BillingError::StudentNotFound(_)
                | BillingError::DuplicateAssignment { .. }
                | BillingError::TransactionNotFound(_)
                | BillingError::UnknownStatus(_)
                | BillingError::InvalidSignature(_)
        )
    }
}
