//! Billing Domain - Student Billing and Payment Reconciliation
//!
//! This crate decides what a school charges each student, keeps the
//! per-student payment ledger, and reconciles payment-gateway transactions
//! against it.
//!
//! # Components
//!
//! - **Catalog**: billing definitions and their dated detail items (read-only)
//! - **Resolver**: which items a student owes today, plus one donation
//! - **Ledger**: one entry per (student, detail item), unpaid until paid
//! - **Orchestrator**: groups ledger entries into a gateway charge
//! - **Reconciler**: applies gateway notifications
//! - **Sweeper**: fails transactions left pending too long
//!
//! # Status Rules
//!
//! - Ledger entries move from unpaid to paid only
//! - Transactions move from pending to paid or failed only, by
//!   compare-and-set, so concurrent writers never overwrite a final state
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{TransactionOrchestrator, CreateTransactionRequest};
//!
//! let created = orchestrator
//!     .create_transaction(CreateTransactionRequest {
//!         student_id,
//!         ledger_entry_ids: vec![january, february],
//!         payment_method_id,
//!         acting_user,
//!     })
//!     .await?;
//! ```

pub mod audit;
pub mod catalog;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod payment;
pub mod ports;
pub mod reconciler;
pub mod resolver;
pub mod sweeper;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditInfo, Deletion};
pub use catalog::{BillingDefinition, BillingDetailItem, BillingQuery, BillingType};
pub use error::BillingError;
pub use gateway::{ChargeFailure, ChargeItem, ChargeRequest, ChargeResponse, GatewayError, PaymentGatewayPort};
pub use ledger::{
    template_entry_name, BillingStudent, LedgerConfig, LedgerQuery, LedgerService, LedgerWrite,
    PaymentStatus, TemplateOutcome,
};
pub use orchestrator::{CreateTransactionRequest, CreatedTransaction, OrchestratorConfig, TransactionOrchestrator};
pub use payment::{PaymentChannel, PaymentMethod};
pub use ports::{
    BillingCatalogPort, CreationScope, LedgerPort, StudentDirectoryPort, StudentProfile, StudentStatus,
    TransactionPort,
};
pub use reconciler::{parse_gateway_time, ReconcileOutcome, VaNumber, WebhookNotification, WebhookReconciler};
pub use resolver::{BillingResolver, DonationCandidate, ResolveQuery, ResolvedBilling, ResolvedItem};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig};
pub use transaction::{
    GatewayExchange, GatewayReference, OrderId, StatusTransition, Transaction, TransactionDetail,
    TransactionHistory, TransactionStatus,
};
