//! Transaction orchestrator
//!
//! Turns a payer's selection of ledger entries into a pending transaction
//! and opens the matching payment at the gateway. The transaction and its
//! first history row become visible only once the gateway has accepted the
//! charge; any failure along the way leaves nothing behind except the
//! audit record of the gateway exchange.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use core_kernel::{BillingStudentId, GatewayExchangeId, Money, PaymentMethodId, StudentId, UserId};

use crate::error::BillingError;
use crate::gateway::{ChargeFailure, ChargeItem, ChargeRequest, ChargeResponse, GatewayError, PaymentGatewayPort};
use crate::ledger::BillingStudent;
use crate::payment::PaymentMethod;
use crate::ports::{BillingCatalogPort, CreationScope, LedgerPort, TransactionPort};
use crate::transaction::{
    GatewayExchange, Transaction, TransactionDetail, TransactionHistory, TransactionStatus,
};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on the synchronous gateway call
    pub gateway_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(30),
        }
    }
}

/// A payer's request to pay a set of ledger entries
#[derive(Debug, Clone)]
pub struct CreateTransactionRequest {
    pub student_id: StudentId,
    pub ledger_entry_ids: Vec<BillingStudentId>,
    pub payment_method_id: PaymentMethodId,
    pub acting_user: UserId,
}

/// A committed pending transaction
#[derive(Debug, Clone)]
pub struct CreatedTransaction {
    pub transaction: Transaction,
    pub detail: TransactionDetail,
}

/// Creates transactions and charges them at the gateway
pub struct TransactionOrchestrator {
    catalog: Arc<dyn BillingCatalogPort>,
    ledger: Arc<dyn LedgerPort>,
    transactions: Arc<dyn TransactionPort>,
    gateway: Arc<dyn PaymentGatewayPort>,
    config: OrchestratorConfig,
}

impl TransactionOrchestrator {
    pub fn new(
        catalog: Arc<dyn BillingCatalogPort>,
        ledger: Arc<dyn LedgerPort>,
        transactions: Arc<dyn TransactionPort>,
        gateway: Arc<dyn PaymentGatewayPort>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog,
            ledger,
            transactions,
            gateway,
            config,
        }
    }

    /// Creates a pending transaction over the selected ledger entries
    ///
    /// # Errors
    ///
    /// Validation errors are returned before anything is persisted. Gateway
    /// errors, including the configured timeout, roll the creation back.
    #[instrument(skip(self, request), fields(student_id = %request.student_id, entries = request.ledger_entry_ids.len()))]
    pub async fn create_transaction(&self, request: CreateTransactionRequest) -> Result<CreatedTransaction, BillingError> {
        let entries = self.validate_entries(&request).await?;
        let method = self
            .catalog
            .get_payment_method(request.payment_method_id)
            .await?
            .ok_or(BillingError::PaymentMethodNotFound(request.payment_method_id))?;

        let currency = entries[0].amount.currency();
        let total = Money::checked_sum(entries.iter().map(|e| &e.amount), currency)?;
        if !total.is_positive() {
            return Err(BillingError::Validation(format!("transaction total must be positive, got {total}")));
        }

        let now = Utc::now();
        let mut transaction = Transaction::pending(
            request.student_id,
            request.ledger_entry_ids.clone(),
            total,
            request.acting_user,
            now,
        );
        let detail = TransactionDetail {
            transaction_id: transaction.id,
            payment_method_id: method.id,
            bank: method.channel.bank_name(),
            paid_at: None,
        };

        let mut scope = self.transactions.begin_creation().await?;
        if let Err(e) = stage(scope.as_mut(), &transaction, &detail, now).await {
            discard(scope).await;
            return Err(e.into());
        }

        let charge = charge_request(&transaction, &method, &entries);
        let outcome = self.call_gateway(&charge).await;
        self.record_exchange(&charge, &outcome, now).await;

        let response = match outcome {
            Ok(response) => response,
            Err(failure) => {
                discard(scope).await;
                warn!(order_id = %transaction.order_id, error = %failure.error, "Gateway charge failed");
                return Err(BillingError::Gateway(failure.error));
            }
        };

        if let Err(e) = scope
            .attach_gateway_reference(transaction.id, &response.reference, response.expires_at)
            .await
        {
            discard(scope).await;
            return Err(e.into());
        }
        scope.commit().await?;

        transaction.gateway_reference = Some(response.reference);
        transaction.expires_at = response.expires_at;

        info!(
            order_id = %transaction.order_id,
            total = %transaction.total,
            status = %transaction.status,
            "Transaction created"
        );
        Ok(CreatedTransaction { transaction, detail })
    }

    async fn validate_entries(&self, request: &CreateTransactionRequest) -> Result<Vec<BillingStudent>, BillingError> {
        if request.ledger_entry_ids.is_empty() {
            return Err(BillingError::Validation("no ledger entries selected".to_string()));
        }
        let mut seen = HashSet::new();
        for id in &request.ledger_entry_ids {
            if !seen.insert(*id) {
                return Err(BillingError::Validation(format!("ledger entry {id} selected twice")));
            }
        }

        let found = self.ledger.get_entries(&request.ledger_entry_ids).await?;
        let mut ordered = Vec::with_capacity(request.ledger_entry_ids.len());
        for id in &request.ledger_entry_ids {
            let entry = found
                .iter()
                .find(|e| e.id == *id && !e.is_deleted())
                .ok_or(BillingError::LedgerEntryNotFound(*id))?;
            if entry.student_id != request.student_id {
                return Err(BillingError::LedgerEntryNotOwned {
                    entry_id: *id,
                    student_id: request.student_id,
                });
            }
            if entry.is_paid() {
                return Err(BillingError::LedgerEntryAlreadyPaid(*id));
            }
            ordered.push(entry.clone());
        }
        Ok(ordered)
    }

    async fn call_gateway(&self, charge: &ChargeRequest) -> Result<ChargeResponse, ChargeFailure> {
        match tokio::time::timeout(self.config.gateway_timeout, self.gateway.charge(charge)).await {
            Ok(result) => result,
            Err(_) => Err(ChargeFailure::new(GatewayError::Timeout(self.config.gateway_timeout))),
        }
    }

    async fn record_exchange(
        &self,
        charge: &ChargeRequest,
        outcome: &Result<ChargeResponse, ChargeFailure>,
        at: DateTime<Utc>,
    ) {
        let fallback_request = || serde_json::to_value(charge).unwrap_or(serde_json::Value::Null);
        let (request, response, error) = match outcome {
            Ok(ok) => (ok.raw_request.clone(), Some(ok.raw_response.clone()), None),
            Err(failure) => (
                failure.raw_request.clone().unwrap_or_else(fallback_request),
                failure.raw_response.clone(),
                Some(failure.error.to_string()),
            ),
        };

        let exchange = GatewayExchange {
            id: GatewayExchangeId::new_v7(),
            order_id: charge.order_id.clone(),
            operation: "charge".to_string(),
            request,
            response,
            error,
            recorded_at: at,
        };
        if let Err(e) = self.transactions.log_gateway_exchange(&exchange).await {
            error!(order_id = %charge.order_id, error = %e, "Failed to record gateway exchange");
        }
    }
}

async fn stage(
    scope: &mut dyn CreationScope,
    transaction: &Transaction,
    detail: &TransactionDetail,
    now: DateTime<Utc>,
) -> Result<(), core_kernel::PortError> {
    scope.stage_transaction(transaction, detail).await?;
    scope
        .stage_history(&TransactionHistory::record(transaction, TransactionStatus::Pending, now))
        .await
}

async fn discard(scope: Box<dyn CreationScope>) {
    if let Err(e) = scope.rollback().await {
        error!(error = %e, "Failed to roll back transaction creation");
    }
}

fn charge_request(transaction: &Transaction, method: &PaymentMethod, entries: &[BillingStudent]) -> ChargeRequest {
    ChargeRequest {
        order_id: transaction.order_id.clone(),
        amount: transaction.total,
        channel: method.channel.clone(),
        items: entries
            .iter()
            .map(|e| ChargeItem {
                id: e.id.as_uuid().to_string(),
                name: e.name.clone(),
                price: e.amount,
            })
            .collect(),
        customer_name: None,
    }
}
