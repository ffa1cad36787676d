//! PostgreSQL Billing Adapter
//!
//! Internal (database) adapter for the billing domain. One adapter value
//! implements every persistence port the engine needs:
//!
//! - `BillingCatalogPort` and `StudentDirectoryPort` (read-only)
//! - `LedgerPort`
//! - `TransactionPort`, including the creation scope that keeps a new
//!   transaction invisible until the gateway has answered
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingAdapter;
//! use std::sync::Arc;
//!
//! let store = Arc::new(PostgresBillingAdapter::new(pool));
//! let resolver = BillingResolver::new(store.clone(), store.clone(), store.clone(), store.clone());
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use core_kernel::{
    AdapterHealth, BillingDetailId, BillingId, BillingStudentId, Currency, DomainPort, HealthCheckResult,
    HealthCheckable, Money, PaymentMethodId, PortError, StudentId, TransactionId, UserId,
};
use domain_billing::{
    AuditInfo, BillingCatalogPort, BillingDefinition, BillingDetailItem, BillingQuery, BillingStudent,
    BillingType, CreationScope, Deletion, GatewayExchange, GatewayReference, LedgerPort, LedgerQuery,
    LedgerWrite, OrderId, PaymentChannel, PaymentMethod, PaymentStatus, StatusTransition,
    StudentDirectoryPort, StudentProfile, StudentStatus, Transaction, TransactionDetail,
    TransactionHistory, TransactionPort, TransactionStatus,
};

use crate::error::{db_to_port_error, DatabaseError};
use crate::repositories::catalog::{
    BillingDetailRow, BillingFilter, BillingRow, BillingType as DbBillingType, CatalogRepository,
    PaymentMethodRow, StudentRow, StudentStatus as DbStudentStatus,
};
use crate::repositories::ledger::{
    BillingStudentRow, BillingStudentUpdate, EntryBatch, EntryFilter, LedgerRepository, NewBillingStudent,
    PaymentStatus as DbPaymentStatus,
};
use crate::repositories::transaction::{
    GatewayExchangeRow, StatusChange, TransactionDetailRow, TransactionHistoryRow, TransactionRepository,
    TransactionRow, TransactionStatus as DbTransactionStatus,
};

const ADAPTER_ID: &str = "postgres-billing-adapter";

/// PostgreSQL-backed implementation of the billing persistence ports
///
/// Database errors are translated to `PortError`:
/// - unique violations become `Conflict`
/// - check and foreign key violations become `Validation`
/// - undecodable stored values become `Transformation`
#[derive(Debug, Clone)]
pub struct PostgresBillingAdapter {
    catalog: CatalogRepository,
    ledger: LedgerRepository,
    transactions: TransactionRepository,
    pool: PgPool,
}

impl PostgresBillingAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            catalog: CatalogRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool.clone()),
            pool,
        }
    }
}

impl DomainPort for PostgresBillingAdapter {}

#[async_trait]
impl HealthCheckable for PostgresBillingAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(_) => (AdapterHealth::Healthy, None),
            Err(e) => (AdapterHealth::Unhealthy, Some(format!("Database error: {}", e))),
        };
        HealthCheckResult {
            adapter_id: ADAPTER_ID.to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl BillingCatalogPort for PostgresBillingAdapter {
    #[instrument(skip(self, query), fields(school_id = %query.school_id))]
    async fn find_definitions(&self, query: &BillingQuery) -> Result<Vec<BillingDefinition>, PortError> {
        let filter = BillingFilter {
            school_id: query.school_id.into(),
            school_year_id: query.school_year_id.map(Into::into),
            grade_id: query.grade_id.map(Into::into),
            class_ids: query
                .class_ids
                .as_ref()
                .map(|classes| classes.iter().map(|c| *c.as_uuid()).collect()),
            is_donation: query.is_donation,
            include_deleted: query.include_deleted,
        };
        let rows = self.catalog.find_billings(&filter).await.map_err(db_to_port_error)?;
        debug!(count = rows.len(), "Loaded billing definitions");
        rows.into_iter().map(row_to_definition).collect()
    }

    async fn get_definition(&self, id: BillingId) -> Result<Option<BillingDefinition>, PortError> {
        self.catalog
            .get_billing(id.into())
            .await
            .map_err(db_to_port_error)?
            .map(row_to_definition)
            .transpose()
    }

    async fn details_for(&self, billing_id: BillingId) -> Result<Vec<BillingDetailItem>, PortError> {
        self.catalog
            .get_details(billing_id.into())
            .await
            .map_err(db_to_port_error)?
            .into_iter()
            .map(row_to_detail)
            .collect()
    }

    async fn get_payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>, PortError> {
        self.catalog
            .get_payment_method(id.into())
            .await
            .map_err(db_to_port_error)?
            .map(row_to_payment_method)
            .transpose()
    }
}

#[async_trait]
impl StudentDirectoryPort for PostgresBillingAdapter {
    async fn get_student(&self, id: StudentId) -> Result<Option<StudentProfile>, PortError> {
        Ok(self
            .catalog
            .get_student(id.into())
            .await
            .map_err(db_to_port_error)?
            .map(row_to_student))
    }
}

#[async_trait]
impl LedgerPort for PostgresBillingAdapter {
    #[instrument(skip(self, query))]
    async fn find_entries(&self, query: &LedgerQuery) -> Result<Vec<BillingStudent>, PortError> {
        let filter = EntryFilter {
            student_id: query.student_id.map(Into::into),
            billing_id: query.billing_id.map(Into::into),
            billing_detail_id: query.billing_detail_id.map(Into::into),
            payment_status: query.payment_status.map(domain_to_db_payment_status),
            name_contains: query.name_contains.clone(),
            include_deleted: query.include_deleted,
        };
        let rows = self.ledger.find(&filter).await.map_err(db_to_port_error)?;
        rows.into_iter().map(row_to_entry).collect()
    }

    async fn get_entries(&self, ids: &[BillingStudentId]) -> Result<Vec<BillingStudent>, PortError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = self.ledger.get_many(&ids).await.map_err(db_to_port_error)?;
        rows.into_iter().map(row_to_entry).collect()
    }

    async fn exists(
        &self,
        student_id: StudentId,
        billing_id: BillingId,
        detail_id: Option<BillingDetailId>,
    ) -> Result<bool, PortError> {
        self.ledger
            .exists(student_id.into(), billing_id.into(), detail_id.map(Into::into))
            .await
            .map_err(db_to_port_error)
    }

    #[instrument(skip(self, batches), fields(batches = batches.len()))]
    async fn commit_writes(&self, batches: Vec<Vec<LedgerWrite>>) -> Result<u64, PortError> {
        let batches = batches
            .into_iter()
            .map(|writes| {
                let mut batch = EntryBatch::default();
                for write in writes {
                    match write {
                        LedgerWrite::Insert(entry) => batch.inserts.push(entry_to_insert(&entry)),
                        LedgerWrite::Update(entry) => batch.updates.push(entry_to_update(&entry)),
                    }
                }
                batch
            })
            .collect();

        let written = self.ledger.apply_batches(batches).await.map_err(db_to_port_error)?;
        debug!(written, "Committed ledger writes");
        Ok(written)
    }

    async fn soft_delete(&self, id: BillingStudentId, deletion: Deletion) -> Result<bool, PortError> {
        self.ledger
            .soft_delete(id.into(), deletion.deleted_at, deletion.deleted_by.into())
            .await
            .map_err(db_to_port_error)
    }

    async fn mark_paid(&self, ids: &[BillingStudentId], at: DateTime<Utc>) -> Result<u64, PortError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        self.ledger.mark_paid(&ids, at).await.map_err(db_to_port_error)
    }
}

/// Creation scope over an open database transaction
///
/// Dropping the scope without committing rolls the database transaction
/// back. The scope holds one pooled connection until it is committed,
/// rolled back or dropped, which during a charge is bounded by the
/// orchestrator's gateway timeout. Size the pool for the expected number
/// of concurrent charges plus the webhook and sweeper load.
pub struct PgCreationScope {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl CreationScope for PgCreationScope {
    async fn stage_transaction(&mut self, transaction: &Transaction, detail: &TransactionDetail) -> Result<(), PortError> {
        let row = transaction_to_row(transaction)?;
        TransactionRepository::insert(&mut *self.tx, &row, &detail_to_row(detail))
            .await
            .map_err(db_to_port_error)
    }

    async fn stage_history(&mut self, history: &TransactionHistory) -> Result<(), PortError> {
        TransactionRepository::insert_history(&mut *self.tx, &history_to_row(history))
            .await
            .map_err(db_to_port_error)
    }

    async fn attach_gateway_reference(
        &mut self,
        transaction_id: TransactionId,
        reference: &GatewayReference,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), PortError> {
        let reference = to_json(reference)?;
        TransactionRepository::set_gateway_reference(&mut *self.tx, transaction_id.into(), &reference, expires_at)
            .await
            .map_err(db_to_port_error)
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_to_port_error(DatabaseError::from(e)))
    }

    async fn rollback(self: Box<Self>) -> Result<(), PortError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| db_to_port_error(DatabaseError::from(e)))
    }
}

#[async_trait]
impl TransactionPort for PostgresBillingAdapter {
    async fn begin_creation(&self) -> Result<Box<dyn CreationScope>, PortError> {
        let tx = self
            .transactions
            .pool()
            .begin()
            .await
            .map_err(|e| db_to_port_error(DatabaseError::from(e)))?;
        Ok(Box::new(PgCreationScope { tx }))
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Transaction>, PortError> {
        self.transactions
            .find_by_order_id(order_id.as_str())
            .await
            .map_err(db_to_port_error)?
            .map(row_to_transaction)
            .transpose()
    }

    async fn get_detail(&self, transaction_id: TransactionId) -> Result<Option<TransactionDetail>, PortError> {
        Ok(self
            .transactions
            .get_detail(transaction_id.into())
            .await
            .map_err(db_to_port_error)?
            .map(row_to_detail_record))
    }

    async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> Result<Vec<Transaction>, PortError> {
        self.transactions
            .find_stale_pending(created_before)
            .await
            .map_err(db_to_port_error)?
            .into_iter()
            .map(row_to_transaction)
            .collect()
    }

    #[instrument(skip(self, transition), fields(transaction_id = %transition.transaction_id, to = %transition.to))]
    async fn transition(&self, transition: &StatusTransition) -> Result<bool, PortError> {
        let change = StatusChange {
            transaction_id: transition.transaction_id.into(),
            to: domain_to_db_transaction_status(transition.to),
            history: history_to_row(&transition.history),
            gateway_reference: transition.gateway_reference.as_ref().map(to_json).transpose()?,
            expires_at: transition.expires_at,
            paid_at: transition.paid_at,
        };
        let applied = self.transactions.transition(&change).await.map_err(db_to_port_error)?;
        if !applied {
            warn!("Conditional status update lost; transaction no longer pending");
        }
        Ok(applied)
    }

    #[instrument(skip(self, reference), fields(transaction_id = %transaction_id))]
    async fn record_gateway_reference(
        &self,
        transaction_id: TransactionId,
        reference: Option<&GatewayReference>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PortError> {
        let reference = reference.map(to_json).transpose()?;
        self.transactions
            .record_reference(transaction_id.into(), reference, expires_at, Utc::now())
            .await
            .map_err(db_to_port_error)
    }

    async fn append_history(&self, history: &TransactionHistory) -> Result<(), PortError> {
        self.transactions
            .append_history(&history_to_row(history))
            .await
            .map_err(db_to_port_error)
    }

    async fn history_for(&self, transaction_id: TransactionId) -> Result<Vec<TransactionHistory>, PortError> {
        Ok(self
            .transactions
            .history_for(transaction_id.into())
            .await
            .map_err(db_to_port_error)?
            .into_iter()
            .map(row_to_history)
            .collect())
    }

    async fn has_open_transaction_for_entry(&self, entry_id: BillingStudentId) -> Result<bool, PortError> {
        self.transactions
            .has_open_for_entry(entry_id.into())
            .await
            .map_err(db_to_port_error)
    }

    async fn log_gateway_exchange(&self, exchange: &GatewayExchange) -> Result<(), PortError> {
        let row = GatewayExchangeRow {
            exchange_id: exchange.id.into(),
            order_id: exchange.order_id.as_str().to_string(),
            operation: exchange.operation.clone(),
            request: exchange.request.clone(),
            response: exchange.response.clone(),
            error: exchange.error.clone(),
            recorded_at: exchange.recorded_at,
        };
        self.transactions.log_exchange(&row).await.map_err(db_to_port_error)
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn money(amount: rust_decimal::Decimal, currency: &str) -> Result<Money, PortError> {
    let currency: Currency = currency.trim().parse().map_err(|e: core_kernel::MoneyError| PortError::Transformation {
        message: e.to_string(),
    })?;
    Ok(Money::new(amount, currency))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, PortError> {
    serde_json::to_value(value).map_err(|e| PortError::Transformation { message: e.to_string() })
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, PortError> {
    serde_json::from_value(value).map_err(|e| PortError::Transformation { message: e.to_string() })
}

fn audit(
    created_at: DateTime<Utc>,
    created_by: Option<Uuid>,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<Uuid>,
) -> AuditInfo {
    AuditInfo {
        created_at,
        created_by: created_by.map(UserId::from),
        updated_at,
        updated_by: updated_by.map(UserId::from),
    }
}

fn deletion(deleted_at: Option<DateTime<Utc>>, deleted_by: Option<Uuid>) -> Option<Deletion> {
    deleted_at.map(|at| Deletion {
        deleted_at: at,
        deleted_by: UserId::from(deleted_by.unwrap_or_else(Uuid::nil)),
    })
}

fn row_to_definition(row: BillingRow) -> Result<BillingDefinition, PortError> {
    Ok(BillingDefinition {
        id: row.billing_id.into(),
        school_id: row.school_id.into(),
        school_year_id: row.school_year_id.into(),
        grade_id: row.grade_id.map(Into::into),
        class_ids: row.class_ids.into_iter().map(Into::into).collect(),
        name: row.name,
        code: row.code,
        billing_type: match row.billing_type {
            DbBillingType::Routine => BillingType::Routine,
            DbBillingType::Incidental => BillingType::Incidental,
        },
        is_donation: row.is_donation,
        amount: money(row.amount, &row.currency)?,
        audit: audit(row.created_at, row.created_by, row.updated_at, row.updated_by),
        deletion: deletion(row.deleted_at, row.deleted_by),
    })
}

fn row_to_detail(row: BillingDetailRow) -> Result<BillingDetailItem, PortError> {
    Ok(BillingDetailItem {
        id: row.billing_detail_id.into(),
        billing_id: row.billing_id.into(),
        name: row.name,
        due_date: row.due_date,
        amount: money(row.amount, &row.currency)?,
    })
}

fn row_to_payment_method(row: PaymentMethodRow) -> Result<PaymentMethod, PortError> {
    let channel: PaymentChannel = from_json(row.channel)?;
    Ok(PaymentMethod {
        id: row.payment_method_id.into(),
        code: row.code,
        name: row.name,
        channel,
    })
}

fn row_to_student(row: StudentRow) -> StudentProfile {
    StudentProfile {
        id: row.student_id.into(),
        school_id: row.school_id.into(),
        class_id: row.class_id.map(Into::into),
        code: row.code,
        name: row.name,
        status: match row.status {
            DbStudentStatus::Active => StudentStatus::Active,
            DbStudentStatus::Inactive => StudentStatus::Inactive,
        },
    }
}

fn domain_to_db_payment_status(status: PaymentStatus) -> DbPaymentStatus {
    match status {
        PaymentStatus::Unpaid => DbPaymentStatus::Unpaid,
        PaymentStatus::Paid => DbPaymentStatus::Paid,
    }
}

fn row_to_entry(row: BillingStudentRow) -> Result<BillingStudent, PortError> {
    Ok(BillingStudent {
        id: row.billing_student_id.into(),
        billing_id: row.billing_id.into(),
        billing_detail_id: row.billing_detail_id.map(Into::into),
        student_id: row.student_id.into(),
        name: row.name,
        amount: money(row.amount, &row.currency)?,
        due_date: row.due_date,
        payment_status: match row.payment_status {
            DbPaymentStatus::Unpaid => PaymentStatus::Unpaid,
            DbPaymentStatus::Paid => PaymentStatus::Paid,
        },
        audit: audit(row.created_at, row.created_by, row.updated_at, row.updated_by),
        deletion: deletion(row.deleted_at, row.deleted_by),
    })
}

fn entry_to_insert(entry: &BillingStudent) -> NewBillingStudent {
    NewBillingStudent {
        billing_student_id: entry.id.into(),
        billing_id: entry.billing_id.into(),
        billing_detail_id: entry.billing_detail_id.map(Into::into),
        student_id: entry.student_id.into(),
        name: entry.name.clone(),
        amount: entry.amount.amount(),
        currency: entry.amount.currency().code().to_string(),
        due_date: entry.due_date,
        payment_status: domain_to_db_payment_status(entry.payment_status),
        created_at: entry.audit.created_at,
        created_by: entry.audit.created_by.map(Into::into),
    }
}

fn entry_to_update(entry: &BillingStudent) -> BillingStudentUpdate {
    BillingStudentUpdate {
        billing_student_id: entry.id.into(),
        name: entry.name.clone(),
        amount: entry.amount.amount(),
        currency: entry.amount.currency().code().to_string(),
        due_date: entry.due_date,
        updated_at: entry.audit.last_modified(),
        updated_by: entry.audit.updated_by.map(Into::into),
    }
}

fn domain_to_db_transaction_status(status: TransactionStatus) -> DbTransactionStatus {
    match status {
        TransactionStatus::Pending => DbTransactionStatus::Pending,
        TransactionStatus::Paid => DbTransactionStatus::Paid,
        TransactionStatus::Failed => DbTransactionStatus::Failed,
    }
}

fn db_to_domain_transaction_status(status: DbTransactionStatus) -> TransactionStatus {
    match status {
        DbTransactionStatus::Pending => TransactionStatus::Pending,
        DbTransactionStatus::Paid => TransactionStatus::Paid,
        DbTransactionStatus::Failed => TransactionStatus::Failed,
    }
}

fn transaction_to_row(tx: &Transaction) -> Result<TransactionRow, PortError> {
    Ok(TransactionRow {
        transaction_id: tx.id.into(),
        student_id: tx.student_id.into(),
        order_id: tx.order_id.as_str().to_string(),
        ledger_entry_ids: tx.ledger_entry_ids.iter().map(|id| *id.as_uuid()).collect(),
        total: tx.total.amount(),
        currency: tx.total.currency().code().to_string(),
        status: domain_to_db_transaction_status(tx.status),
        reference_number: tx.reference_number.clone(),
        gateway_reference: tx.gateway_reference.as_ref().map(to_json).transpose()?,
        expires_at: tx.expires_at,
        created_at: tx.audit.created_at,
        created_by: tx.audit.created_by.map(Into::into),
        updated_at: tx.audit.updated_at,
        updated_by: tx.audit.updated_by.map(Into::into),
    })
}

fn row_to_transaction(row: TransactionRow) -> Result<Transaction, PortError> {
    Ok(Transaction {
        id: row.transaction_id.into(),
        student_id: row.student_id.into(),
        order_id: OrderId::new(row.order_id),
        ledger_entry_ids: row.ledger_entry_ids.into_iter().map(Into::into).collect(),
        total: money(row.total, &row.currency)?,
        status: db_to_domain_transaction_status(row.status),
        reference_number: row.reference_number,
        gateway_reference: row.gateway_reference.map(from_json).transpose()?,
        expires_at: row.expires_at,
        audit: audit(row.created_at, row.created_by, row.updated_at, row.updated_by),
    })
}

fn detail_to_row(detail: &TransactionDetail) -> TransactionDetailRow {
    TransactionDetailRow {
        transaction_id: detail.transaction_id.into(),
        payment_method_id: detail.payment_method_id.into(),
        bank: detail.bank.clone(),
        paid_at: detail.paid_at,
    }
}

fn row_to_detail_record(row: TransactionDetailRow) -> TransactionDetail {
    TransactionDetail {
        transaction_id: row.transaction_id.into(),
        payment_method_id: row.payment_method_id.into(),
        bank: row.bank,
        paid_at: row.paid_at,
    }
}

fn history_to_row(history: &TransactionHistory) -> TransactionHistoryRow {
    TransactionHistoryRow {
        history_id: history.id.into(),
        transaction_id: history.transaction_id.into(),
        order_id: history.order_id.as_str().to_string(),
        status: domain_to_db_transaction_status(history.status),
        invoice_number: history.invoice_number.clone(),
        recorded_at: history.recorded_at,
    }
}

fn row_to_history(row: TransactionHistoryRow) -> TransactionHistory {
    TransactionHistory {
        id: row.history_id.into(),
        transaction_id: row.transaction_id.into(),
        order_id: OrderId::new(row.order_id),
        status: db_to_domain_transaction_status(row.status),
        invoice_number: row.invoice_number,
        recorded_at: row.recorded_at,
    }
}
