//! Billing Domain Ports
//!
//! Port interfaces the billing services depend on. The engine never talks
//! to a database or HTTP client directly; it receives these traits as
//! `Arc<dyn Port>` at construction time.
//!
//! - **Internal Adapter**: PostgreSQL (infra_db)
//! - **External Adapter**: payment gateway (infra_gateway)
//! - **Mock Adapter**: in-memory store for tests (`mock` feature)
//!
//! ```rust,ignore
//! let store = Arc::new(PostgresBillingAdapter::new(pool));
//! let resolver = BillingResolver::new(store.clone(), store.clone(), store.clone(), store);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{
    BillingDetailId, BillingId, BillingStudentId, ClassId, DomainPort, PaymentMethodId, PortError,
    SchoolId, StudentId, TransactionId,
};

use crate::audit::Deletion;
use crate::catalog::{BillingDefinition, BillingDetailItem, BillingQuery};
use crate::ledger::{BillingStudent, LedgerQuery, LedgerWrite};
use crate::payment::PaymentMethod;
use crate::transaction::{
    GatewayExchange, GatewayReference, OrderId, StatusTransition, Transaction, TransactionDetail,
    TransactionHistory,
};

/// Enrollment status of a student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Inactive,
}

/// What the billing engine needs to know about a student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: StudentId,
    pub school_id: SchoolId,
    pub class_id: Option<ClassId>,
    /// Identifying code (NIS) embedded in template entry names
    pub code: String,
    pub name: String,
    pub status: StudentStatus,
}

impl StudentProfile {
    pub fn is_active(&self) -> bool {
        self.status == StudentStatus::Active
    }
}

/// Read-only access to the billing catalog
#[async_trait]
pub trait BillingCatalogPort: DomainPort {
    /// Definitions matching the query
    async fn find_definitions(&self, query: &BillingQuery) -> Result<Vec<BillingDefinition>, PortError>;

    /// A definition by id, deleted or not
    async fn get_definition(&self, id: BillingId) -> Result<Option<BillingDefinition>, PortError>;

    /// Detail items of a definition
    async fn details_for(&self, billing_id: BillingId) -> Result<Vec<BillingDetailItem>, PortError>;

    async fn get_payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>, PortError>;
}

/// Read-only access to student records
#[async_trait]
pub trait StudentDirectoryPort: DomainPort {
    async fn get_student(&self, id: StudentId) -> Result<Option<StudentProfile>, PortError>;
}

/// Persistence for ledger entries
#[async_trait]
pub trait LedgerPort: DomainPort {
    async fn find_entries(&self, query: &LedgerQuery) -> Result<Vec<BillingStudent>, PortError>;

    /// Entries by id, including soft-deleted ones; missing ids are omitted
    async fn get_entries(&self, ids: &[BillingStudentId]) -> Result<Vec<BillingStudent>, PortError>;

    /// Returns true iff a non-deleted entry links the triple
    async fn exists(
        &self,
        student_id: StudentId,
        billing_id: BillingId,
        detail_id: Option<BillingDetailId>,
    ) -> Result<bool, PortError>;

    /// Applies every batch inside one transactional boundary
    ///
    /// Either all writes land or none do. Returns the number of rows written.
    async fn commit_writes(&self, batches: Vec<Vec<LedgerWrite>>) -> Result<u64, PortError>;

    /// Soft-deletes an entry; returns false if it is missing or already deleted
    async fn soft_delete(&self, id: BillingStudentId, deletion: Deletion) -> Result<bool, PortError>;

    /// Marks unpaid entries paid; already-paid entries are left alone
    ///
    /// Returns the number of entries that changed.
    async fn mark_paid(&self, ids: &[BillingStudentId], at: DateTime<Utc>) -> Result<u64, PortError>;
}

/// Staging area for a transaction under creation
///
/// Nothing staged is visible to other readers until `commit`. Dropping a
/// scope without committing discards it. A scope may pin a storage
/// connection while open; the orchestrator keeps one open across the
/// gateway call, so for at most `OrchestratorConfig::gateway_timeout`.
#[async_trait]
pub trait CreationScope: Send {
    async fn stage_transaction(&mut self, transaction: &Transaction, detail: &TransactionDetail) -> Result<(), PortError>;

    async fn stage_history(&mut self, history: &TransactionHistory) -> Result<(), PortError>;

    async fn attach_gateway_reference(
        &mut self,
        transaction_id: TransactionId,
        reference: &GatewayReference,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), PortError>;

    async fn commit(self: Box<Self>) -> Result<(), PortError>;

    async fn rollback(self: Box<Self>) -> Result<(), PortError>;
}

/// Persistence for payment transactions
#[async_trait]
pub trait TransactionPort: DomainPort {
    async fn begin_creation(&self) -> Result<Box<dyn CreationScope>, PortError>;

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Transaction>, PortError>;

    async fn get_detail(&self, transaction_id: TransactionId) -> Result<Option<TransactionDetail>, PortError>;

    /// Pending transactions created strictly before `created_before`
    async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> Result<Vec<Transaction>, PortError>;

    /// Applies the transition only if the stored status is still pending
    ///
    /// Returns false when another writer got there first; in that case
    /// nothing, not even the history row, is written.
    async fn transition(&self, transition: &StatusTransition) -> Result<bool, PortError>;

    /// Stores a gateway-assigned payment code on a still-pending transaction
    ///
    /// `None` fields keep their stored value. Returns false when the
    /// transaction is no longer pending.
    async fn record_gateway_reference(
        &self,
        transaction_id: TransactionId,
        reference: Option<&GatewayReference>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PortError>;

    async fn append_history(&self, history: &TransactionHistory) -> Result<(), PortError>;

    async fn history_for(&self, transaction_id: TransactionId) -> Result<Vec<TransactionHistory>, PortError>;

    /// Returns true if a pending or paid transaction references the entry
    async fn has_open_transaction_for_entry(&self, entry_id: BillingStudentId) -> Result<bool, PortError>;

    async fn log_gateway_exchange(&self, exchange: &GatewayExchange) -> Result<(), PortError>;
}

/// In-memory adapters for testing
///
/// `InMemoryBillingStore` implements every persistence port over shared
/// maps and follows the same conditional-update rules as the database
/// adapter. `MockGateway` answers charges from a configurable script.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use core_kernel::{AdapterHealth, HealthCheckResult, HealthCheckable};
    use tokio::sync::{Mutex, RwLock};

    use crate::gateway::{ChargeFailure, ChargeRequest, ChargeResponse, GatewayError, PaymentGatewayPort};
    use crate::ledger::PaymentStatus;
    use crate::payment::PaymentChannel;
    use crate::reconciler::WebhookNotification;
    use crate::transaction::TransactionStatus;

    #[derive(Debug, Default)]
    struct Inner {
        definitions: RwLock<HashMap<BillingId, BillingDefinition>>,
        details: RwLock<HashMap<BillingId, Vec<BillingDetailItem>>>,
        payment_methods: RwLock<HashMap<PaymentMethodId, PaymentMethod>>,
        students: RwLock<HashMap<StudentId, StudentProfile>>,
        entries: RwLock<HashMap<BillingStudentId, BillingStudent>>,
        transactions: RwLock<HashMap<TransactionId, Transaction>>,
        transaction_details: RwLock<HashMap<TransactionId, TransactionDetail>>,
        history: RwLock<Vec<TransactionHistory>>,
        exchanges: RwLock<Vec<GatewayExchange>>,
        fail_next_commit: AtomicBool,
        open_scopes: AtomicUsize,
    }

    /// In-memory implementation of every billing persistence port
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryBillingStore {
        inner: Arc<Inner>,
    }

    impl InMemoryBillingStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Creation scopes begun but not yet committed, rolled back or dropped
        pub fn open_creation_scopes(&self) -> usize {
            self.inner.open_scopes.load(Ordering::SeqCst)
        }

        pub async fn insert_definition(&self, definition: BillingDefinition, details: Vec<BillingDetailItem>) {
            self.inner.details.write().await.insert(definition.id, details);
            self.inner.definitions.write().await.insert(definition.id, definition);
        }

        /// Replaces one detail item of its definition
        pub async fn replace_detail(&self, detail: BillingDetailItem) {
            let mut details = self.inner.details.write().await;
            let items = details.entry(detail.billing_id).or_default();
            match items.iter_mut().find(|d| d.id == detail.id) {
                Some(existing) => *existing = detail,
                None => items.push(detail),
            }
        }

        pub async fn insert_payment_method(&self, method: PaymentMethod) {
            self.inner.payment_methods.write().await.insert(method.id, method);
        }

        pub async fn insert_student(&self, student: StudentProfile) {
            self.inner.students.write().await.insert(student.id, student);
        }

        /// Inserts entries directly, bypassing uniqueness checks
        pub async fn insert_entries(&self, entries: Vec<BillingStudent>) {
            let mut map = self.inner.entries.write().await;
            for entry in entries {
                map.insert(entry.id, entry);
            }
        }

        /// Inserts a committed transaction directly
        pub async fn insert_transaction(&self, transaction: Transaction, detail: TransactionDetail) {
            self.inner.transaction_details.write().await.insert(transaction.id, detail);
            self.inner.transactions.write().await.insert(transaction.id, transaction);
        }

        /// Makes the next ledger commit fail after validation
        pub fn fail_next_commit(&self) {
            self.inner.fail_next_commit.store(true, Ordering::SeqCst);
        }

        pub async fn entry(&self, id: BillingStudentId) -> Option<BillingStudent> {
            self.inner.entries.read().await.get(&id).cloned()
        }

        pub async fn transactions(&self) -> Vec<Transaction> {
            self.inner.transactions.read().await.values().cloned().collect()
        }

        pub async fn transaction(&self, id: TransactionId) -> Option<Transaction> {
            self.inner.transactions.read().await.get(&id).cloned()
        }

        pub async fn exchanges(&self) -> Vec<GatewayExchange> {
            self.inner.exchanges.read().await.clone()
        }

        /// Sets a transaction's creation time, for expiry tests
        pub async fn backdate(&self, id: TransactionId, created_at: DateTime<Utc>) {
            if let Some(tx) = self.inner.transactions.write().await.get_mut(&id) {
                tx.audit.created_at = created_at;
            }
        }
    }

    impl DomainPort for InMemoryBillingStore {}

    #[async_trait]
    impl HealthCheckable for InMemoryBillingStore {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult {
                adapter_id: "in-memory-billing-store".to_string(),
                status: AdapterHealth::Healthy,
                latency_ms: 0,
                message: Some("In-memory store always healthy".to_string()),
                checked_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl BillingCatalogPort for InMemoryBillingStore {
        async fn find_definitions(&self, query: &BillingQuery) -> Result<Vec<BillingDefinition>, PortError> {
            Ok(self
                .inner
                .definitions
                .read()
                .await
                .values()
                .filter(|d| d.applies_to(query))
                .cloned()
                .collect())
        }

        async fn get_definition(&self, id: BillingId) -> Result<Option<BillingDefinition>, PortError> {
            Ok(self.inner.definitions.read().await.get(&id).cloned())
        }

        async fn details_for(&self, billing_id: BillingId) -> Result<Vec<BillingDetailItem>, PortError> {
            Ok(self
                .inner
                .details
                .read()
                .await
                .get(&billing_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>, PortError> {
            Ok(self.inner.payment_methods.read().await.get(&id).cloned())
        }
    }

    #[async_trait]
    impl StudentDirectoryPort for InMemoryBillingStore {
        async fn get_student(&self, id: StudentId) -> Result<Option<StudentProfile>, PortError> {
            Ok(self.inner.students.read().await.get(&id).cloned())
        }
    }

    #[async_trait]
    impl LedgerPort for InMemoryBillingStore {
        async fn find_entries(&self, query: &LedgerQuery) -> Result<Vec<BillingStudent>, PortError> {
            Ok(self
                .inner
                .entries
                .read()
                .await
                .values()
                .filter(|e| query.matches(e))
                .cloned()
                .collect())
        }

        async fn get_entries(&self, ids: &[BillingStudentId]) -> Result<Vec<BillingStudent>, PortError> {
            let entries = self.inner.entries.read().await;
            Ok(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
        }

        async fn exists(
            &self,
            student_id: StudentId,
            billing_id: BillingId,
            detail_id: Option<BillingDetailId>,
        ) -> Result<bool, PortError> {
            Ok(self.inner.entries.read().await.values().any(|e| {
                !e.is_deleted()
                    && e.student_id == student_id
                    && e.billing_id == billing_id
                    && e.billing_detail_id == detail_id
            }))
        }

        async fn commit_writes(&self, batches: Vec<Vec<LedgerWrite>>) -> Result<u64, PortError> {
            let mut entries = self.inner.entries.write().await;
            let mut staged = entries.clone();
            let mut written = 0u64;

            for write in batches.into_iter().flatten() {
                match write {
                    LedgerWrite::Insert(entry) => {
                        let clash = staged.values().any(|e| {
                            !e.is_deleted()
                                && e.student_id == entry.student_id
                                && e.billing_id == entry.billing_id
                                && e.billing_detail_id == entry.billing_detail_id
                        });
                        if clash {
                            return Err(PortError::conflict(format!(
                                "ledger entry for student {} and billing {} already exists",
                                entry.student_id, entry.billing_id
                            )));
                        }
                        staged.insert(entry.id, entry);
                    }
                    LedgerWrite::Update(entry) => {
                        let existing = staged
                            .get_mut(&entry.id)
                            .filter(|e| !e.is_deleted() && !e.is_paid())
                            .ok_or_else(|| PortError::not_found("BillingStudent", entry.id))?;
                        existing.amount = entry.amount;
                        existing.due_date = entry.due_date;
                        existing.name = entry.name;
                        existing.audit = entry.audit;
                    }
                }
                written += 1;
            }

            if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
                return Err(PortError::internal("injected commit failure"));
            }

            *entries = staged;
            Ok(written)
        }

        async fn soft_delete(&self, id: BillingStudentId, deletion: Deletion) -> Result<bool, PortError> {
            let mut entries = self.inner.entries.write().await;
            match entries.get_mut(&id) {
                Some(entry) if !entry.is_deleted() => {
                    entry.deletion = Some(deletion);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_paid(&self, ids: &[BillingStudentId], at: DateTime<Utc>) -> Result<u64, PortError> {
            let mut entries = self.inner.entries.write().await;
            let mut changed = 0;
            for id in ids {
                if let Some(entry) = entries.get_mut(id) {
                    if entry.payment_status == PaymentStatus::Unpaid && entry.mark_paid(at) {
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        }
    }

    /// Creation scope buffering writes until commit
    struct InMemoryCreationScope {
        inner: Arc<Inner>,
        transaction: Option<(Transaction, TransactionDetail)>,
        history: Vec<TransactionHistory>,
    }

    impl Drop for InMemoryCreationScope {
        fn drop(&mut self) {
            self.inner.open_scopes.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CreationScope for InMemoryCreationScope {
        async fn stage_transaction(&mut self, transaction: &Transaction, detail: &TransactionDetail) -> Result<(), PortError> {
            self.transaction = Some((transaction.clone(), detail.clone()));
            Ok(())
        }

        async fn stage_history(&mut self, history: &TransactionHistory) -> Result<(), PortError> {
            self.history.push(history.clone());
            Ok(())
        }

        async fn attach_gateway_reference(
            &mut self,
            transaction_id: TransactionId,
            reference: &GatewayReference,
            expires_at: Option<DateTime<Utc>>,
        ) -> Result<(), PortError> {
            match self.transaction.as_mut() {
                Some((tx, _)) if tx.id == transaction_id => {
                    tx.gateway_reference = Some(reference.clone());
                    tx.expires_at = expires_at;
                    Ok(())
                }
                _ => Err(PortError::not_found("Transaction", transaction_id)),
            }
        }

        async fn commit(mut self: Box<Self>) -> Result<(), PortError> {
            let inner = self.inner.clone();
            let history = std::mem::take(&mut self.history);
            let mut transactions = inner.transactions.write().await;
            if let Some((tx, detail)) = self.transaction.take() {
                if transactions.values().any(|t| t.order_id == tx.order_id) {
                    return Err(PortError::conflict(format!("order id {} already exists", tx.order_id)));
                }
                inner.transaction_details.write().await.insert(tx.id, detail);
                transactions.insert(tx.id, tx);
            }
            inner.history.write().await.extend(history);
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), PortError> {
            Ok(())
        }
    }

    #[async_trait]
    impl TransactionPort for InMemoryBillingStore {
        async fn begin_creation(&self) -> Result<Box<dyn CreationScope>, PortError> {
            self.inner.open_scopes.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(InMemoryCreationScope {
                inner: self.inner.clone(),
                transaction: None,
                history: Vec::new(),
            }))
        }

        async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Transaction>, PortError> {
            Ok(self
                .inner
                .transactions
                .read()
                .await
                .values()
                .find(|t| &t.order_id == order_id)
                .cloned())
        }

        async fn get_detail(&self, transaction_id: TransactionId) -> Result<Option<TransactionDetail>, PortError> {
            Ok(self.inner.transaction_details.read().await.get(&transaction_id).cloned())
        }

        async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> Result<Vec<Transaction>, PortError> {
            let mut stale: Vec<Transaction> = self
                .inner
                .transactions
                .read()
                .await
                .values()
                .filter(|t| t.status == TransactionStatus::Pending && t.audit.created_at < created_before)
                .cloned()
                .collect();
            stale.sort_by_key(|t| t.audit.created_at);
            Ok(stale)
        }

        async fn transition(&self, transition: &StatusTransition) -> Result<bool, PortError> {
            let mut transactions = self.inner.transactions.write().await;
            let tx = match transactions.get_mut(&transition.transaction_id) {
                Some(tx) if tx.status == TransactionStatus::Pending => tx,
                _ => return Ok(false),
            };

            tx.status = transition.to;
            if transition.gateway_reference.is_some() {
                tx.gateway_reference = transition.gateway_reference.clone();
            }
            if transition.expires_at.is_some() {
                tx.expires_at = transition.expires_at;
            }
            tx.audit.updated_at = Some(transition.history.recorded_at);

            if let Some(paid_at) = transition.paid_at {
                if let Some(detail) = self.inner.transaction_details.write().await.get_mut(&tx.id) {
                    detail.paid_at = Some(paid_at);
                }
            }
            self.inner.history.write().await.push(transition.history.clone());
            Ok(true)
        }

        async fn record_gateway_reference(
            &self,
            transaction_id: TransactionId,
            reference: Option<&GatewayReference>,
            expires_at: Option<DateTime<Utc>>,
        ) -> Result<bool, PortError> {
            let mut transactions = self.inner.transactions.write().await;
            let tx = match transactions.get_mut(&transaction_id) {
                Some(tx) if tx.status == TransactionStatus::Pending => tx,
                _ => return Ok(false),
            };
            if let Some(reference) = reference {
                tx.gateway_reference = Some(reference.clone());
            }
            if expires_at.is_some() {
                tx.expires_at = expires_at;
            }
            tx.audit.updated_at = Some(Utc::now());
            Ok(true)
        }

        async fn append_history(&self, history: &TransactionHistory) -> Result<(), PortError> {
            self.inner.history.write().await.push(history.clone());
            Ok(())
        }

        async fn history_for(&self, transaction_id: TransactionId) -> Result<Vec<TransactionHistory>, PortError> {
            Ok(self
                .inner
                .history
                .read()
                .await
                .iter()
                .filter(|h| h.transaction_id == transaction_id)
                .cloned()
                .collect())
        }

        async fn has_open_transaction_for_entry(&self, entry_id: BillingStudentId) -> Result<bool, PortError> {
            Ok(self
                .inner
                .transactions
                .read()
                .await
                .values()
                .any(|t| t.status != TransactionStatus::Failed && t.ledger_entry_ids.contains(&entry_id)))
        }

        async fn log_gateway_exchange(&self, exchange: &GatewayExchange) -> Result<(), PortError> {
            self.inner.exchanges.write().await.push(exchange.clone());
            Ok(())
        }
    }

    /// Transaction store where a rival writer finalizes every pending
    /// transaction right after it is read
    ///
    /// Callers see the stale `pending` snapshot and then lose the
    /// compare-and-set.
    #[derive(Debug, Clone)]
    pub struct RacingTransactionStore {
        store: InMemoryBillingStore,
        rival: TransactionStatus,
    }

    impl RacingTransactionStore {
        pub fn new(store: InMemoryBillingStore, rival: TransactionStatus) -> Self {
            Self { store, rival }
        }

        async fn finalize(&self, transactions: &[Transaction]) -> Result<(), PortError> {
            for transaction in transactions.iter().filter(|t| t.status == TransactionStatus::Pending) {
                let transition = StatusTransition::new(transaction, self.rival, Utc::now());
                self.store.transition(&transition).await?;
            }
            Ok(())
        }
    }

    impl DomainPort for RacingTransactionStore {}

    #[async_trait]
    impl TransactionPort for RacingTransactionStore {
        async fn begin_creation(&self) -> Result<Box<dyn CreationScope>, PortError> {
            self.store.begin_creation().await
        }

        async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Transaction>, PortError> {
            let found = self.store.find_by_order_id(order_id).await?;
            if let Some(ref transaction) = found {
                self.finalize(std::slice::from_ref(transaction)).await?;
            }
            Ok(found)
        }

        async fn get_detail(&self, transaction_id: TransactionId) -> Result<Option<TransactionDetail>, PortError> {
            self.store.get_detail(transaction_id).await
        }

        async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> Result<Vec<Transaction>, PortError> {
            let stale = self.store.find_stale_pending(created_before).await?;
            self.finalize(&stale).await?;
            Ok(stale)
        }

        async fn transition(&self, transition: &StatusTransition) -> Result<bool, PortError> {
            self.store.transition(transition).await
        }

        async fn record_gateway_reference(
            &self,
            transaction_id: TransactionId,
            reference: Option<&GatewayReference>,
            expires_at: Option<DateTime<Utc>>,
        ) -> Result<bool, PortError> {
            self.store
                .record_gateway_reference(transaction_id, reference, expires_at)
                .await
        }

        async fn append_history(&self, history: &TransactionHistory) -> Result<(), PortError> {
            self.store.append_history(history).await
        }

        async fn history_for(&self, transaction_id: TransactionId) -> Result<Vec<TransactionHistory>, PortError> {
            self.store.history_for(transaction_id).await
        }

        async fn has_open_transaction_for_entry(&self, entry_id: BillingStudentId) -> Result<bool, PortError> {
            self.store.has_open_transaction_for_entry(entry_id).await
        }

        async fn log_gateway_exchange(&self, exchange: &GatewayExchange) -> Result<(), PortError> {
            self.store.log_gateway_exchange(exchange).await
        }
    }

    /// Scripted gateway behavior
    #[derive(Debug, Clone)]
    pub enum GatewayScript {
        /// Accept every charge
        Accept,
        /// Reject with the given status code and message
        Reject { status_code: String, message: String },
        /// Never answer within the given delay
        Hang(Duration),
        /// Fail as if the network were down
        Unreachable,
    }

    /// Payment gateway double
    #[derive(Debug)]
    pub struct MockGateway {
        script: Mutex<GatewayScript>,
        accept_signatures: AtomicBool,
        charges: Mutex<Vec<ChargeRequest>>,
    }

    impl Default for MockGateway {
        fn default() -> Self {
            Self::new(GatewayScript::Accept)
        }
    }

    impl MockGateway {
        pub fn new(script: GatewayScript) -> Self {
            Self {
                script: Mutex::new(script),
                accept_signatures: AtomicBool::new(true),
                charges: Mutex::new(Vec::new()),
            }
        }

        pub async fn set_script(&self, script: GatewayScript) {
            *self.script.lock().await = script;
        }

        pub fn reject_signatures(&self) {
            self.accept_signatures.store(false, Ordering::SeqCst);
        }

        pub async fn charges(&self) -> Vec<ChargeRequest> {
            self.charges.lock().await.clone()
        }
    }

    impl DomainPort for MockGateway {}

    #[async_trait]
    impl PaymentGatewayPort for MockGateway {
        async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, ChargeFailure> {
            self.charges.lock().await.push(request.clone());
            let raw_request = serde_json::json!({
                "order_id": request.order_id.as_str(),
                "gross_amount": request.amount.amount().to_string(),
            });

            let script = self.script.lock().await.clone();
            match script {
                GatewayScript::Accept => {
                    let reference = match &request.channel {
                        PaymentChannel::BankTransfer { bank } => GatewayReference::VirtualAccount {
                            bank: bank.clone(),
                            va_number: "8808123456789".to_string(),
                        },
                        PaymentChannel::PermataVa => GatewayReference::PermataVirtualAccount {
                            va_number: "8562000123456".to_string(),
                        },
                        PaymentChannel::MandiriBill => GatewayReference::BillPayment {
                            biller_code: "70012".to_string(),
                            bill_key: "990000000001".to_string(),
                        },
                        PaymentChannel::CreditCard | PaymentChannel::EWallet { .. } => GatewayReference::Redirect {
                            token: "snap-token".to_string(),
                            redirect_url: "https://pay.example/snap/snap-token".to_string(),
                        },
                    };
                    Ok(ChargeResponse {
                        reference,
                        expires_at: Some(Utc::now() + chrono::Duration::hours(24)),
                        gateway_transaction_id: Some(uuid::Uuid::new_v4().to_string()),
                        raw_request,
                        raw_response: serde_json::json!({ "status_code": "201" }),
                    })
                }
                GatewayScript::Reject { status_code, message } => Err(ChargeFailure::new(GatewayError::Rejected {
                    status_code: status_code.clone(),
                    message: message.clone(),
                })
                .with_payloads(
                    Some(raw_request),
                    Some(serde_json::json!({ "status_code": status_code, "status_message": message })),
                )),
                GatewayScript::Hang(delay) => {
                    tokio::time::sleep(delay).await;
                    Err(ChargeFailure::new(GatewayError::Timeout(delay)))
                }
                GatewayScript::Unreachable => Err(ChargeFailure::new(GatewayError::Unreachable(
                    "connection refused".to_string(),
                ))
                .with_payloads(Some(raw_request), None)),
            }
        }

        fn verify_notification(&self, _notification: &WebhookNotification) -> bool {
            self.accept_signatures.load(Ordering::SeqCst)
        }
    }

}
