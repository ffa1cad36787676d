//! End-to-end engine tests over the in-memory store and a scripted gateway

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use billing_service::{run_sweeper, BillingEngine, EngineConfig};
use core_kernel::{AdapterHealth, BillingStudentId, Money};
use domain_billing::ports::mock::{InMemoryBillingStore, MockGateway};
use domain_billing::{
    BillingError, BillingStudent, CreateTransactionRequest, CreatedTransaction, PaymentStatus, ReconcileOutcome,
    ResolveQuery, TransactionStatus,
};
use test_utils::{
    assert_entries_status, assert_history, assert_money_eq, assert_transaction_status, BillingDefinitionBuilder,
    DateFixtures, NotificationBuilder, SchoolFixture,
};

struct Harness {
    school: SchoolFixture,
    store: Arc<InMemoryBillingStore>,
    gateway: Arc<MockGateway>,
    engine: Arc<BillingEngine>,
}

async fn harness() -> Harness {
    let school = SchoolFixture::new();
    let store = Arc::new(school.store().await);
    let gateway = Arc::new(MockGateway::default());
    let engine = BillingEngine::new(store.clone(), gateway.clone(), EngineConfig::default())
        .with_health_check(store.clone());
    Harness {
        school,
        store,
        gateway,
        engine: Arc::new(engine),
    }
}

impl Harness {
    fn query(&self) -> ResolveQuery {
        ResolveQuery {
            student_id: self.school.student.id,
            school_id: self.school.school_id,
            school_year_id: self.school.school_year_id,
            grade_id: self.school.grade_id,
            class_ids: Some(self.school.classes()),
            include_donation: true,
        }
    }

    /// Adds a definition with the given detail amounts and assigns it to the student
    async fn assign(&self, name: &str, amounts: &[i64]) -> Vec<BillingStudent> {
        let details: Vec<_> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                let label: &str = match i {
                    0 => "Januari",
                    1 => "Februari",
                    _ => "Maret",
                };
                (label, DateFixtures::days_from_today(7 + 30 * i as i64), Money::idr(*amount))
            })
            .collect();
        let (definition, items) = BillingDefinitionBuilder::new(self.school.school_id, self.school.school_year_id)
            .with_name(name)
            .with_code(format!("{name}-{}", amounts.len()))
            .with_grade(self.school.grade_id)
            .routine()
            .build_with_details(&details);
        self.store.insert_definition(definition.clone(), items).await;

        self.engine
            .ledger()
            .assign_explicit(definition.id, &[self.school.student.id], self.school.admin)
            .await
            .unwrap()
    }

    async fn pay(&self, entries: &[BillingStudent]) -> CreatedTransaction {
        self.engine
            .create_transaction(CreateTransactionRequest {
                student_id: self.school.student.id,
                ledger_entry_ids: entries.iter().map(|e| e.id).collect(),
                payment_method_id: self.school.bank_transfer.id,
                acting_user: self.school.admin,
            })
            .await
            .unwrap()
    }
}

fn ids(entries: &[BillingStudent]) -> Vec<BillingStudentId> {
    entries.iter().map(|e| e.id).collect()
}

#[tokio::test]
async fn test_assigned_item_resolves_and_disables_after_due_date() {
    let h = harness().await;
    let entries = h.assign("SPP Januari", &[150_000]).await;
    let due = entries[0].due_date.unwrap();

    let before = h.engine.resolver().resolve_at(&h.query(), DateFixtures::today()).await.unwrap();
    let januari: Vec<_> = before
        .items
        .iter()
        .filter(|i| i.ledger_entry.as_ref().map(|e| e.id) == Some(entries[0].id))
        .collect();
    assert_eq!(januari.len(), 1);
    assert!(!januari[0].disabled);

    let after = h
        .engine
        .resolver()
        .resolve_at(&h.query(), due + chrono::Duration::days(1))
        .await
        .unwrap();
    let januari = after
        .items
        .iter()
        .find(|i| i.ledger_entry.as_ref().map(|e| e.id) == Some(entries[0].id))
        .unwrap();
    assert!(januari.disabled);
}

#[tokio::test]
async fn test_settlement_pays_transaction_and_entries() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000, 75_000]).await;

    let created = h.pay(&entries).await;
    assert_money_eq(&created.transaction.total, &Money::idr(125_000));
    assert_eq!(created.transaction.status, TransactionStatus::Pending);

    let notification = NotificationBuilder::settlement(created.transaction.order_id.as_str())
        .with_gross_amount(Money::idr(125_000))
        .build_with_fixture_key();
    let outcome = h.engine.handle_notification(&notification).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied(TransactionStatus::Paid));
    assert_transaction_status(&h.store, created.transaction.id, TransactionStatus::Paid).await;
    assert_entries_status(&h.store, &ids(&entries), PaymentStatus::Paid).await;
    assert_history(
        &h.store,
        created.transaction.id,
        &[TransactionStatus::Pending, TransactionStatus::Paid],
    )
    .await;
}

#[tokio::test]
async fn test_replayed_settlement_changes_nothing_but_history() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000]).await;
    let created = h.pay(&entries).await;
    let notification = NotificationBuilder::settlement(created.transaction.order_id.as_str()).build_with_fixture_key();

    h.engine.handle_notification(&notification).await.unwrap();
    let replay = h.engine.handle_notification(&notification).await.unwrap();

    assert_eq!(replay, ReconcileOutcome::Replayed(TransactionStatus::Paid));
    assert_transaction_status(&h.store, created.transaction.id, TransactionStatus::Paid).await;
    assert_entries_status(&h.store, &ids(&entries), PaymentStatus::Paid).await;
}

#[tokio::test]
async fn test_unknown_order_id_mutates_nothing() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000]).await;
    let created = h.pay(&entries).await;

    let notification = NotificationBuilder::settlement("SCH-UNKNOWN-ORDER").build_with_fixture_key();
    let err = h.engine.handle_notification(&notification).await.unwrap_err();

    assert!(matches!(err, BillingError::TransactionNotFound(ref id) if id == "SCH-UNKNOWN-ORDER"));
    assert_transaction_status(&h.store, created.transaction.id, TransactionStatus::Pending).await;
    assert_entries_status(&h.store, &ids(&entries), PaymentStatus::Unpaid).await;
    assert_history(&h.store, created.transaction.id, &[TransactionStatus::Pending]).await;
}

#[tokio::test]
async fn test_sweep_leaves_paid_transaction_alone() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000]).await;
    let created = h.pay(&entries).await;
    let notification = NotificationBuilder::settlement(created.transaction.order_id.as_str()).build_with_fixture_key();
    h.engine.handle_notification(&notification).await.unwrap();
    h.store
        .backdate(created.transaction.id, Utc::now() - chrono::Duration::hours(30))
        .await;

    let report = h.engine.sweep_expired().await.unwrap();

    assert_eq!(report.failed, 0);
    assert_transaction_status(&h.store, created.transaction.id, TransactionStatus::Paid).await;
    assert_history(
        &h.store,
        created.transaction.id,
        &[TransactionStatus::Pending, TransactionStatus::Paid],
    )
    .await;
}

#[tokio::test]
async fn test_sweep_fails_stale_pending_once() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000]).await;
    let created = h.pay(&entries).await;
    h.store
        .backdate(created.transaction.id, Utc::now() - chrono::Duration::hours(25))
        .await;

    let first = h.engine.sweep_expired().await.unwrap();
    let second = h.engine.sweep_expired().await.unwrap();

    assert_eq!(first.failed, 1);
    assert_eq!(second.scanned, 0);
    assert_transaction_status(&h.store, created.transaction.id, TransactionStatus::Failed).await;
    assert_entries_status(&h.store, &ids(&entries), PaymentStatus::Unpaid).await;
}

#[tokio::test]
async fn test_invalid_signature_is_rejected_before_lookup() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000]).await;
    let created = h.pay(&entries).await;
    h.gateway.reject_signatures();

    let notification = NotificationBuilder::settlement(created.transaction.order_id.as_str()).build_signed("forged");
    let err = h.engine.handle_notification(&notification).await.unwrap_err();

    assert!(matches!(err, BillingError::InvalidSignature(_)));
    assert_transaction_status(&h.store, created.transaction.id, TransactionStatus::Pending).await;
}

#[tokio::test]
async fn test_malformed_body_is_a_validation_error() {
    let h = harness().await;

    let err = h.engine.handle_notification_body(b"{not json").await.unwrap_err();

    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn test_notification_body_is_parsed_and_reconciled() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000]).await;
    let created = h.pay(&entries).await;
    let notification = NotificationBuilder::settlement(created.transaction.order_id.as_str())
        .with_va("bni", "8808123456789")
        .build_with_fixture_key();
    let body = serde_json::to_vec(&notification).unwrap();

    let outcome = h.engine.handle_notification_body(&body).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied(TransactionStatus::Paid));
}

#[tokio::test]
async fn test_scheduled_sweeper_runs_until_shutdown() {
    let h = harness().await;
    let entries = h.assign("Kegiatan", &[50_000]).await;
    let created = h.pay(&entries).await;
    h.store
        .backdate(created.transaction.id, Utc::now() - chrono::Duration::hours(25))
        .await;

    let runs = run_sweeper(h.engine.clone(), tokio::time::sleep(Duration::from_millis(200))).await;

    assert_eq!(runs, 1);
    assert_transaction_status(&h.store, created.transaction.id, TransactionStatus::Failed).await;
}

#[tokio::test]
async fn test_health_check_reports_registered_adapters() {
    let h = harness().await;

    let results = h.engine.health_check().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, AdapterHealth::Healthy);
    assert!(h.engine.is_ready().await);
}
