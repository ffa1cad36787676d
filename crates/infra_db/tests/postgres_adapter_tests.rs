//! PostgreSQL adapter tests
//!
//! These start a PostgreSQL container and are ignored by default:
//!
//! ```text
//! cargo test -p infra_db -- --ignored
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};

use core_kernel::{PortError, UserId};
use domain_billing::{
    BillingCatalogPort, BillingQuery, BillingStudent, CreationScope, Deletion, GatewayReference, LedgerPort, LedgerQuery,
    LedgerWrite, PaymentStatus, StatusTransition, StudentDirectoryPort, Transaction, TransactionDetail,
    TransactionHistory, TransactionPort, TransactionStatus,
};
use infra_db::PostgresBillingAdapter;
use test_utils::{BillingStudentBuilder, SchoolFixture, TestDatabase};

async fn setup() -> (TestDatabase, SchoolFixture, Arc<PostgresBillingAdapter>) {
    let db = TestDatabase::new().await.expect("container should start");
    let school = SchoolFixture::new();
    db.seed_school(&school).await.expect("seed");
    let adapter = Arc::new(PostgresBillingAdapter::new(db.pool().clone()));
    (db, school, adapter)
}

fn entries_for(school: &SchoolFixture) -> Vec<BillingStudent> {
    school
        .tuition_details
        .iter()
        .map(|d| BillingStudentBuilder::for_detail(school.student.id, d).build())
        .collect()
}

fn pending(school: &SchoolFixture, entries: &[BillingStudent]) -> (Transaction, TransactionDetail) {
    let tx = Transaction::pending(
        school.student.id,
        entries.iter().map(|e| e.id).collect(),
        entries[0].amount,
        school.admin,
        Utc::now(),
    );
    let detail = TransactionDetail {
        transaction_id: tx.id,
        payment_method_id: school.bank_transfer.id,
        bank: Some("bni".into()),
        paid_at: None,
    };
    (tx, detail)
}

async fn create(adapter: &PostgresBillingAdapter, tx: &Transaction, detail: &TransactionDetail) {
    let mut scope = adapter.begin_creation().await.unwrap();
    scope.stage_transaction(tx, detail).await.unwrap();
    scope
        .stage_history(&TransactionHistory::record(tx, TransactionStatus::Pending, Utc::now()))
        .await
        .unwrap();
    scope.commit().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_catalog_filters_by_grade_and_donation() {
    let (_db, school, adapter) = setup().await;

    let query = BillingQuery::for_school(school.school_id)
        .school_year(school.school_year_id)
        .grade(school.grade_id)
        .classes(school.classes())
        .donation(false);
    let found = adapter.find_definitions(&query).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, school.tuition.id);
    assert_eq!(adapter.details_for(school.tuition.id).await.unwrap().len(), 3);

    let student = adapter.get_student(school.student.id).await.unwrap().unwrap();
    assert_eq!(student.code, school.student.code);

    let method = adapter.get_payment_method(school.permata.id).await.unwrap().unwrap();
    assert_eq!(method.channel, school.permata.channel);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_duplicate_live_entry_rolls_back_whole_commit() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);

    adapter
        .commit_writes(vec![vec![LedgerWrite::Insert(entries[0].clone())]])
        .await
        .unwrap();

    let duplicate = BillingStudentBuilder::for_detail(school.student.id, &school.tuition_details[0]).build();
    let err = adapter
        .commit_writes(vec![
            vec![LedgerWrite::Insert(entries[1].clone())],
            vec![LedgerWrite::Insert(duplicate)],
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, PortError::Conflict { .. }));
    assert!(!adapter
        .exists(school.student.id, school.tuition.id, Some(school.tuition_details[1].id))
        .await
        .unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_soft_deleted_entry_frees_the_slot() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);
    adapter
        .commit_writes(vec![vec![LedgerWrite::Insert(entries[0].clone())]])
        .await
        .unwrap();

    let deletion = Deletion {
        deleted_at: Utc::now(),
        deleted_by: UserId::new(),
    };
    assert!(adapter.soft_delete(entries[0].id, deletion.clone()).await.unwrap());
    assert!(!adapter.soft_delete(entries[0].id, deletion).await.unwrap());

    let replacement = BillingStudentBuilder::for_detail(school.student.id, &school.tuition_details[0]).build();
    adapter
        .commit_writes(vec![vec![LedgerWrite::Insert(replacement)]])
        .await
        .unwrap();

    let live = adapter
        .find_entries(&LedgerQuery::for_student(school.student.id))
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(adapter.get_entries(&[entries[0].id]).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_mark_paid_is_idempotent() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);
    adapter
        .commit_writes(vec![entries.iter().cloned().map(LedgerWrite::Insert).collect()])
        .await
        .unwrap();
    let ids: Vec<_> = entries.iter().map(|e| e.id).collect();

    assert_eq!(adapter.mark_paid(&ids, Utc::now()).await.unwrap(), 3);
    assert_eq!(adapter.mark_paid(&ids, Utc::now()).await.unwrap(), 0);

    let stored = adapter.get_entries(&ids).await.unwrap();
    assert!(stored.iter().all(|e| e.payment_status == PaymentStatus::Paid));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_update_of_paid_entry_is_rejected() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);
    adapter
        .commit_writes(vec![vec![LedgerWrite::Insert(entries[0].clone())]])
        .await
        .unwrap();
    adapter.mark_paid(&[entries[0].id], Utc::now()).await.unwrap();

    let err = adapter
        .commit_writes(vec![vec![LedgerWrite::Update(entries[0].clone())]])
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound { .. }));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_transition_is_compare_and_set() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);
    adapter
        .commit_writes(vec![vec![LedgerWrite::Insert(entries[0].clone())]])
        .await
        .unwrap();
    let (tx, detail) = pending(&school, &entries[..1]);
    create(&adapter, &tx, &detail).await;

    let paid = StatusTransition::new(&tx, TransactionStatus::Paid, Utc::now()).paid_at(Utc::now());
    let failed = StatusTransition::new(&tx, TransactionStatus::Failed, Utc::now());

    assert!(adapter.transition(&paid).await.unwrap());
    assert!(!adapter.transition(&failed).await.unwrap());

    let stored = adapter.find_by_order_id(&tx.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Paid);
    assert!(adapter.get_detail(tx.id).await.unwrap().unwrap().paid_at.is_some());

    let history: Vec<_> = adapter
        .history_for(tx.id)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.status)
        .collect();
    assert_eq!(history, vec![TransactionStatus::Pending, TransactionStatus::Paid]);
    assert!(adapter.has_open_transaction_for_entry(entries[0].id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_gateway_reference_is_recorded_only_while_pending() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);
    adapter
        .commit_writes(vec![vec![LedgerWrite::Insert(entries[0].clone())]])
        .await
        .unwrap();
    let (tx, detail) = pending(&school, &entries[..1]);
    create(&adapter, &tx, &detail).await;

    let first = GatewayReference::VirtualAccount {
        bank: "bca".into(),
        va_number: "999".into(),
    };
    let expires = Utc::now() + Duration::hours(24);
    assert!(adapter
        .record_gateway_reference(tx.id, Some(&first), Some(expires))
        .await
        .unwrap());
    assert!(adapter.record_gateway_reference(tx.id, None, None).await.unwrap());

    let stored = adapter.find_by_order_id(&tx.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(stored.gateway_reference, Some(first.clone()));
    assert!(stored.expires_at.is_some());

    let failed = StatusTransition::new(&tx, TransactionStatus::Failed, Utc::now());
    assert!(adapter.transition(&failed).await.unwrap());
    let late = GatewayReference::PermataVirtualAccount { va_number: "111".into() };
    assert!(!adapter.record_gateway_reference(tx.id, Some(&late), None).await.unwrap());

    let stored = adapter.find_by_order_id(&tx.order_id).await.unwrap().unwrap();
    assert_eq!(stored.gateway_reference, Some(first));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_rolled_back_creation_leaves_nothing() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);
    let (tx, detail) = pending(&school, &entries[..1]);

    let mut scope = adapter.begin_creation().await.unwrap();
    scope.stage_transaction(&tx, &detail).await.unwrap();
    scope.rollback().await.unwrap();

    assert!(adapter.find_by_order_id(&tx.order_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stale_pending_respects_cutoff() {
    let (_db, school, adapter) = setup().await;
    let entries = entries_for(&school);
    let (tx, detail) = pending(&school, &entries[..1]);
    create(&adapter, &tx, &detail).await;

    let none = adapter.find_stale_pending(Utc::now() - Duration::hours(24)).await.unwrap();
    let some = adapter.find_stale_pending(Utc::now() + Duration::seconds(1)).await.unwrap();

    assert!(none.is_empty());
    assert_eq!(some.len(), 1);
    assert_eq!(some[0].order_id, tx.order_id);
}
