//! Custom Test Assertions
//!
//! Assertion helpers that read the in-memory store and fail with messages
//! naming the record involved.

use core_kernel::{BillingStudentId, Money, TransactionId};
use domain_billing::ports::mock::InMemoryBillingStore;
use domain_billing::{PaymentStatus, TransactionPort, TransactionStatus};

/// Asserts that two amounts are equal, including currency
pub fn assert_money_eq(actual: &Money, expected: &Money) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );
    assert_eq!(
        actual.amount(),
        expected.amount(),
        "Amount mismatch: actual={}, expected={}",
        actual,
        expected
    );
}

/// Asserts that amounts sum exactly to a total
pub fn assert_money_sum(parts: &[Money], total: &Money) {
    let sum = Money::checked_sum(parts.iter(), total.currency())
        .unwrap_or_else(|e| panic!("Cannot sum parts: {}", e));
    assert_money_eq(&sum, total);
}

/// Asserts the payment status of each ledger entry
pub async fn assert_entries_status(store: &InMemoryBillingStore, ids: &[BillingStudentId], expected: PaymentStatus) {
    for id in ids {
        let entry = store
            .entry(*id)
            .await
            .unwrap_or_else(|| panic!("Ledger entry {} not found", id));
        assert_eq!(
            entry.payment_status, expected,
            "Ledger entry {} ({}) has status {:?}, expected {:?}",
            id, entry.name, entry.payment_status, expected
        );
    }
}

/// Asserts a transaction's stored status
pub async fn assert_transaction_status(store: &InMemoryBillingStore, id: TransactionId, expected: TransactionStatus) {
    let tx = store
        .transaction(id)
        .await
        .unwrap_or_else(|| panic!("Transaction {} not found", id));
    assert_eq!(
        tx.status, expected,
        "Transaction {} ({}) has status {}, expected {}",
        id, tx.order_id, tx.status, expected
    );
}

/// Asserts the sequence of statuses recorded in a transaction's history
pub async fn assert_history(store: &InMemoryBillingStore, id: TransactionId, expected: &[TransactionStatus]) {
    let history = store
        .history_for(id)
        .await
        .unwrap_or_else(|e| panic!("Cannot read history of {}: {}", id, e));
    let statuses: Vec<_> = history.iter().map(|h| h.status).collect();
    assert_eq!(statuses, expected, "Unexpected history for transaction {}", id);
}
