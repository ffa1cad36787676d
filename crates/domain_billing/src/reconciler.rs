//! Webhook reconciler
//!
//! Applies asynchronous gateway notifications to transactions. Deliveries
//! may repeat and may race the expiry sweeper; every status change is a
//! compare-and-set on `pending`, so the first writer wins and replays are
//! harmless.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::BillingError;
use crate::ports::{LedgerPort, TransactionPort};
use crate::transaction::{
    GatewayReference, OrderId, StatusTransition, Transaction, TransactionHistory, TransactionStatus,
};

/// Gateway timestamps carry no zone and are in Western Indonesia Time
const GATEWAY_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// Virtual account number reported for bank transfers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaNumber {
    pub bank: String,
    pub va_number: String,
}

/// Payment notification as posted by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub order_id: String,
    pub transaction_status: String,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub va_numbers: Vec<VaNumber>,
    #[serde(default)]
    pub permata_va_number: Option<String>,
    #[serde(default)]
    pub biller_code: Option<String>,
    #[serde(default)]
    pub bill_key: Option<String>,
    #[serde(default)]
    pub expiry_time: Option<String>,
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub gross_amount: Option<String>,
    #[serde(default)]
    pub signature_key: Option<String>,
    #[serde(default)]
    pub settlement_time: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub fraud_status: Option<String>,
}

impl WebhookNotification {
    /// Payment code carried by the notification, if any
    pub fn gateway_reference(&self) -> Option<GatewayReference> {
        if let Some(va) = self.va_numbers.first() {
            return Some(GatewayReference::VirtualAccount {
                bank: va.bank.clone(),
                va_number: va.va_number.clone(),
            });
        }
        if let Some(ref number) = self.permata_va_number {
            return Some(GatewayReference::PermataVirtualAccount {
                va_number: number.clone(),
            });
        }
        match (&self.biller_code, &self.bill_key) {
            (Some(biller_code), Some(bill_key)) => Some(GatewayReference::BillPayment {
                biller_code: biller_code.clone(),
                bill_key: bill_key.clone(),
            }),
            _ => None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry_time.as_deref().and_then(parse_gateway_time)
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.settlement_time.as_deref().and_then(parse_gateway_time)
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS` gateway local time, or RFC 3339
pub fn parse_gateway_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok()?;
    FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS)?
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// What a notification did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Moved the transaction out of pending
    Applied(TransactionStatus),
    /// Status already matched; history appended, paid cascade re-applied
    Replayed(TransactionStatus),
    /// A concurrent writer finalized the transaction first
    LostRace,
}

/// Applies gateway notifications to transactions and the ledger
pub struct WebhookReconciler {
    ledger: Arc<dyn LedgerPort>,
    transactions: Arc<dyn TransactionPort>,
}

impl WebhookReconciler {
    pub fn new(ledger: Arc<dyn LedgerPort>, transactions: Arc<dyn TransactionPort>) -> Self {
        Self { ledger, transactions }
    }

    #[instrument(
        skip(self, notification),
        fields(order_id = %notification.order_id, status = %notification.transaction_status)
    )]
    pub async fn reconcile(&self, notification: &WebhookNotification) -> Result<ReconcileOutcome, BillingError> {
        let transaction = self
            .transactions
            .find_by_order_id(&OrderId::new(notification.order_id.as_str()))
            .await?
            .ok_or_else(|| BillingError::TransactionNotFound(notification.order_id.clone()))?;

        let status = TransactionStatus::from_gateway(&notification.transaction_status)
            .ok_or_else(|| BillingError::UnknownStatus(notification.transaction_status.clone()))?;

        let now = Utc::now();

        if status == TransactionStatus::Pending {
            self.record_reference(&transaction, notification).await?;
        }

        if status == transaction.status {
            self.transactions
                .append_history(&TransactionHistory::record(&transaction, status, now))
                .await?;
            if status == TransactionStatus::Paid {
                let healed = self.cascade(&transaction, notification.settled_at().unwrap_or(now)).await?;
                if healed > 0 {
                    warn!(healed, "Replay completed an interrupted ledger cascade");
                }
            }
            info!("Replayed notification");
            return Ok(ReconcileOutcome::Replayed(status));
        }

        if transaction.is_terminal() {
            warn!(current = %transaction.status, requested = %status, "Ignoring status change on finalized transaction");
            return Err(BillingError::TransactionFinalized {
                order_id: notification.order_id.clone(),
                current: transaction.status,
                requested: status,
            });
        }

        let paid_at = notification.settled_at().unwrap_or(now);
        let transition = StatusTransition::new(&transaction, status, now)
            .with_gateway_reference(notification.gateway_reference(), notification.expires_at())
            .paid_at(paid_at);

        if !self.transactions.transition(&transition).await? {
            info!("Transaction finalized concurrently, skipping cascade");
            return Ok(ReconcileOutcome::LostRace);
        }

        if status == TransactionStatus::Paid {
            let marked = self.cascade(&transaction, paid_at).await?;
            info!(marked, "Ledger entries marked paid");
        }
        info!("Notification applied");
        Ok(ReconcileOutcome::Applied(status))
    }

    /// Persists a payment code that first arrives on a pending notification
    async fn record_reference(
        &self,
        transaction: &Transaction,
        notification: &WebhookNotification,
    ) -> Result<(), BillingError> {
        let reference = notification.gateway_reference();
        let expires_at = notification.expires_at();
        if reference.is_none() && expires_at.is_none() {
            return Ok(());
        }
        if self
            .transactions
            .record_gateway_reference(transaction.id, reference.as_ref(), expires_at)
            .await?
        {
            info!("Recorded gateway payment reference");
        }
        Ok(())
    }

    async fn cascade(&self, transaction: &Transaction, at: DateTime<Utc>) -> Result<u64, BillingError> {
        Ok(self.ledger.mark_paid(&transaction.ledger_entry_ids, at).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BillingStudent, PaymentStatus};
    use crate::ports::mock::{InMemoryBillingStore, RacingTransactionStore};
    use crate::testing::Fixture;
    use chrono::Timelike;
    use core_kernel::BillingStudentId;

    struct Harness {
        store: InMemoryBillingStore,
        reconciler: WebhookReconciler,
        transaction: Transaction,
        entries: Vec<BillingStudentId>,
    }

    async fn harness() -> Harness {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let entries: Vec<BillingStudent> = fixture
            .tuition_details
            .iter()
            .take(2)
            .map(|d| BillingStudent::for_detail(fixture.student.id, d, d.name.clone(), fixture.admin))
            .collect();
        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        store.insert_entries(entries).await;
        let (transaction, detail) = fixture.pending_transaction(&ids);
        store.insert_transaction(transaction.clone(), detail).await;

        let shared = Arc::new(store.clone());
        Harness {
            reconciler: WebhookReconciler::new(shared.clone(), shared),
            store,
            transaction,
            entries: ids,
        }
    }

    fn notification(order_id: &str, status: &str) -> WebhookNotification {
        serde_json::from_value(serde_json::json!({
            "order_id": order_id,
            "transaction_status": status,
            "payment_type": "bank_transfer",
            "va_numbers": [{ "bank": "bca", "va_number": "12345678901" }],
            "status_code": "200",
            "gross_amount": "150000.00",
            "settlement_time": "2024-01-10 09:30:00",
        }))
        .unwrap()
    }

    async fn statuses(h: &Harness) -> Vec<PaymentStatus> {
        let mut out = Vec::new();
        for id in &h.entries {
            out.push(h.store.entry(*id).await.unwrap().payment_status);
        }
        out
    }

    #[tokio::test]
    async fn test_settlement_pays_transaction_and_entries() {
        let h = harness().await;
        let n = notification(h.transaction.order_id.as_str(), "settlement");

        let outcome = h.reconciler.reconcile(&n).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied(TransactionStatus::Paid));
        let stored = h.store.transaction(h.transaction.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Paid);
        assert_eq!(
            stored.gateway_reference,
            Some(GatewayReference::VirtualAccount {
                bank: "bca".into(),
                va_number: "12345678901".into()
            })
        );
        assert_eq!(statuses(&h).await, vec![PaymentStatus::Paid; 2]);
        assert_eq!(h.store.history_for(h.transaction.id).await.unwrap().len(), 1);

        let detail = h.store.get_detail(h.transaction.id).await.unwrap().unwrap();
        assert_eq!(detail.paid_at, parse_gateway_time("2024-01-10 09:30:00"));
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let h = harness().await;
        let n = notification(h.transaction.order_id.as_str(), "settlement");

        h.reconciler.reconcile(&n).await.unwrap();
        let first = h.store.transaction(h.transaction.id).await.unwrap();
        let outcome = h.reconciler.reconcile(&n).await.unwrap();
        let second = h.store.transaction(h.transaction.id).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Replayed(TransactionStatus::Paid));
        assert_eq!(first, second);
        assert_eq!(statuses(&h).await, vec![PaymentStatus::Paid; 2]);
        assert_eq!(h.store.history_for(h.transaction.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replay_heals_interrupted_cascade() {
        let h = harness().await;
        let transition = StatusTransition::new(&h.transaction, TransactionStatus::Paid, Utc::now());
        assert!(h.store.transition(&transition).await.unwrap());

        let n = notification(h.transaction.order_id.as_str(), "settlement");
        h.reconciler.reconcile(&n).await.unwrap();

        assert_eq!(statuses(&h).await, vec![PaymentStatus::Paid; 2]);
    }

    #[tokio::test]
    async fn test_unknown_order_mutates_nothing() {
        let h = harness().await;
        let before = h.store.transactions().await;

        let result = h.reconciler.reconcile(&notification("ORDER-does-not-exist", "settlement")).await;

        assert!(matches!(result, Err(BillingError::TransactionNotFound(_))));
        assert_eq!(h.store.transactions().await, before);
        assert_eq!(statuses(&h).await, vec![PaymentStatus::Unpaid; 2]);
    }

    #[tokio::test]
    async fn test_unmapped_status_is_rejected() {
        let h = harness().await;
        let result = h
            .reconciler
            .reconcile(&notification(h.transaction.order_id.as_str(), "deny"))
            .await;

        assert!(matches!(result, Err(BillingError::UnknownStatus(ref s)) if s == "deny"));
        let stored = h.store.transaction(h.transaction.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert!(h.store.history_for(h.transaction.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_fails_without_touching_ledger() {
        let h = harness().await;
        let outcome = h
            .reconciler
            .reconcile(&notification(h.transaction.order_id.as_str(), "expire"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied(TransactionStatus::Failed));
        assert_eq!(statuses(&h).await, vec![PaymentStatus::Unpaid; 2]);
        let detail = h.store.get_detail(h.transaction.id).await.unwrap().unwrap();
        assert!(detail.paid_at.is_none());
    }

    #[tokio::test]
    async fn test_terminal_transaction_refuses_other_status() {
        let h = harness().await;
        h.reconciler
            .reconcile(&notification(h.transaction.order_id.as_str(), "settlement"))
            .await
            .unwrap();

        let result = h
            .reconciler
            .reconcile(&notification(h.transaction.order_id.as_str(), "expire"))
            .await;

        assert!(matches!(
            result,
            Err(BillingError::TransactionFinalized {
                current: TransactionStatus::Paid,
                requested: TransactionStatus::Failed,
                ..
            })
        ));
        assert_eq!(
            h.store.transaction(h.transaction.id).await.unwrap().status,
            TransactionStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_pending_notification_records_payment_code() {
        let h = harness().await;
        let mut n = notification(h.transaction.order_id.as_str(), "pending");
        n.va_numbers = vec![VaNumber {
            bank: "bca".into(),
            va_number: "999".into(),
        }];
        n.expiry_time = Some("2024-07-16 10:00:00".into());

        let outcome = h.reconciler.reconcile(&n).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Replayed(TransactionStatus::Pending));
        let stored = h.store.transaction(h.transaction.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert_eq!(
            stored.gateway_reference,
            Some(GatewayReference::VirtualAccount {
                bank: "bca".into(),
                va_number: "999".into()
            })
        );
        assert_eq!(stored.expires_at, parse_gateway_time("2024-07-16 10:00:00"));
        assert_eq!(statuses(&h).await, vec![PaymentStatus::Unpaid; 2]);
    }

    #[tokio::test]
    async fn test_pending_notification_keeps_code_of_finalized_transaction() {
        let h = harness().await;
        h.reconciler
            .reconcile(&notification(h.transaction.order_id.as_str(), "settlement"))
            .await
            .unwrap();

        let mut n = notification(h.transaction.order_id.as_str(), "pending");
        n.va_numbers = vec![VaNumber {
            bank: "bni".into(),
            va_number: "111".into(),
        }];
        let result = h.reconciler.reconcile(&n).await;

        assert!(matches!(result, Err(BillingError::TransactionFinalized { .. })));
        let stored = h.store.transaction(h.transaction.id).await.unwrap();
        assert_eq!(
            stored.gateway_reference,
            Some(GatewayReference::VirtualAccount {
                bank: "bca".into(),
                va_number: "12345678901".into()
            })
        );
    }

    #[tokio::test]
    async fn test_settlement_losing_to_sweeper_skips_cascade() {
        let h = harness().await;
        let racing = Arc::new(RacingTransactionStore::new(h.store.clone(), TransactionStatus::Failed));
        let reconciler = WebhookReconciler::new(Arc::new(h.store.clone()), racing);

        let outcome = reconciler
            .reconcile(&notification(h.transaction.order_id.as_str(), "settlement"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::LostRace);
        let stored = h.store.transaction(h.transaction.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(statuses(&h).await, vec![PaymentStatus::Unpaid; 2]);
        let history: Vec<_> = h
            .store
            .history_for(h.transaction.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(history, vec![TransactionStatus::Failed]);
        assert!(h.store.get_detail(h.transaction.id).await.unwrap().unwrap().paid_at.is_none());
    }

    #[test]
    fn test_gateway_time_is_jakarta_local() {
        let parsed = parse_gateway_time("2024-01-10 09:30:00").unwrap();
        assert_eq!(parsed.hour(), 2);
        assert_eq!(parsed.minute(), 30);
        assert!(parse_gateway_time("not a time").is_none());
    }

    #[test]
    fn test_reference_from_bill_payment_payload() {
        let n: WebhookNotification = serde_json::from_value(serde_json::json!({
            "order_id": "ORDER-1",
            "transaction_status": "pending",
            "biller_code": "70012",
            "bill_key": "990000000001",
        }))
        .unwrap();
        assert_eq!(
            n.gateway_reference(),
            Some(GatewayReference::BillPayment {
                biller_code: "70012".into(),
                bill_key: "990000000001".into()
            })
        );
        assert!(n.va_numbers.is_empty());
    }
}
