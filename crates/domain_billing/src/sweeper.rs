//! Expiry sweeper
//!
//! Fails transactions that stayed pending past their time to live. Ledger
//! entries are never touched, so the payer can select them again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::BillingError;
use crate::ports::TransactionPort;
use crate::transaction::{StatusTransition, TransactionStatus};

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Pending transactions older than this are failed
    pub stale_after: Duration,
    /// Pause between sweeps when run on a schedule
    pub interval: std::time::Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::hours(24),
            interval: std::time::Duration::from_secs(3600),
        }
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub failed: usize,
    /// Finalized by someone else between the scan and the update
    pub skipped: usize,
}

/// Fails stale pending transactions
pub struct ExpirySweeper {
    transactions: Arc<dyn TransactionPort>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(transactions: Arc<dyn TransactionPort>, config: SweeperConfig) -> Self {
        Self { transactions, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    pub async fn sweep(&self) -> Result<SweepReport, BillingError> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweeps as of `now`
    #[instrument(skip(self), fields(now = %now))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, BillingError> {
        let cutoff = now - self.config.stale_after;
        let stale = self.transactions.find_stale_pending(cutoff).await?;

        let mut report = SweepReport {
            scanned: stale.len(),
            ..Default::default()
        };

        for transaction in &stale {
            let transition = StatusTransition::new(transaction, TransactionStatus::Failed, now);
            if self.transactions.transition(&transition).await? {
                debug!(order_id = %transaction.order_id, "Expired pending transaction");
                report.failed += 1;
            } else {
                debug!(order_id = %transaction.order_id, "Transaction finalized concurrently");
                report.skipped += 1;
            }
        }

        info!(
            scanned = report.scanned,
            failed = report.failed,
            skipped = report.skipped,
            "Expiry sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{InMemoryBillingStore, RacingTransactionStore};
    use crate::testing::Fixture;

    async fn seeded() -> (Fixture, InMemoryBillingStore, ExpirySweeper) {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let sweeper = ExpirySweeper::new(Arc::new(store.clone()), SweeperConfig::default());
        (fixture, store, sweeper)
    }

    #[tokio::test]
    async fn test_fails_stale_pending_exactly_once() {
        let (fixture, store, sweeper) = seeded().await;
        let (tx, detail) = fixture.pending_transaction(&[]);
        store.insert_transaction(tx.clone(), detail).await;
        store.backdate(tx.id, Utc::now() - Duration::hours(25)).await;

        let first = sweeper.sweep().await.unwrap();
        let second = sweeper.sweep().await.unwrap();

        assert_eq!(first, SweepReport { scanned: 1, failed: 1, skipped: 0 });
        assert_eq!(second, SweepReport::default());
        assert_eq!(store.transaction(tx.id).await.unwrap().status, TransactionStatus::Failed);
        assert_eq!(store.history_for(tx.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recent_pending_is_left_alone() {
        let (fixture, store, sweeper) = seeded().await;
        let (tx, detail) = fixture.pending_transaction(&[]);
        store.insert_transaction(tx.clone(), detail).await;
        store.backdate(tx.id, Utc::now() - Duration::hours(23)).await;

        let report = sweeper.sweep().await.unwrap();

        assert_eq!(report.scanned, 0);
        assert_eq!(store.transaction(tx.id).await.unwrap().status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_paid_transaction_is_never_failed() {
        let (fixture, store, sweeper) = seeded().await;
        let (tx, detail) = fixture.pending_transaction(&[]);
        store.insert_transaction(tx.clone(), detail).await;
        store
            .transition(&StatusTransition::new(&tx, TransactionStatus::Paid, Utc::now()))
            .await
            .unwrap();
        store.backdate(tx.id, Utc::now() - Duration::hours(48)).await;

        sweeper.sweep().await.unwrap();

        assert_eq!(store.transaction(tx.id).await.unwrap().status, TransactionStatus::Paid);
    }

    #[tokio::test]
    async fn test_custom_time_to_live() {
        let (fixture, store, _) = seeded().await;
        let sweeper = ExpirySweeper::new(
            Arc::new(store.clone()),
            SweeperConfig {
                stale_after: Duration::hours(1),
                ..Default::default()
            },
        );
        let (tx, detail) = fixture.pending_transaction(&[]);
        store.insert_transaction(tx.clone(), detail).await;

        let report = sweeper.sweep_at(Utc::now() + Duration::hours(2)).await.unwrap();
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_transaction_paid_after_scan() {
        let (fixture, store, _) = seeded().await;
        let racing = RacingTransactionStore::new(store.clone(), TransactionStatus::Paid);
        let sweeper = ExpirySweeper::new(Arc::new(racing), SweeperConfig::default());
        let (tx, detail) = fixture.pending_transaction(&[]);
        store.insert_transaction(tx.clone(), detail).await;
        store.backdate(tx.id, Utc::now() - Duration::hours(25)).await;

        let report = sweeper.sweep().await.unwrap();

        assert_eq!(report, SweepReport { scanned: 1, failed: 0, skipped: 1 });
        assert_eq!(store.transaction(tx.id).await.unwrap().status, TransactionStatus::Paid);
        let history: Vec<_> = store
            .history_for(tx.id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.status)
            .collect();
        assert_eq!(history, vec![TransactionStatus::Paid]);
    }
}
