//! Payment transaction repository
//!
//! Transactions, their details, the append-only status history and the
//! gateway exchange log. Status changes go through [`TransactionRepository::transition`],
//! a conditional update that only succeeds while the row is still pending.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DatabaseError;

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id, student_id, order_id, ledger_entry_ids, total, currency,
    status, reference_number, gateway_reference, expires_at,
    created_at, created_by, updated_at, updated_by
"#;

/// Repository for payment transactions
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts a transaction and its detail row on the given connection
    pub async fn insert(
        conn: &mut PgConnection,
        transaction: &NewTransaction,
        detail: &TransactionDetailRow,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, student_id, order_id, ledger_entry_ids, total, currency,
                status, reference_number, gateway_reference, expires_at, created_at, created_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(transaction.transaction_id)
        .bind(transaction.student_id)
        .bind(&transaction.order_id)
        .bind(&transaction.ledger_entry_ids)
        .bind(transaction.total)
        .bind(&transaction.currency)
        .bind(transaction.status)
        .bind(&transaction.reference_number)
        .bind(&transaction.gateway_reference)
        .bind(transaction.expires_at)
        .bind(transaction.created_at)
        .bind(transaction.created_by)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO transaction_details (transaction_id, payment_method_id, bank, paid_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(detail.transaction_id)
        .bind(detail.payment_method_id)
        .bind(&detail.bank)
        .bind(detail.paid_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Appends a history row on the given connection
    pub async fn insert_history(conn: &mut PgConnection, history: &TransactionHistoryRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_histories (history_id, transaction_id, order_id, status, invoice_number, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(history.history_id)
        .bind(history.transaction_id)
        .bind(&history.order_id)
        .bind(history.status)
        .bind(&history.invoice_number)
        .bind(history.recorded_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Sets the gateway reference and expiry on the given connection
    pub async fn set_gateway_reference(
        conn: &mut PgConnection,
        transaction_id: Uuid,
        reference: &serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE transactions SET gateway_reference = $2, expires_at = $3 WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .bind(reference)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Transaction", transaction_id));
        }
        Ok(())
    }

    pub async fn find_by_order_id(&self, order_id: &str) -> Result<Option<TransactionRow>, DatabaseError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE order_id = $1");
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_detail(&self, transaction_id: Uuid) -> Result<Option<TransactionDetailRow>, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionDetailRow>(
            "SELECT transaction_id, payment_method_id, bank, paid_at FROM transaction_details WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Pending transactions created before the cutoff, oldest first
    pub async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> Result<Vec<TransactionRow>, DatabaseError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE status = 'pending' AND created_at < $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(created_before)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Moves a pending transaction to a final status
    ///
    /// The status update, the history row and the paid-at stamp commit
    /// together. Returns false, writing nothing, when the row is no longer
    /// pending.
    pub async fn transition(&self, change: &StatusChange) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2,
                gateway_reference = COALESCE($3, gateway_reference),
                expires_at = COALESCE($4, expires_at),
                updated_at = $5
            WHERE transaction_id = $1 AND status = 'pending'
            "#,
        )
        .bind(change.transaction_id)
        .bind(change.to)
        .bind(&change.gateway_reference)
        .bind(change.expires_at)
        .bind(change.history.recorded_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_history(&mut *tx, &change.history).await?;

        if let Some(paid_at) = change.paid_at {
            sqlx::query("UPDATE transaction_details SET paid_at = $2 WHERE transaction_id = $1")
                .bind(change.transaction_id)
                .bind(paid_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Stores a payment code on a pending transaction
    ///
    /// Returns false when the row is no longer pending.
    pub async fn record_reference(
        &self,
        transaction_id: Uuid,
        gateway_reference: Option<serde_json::Value>,
        expires_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET gateway_reference = COALESCE($2, gateway_reference),
                expires_at = COALESCE($3, expires_at),
                updated_at = $4
            WHERE transaction_id = $1 AND status = 'pending'
            "#,
        )
        .bind(transaction_id)
        .bind(gateway_reference)
        .bind(expires_at)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn append_history(&self, history: &TransactionHistoryRow) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_history(&mut *conn, history).await
    }

    /// History rows of a transaction in recording order
    pub async fn history_for(&self, transaction_id: Uuid) -> Result<Vec<TransactionHistoryRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionHistoryRow>(
            r#"
            SELECT history_id, transaction_id, order_id, status, invoice_number, recorded_at
            FROM transaction_histories
            WHERE transaction_id = $1
            ORDER BY recorded_at, history_id
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Checks whether a pending or paid transaction covers the entry
    pub async fn has_open_for_entry(&self, entry_id: Uuid) -> Result<bool, DatabaseError> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM transactions
                WHERE ledger_entry_ids @> ARRAY[$1]::uuid[]
                  AND status IN ('pending', 'paid')
            )
            "#,
        )
        .bind(entry_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    pub async fn log_exchange(&self, exchange: &GatewayExchangeRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO gateway_exchanges (exchange_id, order_id, operation, request, response, error, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(exchange.exchange_id)
        .bind(&exchange.order_id)
        .bind(&exchange.operation)
        .bind(&exchange.request)
        .bind(&exchange.response)
        .bind(&exchange.error)
        .bind(exchange.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Database row for a transaction
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub transaction_id: Uuid,
    pub student_id: Uuid,
    pub order_id: String,
    pub ledger_entry_ids: Vec<Uuid>,
    pub total: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub reference_number: String,
    pub gateway_reference: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

/// Insert payload for a transaction
pub type NewTransaction = TransactionRow;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionDetailRow {
    pub transaction_id: Uuid,
    pub payment_method_id: Uuid,
    pub bank: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionHistoryRow {
    pub history_id: Uuid,
    pub transaction_id: Uuid,
    pub order_id: String,
    pub status: TransactionStatus,
    pub invoice_number: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GatewayExchangeRow {
    pub exchange_id: Uuid,
    pub order_id: String,
    pub operation: String,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Conditional status update
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub transaction_id: Uuid,
    pub to: TransactionStatus,
    pub history: TransactionHistoryRow,
    pub gateway_reference: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Transaction status enum matching the database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
}
