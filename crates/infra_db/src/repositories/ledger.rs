//! Billing student ledger repository
//!
//! One row per (student, billing, detail) obligation. Rows are soft-deleted,
//! never removed, and the `payment_status` column only ever moves from
//! `unpaid` to `paid` (a trigger rejects the reverse).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::DatabaseError;

const ENTRY_COLUMNS: &str = r#"
    billing_student_id, billing_id, billing_detail_id, student_id, name,
    amount, currency, due_date, payment_status,
    created_at, created_by, updated_at, updated_by, deleted_at, deleted_by
"#;

/// Repository for ledger entries
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds entries matching a filter, oldest first
    pub async fn find(&self, filter: &EntryFilter) -> Result<Vec<BillingStudentRow>, DatabaseError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        qb.push(ENTRY_COLUMNS);
        qb.push(" FROM billing_students WHERE TRUE");

        if !filter.include_deleted {
            qb.push(" AND deleted_at IS NULL");
        }
        if let Some(student_id) = filter.student_id {
            qb.push(" AND student_id = ");
            qb.push_bind(student_id);
        }
        if let Some(billing_id) = filter.billing_id {
            qb.push(" AND billing_id = ");
            qb.push_bind(billing_id);
        }
        if let Some(detail_id) = filter.billing_detail_id {
            qb.push(" AND billing_detail_id = ");
            qb.push_bind(detail_id);
        }
        if let Some(status) = filter.payment_status {
            qb.push(" AND payment_status = ");
            qb.push_bind(status);
        }
        if let Some(ref fragment) = filter.name_contains {
            qb.push(" AND strpos(name, ");
            qb.push_bind(fragment.clone());
            qb.push(") > 0");
        }
        qb.push(" ORDER BY created_at, billing_student_id");

        let rows = qb.build_query_as::<BillingStudentRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Entries by id, deleted or not
    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<BillingStudentRow>, DatabaseError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM billing_students WHERE billing_student_id = ANY($1)");
        let rows = sqlx::query_as::<_, BillingStudentRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Checks for a live entry linking the triple
    pub async fn exists(&self, student_id: Uuid, billing_id: Uuid, detail_id: Option<Uuid>) -> Result<bool, DatabaseError> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM billing_students
                WHERE student_id = $1
                  AND billing_id = $2
                  AND billing_detail_id IS NOT DISTINCT FROM $3
                  AND deleted_at IS NULL
            )
            "#,
        )
        .bind(student_id)
        .bind(billing_id)
        .bind(detail_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    /// Applies inserts and updates batch by batch inside one transaction
    ///
    /// Any failure, including an update that finds no unpaid live row,
    /// rolls back every batch.
    pub async fn apply_batches(&self, batches: Vec<EntryBatch>) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for batch in batches {
            if !batch.inserts.is_empty() {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO billing_students (billing_student_id, billing_id, billing_detail_id, \
                     student_id, name, amount, currency, due_date, payment_status, created_at, created_by) ",
                );
                qb.push_values(&batch.inserts, |mut b, row| {
                    b.push_bind(row.billing_student_id)
                        .push_bind(row.billing_id)
                        .push_bind(row.billing_detail_id)
                        .push_bind(row.student_id)
                        .push_bind(&row.name)
                        .push_bind(row.amount)
                        .push_bind(&row.currency)
                        .push_bind(row.due_date)
                        .push_bind(row.payment_status)
                        .push_bind(row.created_at)
                        .push_bind(row.created_by);
                });
                written += qb.build().execute(&mut *tx).await?.rows_affected();
            }

            for update in &batch.updates {
                let result = sqlx::query(
                    r#"
                    UPDATE billing_students
                    SET name = $2, amount = $3, currency = $4, due_date = $5,
                        updated_at = $6, updated_by = $7
                    WHERE billing_student_id = $1
                      AND deleted_at IS NULL
                      AND payment_status = 'unpaid'
                    "#,
                )
                .bind(update.billing_student_id)
                .bind(&update.name)
                .bind(update.amount)
                .bind(&update.currency)
                .bind(update.due_date)
                .bind(update.updated_at)
                .bind(update.updated_by)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(DatabaseError::not_found("BillingStudent", update.billing_student_id));
                }
                written += 1;
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Soft-deletes a live entry; returns false if nothing changed
    pub async fn soft_delete(&self, id: Uuid, deleted_at: DateTime<Utc>, deleted_by: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE billing_students
            SET deleted_at = $2, deleted_by = $3
            WHERE billing_student_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(deleted_at)
        .bind(deleted_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flips unpaid entries to paid; returns how many changed
    pub async fn mark_paid(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE billing_students
            SET payment_status = 'paid', updated_at = $2
            WHERE billing_student_id = ANY($1) AND payment_status = 'unpaid'
            "#,
        )
        .bind(ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Column-level filter for ledger entries
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub student_id: Option<Uuid>,
    pub billing_id: Option<Uuid>,
    pub billing_detail_id: Option<Uuid>,
    pub payment_status: Option<PaymentStatus>,
    pub name_contains: Option<String>,
    pub include_deleted: bool,
}

/// One batch of ledger writes
#[derive(Debug, Clone, Default)]
pub struct EntryBatch {
    pub inserts: Vec<NewBillingStudent>,
    pub updates: Vec<BillingStudentUpdate>,
}

/// Database row for a ledger entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingStudentRow {
    pub billing_student_id: Uuid,
    pub billing_id: Uuid,
    pub billing_detail_id: Option<Uuid>,
    pub student_id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewBillingStudent {
    pub billing_student_id: Uuid,
    pub billing_id: Uuid,
    pub billing_detail_id: Option<Uuid>,
    pub student_id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct BillingStudentUpdate {
    pub billing_student_id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
}

/// Payment status enum matching the database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}
