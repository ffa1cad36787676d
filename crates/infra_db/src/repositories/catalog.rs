//! Billing catalog repository
//!
//! Read access to billing definitions, their detail items, payment methods
//! and the student directory. These tables are maintained by the
//! school administration surface; the engine never writes them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::DatabaseError;

const BILLING_COLUMNS: &str = r#"
    billing_id, school_id, school_year_id, grade_id, class_ids, name, code,
    billing_type, is_donation, amount, currency,
    created_at, created_by, updated_at, updated_by, deleted_at, deleted_by
"#;

/// Repository for the billing catalog
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds definitions matching a filter
    ///
    /// Definitions without a grade match every grade; definitions without
    /// classes match every class. Results are ordered by code.
    pub async fn find_billings(&self, filter: &BillingFilter) -> Result<Vec<BillingRow>, DatabaseError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        qb.push(BILLING_COLUMNS);
        qb.push(" FROM billings WHERE school_id = ");
        qb.push_bind(filter.school_id);

        if !filter.include_deleted {
            qb.push(" AND deleted_at IS NULL");
        }
        if let Some(year) = filter.school_year_id {
            qb.push(" AND school_year_id = ");
            qb.push_bind(year);
        }
        if let Some(grade) = filter.grade_id {
            qb.push(" AND (grade_id IS NULL OR grade_id = ");
            qb.push_bind(grade);
            qb.push(")");
        }
        if let Some(ref classes) = filter.class_ids {
            qb.push(" AND (cardinality(class_ids) = 0 OR class_ids && ");
            qb.push_bind(classes.clone());
            qb.push(")");
        }
        if let Some(donation) = filter.is_donation {
            qb.push(" AND is_donation = ");
            qb.push_bind(donation);
        }
        qb.push(" ORDER BY code");

        let rows = qb.build_query_as::<BillingRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Retrieves a definition by id, including deleted ones
    pub async fn get_billing(&self, billing_id: Uuid) -> Result<Option<BillingRow>, DatabaseError> {
        let sql = format!("SELECT {BILLING_COLUMNS} FROM billings WHERE billing_id = $1");
        let row = sqlx::query_as::<_, BillingRow>(&sql)
            .bind(billing_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Detail items of a definition, earliest due date first
    pub async fn get_details(&self, billing_id: Uuid) -> Result<Vec<BillingDetailRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, BillingDetailRow>(
            r#"
            SELECT billing_detail_id, billing_id, name, due_date, amount, currency
            FROM billing_details
            WHERE billing_id = $1
            ORDER BY due_date, name
            "#,
        )
        .bind(billing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_payment_method(&self, payment_method_id: Uuid) -> Result<Option<PaymentMethodRow>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentMethodRow>(
            "SELECT payment_method_id, code, name, channel FROM payment_methods WHERE payment_method_id = $1",
        )
        .bind(payment_method_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_student(&self, student_id: Uuid) -> Result<Option<StudentRow>, DatabaseError> {
        let row = sqlx::query_as::<_, StudentRow>(
            "SELECT student_id, school_id, class_id, code, name, status FROM students WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

/// Column-level filter for billing definitions
#[derive(Debug, Clone, Default)]
pub struct BillingFilter {
    pub school_id: Uuid,
    pub school_year_id: Option<Uuid>,
    pub grade_id: Option<Uuid>,
    pub class_ids: Option<Vec<Uuid>>,
    pub is_donation: Option<bool>,
    pub include_deleted: bool,
}

/// Database row for a billing definition
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingRow {
    pub billing_id: Uuid,
    pub school_id: Uuid,
    pub school_year_id: Uuid,
    pub grade_id: Option<Uuid>,
    pub class_ids: Vec<Uuid>,
    pub name: String,
    pub code: String,
    pub billing_type: BillingType,
    pub is_donation: bool,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingDetailRow {
    pub billing_detail_id: Uuid,
    pub billing_id: Uuid,
    pub name: String,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
}

/// Payment method row; the channel is stored as tagged JSON
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentMethodRow {
    pub payment_method_id: Uuid,
    pub code: String,
    pub name: String,
    pub channel: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StudentRow {
    pub student_id: Uuid,
    pub school_id: Uuid,
    pub class_id: Option<Uuid>,
    pub code: String,
    pub name: String,
    pub status: StudentStatus,
}

/// Billing type enum matching the database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "billing_type", rename_all = "snake_case")]
pub enum BillingType {
    Routine,
    Incidental,
}

/// Student status enum matching the database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "student_status", rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Inactive,
}
