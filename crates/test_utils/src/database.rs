//! Database Test Utilities
//!
//! Helpers for database tests: a PostgreSQL testcontainer with the schema
//! applied, and seeding of the collaborator tables (students, payment
//! methods, billing catalog) that the engine only reads.

use domain_billing::{BillingDefinition, BillingDetailItem, BillingType, PaymentMethod, StudentProfile, StudentStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

const POSTGRES_TAG: &str = "16-alpine";
const POSTGRES_USER: &str = "test_user";
const POSTGRES_PASSWORD: &str = "test_password";
const POSTGRES_DB: &str = "billing_test";

/// Configuration for test database
#[derive(Debug, Clone)]
pub struct TestDatabaseConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl Default for TestDatabaseConfig {
    fn default() -> Self {
        Self {
            user: POSTGRES_USER.to_string(),
            password: POSTGRES_PASSWORD.to_string(),
            database: POSTGRES_DB.to_string(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

impl TestDatabaseConfig {
    /// Creates the database connection URL
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// A wrapper around a PostgreSQL test container
pub struct TestDatabase {
    _container: ContainerAsync<Postgres>,
    pub config: TestDatabaseConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Starts a new PostgreSQL container for testing
    ///
    /// # Returns
    ///
    /// A new TestDatabase instance with an initialized schema
    ///
    /// # Errors
    ///
    /// Returns an error if the container fails to start or schema fails to initialize
    pub async fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // Create and start the container
        let container = Postgres::default()
            .with_user(POSTGRES_USER)
            .with_password(POSTGRES_PASSWORD)
            .with_db_name(POSTGRES_DB)
            .with_tag(POSTGRES_TAG)
            .start()
            .await?;

        // Get the mapped port
        let port = container.get_host_port_ipv4(5432).await?;
        let host = container.get_host().await?.to_string();

        let config = TestDatabaseConfig {
            user: POSTGRES_USER.to_string(),
            password: POSTGRES_PASSWORD.to_string(),
            database: POSTGRES_DB.to_string(),
            host,
            port,
        };

        // Create connection pool
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.connection_url())
            .await?;

        let test_db = Self {
            _container: container,
            config,
            pool,
        };

        // Initialize schema
        test_db.init_schema().await?;

        Ok(test_db)
    }

    /// Initializes the database schema from the migrations file
    async fn init_schema(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Read and execute the initial schema
        let schema = include_str!("../../../migrations/20240101_000001_initial_schema.sql");
        sqlx::raw_sql(schema).execute(&self.pool).await?;
        Ok(())
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Clears all data from the database while preserving the schema
    ///
    /// Useful for resetting state between tests
    pub async fn clear_data(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let tables = vec![
            "gateway_exchanges",
            "transaction_histories",
            "transaction_details",
            "transactions",
            "billing_students",
            "billing_details",
            "billings",
            "payment_methods",
            "students",
        ];

        for table in tables {
            sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", table))
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Inserts a student row
    pub async fn seed_student(&self, student: &StudentProfile) -> Result<(), sqlx::Error> {
        let status = match student.status {
            StudentStatus::Active => "active",
            StudentStatus::Inactive => "inactive",
        };
        sqlx::query(
            "INSERT INTO students (student_id, school_id, class_id, code, name, status) \
             VALUES ($1, $2, $3, $4, $5, $6::student_status)",
        )
        .bind(*student.id.as_uuid())
        .bind(*student.school_id.as_uuid())
        .bind(student.class_id.map(|c| *c.as_uuid()))
        .bind(&student.code)
        .bind(&student.name)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a payment method row
    pub async fn seed_payment_method(&self, method: &PaymentMethod) -> Result<(), sqlx::Error> {
        let channel = serde_json::to_value(&method.channel).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query("INSERT INTO payment_methods (payment_method_id, code, name, channel) VALUES ($1, $2, $3, $4)")
            .bind(*method.id.as_uuid())
            .bind(&method.code)
            .bind(&method.name)
            .bind(channel)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts a billing definition and its detail items
    pub async fn seed_definition(
        &self,
        definition: &BillingDefinition,
        details: &[BillingDetailItem],
    ) -> Result<(), sqlx::Error> {
        let billing_type = match definition.billing_type {
            BillingType::Routine => "routine",
            BillingType::Incidental => "incidental",
        };
        let class_ids: Vec<uuid::Uuid> = definition.class_ids.iter().map(|c| *c.as_uuid()).collect();
        sqlx::query(
            "INSERT INTO billings (billing_id, school_id, school_year_id, grade_id, class_ids, name, code, \
             billing_type, is_donation, amount, currency, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8::billing_type, $9, $10, $11, $12)",
        )
        .bind(*definition.id.as_uuid())
        .bind(*definition.school_id.as_uuid())
        .bind(*definition.school_year_id.as_uuid())
        .bind(definition.grade_id.map(|g| *g.as_uuid()))
        .bind(class_ids)
        .bind(&definition.name)
        .bind(&definition.code)
        .bind(billing_type)
        .bind(definition.is_donation)
        .bind(definition.amount.amount())
        .bind(definition.amount.currency().code())
        .bind(definition.audit.created_at)
        .execute(&self.pool)
        .await?;

        for detail in details {
            sqlx::query(
                "INSERT INTO billing_details (billing_detail_id, billing_id, name, due_date, amount, currency) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(*detail.id.as_uuid())
            .bind(*detail.billing_id.as_uuid())
            .bind(&detail.name)
            .bind(detail.due_date)
            .bind(detail.amount.amount())
            .bind(detail.amount.currency().code())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Seeds everything in a [`crate::SchoolFixture`]
    pub async fn seed_school(&self, school: &crate::SchoolFixture) -> Result<(), sqlx::Error> {
        self.seed_student(&school.student).await?;
        self.seed_definition(&school.tuition, &school.tuition_details).await?;
        self.seed_definition(&school.donation, &[]).await?;
        for method in school.payment_methods() {
            self.seed_payment_method(method).await?;
        }
        Ok(())
    }
}

/// Global test database for shared integration tests
static SHARED_TEST_DB: OnceCell<Arc<TestDatabase>> = OnceCell::const_new();

/// Gets or creates a shared test database instance
///
/// This function provides a singleton test database that can be shared
/// across multiple tests to reduce container startup overhead.
///
/// # Returns
///
/// An Arc to the shared TestDatabase instance
///
/// # Panics
///
/// Panics if the database fails to initialize
pub async fn get_shared_test_database() -> Arc<TestDatabase> {
    SHARED_TEST_DB
        .get_or_init(|| async {
            Arc::new(
                TestDatabase::new()
                    .await
                    .expect("Failed to create shared test database"),
            )
        })
        .await
        .clone()
}

/// Creates an isolated test database for a single test
///
/// Use this when tests need to modify data and isolation is required
pub async fn create_isolated_test_database() -> Result<TestDatabase, Box<dyn std::error::Error + Send + Sync>> {
    TestDatabase::new().await
}

/// Helper macro for running database tests
#[macro_export]
macro_rules! db_test {
    ($name:ident, $body:expr) => {
        #[tokio::test]
        async fn $name() {
            let db = $crate::database::create_isolated_test_database()
                .await
                .expect("Failed to create test database");
            let pool = db.pool();
            $body
        }
    };
}

/// Helper trait for test assertions on database results
pub trait DatabaseTestAssertions {
    /// Asserts that a database operation succeeded
    fn assert_success(&self);

    /// Asserts that a specific number of rows were affected
    fn assert_rows_affected(&self, expected: u64);
}

impl DatabaseTestAssertions for sqlx::postgres::PgQueryResult {
    fn assert_success(&self) {
        // Query completed successfully if we got here
    }

    fn assert_rows_affected(&self, expected: u64) {
        assert_eq!(
            self.rows_affected(),
            expected,
            "Expected {} rows affected, got {}",
            expected,
            self.rows_affected()
        );
    }
}
