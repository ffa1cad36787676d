//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the school billing engine using SQLx.
//!
//! # Architecture
//!
//! Repositories hold the SQL and work in row types; the
//! [`adapters::PostgresBillingAdapter`] implements the domain ports on top
//! of them. Queries are built at runtime (`query_as` and `QueryBuilder`),
//! so the crate builds without a live database.
//!
//! # Concurrency
//!
//! Every status change is a conditional `UPDATE ... WHERE status = 'pending'`
//! whose affected-row count decides the winner. The ledger's uniqueness rule
//! is a partial unique index over live rows.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingAdapter};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/billing")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresBillingAdapter::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::{PgCreationScope, PostgresBillingAdapter};
pub use error::{db_to_port_error, DatabaseError};
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
