//! Domain Adapters
//!
//! Adapter implementations for the billing domain ports, connecting the
//! domain interfaces to the PostgreSQL repositories.
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingAdapter;
//! use domain_billing::LedgerPort;
//!
//! let adapter = PostgresBillingAdapter::new(pool);
//! let entries = adapter.find_entries(&LedgerQuery::for_student(student_id)).await?;
//! ```

pub mod billing;

pub use billing::{PgCreationScope, PostgresBillingAdapter};
