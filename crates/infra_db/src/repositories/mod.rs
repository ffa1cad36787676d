//! Repository implementations
//!
//! Repositories speak in database rows and `DatabaseError`; the adapters
//! in [`crate::adapters`] translate to and from domain types.

pub mod catalog;
pub mod ledger;
pub mod transaction;

pub use catalog::CatalogRepository;
pub use ledger::LedgerRepository;
pub use transaction::TransactionRepository;
