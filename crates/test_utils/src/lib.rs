//! Test Utilities Crate
//!
//! Shared test infrastructure, fixtures, and helpers for the billing
//! engine test suite.
//!
//! # Modules
//!
//! - `fixtures`: a seeded school with tuition, donation and payment methods
//! - `builders`: builders for definitions, ledger entries and signed notifications
//! - `database`: PostgreSQL testcontainer and seeding helpers
//! - `assertions`: assertions over the in-memory store
//! - `generators`: property-based test data generators

pub mod assertions;
pub mod builders;
pub mod database;
pub mod fixtures;
pub mod generators;

pub use assertions::*;
pub use builders::*;
pub use database::*;
pub use fixtures::*;
pub use generators::*;
