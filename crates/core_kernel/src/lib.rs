//! Core Kernel - Foundational types for the school billing engine
//!
//! This crate provides the building blocks shared by the billing domain and
//! its adapters:
//! - Money types with precise decimal arithmetic
//! - Strongly-typed identifiers for schools, students and billing records
//! - Port primitives (errors, health checks) for the hexagonal architecture

pub mod money;
pub mod identifiers;
pub mod ports;

pub use money::{Money, Currency, MoneyError};
pub use identifiers::{
    SchoolId, SchoolYearId, GradeId, ClassId, StudentId, UserId,
    BillingId, BillingDetailId, BillingStudentId, TransactionId,
    TransactionHistoryId, PaymentMethodId, GatewayExchangeId,
};
pub use ports::{
    PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth,
    CircuitBreakerConfig,
};
