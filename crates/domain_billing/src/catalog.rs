//! Billing catalog
//!
//! Billing definitions describe what a school charges, scoped to a school,
//! a school year, optionally a grade and optionally a set of classes. Each
//! definition owns its detail items (one per due date, e.g. one per month).
//! The catalog is maintained elsewhere; the engine only reads it.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use core_kernel::{
    BillingDetailId, BillingId, ClassId, GradeId, Money, MoneyError, SchoolId,
    SchoolYearId,
};

use crate::audit::{AuditInfo, Deletion};

/// Kind of charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    /// Recurring charge such as monthly tuition
    Routine,
    /// One-off charge such as an exam or uniform fee
    Incidental,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Routine => "routine",
            BillingType::Incidental => "incidental",
        }
    }
}

impl std::str::FromStr for BillingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routine" => Ok(BillingType::Routine),
            "incidental" => Ok(BillingType::Incidental),
            other => Err(format!("unknown billing type: {other}")),
        }
    }
}

/// A chargeable obligation defined by a school
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingDefinition {
    pub id: BillingId,
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
    /// `None` applies to every grade of the school year
    pub grade_id: Option<GradeId>,
    /// Empty applies to every class
    pub class_ids: BTreeSet<ClassId>,
    pub name: String,
    /// Unique across the catalog
    pub code: String,
    pub billing_type: BillingType,
    pub is_donation: bool,
    pub amount: Money,
    pub audit: AuditInfo,
    pub deletion: Option<Deletion>,
}

impl BillingDefinition {
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    /// Returns true if the definition is restricted to specific classes
    pub fn is_class_restricted(&self) -> bool {
        !self.class_ids.is_empty()
    }

    /// Returns true if this definition is in scope for the query
    pub fn applies_to(&self, query: &BillingQuery) -> bool {
        if self.school_id != query.school_id {
            return false;
        }
        if !query.include_deleted && self.is_deleted() {
            return false;
        }
        if let Some(year) = query.school_year_id {
            if self.school_year_id != year {
                return false;
            }
        }
        if let (Some(own), Some(wanted)) = (self.grade_id, query.grade_id) {
            if own != wanted {
                return false;
            }
        }
        if let Some(ref classes) = query.class_ids {
            if self.is_class_restricted() && self.class_ids.is_disjoint(classes) {
                return false;
            }
        }
        if let Some(donation) = query.is_donation {
            if self.is_donation != donation {
                return false;
            }
        }
        true
    }

    /// Amount charged, derived from the detail items when there are any
    pub fn effective_amount(&self, details: &[BillingDetailItem]) -> Result<Money, MoneyError> {
        if details.is_empty() {
            return Ok(self.amount);
        }
        Money::checked_sum(details.iter().map(|d| &d.amount), self.amount.currency())
    }
}

/// A dated installment of a billing definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetailItem {
    pub id: BillingDetailId,
    pub billing_id: BillingId,
    pub name: String,
    pub due_date: NaiveDate,
    pub amount: Money,
}

impl BillingDetailItem {
    pub fn new(billing_id: BillingId, name: impl Into<String>, due_date: NaiveDate, amount: Money) -> Self {
        Self {
            id: BillingDetailId::new_v7(),
            billing_id,
            name: name.into(),
            due_date,
            amount,
        }
    }

    /// Returns true if the due date lies strictly before `today`
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.due_date < today
    }
}

/// Typed filter over billing definitions
///
/// Adapters translate each populated field into a bound predicate.
#[derive(Debug, Clone)]
pub struct BillingQuery {
    pub school_id: SchoolId,
    pub school_year_id: Option<SchoolYearId>,
    /// Matches definitions for this grade and grade-less definitions
    pub grade_id: Option<GradeId>,
    /// Matches unrestricted definitions and those sharing a class with the set
    pub class_ids: Option<BTreeSet<ClassId>>,
    pub is_donation: Option<bool>,
    pub include_deleted: bool,
}

impl BillingQuery {
    /// Creates a query for every live definition of a school
    pub fn for_school(school_id: SchoolId) -> Self {
        Self {
            school_id,
            school_year_id: None,
            grade_id: None,
            class_ids: None,
            is_donation: None,
            include_deleted: false,
        }
    }

    pub fn school_year(mut self, school_year_id: SchoolYearId) -> Self {
        self.school_year_id = Some(school_year_id);
        self
    }

    pub fn grade(mut self, grade_id: GradeId) -> Self {
        self.grade_id = Some(grade_id);
        self
    }

    pub fn classes(mut self, class_ids: BTreeSet<ClassId>) -> Self {
        self.class_ids = Some(class_ids);
        self
    }

    pub fn donation(mut self, is_donation: bool) -> Self {
        self.is_donation = Some(is_donation);
        self
    }
}
