//! Billing student ledger
//!
//! Each ledger entry records that one student owes one billing detail item
//! (or, for donations, one whole billing definition). Entries are created
//! when a definition is assigned and change only when they are paid.
//!
//! # Invariants
//!
//! - At most one non-deleted entry per (student, detail item)
//! - Payment status moves from unpaid to paid, never back
//! - Bulk writes are applied all-or-nothing

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use core_kernel::{BillingDetailId, BillingId, BillingStudentId, Money, StudentId, UserId};

use crate::audit::{AuditInfo, Deletion};
use crate::catalog::{BillingDefinition, BillingDetailItem};
use crate::error::BillingError;
use crate::ports::{BillingCatalogPort, LedgerPort, StudentDirectoryPort, StudentProfile};

/// Payment state of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }

    /// Returns true if moving to `next` is allowed
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!((self, next), (PaymentStatus::Unpaid, PaymentStatus::Paid))
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// A charge owed by one student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingStudent {
    pub id: BillingStudentId,
    pub billing_id: BillingId,
    /// `None` for whole-billing charges such as donations
    pub billing_detail_id: Option<BillingDetailId>,
    pub student_id: StudentId,
    pub name: String,
    pub amount: Money,
    pub due_date: Option<NaiveDate>,
    pub payment_status: PaymentStatus,
    pub audit: AuditInfo,
    pub deletion: Option<Deletion>,
}

impl BillingStudent {
    /// Creates an unpaid entry for one detail item
    pub fn for_detail(student_id: StudentId, detail: &BillingDetailItem, name: impl Into<String>, actor: UserId) -> Self {
        Self {
            id: BillingStudentId::new_v7(),
            billing_id: detail.billing_id,
            billing_detail_id: Some(detail.id),
            student_id,
            name: name.into(),
            amount: detail.amount,
            due_date: Some(detail.due_date),
            payment_status: PaymentStatus::Unpaid,
            audit: AuditInfo::created(Some(actor)),
            deletion: None,
        }
    }

    /// Creates an unpaid whole-billing entry
    pub fn for_billing(student_id: StudentId, definition: &BillingDefinition, actor: UserId) -> Self {
        Self {
            id: BillingStudentId::new_v7(),
            billing_id: definition.id,
            billing_detail_id: None,
            student_id,
            name: definition.name.clone(),
            amount: definition.amount,
            due_date: None,
            payment_status: PaymentStatus::Unpaid,
            audit: AuditInfo::created(Some(actor)),
            deletion: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    /// Marks the entry paid
    ///
    /// Returns `false` if it was already paid.
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> bool {
        if !self.payment_status.can_transition_to(PaymentStatus::Paid) {
            return false;
        }
        self.payment_status = PaymentStatus::Paid;
        self.audit.updated_at = Some(at);
        true
    }

    /// Returns true if the due date has passed while the entry is unpaid
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_paid() && self.due_date.is_some_and(|d| d < today)
    }
}

/// Typed filter over ledger entries
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub student_id: Option<StudentId>,
    pub billing_id: Option<BillingId>,
    pub billing_detail_id: Option<BillingDetailId>,
    pub payment_status: Option<PaymentStatus>,
    /// Substring match on the entry name
    pub name_contains: Option<String>,
    pub include_deleted: bool,
}

impl LedgerQuery {
    pub fn for_student(student_id: StudentId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Default::default()
        }
    }

    pub fn billing(mut self, billing_id: BillingId) -> Self {
        self.billing_id = Some(billing_id);
        self
    }

    pub fn matches(&self, entry: &BillingStudent) -> bool {
        if !self.include_deleted && entry.is_deleted() {
            return false;
        }
        if self.student_id.is_some_and(|s| s != entry.student_id) {
            return false;
        }
        if self.billing_id.is_some_and(|b| b != entry.billing_id) {
            return false;
        }
        if self.billing_detail_id.is_some() && self.billing_detail_id != entry.billing_detail_id {
            return false;
        }
        if self.payment_status.is_some_and(|s| s != entry.payment_status) {
            return false;
        }
        if let Some(ref fragment) = self.name_contains {
            if !entry.name.contains(fragment.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A single staged ledger mutation
#[derive(Debug, Clone)]
pub enum LedgerWrite {
    Insert(BillingStudent),
    /// Replaces amount, due date and name of an existing unpaid entry
    Update(BillingStudent),
}

impl LedgerWrite {
    pub fn entry(&self) -> &BillingStudent {
        match self {
            LedgerWrite::Insert(e) | LedgerWrite::Update(e) => e,
        }
    }
}

/// Ledger service configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Rows per write batch
    pub batch_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

/// Counts reported by a template expansion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Matching entries left alone because they are already paid
    pub skipped_paid: usize,
}

/// Name under which a template-expanded entry is stored
pub fn template_entry_name(detail_name: &str, student_code: &str) -> String {
    format!("{detail_name} - {student_code}")
}

/// Creates and maintains ledger entries
pub struct LedgerService {
    catalog: Arc<dyn BillingCatalogPort>,
    students: Arc<dyn StudentDirectoryPort>,
    ledger: Arc<dyn LedgerPort>,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(
        catalog: Arc<dyn BillingCatalogPort>,
        students: Arc<dyn StudentDirectoryPort>,
        ledger: Arc<dyn LedgerPort>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            catalog,
            students,
            ledger,
            config,
        }
    }

    /// Assigns a billing definition to the named students
    ///
    /// Creates one entry per (student, detail item), or a single whole-billing
    /// entry per student for donation definitions. If any target already
    /// exists the call fails with `DuplicateAssignment` and nothing is written.
    #[instrument(skip(self, student_ids), fields(billing_id = %billing_id, students = student_ids.len()))]
    pub async fn assign_explicit(
        &self,
        billing_id: BillingId,
        student_ids: &[StudentId],
        actor: UserId,
    ) -> Result<Vec<BillingStudent>, BillingError> {
        let definition = self.load_definition(billing_id).await?;
        let details = self.catalog.details_for(billing_id).await?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for student_id in student_ids {
            if !seen.insert(*student_id) {
                continue;
            }
            self.load_student(*student_id).await?;
            if definition.is_donation || details.is_empty() {
                targets.push((*student_id, None));
            } else {
                targets.extend(details.iter().map(|d| (*student_id, Some(d))));
            }
        }

        for (student_id, detail) in &targets {
            let detail_id = detail.map(|d| d.id);
            if self.ledger.exists(*student_id, billing_id, detail_id).await? {
                return Err(BillingError::DuplicateAssignment {
                    student_id: *student_id,
                    billing_id,
                    detail_id,
                });
            }
        }

        let entries: Vec<BillingStudent> = targets
            .into_iter()
            .map(|(student_id, detail)| match detail {
                Some(detail) => BillingStudent::for_detail(student_id, detail, detail.name.clone(), actor),
                None => BillingStudent::for_billing(student_id, &definition, actor),
            })
            .collect();

        let writes = entries.iter().cloned().map(LedgerWrite::Insert).collect();
        let written = self.commit(writes).await?;
        info!(written, "Assigned billing to students");

        Ok(entries)
    }

    /// Expands a billing definition's detail items for each student
    ///
    /// Entries are named `"<detail name> - <student code>"`. An existing
    /// unpaid entry is updated in place with the current amount and due date;
    /// a paid one is left untouched; otherwise a new entry is inserted.
    #[instrument(skip(self, student_ids), fields(billing_id = %billing_id, students = student_ids.len()))]
    pub async fn apply_template(
        &self,
        billing_id: BillingId,
        student_ids: &[StudentId],
        actor: UserId,
    ) -> Result<TemplateOutcome, BillingError> {
        self.load_definition(billing_id).await?;
        let details = self.catalog.details_for(billing_id).await?;

        let mut outcome = TemplateOutcome::default();
        let mut writes = Vec::new();

        for student_id in student_ids {
            let student = self.load_student(*student_id).await?;
            let existing = self
                .ledger
                .find_entries(&LedgerQuery {
                    student_id: Some(student.id),
                    billing_id: Some(billing_id),
                    name_contains: Some(student.code.clone()),
                    ..Default::default()
                })
                .await?;

            for detail in &details {
                let name = template_entry_name(&detail.name, &student.code);
                let found = existing
                    .iter()
                    .find(|e| e.billing_detail_id == Some(detail.id) || e.name == name);

                match found {
                    Some(entry) if entry.is_paid() => outcome.skipped_paid += 1,
                    Some(entry) => {
                        let mut updated = entry.clone();
                        updated.amount = detail.amount;
                        updated.due_date = Some(detail.due_date);
                        updated.name = name;
                        updated.audit.touch(Some(actor));
                        writes.push(LedgerWrite::Update(updated));
                        outcome.updated += 1;
                    }
                    None => {
                        writes.push(LedgerWrite::Insert(BillingStudent::for_detail(
                            student.id, detail, name, actor,
                        )));
                        outcome.inserted += 1;
                    }
                }
            }
        }

        self.commit(writes).await?;
        info!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            skipped_paid = outcome.skipped_paid,
            "Applied billing template"
        );
        Ok(outcome)
    }

    /// Returns true iff a non-deleted entry links the triple
    pub async fn check_billing_student_exists(
        &self,
        student_id: StudentId,
        billing_id: BillingId,
        detail_id: Option<BillingDetailId>,
    ) -> Result<bool, BillingError> {
        Ok(self.ledger.exists(student_id, billing_id, detail_id).await?)
    }

    /// Soft-deletes an entry
    #[instrument(skip(self), fields(entry_id = %id))]
    pub async fn soft_delete(&self, id: BillingStudentId, actor: UserId) -> Result<(), BillingError> {
        let deleted = self
            .ledger
            .soft_delete(
                id,
                Deletion {
                    deleted_at: Utc::now(),
                    deleted_by: actor,
                },
            )
            .await?;

        if !deleted {
            return Err(BillingError::LedgerEntryNotFound(id));
        }
        Ok(())
    }

    /// Non-deleted entries of a student, grouped by billing in due-date order
    pub async fn entries_for_student(&self, student_id: StudentId) -> Result<Vec<BillingStudent>, BillingError> {
        let entries = self.ledger.find_entries(&LedgerQuery::for_student(student_id)).await?;

        let mut by_billing: BTreeMap<BillingId, Vec<BillingStudent>> = BTreeMap::new();
        for entry in entries {
            by_billing.entry(entry.billing_id).or_default().push(entry);
        }

        Ok(by_billing
            .into_values()
            .flat_map(|mut group| {
                group.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.name.cmp(&b.name)));
                group
            })
            .collect())
    }

    async fn commit(&self, writes: Vec<LedgerWrite>) -> Result<u64, BillingError> {
        if writes.is_empty() {
            return Ok(0);
        }
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<LedgerWrite>> = writes.chunks(batch_size).map(|c| c.to_vec()).collect();
        debug!(batches = batches.len(), batch_size, "Committing ledger writes");
        Ok(self.ledger.commit_writes(batches).await?)
    }

    async fn load_definition(&self, billing_id: BillingId) -> Result<BillingDefinition, BillingError> {
        match self.catalog.get_definition(billing_id).await? {
            Some(def) if !def.is_deleted() => Ok(def),
            _ => Err(BillingError::BillingNotFound(billing_id)),
        }
    }

    async fn load_student(&self, student_id: StudentId) -> Result<StudentProfile, BillingError> {
        self.students
            .get_student(student_id)
            .await?
            .ok_or(BillingError::StudentNotFound(student_id))
    }
}
