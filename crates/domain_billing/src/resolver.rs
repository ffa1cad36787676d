//! Billing assignment resolver
//!
//! Works out which charges a student currently owes: the detail items of
//! every in-scope definition that are not yet paid, plus at most one
//! donation the student may still give to. Read-only.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use core_kernel::{BillingDetailId, ClassId, GradeId, SchoolId, SchoolYearId, StudentId};

use crate::catalog::{BillingDefinition, BillingDetailItem, BillingQuery};
use crate::error::BillingError;
use crate::ledger::{BillingStudent, LedgerQuery};
use crate::ports::{BillingCatalogPort, LedgerPort, StudentDirectoryPort, TransactionPort};

/// Who and what to resolve billing for
#[derive(Debug, Clone)]
pub struct ResolveQuery {
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
    pub grade_id: GradeId,
    /// `None` skips class scoping
    pub class_ids: Option<BTreeSet<ClassId>>,
    pub include_donation: bool,
}

/// One detail item the student owes or may owe
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedItem {
    pub billing_name: String,
    pub detail: BillingDetailItem,
    pub ledger_entry: Option<BillingStudent>,
    /// Due date passed while unpaid; informational only
    pub disabled: bool,
}

impl ResolvedItem {
    /// Returns true if the student already has a ledger entry for the item
    pub fn exists(&self) -> bool {
        self.ledger_entry.is_some()
    }
}

/// A donation the student may still give to
#[derive(Debug, Clone, Serialize)]
pub struct DonationCandidate {
    pub definition: BillingDefinition,
    pub ledger_entry: Option<BillingStudent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedBilling {
    /// Ordered by due date, then name
    pub items: Vec<ResolvedItem>,
    pub donation: Option<DonationCandidate>,
}

/// Resolves the billing that applies to a student
pub struct BillingResolver {
    catalog: Arc<dyn BillingCatalogPort>,
    students: Arc<dyn StudentDirectoryPort>,
    ledger: Arc<dyn LedgerPort>,
    transactions: Arc<dyn TransactionPort>,
}

impl BillingResolver {
    pub fn new(
        catalog: Arc<dyn BillingCatalogPort>,
        students: Arc<dyn StudentDirectoryPort>,
        ledger: Arc<dyn LedgerPort>,
        transactions: Arc<dyn TransactionPort>,
    ) -> Self {
        Self {
            catalog,
            students,
            ledger,
            transactions,
        }
    }

    /// Resolves against today's date
    pub async fn resolve(&self, query: &ResolveQuery) -> Result<ResolvedBilling, BillingError> {
        self.resolve_at(query, Utc::now().date_naive()).await
    }

    /// Resolves as of `today`
    #[instrument(skip(self, query), fields(student_id = %query.student_id, today = %today))]
    pub async fn resolve_at(&self, query: &ResolveQuery, today: NaiveDate) -> Result<ResolvedBilling, BillingError> {
        let mut billing_query = BillingQuery::for_school(query.school_id)
            .school_year(query.school_year_id)
            .grade(query.grade_id);
        billing_query.class_ids = query.class_ids.clone();

        let definitions = self.catalog.find_definitions(&billing_query).await?;
        let (donations, charges): (Vec<_>, Vec<_>) = definitions.into_iter().partition(|d| d.is_donation);

        let mut items = Vec::new();
        for definition in &charges {
            items.extend(self.resolve_definition(query.student_id, definition, today).await?);
        }
        items.sort_by(|a, b| {
            a.detail
                .due_date
                .cmp(&b.detail.due_date)
                .then_with(|| a.detail.name.cmp(&b.detail.name))
        });

        let donation = if query.include_donation {
            self.resolve_donation(query.student_id, donations).await?
        } else {
            None
        };

        debug!(items = items.len(), has_donation = donation.is_some(), "Resolved billing");
        Ok(ResolvedBilling { items, donation })
    }

    async fn resolve_definition(
        &self,
        student_id: StudentId,
        definition: &BillingDefinition,
        today: NaiveDate,
    ) -> Result<Vec<ResolvedItem>, BillingError> {
        let details = self.catalog.details_for(definition.id).await?;
        let entries = self
            .ledger
            .find_entries(&LedgerQuery::for_student(student_id).billing(definition.id))
            .await?;

        let mut by_detail: HashMap<BillingDetailId, BillingStudent> = HashMap::new();
        for entry in entries {
            let Some(detail_id) = entry.billing_detail_id else {
                continue;
            };
            if by_detail.insert(detail_id, entry).is_some() {
                return Err(BillingError::IntegrityViolation(format!(
                    "student {student_id} has more than one ledger entry for detail {detail_id}"
                )));
            }
        }

        let mut items = Vec::new();
        for detail in details {
            let entry = by_detail.remove(&detail.id);
            if entry.as_ref().is_some_and(|e| e.is_paid()) {
                continue;
            }
            items.push(ResolvedItem {
                billing_name: definition.name.clone(),
                disabled: detail.is_overdue(today),
                detail,
                ledger_entry: entry,
            });
        }
        Ok(items)
    }

    async fn resolve_donation(
        &self,
        student_id: StudentId,
        mut donations: Vec<BillingDefinition>,
    ) -> Result<Option<DonationCandidate>, BillingError> {
        if donations.is_empty() {
            return Ok(None);
        }

        let student = self
            .students
            .get_student(student_id)
            .await?
            .ok_or(BillingError::StudentNotFound(student_id))?;
        if !student.is_active() {
            return Ok(None);
        }

        donations.sort_by(|a, b| b.audit.last_modified().cmp(&a.audit.last_modified()));

        for definition in donations {
            let mut entries = self
                .ledger
                .find_entries(&LedgerQuery::for_student(student_id).billing(definition.id))
                .await?;

            if entries.len() > 1 {
                return Err(BillingError::IntegrityViolation(format!(
                    "student {student_id} has more than one ledger entry for donation {}",
                    definition.id
                )));
            }

            match entries.pop() {
                None => {
                    return Ok(Some(DonationCandidate {
                        definition,
                        ledger_entry: None,
                    }))
                }
                Some(entry) if entry.is_paid() => continue,
                Some(entry) => {
                    if self.transactions.has_open_transaction_for_entry(entry.id).await? {
                        continue;
                    }
                    return Ok(Some(DonationCandidate {
                        definition,
                        ledger_entry: Some(entry),
                    }));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BillingStudent;
    use crate::ports::mock::InMemoryBillingStore;
    use crate::ports::{StudentStatus, TransactionPort};
    use crate::testing::Fixture;
    use crate::transaction::{StatusTransition, TransactionStatus};
    use chrono::Duration;

    fn resolver(store: &InMemoryBillingStore) -> BillingResolver {
        let store = Arc::new(store.clone());
        BillingResolver::new(store.clone(), store.clone(), store.clone(), store)
    }

    fn query(fixture: &Fixture, include_donation: bool) -> ResolveQuery {
        ResolveQuery {
            student_id: fixture.student.id,
            school_id: fixture.school_id,
            school_year_id: fixture.school_year_id,
            grade_id: fixture.grade_id,
            class_ids: Some(fixture.classes()),
            include_donation,
        }
    }

    #[tokio::test]
    async fn test_item_disabled_once_due_date_passes() {
        let fixture = Fixture::new();
        let store = InMemoryBillingStore::new();
        store.insert_student(fixture.student.clone()).await;
        let detail = fixture.detail("SPP Januari", 7, 150_000);
        store.insert_definition(fixture.tuition.clone(), vec![detail.clone()]).await;
        store
            .insert_entries(vec![BillingStudent::for_detail(
                fixture.student.id,
                &detail,
                detail.name.clone(),
                fixture.admin,
            )])
            .await;
        let resolver = resolver(&store);

        let now = resolver.resolve_at(&query(&fixture, false), fixture.today()).await.unwrap();
        assert_eq!(now.items.len(), 1);
        assert!(now.items[0].exists());
        assert!(!now.items[0].disabled);

        let later = fixture.today() + Duration::days(8);
        let after = resolver.resolve_at(&query(&fixture, false), later).await.unwrap();
        assert_eq!(after.items.len(), 1);
        assert!(after.items[0].disabled);
    }

    #[tokio::test]
    async fn test_paid_items_are_excluded_and_order_is_by_due_date() {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let first = &fixture.tuition_details[0];
        let mut paid = BillingStudent::for_detail(fixture.student.id, first, first.name.clone(), fixture.admin);
        paid.mark_paid(Utc::now());
        store.insert_entries(vec![paid]).await;

        let resolved = resolver(&store).resolve(&query(&fixture, false)).await.unwrap();

        let names: Vec<_> = resolved.items.iter().map(|i| i.detail.name.as_str()).collect();
        assert_eq!(names, vec!["SPP Februari", "SPP Maret"]);
        assert!(resolved.items.iter().all(|i| !i.exists()));
    }

    #[tokio::test]
    async fn test_duplicate_entries_are_an_integrity_violation() {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let detail = &fixture.tuition_details[0];
        store
            .insert_entries(vec![
                BillingStudent::for_detail(fixture.student.id, detail, "a", fixture.admin),
                BillingStudent::for_detail(fixture.student.id, detail, "b", fixture.admin),
            ])
            .await;

        let result = resolver(&store).resolve(&query(&fixture, false)).await;
        assert!(matches!(result, Err(BillingError::IntegrityViolation(_))));
    }

    #[tokio::test]
    async fn test_class_restricted_definition_hidden_from_other_classes() {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let mut restricted = fixture.tuition.clone();
        restricted.id = core_kernel::BillingId::new();
        restricted.class_ids = [ClassId::new()].into();
        store
            .insert_definition(restricted.clone(), vec![fixture.detail("Study tour", 10, 500_000)])
            .await;

        let resolved = resolver(&store).resolve(&query(&fixture, false)).await.unwrap();
        assert!(resolved.items.iter().all(|i| i.billing_name == fixture.tuition.name));
        assert_eq!(resolved.items.len(), fixture.tuition_details.len());
    }

    #[tokio::test]
    async fn test_donation_picks_most_recently_updated() {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let mut newer = fixture.donation.clone();
        newer.id = core_kernel::BillingId::new();
        newer.code = "INFAQ-2".into();
        newer.audit.updated_at = Some(Utc::now() + Duration::minutes(5));
        store.insert_definition(newer.clone(), Vec::new()).await;

        let resolved = resolver(&store).resolve(&query(&fixture, true)).await.unwrap();
        let donation = resolved.donation.expect("donation candidate");
        assert_eq!(donation.definition.id, newer.id);
        assert!(donation.ledger_entry.is_none());
    }

    #[tokio::test]
    async fn test_donation_skipped_while_transaction_open() {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let entry = BillingStudent::for_billing(fixture.student.id, &fixture.donation, fixture.admin);
        store.insert_entries(vec![entry.clone()]).await;
        let (tx, detail) = fixture.pending_transaction(&[entry.id]);
        store.insert_transaction(tx.clone(), detail).await;
        let resolver = resolver(&store);

        let pending = resolver.resolve(&query(&fixture, true)).await.unwrap();
        assert!(pending.donation.is_none());

        store
            .transition(&StatusTransition::new(&tx, TransactionStatus::Failed, Utc::now()))
            .await
            .unwrap();
        let after_failure = resolver.resolve(&query(&fixture, true)).await.unwrap();
        let donation = after_failure.donation.expect("donation candidate");
        assert_eq!(donation.ledger_entry.map(|e| e.id), Some(entry.id));
    }

    #[tokio::test]
    async fn test_inactive_student_gets_no_donation() {
        let fixture = Fixture::new();
        let store = fixture.store().await;
        let mut inactive = fixture.student.clone();
        inactive.status = StudentStatus::Inactive;
        store.insert_student(inactive).await;

        let resolved = resolver(&store).resolve(&query(&fixture, true)).await.unwrap();
        assert!(resolved.donation.is_none());
        assert_eq!(resolved.items.len(), fixture.tuition_details.len());
    }
}
