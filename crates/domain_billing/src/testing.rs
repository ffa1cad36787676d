//! Shared fixtures for the crate's unit tests

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, Utc};

use core_kernel::{
    BillingId, BillingStudentId, ClassId, GradeId, Money, SchoolId, SchoolYearId, StudentId, UserId,
};

use crate::audit::AuditInfo;
use crate::catalog::{BillingDefinition, BillingDetailItem, BillingType};
use crate::payment::{PaymentChannel, PaymentMethod};
use crate::ports::mock::InMemoryBillingStore;
use crate::ports::{StudentProfile, StudentStatus};
use crate::transaction::{Transaction, TransactionDetail};

pub(crate) struct Fixture {
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
    pub grade_id: GradeId,
    pub class_id: ClassId,
    pub admin: UserId,
    pub student: StudentProfile,
    pub tuition: BillingDefinition,
    pub tuition_details: Vec<BillingDetailItem>,
    pub donation: BillingDefinition,
    pub payment_method: PaymentMethod,
}

impl Fixture {
    pub fn new() -> Self {
        let school_id = SchoolId::new();
        let school_year_id = SchoolYearId::new();
        let grade_id = GradeId::new();
        let class_id = ClassId::new();

        let tuition = definition(school_id, school_year_id, Some(grade_id), "SPP", "SPP-10", false, 150_000);
        let donation = definition(school_id, school_year_id, None, "Infaq", "INFAQ", true, 50_000);

        let today = Utc::now().date_naive();
        let tuition_details = ["Januari", "Februari", "Maret"]
            .iter()
            .enumerate()
            .map(|(i, month)| {
                BillingDetailItem::new(
                    tuition.id,
                    format!("SPP {month}"),
                    today + Duration::days(7 + 30 * i as i64),
                    Money::idr(150_000),
                )
            })
            .collect();

        Self {
            school_id,
            school_year_id,
            grade_id,
            class_id,
            admin: UserId::new(),
            student: StudentProfile {
                id: StudentId::new(),
                school_id,
                class_id: Some(class_id),
                code: "NIS-1001".into(),
                name: "Siti Rahma".into(),
                status: StudentStatus::Active,
            },
            tuition,
            tuition_details,
            donation,
            payment_method: PaymentMethod::new(
                "bca_va",
                "BCA Virtual Account",
                PaymentChannel::BankTransfer { bank: "bca".into() },
            ),
        }
    }

    /// A detail item of the tuition definition due `days` from today
    pub fn detail(&self, name: &str, days: i64, amount: i64) -> BillingDetailItem {
        BillingDetailItem::new(
            self.tuition.id,
            name,
            Utc::now().date_naive() + Duration::days(days),
            Money::idr(amount),
        )
    }

    pub fn other_student(&self) -> StudentProfile {
        StudentProfile {
            id: StudentId::new(),
            code: "NIS-1002".into(),
            name: "Budi Santoso".into(),
            ..self.student.clone()
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    pub fn classes(&self) -> BTreeSet<ClassId> {
        [self.class_id].into()
    }

    /// A store seeded with the fixture's student, definitions and payment method
    pub async fn store(&self) -> InMemoryBillingStore {
        let store = InMemoryBillingStore::new();
        store.insert_student(self.student.clone()).await;
        store
            .insert_definition(self.tuition.clone(), self.tuition_details.clone())
            .await;
        store.insert_definition(self.donation.clone(), Vec::new()).await;
        store.insert_payment_method(self.payment_method.clone()).await;
        store
    }

    pub fn pending_transaction(&self, entries: &[BillingStudentId]) -> (Transaction, TransactionDetail) {
        let tx = Transaction::pending(
            self.student.id,
            entries.to_vec(),
            Money::idr(150_000),
            self.admin,
            Utc::now(),
        );
        let detail = TransactionDetail {
            transaction_id: tx.id,
            payment_method_id: self.payment_method.id,
            bank: Some("bca".into()),
            paid_at: None,
        };
        (tx, detail)
    }
}

fn definition(
    school_id: SchoolId,
    school_year_id: SchoolYearId,
    grade_id: Option<GradeId>,
    name: &str,
    code: &str,
    is_donation: bool,
    amount: i64,
) -> BillingDefinition {
    BillingDefinition {
        id: BillingId::new(),
        school_id,
        school_year_id,
        grade_id,
        class_ids: BTreeSet::new(),
        name: name.into(),
        code: code.into(),
        billing_type: if is_donation { BillingType::Incidental } else { BillingType::Routine },
        is_donation,
        amount: Money::idr(amount),
        audit: AuditInfo::created(None),
        deletion: None,
    }
}
