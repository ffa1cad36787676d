//! Pre-built Test Fixtures
//!
//! Ready-to-use test data for a small school: one school year, one grade,
//! one class, an active student, a three-month tuition definition, a
//! donation definition and one payment method per channel.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use core_kernel::{
    BillingId, ClassId, Currency, GradeId, Money, SchoolId, SchoolYearId, StudentId, UserId,
};
use domain_billing::ports::mock::InMemoryBillingStore;
use domain_billing::{
    AuditInfo, BillingDefinition, BillingDetailItem, BillingType, PaymentChannel, PaymentMethod,
    StudentProfile, StudentStatus,
};
use fake::faker::name::en::Name;
use fake::Fake;
use rust_decimal_macros::dec;

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// Monthly tuition (SPP)
    pub fn tuition() -> Money {
        Money::idr(150_000)
    }

    /// Voluntary donation (infaq)
    pub fn donation() -> Money {
        Money::idr(50_000)
    }

    /// One-off building fee
    pub fn building_fee() -> Money {
        Money::idr(2_000_000)
    }

    pub fn zero() -> Money {
        Money::zero(Currency::IDR)
    }

    /// A non-rupiah amount for currency mismatch tests
    pub fn usd_10() -> Money {
        Money::new(dec!(10.00), Currency::USD)
    }
}

/// Fixture for dates and instants
pub struct DateFixtures;

impl DateFixtures {
    /// A fixed "today" for deterministic tests
    pub fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    /// Noon UTC on [`DateFixtures::today`]
    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    pub fn days_from_today(days: i64) -> NaiveDate {
        Self::today() + Duration::days(days)
    }
}

/// Fixture for identifying strings
pub struct StringFixtures;

impl StringFixtures {
    pub fn student_code() -> &'static str {
        "NIS-1001"
    }

    pub fn other_student_code() -> &'static str {
        "NIS-1002"
    }

    pub fn tuition_code() -> &'static str {
        "SPP-2024"
    }

    pub fn donation_code() -> &'static str {
        "INFAQ-2024"
    }

    /// Gateway server key used by signed notification builders
    pub fn server_key() -> &'static str {
        "SB-Mid-server-test-key"
    }

    /// A random student name
    pub fn student_name() -> String {
        Name().fake()
    }
}

/// A seeded school, usable against the in-memory store or the database
#[derive(Debug, Clone)]
pub struct SchoolFixture {
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
    pub grade_id: GradeId,
    pub class_id: ClassId,
    pub admin: UserId,
    pub student: StudentProfile,
    pub tuition: BillingDefinition,
    pub tuition_details: Vec<BillingDetailItem>,
    pub donation: BillingDefinition,
    pub bank_transfer: PaymentMethod,
    pub permata: PaymentMethod,
    pub mandiri_bill: PaymentMethod,
    pub credit_card: PaymentMethod,
}

impl Default for SchoolFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl SchoolFixture {
    /// Builds the fixture with tuition due 7, 37 and 67 days from the
    /// real current date
    pub fn new() -> Self {
        Self::as_of(Utc::now().date_naive())
    }

    /// Builds the fixture relative to a given "today"
    pub fn as_of(today: NaiveDate) -> Self {
        let school_id = SchoolId::new();
        let school_year_id = SchoolYearId::new();
        let grade_id = GradeId::new();
        let class_id = ClassId::new();

        let tuition = definition(
            school_id,
            school_year_id,
            Some(grade_id),
            "SPP",
            StringFixtures::tuition_code(),
            false,
            MoneyFixtures::tuition(),
        );
        let donation = definition(
            school_id,
            school_year_id,
            None,
            "Infaq",
            StringFixtures::donation_code(),
            true,
            MoneyFixtures::donation(),
        );
        let tuition_details = ["Januari", "Februari", "Maret"]
            .iter()
            .enumerate()
            .map(|(i, month)| {
                BillingDetailItem::new(
                    tuition.id,
                    format!("SPP {month}"),
                    today + Duration::days(7 + 30 * i as i64),
                    MoneyFixtures::tuition(),
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
                code: StringFixtures::student_code().into(),
                name: StringFixtures::student_name(),
                status: StudentStatus::Active,
            },
            tuition,
            tuition_details,
            donation,
            bank_transfer: PaymentMethod::new(
                "bni_va",
                "BNI Virtual Account",
                PaymentChannel::BankTransfer { bank: "bni".into() },
            ),
            permata: PaymentMethod::new("permata_va", "Permata Virtual Account", PaymentChannel::PermataVa),
            mandiri_bill: PaymentMethod::new("mandiri_bill", "Mandiri Bill Payment", PaymentChannel::MandiriBill),
            credit_card: PaymentMethod::new("credit_card", "Credit Card", PaymentChannel::CreditCard),
        }
    }

    /// Another active student in the same class
    pub fn other_student(&self) -> StudentProfile {
        StudentProfile {
            id: StudentId::new(),
            code: StringFixtures::other_student_code().into(),
            name: StringFixtures::student_name(),
            ..self.student.clone()
        }
    }

    pub fn classes(&self) -> BTreeSet<ClassId> {
        [self.class_id].into()
    }

    pub fn payment_methods(&self) -> [&PaymentMethod; 4] {
        [&self.bank_transfer, &self.permata, &self.mandiri_bill, &self.credit_card]
    }

    /// Seeds an in-memory store with everything in the fixture
    pub async fn seed(&self, store: &InMemoryBillingStore) {
        store.insert_student(self.student.clone()).await;
        store
            .insert_definition(self.tuition.clone(), self.tuition_details.clone())
            .await;
        store.insert_definition(self.donation.clone(), Vec::new()).await;
        for method in self.payment_methods() {
            store.insert_payment_method(method.clone()).await;
        }
    }

    /// A fresh in-memory store seeded with the fixture
    pub async fn store(&self) -> InMemoryBillingStore {
        let store = InMemoryBillingStore::new();
        self.seed(&store).await;
        store
    }
}

fn definition(
    school_id: SchoolId,
    school_year_id: SchoolYearId,
    grade_id: Option<GradeId>,
    name: &str,
    code: &str,
    is_donation: bool,
    amount: Money,
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
        amount,
        audit: AuditInfo::created(None),
        deletion: None,
    }
}
