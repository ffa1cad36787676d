//! Test Data Builders
//!
//! Builder patterns for constructing test data with sensible defaults.
//! Tests specify only the fields they care about.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use core_kernel::{BillingId, ClassId, GradeId, Money, SchoolId, SchoolYearId, StudentId, UserId};
use domain_billing::{
    AuditInfo, BillingDefinition, BillingDetailItem, BillingStudent, BillingType, PaymentStatus, VaNumber,
    WebhookNotification,
};
use sha2::{Digest, Sha512};

use crate::fixtures::{DateFixtures, MoneyFixtures, StringFixtures};

/// Builder for billing definitions
pub struct BillingDefinitionBuilder {
    definition: BillingDefinition,
}

impl BillingDefinitionBuilder {
    pub fn new(school_id: SchoolId, school_year_id: SchoolYearId) -> Self {
        Self {
            definition: BillingDefinition {
                id: BillingId::new(),
                school_id,
                school_year_id,
                grade_id: None,
                class_ids: BTreeSet::new(),
                name: "Uang Kegiatan".into(),
                code: "KEG-2024".into(),
                billing_type: BillingType::Incidental,
                is_donation: false,
                amount: MoneyFixtures::tuition(),
                audit: AuditInfo::created(None),
                deletion: None,
            },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.definition.name = name.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.definition.code = code.into();
        self
    }

    pub fn with_grade(mut self, grade_id: GradeId) -> Self {
        self.definition.grade_id = Some(grade_id);
        self
    }

    /// Restricts the definition to the given classes
    pub fn with_classes(mut self, classes: impl IntoIterator<Item = ClassId>) -> Self {
        self.definition.class_ids = classes.into_iter().collect();
        self
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.definition.amount = amount;
        self
    }

    pub fn routine(mut self) -> Self {
        self.definition.billing_type = BillingType::Routine;
        self
    }

    pub fn donation(mut self) -> Self {
        self.definition.is_donation = true;
        self
    }

    pub fn build(self) -> BillingDefinition {
        self.definition
    }

    /// Builds the definition with one detail item per `(name, due, amount)`
    pub fn build_with_details(
        self,
        details: &[(&str, NaiveDate, Money)],
    ) -> (BillingDefinition, Vec<BillingDetailItem>) {
        let definition = self.definition;
        let items = details
            .iter()
            .map(|(name, due, amount)| BillingDetailItem::new(definition.id, *name, *due, *amount))
            .collect();
        (definition, items)
    }
}

/// Builder for ledger entries
pub struct BillingStudentBuilder {
    entry: BillingStudent,
}

impl BillingStudentBuilder {
    /// An unpaid entry for one detail item
    pub fn for_detail(student_id: StudentId, detail: &BillingDetailItem) -> Self {
        Self {
            entry: BillingStudent::for_detail(student_id, detail, detail.name.clone(), UserId::new()),
        }
    }

    /// An unpaid whole-billing entry
    pub fn for_billing(student_id: StudentId, definition: &BillingDefinition) -> Self {
        Self {
            entry: BillingStudent::for_billing(student_id, definition, UserId::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.entry.name = name.into();
        self
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.entry.amount = amount;
        self
    }

    pub fn paid(mut self) -> Self {
        self.entry.payment_status = PaymentStatus::Paid;
        self
    }

    pub fn build(self) -> BillingStudent {
        self.entry
    }
}

/// Builder for gateway notifications
///
/// `build_signed` fills in `signature_key` the way the gateway computes it:
/// hex SHA-512 over order id, status code, gross amount and server key.
pub struct NotificationBuilder {
    notification: WebhookNotification,
}

impl NotificationBuilder {
    pub fn new(order_id: impl Into<String>, transaction_status: impl Into<String>) -> Self {
        Self {
            notification: WebhookNotification {
                order_id: order_id.into(),
                transaction_status: transaction_status.into(),
                payment_type: Some("bank_transfer".into()),
                va_numbers: Vec::new(),
                permata_va_number: None,
                biller_code: None,
                bill_key: None,
                expiry_time: None,
                status_code: Some("200".into()),
                gross_amount: Some("150000.00".into()),
                signature_key: None,
                settlement_time: None,
                transaction_time: Some("2024-07-15 19:00:00".into()),
                transaction_id: Some(uuid::Uuid::new_v4().to_string()),
                fraud_status: None,
            },
        }
    }

    pub fn settlement(order_id: impl Into<String>) -> Self {
        Self::new(order_id, "settlement").with_settlement_time("2024-07-15 19:05:00")
    }

    pub fn expire(order_id: impl Into<String>) -> Self {
        Self::new(order_id, "expire").with_status_code("407")
    }

    pub fn with_va(mut self, bank: &str, va_number: &str) -> Self {
        self.notification.va_numbers = vec![VaNumber {
            bank: bank.into(),
            va_number: va_number.into(),
        }];
        self
    }

    pub fn with_gross_amount(mut self, amount: Money) -> Self {
        self.notification.gross_amount = Some(format!("{:.2}", amount.amount()));
        self
    }

    pub fn with_status_code(mut self, code: &str) -> Self {
        self.notification.status_code = Some(code.into());
        self
    }

    pub fn with_settlement_time(mut self, at: &str) -> Self {
        self.notification.settlement_time = Some(at.into());
        self
    }

    pub fn with_expiry_time(mut self, at: &str) -> Self {
        self.notification.expiry_time = Some(at.into());
        self
    }

    pub fn build(self) -> WebhookNotification {
        self.notification
    }

    /// Builds the notification signed with the given server key
    pub fn build_signed(mut self, server_key: &str) -> WebhookNotification {
        self.notification.signature_key = Some(sign(&self.notification, server_key));
        self.notification
    }

    /// Builds the notification signed with the fixture server key
    pub fn build_with_fixture_key(self) -> WebhookNotification {
        self.build_signed(StringFixtures::server_key())
    }
}

/// Computes the gateway signature for a notification
pub fn sign(notification: &WebhookNotification, server_key: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(notification.order_id.as_bytes());
    hasher.update(notification.status_code.as_deref().unwrap_or_default().as_bytes());
    hasher.update(notification.gross_amount.as_deref().unwrap_or_default().as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// A detail item due `days` after the fixture date
pub fn detail_due_in(billing_id: BillingId, name: &str, days: i64, amount: Money) -> BillingDetailItem {
    BillingDetailItem::new(billing_id, name, DateFixtures::days_from_today(days), amount)
}
