//! Property-Based Test Generators
//!
//! Proptest strategies for billing data that respects domain invariants.

use chrono::{Duration, NaiveDate};
use core_kernel::{BillingId, Money};
use domain_billing::{BillingDetailItem, PaymentChannel, TransactionStatus};
use proptest::prelude::*;

use crate::fixtures::DateFixtures;

/// Whole-rupiah amounts a school would plausibly charge
pub fn idr_amount_strategy() -> impl Strategy<Value = i64> {
    1_000i64..10_000_000i64
}

pub fn idr_money_strategy() -> impl Strategy<Value = Money> {
    idr_amount_strategy().prop_map(Money::idr)
}

/// A list of 1 to `max` amounts
pub fn idr_amounts_strategy(max: usize) -> impl Strategy<Value = Vec<Money>> {
    proptest::collection::vec(idr_money_strategy(), 1..=max)
}

/// Due dates up to a year either side of the fixture date
pub fn due_date_strategy() -> impl Strategy<Value = NaiveDate> {
    (-365i64..365i64).prop_map(|days| DateFixtures::today() + Duration::days(days))
}

/// Detail items of one definition with distinct names
pub fn detail_items_strategy(billing_id: BillingId, max: usize) -> impl Strategy<Value = Vec<BillingDetailItem>> {
    proptest::collection::vec((due_date_strategy(), idr_money_strategy()), 1..=max).prop_map(move |items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (due, amount))| BillingDetailItem::new(billing_id, format!("Cicilan {}", i + 1), due, amount))
            .collect()
    })
}

pub fn transaction_status_strategy() -> impl Strategy<Value = TransactionStatus> {
    prop_oneof![
        Just(TransactionStatus::Pending),
        Just(TransactionStatus::Paid),
        Just(TransactionStatus::Failed),
    ]
}

/// Status strings the gateway sends, including ones the engine rejects
pub fn gateway_status_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("settlement".to_string()),
        Just("capture".to_string()),
        Just("pending".to_string()),
        Just("expire".to_string()),
        Just("cancel".to_string()),
        Just("failure".to_string()),
        Just("deny".to_string()),
        Just("refund".to_string()),
        "[a-z_]{1,12}",
    ]
}

pub fn payment_channel_strategy() -> impl Strategy<Value = PaymentChannel> {
    prop_oneof![
        prop_oneof![Just("bca"), Just("bni"), Just("bri")]
            .prop_map(|bank| PaymentChannel::BankTransfer { bank: bank.to_string() }),
        Just(PaymentChannel::PermataVa),
        Just(PaymentChannel::MandiriBill),
        Just(PaymentChannel::CreditCard),
        prop_oneof![Just("gopay"), Just("shopeepay")]
            .prop_map(|provider| PaymentChannel::EWallet { provider: provider.to_string() }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_amounts_are_positive(money in idr_money_strategy()) {
            prop_assert!(money.is_positive());
        }

        #[test]
        fn test_detail_names_are_distinct(items in detail_items_strategy(BillingId::new(), 12)) {
            let mut names: Vec<_> = items.iter().map(|d| d.name.clone()).collect();
            names.sort();
            names.dedup();
            prop_assert_eq!(names.len(), items.len());
        }
    }
}
