//! Payment methods
//!
//! A payment method is configured per school and maps to one gateway channel.

use serde::{Deserialize, Serialize};

use core_kernel::PaymentMethodId;

/// Gateway channel a payment method charges through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Virtual account at a bank (bca, bni, bri, ...)
    BankTransfer { bank: String },
    /// Permata virtual account
    PermataVa,
    /// Mandiri bill payment (biller code + bill key)
    MandiriBill,
    /// Card payment through the hosted payment page
    CreditCard,
    /// E-wallet through the hosted payment page
    EWallet { provider: String },
}

impl PaymentChannel {
    /// Bank name recorded on the transaction detail
    pub fn bank_name(&self) -> Option<String> {
        match self {
            PaymentChannel::BankTransfer { bank } => Some(bank.to_lowercase()),
            PaymentChannel::PermataVa => Some("permata".to_string()),
            PaymentChannel::MandiriBill => Some("mandiri".to_string()),
            PaymentChannel::CreditCard | PaymentChannel::EWallet { .. } => None,
        }
    }

    /// Returns true if the customer is sent to a hosted page instead of
    /// receiving a payment code
    pub fn is_redirect(&self) -> bool {
        matches!(self, PaymentChannel::CreditCard | PaymentChannel::EWallet { .. })
    }
}

/// A payment method offered to payers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub code: String,
    pub name: String,
    pub channel: PaymentChannel,
}

impl PaymentMethod {
    pub fn new(code: impl Into<String>, name: impl Into<String>, channel: PaymentChannel) -> Self {
        Self {
            id: PaymentMethodId::new(),
            code: code.into(),
            name: name.into(),
            channel,
        }
    }
}
