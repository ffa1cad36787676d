//! Notification signature checks
//!
//! The gateway signs each notification with
//! `hex(SHA-512(order_id ++ status_code ++ gross_amount ++ server_key))`.

use domain_billing::WebhookNotification;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Expected signature for the given fields
pub fn signature(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true if the notification carries a valid signature
///
/// Notifications missing any signed field are rejected.
pub fn verify(notification: &WebhookNotification, server_key: &str) -> bool {
    let (Some(status_code), Some(gross_amount), Some(given)) = (
        notification.status_code.as_deref(),
        notification.gross_amount.as_deref(),
        notification.signature_key.as_deref(),
    ) else {
        return false;
    };
    let expected = signature(&notification.order_id, status_code, gross_amount, server_key);
    expected.as_bytes().ct_eq(given.to_ascii_lowercase().as_bytes()).into()
}
