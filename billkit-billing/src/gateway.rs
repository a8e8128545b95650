//! Payment gateway collaborator and callback signature verification
//!
//! # Security Model
//!
//! The gateway signs its payment callbacks with
//! `HMAC-SHA256(secret, order_id + "|" + payment_id)`, hex-encoded. The
//! expected signature is recomputed here and compared in constant time;
//! a variable-time compare on this path is a real timing side channel.

use crate::{BillingError, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Credentials and defaults for the gateway integration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub currency: String,
}

impl GatewayConfig {
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            currency: "INR".to_string(),
        }
    }
}

/// An order reserved with the gateway, awaiting collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Minor currency units (paise).
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
}

/// The opaque external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Reserve an order for `amount_minor` minor units.
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
        notes: &serde_json::Value,
    ) -> Result<GatewayOrder>;
}

/// The gateway's payment callback payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

/// Hex HMAC-SHA256 over `order_id|payment_id`.
pub fn expected_signature(secret: &str, order_id: &str, payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a callback signature byte-for-byte in constant time.
///
/// # Errors
///
/// `BillingError::SignatureMismatch` for a malformed or non-matching
/// signature. Callers log this at high severity; it is never swallowed.
pub fn verify_callback_signature(secret: &str, callback: &PaymentCallback) -> Result<()> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Validation(format!("invalid gateway secret: {}", e)))?;
    mac.update(callback.order_id.as_bytes());
    mac.update(b"|");
    mac.update(callback.payment_id.as_bytes());
    let expected = mac.finalize().into_bytes();

    let provided = match hex::decode(&callback.signature) {
        Ok(bytes) => bytes,
        Err(_) => return Err(BillingError::SignatureMismatch.into()),
    };

    // ct_eq handles unequal lengths by returning false.
    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        Err(BillingError::SignatureMismatch.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_key";

    fn callback(order_id: &str, payment_id: &str, signature: String) -> PaymentCallback {
        PaymentCallback {
            order_id: order_id.to_string(),
            payment_id: payment_id.to_string(),
            signature,
        }
    }

    #[test]
    fn test_valid_signature_accepted() {
        let signature = expected_signature(SECRET, "order_1", "pay_1");
        let cb = callback("order_1", "pay_1", signature);
        assert!(verify_callback_signature(SECRET, &cb).is_ok());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut signature = expected_signature(SECRET, "order_1", "pay_1");
        // Flip the last hex digit.
        let last = signature.pop().unwrap();
        signature.push(if last == '0' { '1' } else { '0' });

        let cb = callback("order_1", "pay_1", signature);
        let err = verify_callback_signature(SECRET, &cb).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BillingError>(),
            Some(BillingError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_signature_bound_to_ids() {
        let signature = expected_signature(SECRET, "order_1", "pay_1");
        let cb = callback("order_2", "pay_1", signature);
        assert!(verify_callback_signature(SECRET, &cb).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signature = expected_signature("other_secret", "order_1", "pay_1");
        let cb = callback("order_1", "pay_1", signature);
        assert!(verify_callback_signature(SECRET, &cb).is_err());
    }

    #[test]
    fn test_malformed_hex_rejected() {
        let cb = callback("order_1", "pay_1", "not-hex!".to_string());
        let err = verify_callback_signature(SECRET, &cb).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BillingError>(),
            Some(BillingError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let signature = expected_signature(SECRET, "order_1", "pay_1");
        let cb = callback("order_1", "pay_1", signature[..32].to_string());
        assert!(verify_callback_signature(SECRET, &cb).is_err());
    }
}
