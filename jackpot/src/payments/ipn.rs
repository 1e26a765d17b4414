//! NOWPayments IPN signatures.
//!
//! The gateway signs the callback body with HMAC-SHA512 after re-serializing
//! it with object keys sorted; the hex digest arrives in `x-nowpayments-sig`.

use super::errors::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

/// Recursively sort object keys
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// The byte string the gateway signs
pub fn canonical_body(body: &[u8]) -> PaymentResult<String> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| PaymentError::InvalidPayload(format!("body is not JSON: {e}")))?;
    serde_json::to_string(&sort_keys(value))
        .map_err(|e| PaymentError::InvalidPayload(e.to_string()))
}

fn mac(secret: &str, body: &[u8]) -> PaymentResult<HmacSha512> {
    let canonical = canonical_body(body)?;
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::InvalidSignature)?;
    mac.update(canonical.as_bytes());
    Ok(mac)
}

/// Hex signature of `body` under `secret`
pub fn sign_ipn_body(secret: &str, body: &[u8]) -> PaymentResult<String> {
    Ok(hex::encode(mac(secret, body)?.finalize().into_bytes()))
}

/// Check a callback signature in constant time
pub fn verify_ipn_signature(secret: &str, body: &[u8], signature: &str) -> PaymentResult<()> {
    let expected =
        hex::decode(signature.trim()).map_err(|_| PaymentError::InvalidSignature)?;
    mac(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| PaymentError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "ipn-test-secret";

    #[test]
    fn test_sign_and_verify() {
        let body = br#"{"payment_status":"finished","payment_id":5077125051,"order_id":"deposit-7"}"#;
        let signature = sign_ipn_body(SECRET, body).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(verify_ipn_signature(SECRET, body, &signature).is_ok());
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = br#"{"b":1,"a":{"d":2,"c":3}}"#;
        let b = br#"{"a":{"c":3,"d":2},"b":1}"#;
        assert_eq!(canonical_body(a).unwrap(), r#"{"a":{"c":3,"d":2},"b":1}"#);
        assert_eq!(
            sign_ipn_body(SECRET, a).unwrap(),
            sign_ipn_body(SECRET, b).unwrap()
        );
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let body = br#"{"price_amount":10,"order_id":"deposit-7"}"#;
        let signature = sign_ipn_body(SECRET, body).unwrap();
        let tampered = br#"{"price_amount":1000,"order_id":"deposit-7"}"#;
        assert!(matches!(
            verify_ipn_signature(SECRET, tampered, &signature),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            verify_ipn_signature("other-secret", body, &signature),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            verify_ipn_signature(SECRET, body, "not-hex"),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_non_json_body() {
        assert!(matches!(
            sign_ipn_body(SECRET, b"payment_status=finished"),
            Err(PaymentError::InvalidPayload(_))
        ));
    }
}
