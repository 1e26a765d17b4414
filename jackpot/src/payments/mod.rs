//! Deposits and withdrawals reported by the NOWPayments gateway.
//!
//! Gateway callbacks are verified ([`verify_ipn_signature`]), mapped onto the
//! ledger's status machine and recorded under the key
//! `nowpayments:<payment id>`, so redelivered callbacks are harmless.

pub mod errors;
pub mod ipn;
pub mod models;
pub mod recorder;

pub use errors::{PaymentError, PaymentResult};
pub use ipn::{SIGNATURE_HEADER, canonical_body, sign_ipn_body, verify_ipn_signature};
pub use models::{
    GatewayStatus, IpnPayload, PaymentEvent, PaymentKind, PaymentOutcome, order_id,
};
pub use recorder::{PaymentRecorder, payment_key};
