//! Referral links and deposit commissions.
//!
//! When a referred user's deposit completes, the referrer's `ticket_bonus`
//! wallet is credited a percentage of it, keyed on the deposit so it is paid
//! at most once however often the event is replayed.

pub mod commission;
pub mod errors;

pub use commission::{
    REFERRAL_CODE_LEN, ReferralCommission, ReferralConfig, commission_key, generate_referral_code,
};
pub use errors::{ReferralError, ReferralResult};
