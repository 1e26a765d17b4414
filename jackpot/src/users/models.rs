//! User and plan data models.

use crate::errors::UnknownVariant;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// User ID type
pub type UserId = i64;

/// Plan ID type
pub type PlanId = i64;

/// Moderation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Pending,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Suspended => write!(f, "suspended"),
            UserStatus::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            "pending" => Ok(UserStatus::Pending),
            other => Err(UnknownVariant::new("user status", other)),
        }
    }
}

/// User model
///
/// `password_hash` is produced by the identity provider and is one-way; this
/// crate never stores a recoverable password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub member_id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: UserStatus,
    pub referred_by: Option<UserId>,
    pub role: Option<String>,
    pub referral_code: String,
    pub created_at: DateTime<Utc>,
}

/// New user registration
#[derive(Debug, Clone)]
pub struct NewUser {
    pub member_id: String,
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub referred_by: Option<UserId>,
    pub role: Option<String>,
    pub referral_code: String,
}

impl NewUser {
    /// Active user without referrer or role; the referral code is assigned at
    /// enrollment.
    pub fn new(member_id: &str, email: &str, password_hash: &str) -> Self {
        Self {
            member_id: member_id.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            status: UserStatus::Active,
            referred_by: None,
            role: None,
            referral_code: String::new(),
        }
    }
}

/// Subscription plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub price: Decimal,
    pub duration_days: i32,
    pub payout_percentage: Decimal,
}

/// Plan verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanVerification {
    Pending,
    Verified,
    Rejected,
}

impl PlanVerification {
    /// Verification only moves forward: `pending -> verified | rejected`.
    pub fn can_transition_to(self, next: PlanVerification) -> bool {
        matches!(
            (self, next),
            (PlanVerification::Pending, PlanVerification::Verified)
                | (PlanVerification::Pending, PlanVerification::Rejected)
        )
    }
}

impl std::fmt::Display for PlanVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanVerification::Pending => write!(f, "pending"),
            PlanVerification::Verified => write!(f, "verified"),
            PlanVerification::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for PlanVerification {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PlanVerification::Pending),
            "verified" => Ok(PlanVerification::Verified),
            "rejected" => Ok(PlanVerification::Rejected),
            other => Err(UnknownVariant::new("plan verification", other)),
        }
    }
}

/// A user's purchase of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPlan {
    pub id: i64,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub purchase_price: Decimal,
    pub verification: PlanVerification,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserPlan {
    /// Only verified, unexpired plans contribute to payouts.
    pub fn is_payout_eligible(&self, now: DateTime<Utc>) -> bool {
        self.verification == PlanVerification::Verified && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn plan(verification: PlanVerification, expires_in: Duration) -> UserPlan {
        let now = Utc::now();
        UserPlan {
            id: 1,
            user_id: 1,
            plan_id: 1,
            purchase_price: Decimal::new(4999, 2),
            verification,
            purchased_at: now,
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn test_payout_eligibility() {
        let now = Utc::now();
        assert!(plan(PlanVerification::Verified, Duration::days(30)).is_payout_eligible(now));
        assert!(!plan(PlanVerification::Pending, Duration::days(30)).is_payout_eligible(now));
        assert!(!plan(PlanVerification::Rejected, Duration::days(30)).is_payout_eligible(now));
        assert!(!plan(PlanVerification::Verified, Duration::days(-1)).is_payout_eligible(now));
    }

    #[test]
    fn test_verification_moves_forward_only() {
        use PlanVerification::*;
        assert!(Pending.can_transition_to(Verified));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Verified.can_transition_to(Pending));
        assert!(!Verified.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Verified));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("suspended".parse::<UserStatus>().unwrap(), UserStatus::Suspended);
        assert!("banned".parse::<UserStatus>().is_err());
    }
}
