//! User lookup, anonymization and plan subscriptions.

use super::{
    errors::{UserError, UserResult},
    models::{Plan, PlanId, PlanVerification, User, UserId, UserPlan},
};
use crate::db::UserRepository;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// User directory
#[derive(Clone)]
pub struct UserDirectory {
    users: Arc<dyn UserRepository>,
}

impl UserDirectory {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    pub async fn user(&self, user_id: UserId) -> UserResult<User> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or(UserError::UserNotFound(user_id))
    }

    /// Strip identifying data and suspend the account. Wallets, tickets and
    /// the transaction history stay intact for reconciliation.
    pub async fn anonymize(&self, user_id: UserId) -> UserResult<User> {
        let user = self.users.anonymize_user(user_id).await?;
        log::info!("User {user_id} anonymized");
        Ok(user)
    }

    pub async fn create_plan(
        &self,
        name: &str,
        price: Decimal,
        duration_days: i32,
        payout_percentage: Decimal,
    ) -> UserResult<Plan> {
        self.users
            .create_plan(name, price, duration_days, payout_percentage)
            .await
    }

    /// Record a plan purchase awaiting verification
    pub async fn subscribe(
        &self,
        user_id: UserId,
        plan_id: PlanId,
        purchased_at: DateTime<Utc>,
    ) -> UserResult<UserPlan> {
        self.users
            .record_user_plan(user_id, plan_id, purchased_at)
            .await
    }

    /// Verify or reject a pending plan purchase
    pub async fn review_plan(
        &self,
        user_plan_id: i64,
        verification: PlanVerification,
    ) -> UserResult<UserPlan> {
        let user_plan = self
            .users
            .update_plan_verification(user_plan_id, verification)
            .await?;
        log::info!("Plan purchase {user_plan_id} marked {verification}");
        Ok(user_plan)
    }

    /// Plans of a user that currently count towards payouts
    pub async fn payout_eligible_plans(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> UserResult<Vec<UserPlan>> {
        Ok(self
            .users
            .user_plans(user_id)
            .await?
            .into_iter()
            .filter(|plan| plan.is_payout_eligible(now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::users::{NewUser, UserStatus};
    use chrono::Duration;

    async fn directory_with_user() -> (UserDirectory, User) {
        let store = Arc::new(MemoryStore::new());
        let mut new_user = NewUser::new("M-1", "a@example.com", "argon2-hash");
        new_user.referral_code = "CODE0001".to_string();
        let user = store.create_user(&new_user).await.unwrap();
        (UserDirectory::new(store), user)
    }

    #[tokio::test]
    async fn test_plan_lifecycle() {
        let (directory, user) = directory_with_user().await;
        let plan = directory
            .create_plan("Gold", Decimal::new(4999, 2), 30, Decimal::from(10))
            .await
            .unwrap();

        let now = Utc::now();
        let purchase = directory.subscribe(user.id, plan.id, now).await.unwrap();
        assert_eq!(purchase.verification, PlanVerification::Pending);
        assert_eq!(purchase.expires_at, now + Duration::days(30));
        assert!(directory.payout_eligible_plans(user.id, now).await.unwrap().is_empty());

        directory
            .review_plan(purchase.id, PlanVerification::Verified)
            .await
            .unwrap();
        assert_eq!(directory.payout_eligible_plans(user.id, now).await.unwrap().len(), 1);

        let backwards = directory
            .review_plan(purchase.id, PlanVerification::Rejected)
            .await;
        assert!(matches!(backwards, Err(UserError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_anonymize_keeps_the_record() {
        let (directory, user) = directory_with_user().await;
        let anonymized = directory.anonymize(user.id).await.unwrap();

        assert_eq!(anonymized.id, user.id);
        assert_eq!(anonymized.status, UserStatus::Suspended);
        assert_ne!(anonymized.email, user.email);
        assert!(anonymized.password_hash.is_empty());
        assert!(matches!(
            directory.anonymize(999).await,
            Err(UserError::UserNotFound(999))
        ));
    }
}
