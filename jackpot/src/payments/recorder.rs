//! Turns gateway status reports into ledger transactions.

use super::{
    errors::{PaymentError, PaymentResult},
    models::{PaymentEvent, PaymentKind, PaymentOutcome},
};
use crate::{
    db::UserRepository,
    ledger::{Ledger, LedgerError, Posting, Transaction, TransactionStatus, WalletType},
    notify::{self, Notifier},
    referral::ReferralCommission,
    users::UserError,
};
use serde_json::json;
use std::sync::Arc;

/// Idempotency key of a gateway payment
pub fn payment_key(payment_id: &str) -> String {
    format!("nowpayments:{payment_id}")
}

/// Records payment events exactly once per gateway payment
#[derive(Clone)]
pub struct PaymentRecorder {
    users: Arc<dyn UserRepository>,
    ledger: Ledger,
    referral: ReferralCommission,
    notifier: Arc<dyn Notifier>,
}

impl PaymentRecorder {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: Ledger,
        referral: ReferralCommission,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            users,
            ledger,
            referral,
            notifier,
        }
    }

    /// Record one gateway report.
    ///
    /// The first report for a payment creates a pending transaction on the
    /// user's deposit wallet; a terminal report settles it. Replays of a
    /// settled payment change nothing.
    pub async fn record_payment_event(&self, event: PaymentEvent) -> PaymentResult<PaymentOutcome> {
        let transaction = self.pending_transaction(&event).await?;

        if transaction.status.is_terminal() {
            log::info!(
                "Payment {} already settled as {}; ignoring {:?}",
                event.payment_id,
                transaction.status,
                event.status
            );
            // A crash between settlement and commission is healed on replay
            self.after_settlement(&event, &transaction).await?;
            return Ok(PaymentOutcome::AlreadySettled(transaction));
        }

        let target = event.status.transaction_status();
        if target == TransactionStatus::Pending {
            return Ok(PaymentOutcome::Pending(transaction));
        }

        let settled = match self.ledger.settle(transaction.id, target).await {
            Ok(settled) => settled,
            Err(LedgerError::InvalidTransition { .. }) => {
                // A concurrent report settled it first
                let current = self.ledger.transaction(transaction.id).await?;
                return Ok(PaymentOutcome::AlreadySettled(current));
            }
            Err(e) => return Err(e.into()),
        };

        log::info!(
            "Payment {} for user {} settled as {}",
            event.payment_id,
            event.user_id,
            settled.status
        );
        self.after_settlement(&event, &settled).await?;
        if settled.status == TransactionStatus::Completed {
            let template = match event.kind {
                PaymentKind::Deposit => notify::DEPOSIT_COMPLETED,
                PaymentKind::Withdrawal => notify::WITHDRAWAL_COMPLETED,
            };
            notify::dispatch(
                &self.notifier,
                event.user_id,
                template,
                json!({
                    "payment_id": event.payment_id,
                    "amount": settled.amount,
                    "currency": event.currency,
                }),
            );
        }

        Ok(PaymentOutcome::Settled(settled))
    }

    /// Existing transaction for the payment, or a new pending one
    async fn pending_transaction(&self, event: &PaymentEvent) -> PaymentResult<Transaction> {
        let key = payment_key(&event.payment_id);
        if let Some(existing) = self.ledger.find_by_idempotency_key(&key).await? {
            return check_matches(event, existing);
        }

        if self.users.find_user(event.user_id).await?.is_none() {
            log::warn!(
                "Payment {} names unknown user {}; not recorded",
                event.payment_id,
                event.user_id
            );
            return Err(UserError::UserNotFound(event.user_id).into());
        }

        let wallet = self
            .ledger
            .open_wallet(event.user_id, WalletType::Deposit)
            .await?;
        if !wallet.currency.eq_ignore_ascii_case(&event.currency) {
            return Err(LedgerError::CurrencyMismatch {
                expected: wallet.currency,
                got: event.currency.clone(),
            }
            .into());
        }

        let posting = Posting::new(
            wallet.id,
            event.kind.direction(),
            event.amount,
            event.kind.transaction_type(),
            Some(key.clone()),
            key.clone(),
        )?;
        match self.ledger.record_pending(posting).await {
            Ok(transaction) => {
                log::info!(
                    "Payment {} recorded as pending transaction {}",
                    event.payment_id,
                    transaction.id
                );
                Ok(transaction)
            }
            Err(LedgerError::DuplicateTransaction(_)) => {
                let existing = self
                    .ledger
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::InvariantViolation(format!("key {key} reported but missing"))
                    })?;
                check_matches(event, existing)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn after_settlement(
        &self,
        event: &PaymentEvent,
        transaction: &Transaction,
    ) -> PaymentResult<()> {
        if event.kind == PaymentKind::Deposit && transaction.status == TransactionStatus::Completed
        {
            self.referral.on_transaction_completed(transaction).await?;
        }
        Ok(())
    }
}

fn check_matches(event: &PaymentEvent, transaction: Transaction) -> PaymentResult<Transaction> {
    if transaction.user_id != event.user_id
        || transaction.amount != event.amount
        || transaction.transaction_type != event.kind.transaction_type()
    {
        log::warn!(
            "Payment {} reported for user {} amount {} but recorded as transaction {}",
            event.payment_id,
            event.user_id,
            event.amount,
            transaction.id
        );
        return Err(PaymentError::Mismatch(event.payment_id.clone()));
    }
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::notify::MemoryNotifier;
    use crate::payments::GatewayStatus;
    use crate::referral::ReferralConfig;
    use crate::users::NewUser;
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: Ledger,
        referral: ReferralCommission,
        recorder: PaymentRecorder,
        notifier: Arc<MemoryNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());
        let notifier = Arc::new(MemoryNotifier::new());
        let referral = ReferralCommission::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            ReferralConfig::default(),
        );
        let recorder = PaymentRecorder::new(
            store,
            ledger.clone(),
            referral.clone(),
            notifier.clone(),
        );
        Fixture {
            ledger,
            referral,
            recorder,
            notifier,
        }
    }

    impl Fixture {
        async fn member(&self, member_id: &str) -> i64 {
            self.referral
                .enroll(
                    NewUser::new(member_id, &format!("{member_id}@example.com"), "h"),
                    None,
                )
                .await
                .unwrap()
                .id
        }
    }

    fn event(user_id: i64, kind: PaymentKind, amount: i64, status: GatewayStatus) -> PaymentEvent {
        PaymentEvent {
            payment_id: "5077125051".to_string(),
            user_id,
            kind,
            amount: Decimal::from(amount),
            currency: "USD".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn test_deposit_lifecycle_with_commission() {
        let f = fixture();
        let referrer = f
            .referral
            .enroll(NewUser::new("M-1", "a@example.com", "h"), None)
            .await
            .unwrap();
        let user = f
            .referral
            .enroll(
                NewUser::new("M-2", "b@example.com", "h"),
                Some(referrer.referral_code.as_str()),
            )
            .await
            .unwrap();

        let waiting = f
            .recorder
            .record_payment_event(event(user.id, PaymentKind::Deposit, 200, GatewayStatus::Waiting))
            .await
            .unwrap();
        assert!(matches!(waiting, PaymentOutcome::Pending(_)));

        let finished = f
            .recorder
            .record_payment_event(event(user.id, PaymentKind::Deposit, 200, GatewayStatus::Finished))
            .await
            .unwrap();
        assert!(matches!(finished, PaymentOutcome::Settled(ref tx) if tx.status == TransactionStatus::Completed));

        let replay = f
            .recorder
            .record_payment_event(event(user.id, PaymentKind::Deposit, 200, GatewayStatus::Finished))
            .await
            .unwrap();
        assert!(matches!(replay, PaymentOutcome::AlreadySettled(_)));

        let deposit = f
            .ledger
            .wallet_for(user.id, WalletType::Deposit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deposit.balance, Decimal::from(200));

        let bonus = f
            .ledger
            .wallet_for(referrer.id, WalletType::TicketBonus)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bonus.balance, Decimal::from(10));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(f.notifier.count(notify::DEPOSIT_COMPLETED), 1);
    }

    #[tokio::test]
    async fn test_expired_payment_moves_nothing() {
        let f = fixture();
        let user = f.member("M-3").await;
        let outcome = f
            .recorder
            .record_payment_event(event(user, PaymentKind::Deposit, 50, GatewayStatus::Expired))
            .await
            .unwrap();
        assert!(matches!(outcome, PaymentOutcome::Settled(ref tx) if tx.status == TransactionStatus::Failed));

        let wallet = f.ledger.wallet_for(user, WalletType::Deposit).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_uncovered_withdrawal_fails() {
        let f = fixture();
        let user = f.member("M-4").await;
        let result = f
            .recorder
            .record_payment_event(event(user, PaymentKind::Withdrawal, 50, GatewayStatus::Finished))
            .await;
        assert!(matches!(
            result,
            Err(PaymentError::Ledger(LedgerError::InsufficientBalance { .. }))
        ));

        let tx = f
            .ledger
            .find_by_idempotency_key(&payment_key("5077125051"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_reused_payment_id_for_other_user() {
        let f = fixture();
        let first = f.member("M-5").await;
        let second = f.member("M-6").await;
        f.recorder
            .record_payment_event(event(first, PaymentKind::Deposit, 50, GatewayStatus::Waiting))
            .await
            .unwrap();
        let result = f
            .recorder
            .record_payment_event(event(second, PaymentKind::Deposit, 50, GatewayStatus::Finished))
            .await;
        assert!(matches!(result, Err(PaymentError::Mismatch(_))));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_without_wallet() {
        let f = fixture();
        let result = f
            .recorder
            .record_payment_event(event(404, PaymentKind::Deposit, 50, GatewayStatus::Finished))
            .await;
        assert!(matches!(
            result,
            Err(PaymentError::Users(UserError::UserNotFound(404)))
        ));
        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::NotFound);

        assert!(f.ledger.wallets_for_user(404).await.unwrap().is_empty());
        assert!(
            f.ledger
                .find_by_idempotency_key(&payment_key("5077125051"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
