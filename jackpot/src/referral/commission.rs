//! Referral enrollment and deposit commissions.

use super::errors::{ReferralError, ReferralResult};
use crate::{
    db::UserRepository,
    ledger::{
        EntryDirection, Ledger, LedgerError, Transaction, TransactionId, TransactionStatus,
        TransactionType, WalletType, truncate_to_cents,
    },
    notify::{self, Notifier},
    users::{NewUser, User, UserError, UserId},
};
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

/// Length of generated referral codes
pub const REFERRAL_CODE_LEN: usize = 8;

/// Collisions tolerated when allocating a referral code
pub const MAX_CODE_ATTEMPTS: u32 = 5;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Idempotency key of the commission paid for `transaction_id`
pub fn commission_key(transaction_id: TransactionId) -> String {
    format!("{transaction_id}:commission")
}

/// Random uppercase alphanumeric code
pub fn generate_referral_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..REFERRAL_CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Referral settings
#[derive(Debug, Clone)]
pub struct ReferralConfig {
    bonus_percentage: Decimal,
}

impl ReferralConfig {
    /// Commission as a percentage of the referred user's deposit
    pub fn new(bonus_percentage: Decimal) -> ReferralResult<Self> {
        if bonus_percentage < Decimal::ZERO || bonus_percentage > Decimal::ONE_HUNDRED {
            return Err(ReferralError::InvalidPercentage(bonus_percentage));
        }
        Ok(Self { bonus_percentage })
    }

    /// Read `REFERRAL_BONUS_PERCENTAGE`, default 5
    pub fn from_env() -> ReferralResult<Self> {
        match std::env::var("REFERRAL_BONUS_PERCENTAGE") {
            Ok(value) => {
                let pct = value
                    .trim()
                    .parse::<Decimal>()
                    .map_err(|_| ReferralError::InvalidPercentage(Decimal::NEGATIVE_ONE))?;
                Self::new(pct)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn bonus_percentage(&self) -> Decimal {
        self.bonus_percentage
    }

    /// Commission owed on `amount`, truncated to cents
    pub fn commission_on(&self, amount: Decimal) -> Decimal {
        truncate_to_cents(amount * self.bonus_percentage / Decimal::ONE_HUNDRED)
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            bonus_percentage: Decimal::from(5),
        }
    }
}

/// Pays referrers a share of their referrals' deposits
#[derive(Clone)]
pub struct ReferralCommission {
    users: Arc<dyn UserRepository>,
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    config: ReferralConfig,
}

impl ReferralCommission {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: Ledger,
        notifier: Arc<dyn Notifier>,
        config: ReferralConfig,
    ) -> Self {
        Self {
            users,
            ledger,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &ReferralConfig {
        &self.config
    }

    /// Credit the referrer of a completed deposit.
    ///
    /// Returns `None` when nothing is owed: not a completed deposit, no
    /// referrer, a zero commission, or the commission was already paid.
    pub async fn on_transaction_completed(
        &self,
        transaction: &Transaction,
    ) -> ReferralResult<Option<Transaction>> {
        if transaction.transaction_type != TransactionType::Deposit
            || transaction.status != TransactionStatus::Completed
            || transaction.direction != EntryDirection::Credit
        {
            return Ok(None);
        }

        let Some(user) = self.users.find_user(transaction.user_id).await? else {
            log::warn!(
                "Deposit {} belongs to unknown user {}; no commission",
                transaction.id,
                transaction.user_id
            );
            return Ok(None);
        };
        let Some(referrer) = user.referred_by else {
            return Ok(None);
        };

        let commission = self.config.commission_on(transaction.amount);
        if commission.is_zero() {
            return Ok(None);
        }

        let wallet = self
            .ledger
            .open_wallet(referrer, WalletType::TicketBonus)
            .await?;
        match self
            .ledger
            .credit_idempotent(
                wallet.id,
                commission,
                TransactionType::Commission,
                Some(transaction.id.to_string()),
                commission_key(transaction.id),
            )
            .await
        {
            Ok(paid) => {
                log::info!(
                    "Referral commission {} paid to user {} for deposit {}",
                    commission,
                    referrer,
                    transaction.id
                );
                notify::dispatch(
                    &self.notifier,
                    referrer,
                    notify::COMMISSION_EARNED,
                    json!({
                        "amount": commission,
                        "referred_user": user.member_id,
                    }),
                );
                Ok(Some(paid))
            }
            Err(LedgerError::DuplicateTransaction(_)) => {
                log::info!(
                    "Referral commission for deposit {} already paid",
                    transaction.id
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Register a user, linking them to the owner of `referral_code` and
    /// giving them a code of their own and a deposit wallet.
    ///
    /// A wallet that fails to open is logged and left to the first deposit,
    /// which opens it on demand; the enrolled user is still returned.
    pub async fn enroll(&self, mut user: NewUser, referral_code: Option<&str>) -> ReferralResult<User> {
        user.referred_by = match referral_code {
            Some(code) => Some(self.resolve_referral_code(code).await?),
            None => None,
        };

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            user.referral_code = generate_referral_code(&mut rand::rng());
            match self.users.create_user(&user).await {
                Ok(created) => {
                    if let Err(e) = self
                        .ledger
                        .open_wallet(created.id, WalletType::Deposit)
                        .await
                    {
                        log::error!(
                            "User {} enrolled without a deposit wallet: {e}",
                            created.id
                        );
                    }
                    log::info!(
                        "User {} enrolled (referred by {:?})",
                        created.id,
                        created.referred_by
                    );
                    return Ok(created);
                }
                Err(UserError::ReferralCodeTaken(code)) => {
                    log::warn!("Referral code collision on {code} (attempt {attempt})");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReferralError::CodeExhausted(MAX_CODE_ATTEMPTS))
    }

    /// Owner of a referral code
    pub async fn resolve_referral_code(&self, code: &str) -> ReferralResult<UserId> {
        let code = code.trim().to_ascii_uppercase();
        self.users
            .find_by_referral_code(&code)
            .await?
            .map(|user| user.id)
            .ok_or_else(|| UserError::UnknownReferralCode(code).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LedgerRepository, MemoryStore};
    use crate::ledger::{LedgerResult, Posting, TransactionId, Wallet, WalletId};
    use crate::notify::LogNotifier;
    use crate::payments::{GatewayStatus, PaymentEvent, PaymentKind, PaymentRecorder};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use rand::{SeedableRng, rngs::StdRng};

    /// Ledger store whose first `open_wallet` fails
    struct FlakyWallets {
        inner: Arc<MemoryStore>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl LedgerRepository for FlakyWallets {
        async fn open_wallet(
            &self,
            user_id: UserId,
            wallet_type: WalletType,
            currency: &str,
        ) -> LedgerResult<Wallet> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.open_wallet(user_id, wallet_type, currency).await
        }

        async fn find_wallet(&self, wallet_id: WalletId) -> LedgerResult<Option<Wallet>> {
            self.inner.find_wallet(wallet_id).await
        }

        async fn find_user_wallet(
            &self,
            user_id: UserId,
            wallet_type: WalletType,
        ) -> LedgerResult<Option<Wallet>> {
            self.inner.find_user_wallet(user_id, wallet_type).await
        }

        async fn user_wallets(&self, user_id: UserId) -> LedgerResult<Vec<Wallet>> {
            self.inner.user_wallets(user_id).await
        }

        async fn post(&self, postings: &[Posting]) -> LedgerResult<Vec<Transaction>> {
            self.inner.post(postings).await
        }

        async fn record_pending(&self, posting: &Posting) -> LedgerResult<Transaction> {
            self.inner.record_pending(posting).await
        }

        async fn settle(
            &self,
            transaction_id: TransactionId,
            status: TransactionStatus,
        ) -> LedgerResult<Transaction> {
            self.inner.settle(transaction_id, status).await
        }

        async fn find_transaction(&self, id: TransactionId) -> LedgerResult<Option<Transaction>> {
            self.inner.find_transaction(id).await
        }

        async fn find_by_idempotency_key(&self, key: &str) -> LedgerResult<Option<Transaction>> {
            self.inner.find_by_idempotency_key(key).await
        }

        async fn wallet_transactions(
            &self,
            wallet_id: WalletId,
            limit: i64,
        ) -> LedgerResult<Vec<Transaction>> {
            self.inner.wallet_transactions(wallet_id, limit).await
        }

        async fn balance_snapshot(&self, wallet_id: WalletId) -> LedgerResult<(Decimal, Decimal)> {
            self.inner.balance_snapshot(wallet_id).await
        }
    }

    fn setup() -> (ReferralCommission, Ledger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());
        let referral = ReferralCommission::new(
            store,
            ledger.clone(),
            Arc::new(LogNotifier),
            ReferralConfig::default(),
        );
        (referral, ledger)
    }

    async fn completed_deposit(ledger: &Ledger, wallet: &Wallet, amount: Decimal) -> Transaction {
        let posting = Posting::credit(
            wallet.id,
            amount,
            TransactionType::Deposit,
            None,
            format!("test:{}", uuid::Uuid::new_v4()),
        )
        .unwrap();
        let pending = ledger.record_pending(posting).await.unwrap();
        ledger
            .settle(pending.id, TransactionStatus::Completed)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commission_paid_once() {
        let (referral, ledger) = setup();
        let referrer = referral
            .enroll(NewUser::new("M-1", "a@example.com", "hash"), None)
            .await
            .unwrap();
        let referred = referral
            .enroll(
                NewUser::new("M-2", "b@example.com", "hash"),
                Some(referrer.referral_code.to_lowercase().as_str()),
            )
            .await
            .unwrap();
        assert_eq!(referred.referred_by, Some(referrer.id));

        let deposit_wallet = ledger
            .wallet_for(referred.id, WalletType::Deposit)
            .await
            .unwrap()
            .unwrap();
        let deposit = completed_deposit(&ledger, &deposit_wallet, Decimal::from(100)).await;

        let paid = referral.on_transaction_completed(&deposit).await.unwrap().unwrap();
        assert_eq!(paid.amount, Decimal::from(5));
        assert_eq!(paid.transaction_type, TransactionType::Commission);
        assert_eq!(paid.reference.as_deref(), Some(deposit.id.to_string().as_str()));

        assert!(referral.on_transaction_completed(&deposit).await.unwrap().is_none());

        let bonus = ledger
            .wallet_for(referrer.id, WalletType::TicketBonus)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bonus.balance, Decimal::from(5));
    }

    #[tokio::test]
    async fn test_no_referrer_no_commission() {
        let (referral, ledger) = setup();
        let user = referral
            .enroll(NewUser::new("M-1", "a@example.com", "hash"), None)
            .await
            .unwrap();
        let wallet = ledger
            .wallet_for(user.id, WalletType::Deposit)
            .await
            .unwrap()
            .unwrap();
        let deposit = completed_deposit(&ledger, &wallet, Decimal::from(40)).await;

        assert!(referral.on_transaction_completed(&deposit).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_completed_deposits_earn() {
        let (referral, ledger) = setup();
        let referrer = referral
            .enroll(NewUser::new("M-1", "a@example.com", "hash"), None)
            .await
            .unwrap();
        let referred = referral
            .enroll(
                NewUser::new("M-2", "b@example.com", "hash"),
                Some(referrer.referral_code.as_str()),
            )
            .await
            .unwrap();
        let wallet = ledger
            .wallet_for(referred.id, WalletType::Deposit)
            .await
            .unwrap()
            .unwrap();

        let bonus = ledger
            .credit(wallet.id, Decimal::from(50), TransactionType::Bonus, None)
            .await
            .unwrap();
        assert!(referral.on_transaction_completed(&bonus).await.unwrap().is_none());

        // One cent of 5% truncates to nothing
        let tiny = completed_deposit(&ledger, &wallet, Decimal::new(1, 2)).await;
        assert!(referral.on_transaction_completed(&tiny).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_referral_code() {
        let (referral, _) = setup();
        let result = referral
            .enroll(NewUser::new("M-1", "a@example.com", "hash"), Some("NOPE1234"))
            .await;
        assert!(matches!(
            result,
            Err(ReferralError::Users(UserError::UnknownReferralCode(_)))
        ));
    }

    #[test]
    fn test_config_bounds() {
        assert!(ReferralConfig::new(Decimal::from(101)).is_err());
        assert!(ReferralConfig::new(Decimal::NEGATIVE_ONE).is_err());
        let config = ReferralConfig::new(Decimal::new(25, 1)).unwrap();
        assert_eq!(config.commission_on(Decimal::new(3333, 2)), Decimal::new(83, 2));
    }

    #[test]
    fn test_generated_codes() {
        let mut rng = StdRng::seed_from_u64(3);
        let code = generate_referral_code(&mut rng);
        assert_eq!(code.len(), REFERRAL_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_enroll_survives_wallet_failure() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(Arc::new(FlakyWallets {
            inner: store.clone(),
            failed: AtomicBool::new(false),
        }));
        let referral = ReferralCommission::new(
            store.clone(),
            ledger.clone(),
            Arc::new(LogNotifier),
            ReferralConfig::default(),
        );

        let user = referral
            .enroll(NewUser::new("M-9", "w@example.com", "hash"), None)
            .await
            .unwrap();
        assert!(ledger.wallets_for_user(user.id).await.unwrap().is_empty());

        // The first deposit opens the wallet
        let payments = PaymentRecorder::new(store, ledger.clone(), referral, Arc::new(LogNotifier));
        payments
            .record_payment_event(PaymentEvent {
                payment_id: "first-deposit".to_string(),
                user_id: user.id,
                kind: PaymentKind::Deposit,
                amount: Decimal::from(20),
                currency: "USD".to_string(),
                status: GatewayStatus::Finished,
            })
            .await
            .unwrap();
        let wallet = ledger
            .wallet_for(user.id, WalletType::Deposit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wallet.balance, Decimal::from(20));
    }
}
