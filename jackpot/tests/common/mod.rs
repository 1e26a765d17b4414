//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use jackpot::{
    Platform, PlatformConfig,
    db::MemoryStore,
    ledger::{TransactionType, WalletType},
    notify::MemoryNotifier,
    tickets::{Jackpot, NewJackpot},
    users::{NewUser, User},
};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct TestPlatform {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub platform: Platform,
}

pub fn setup() -> TestPlatform {
    setup_with(PlatformConfig::default())
}

pub fn setup_with(config: PlatformConfig) -> TestPlatform {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let platform = Platform::new(store.clone(), config, notifier.clone());
    TestPlatform {
        store,
        notifier,
        platform,
    }
}

pub fn dollars(amount: i64) -> Decimal {
    Decimal::from(amount)
}

impl TestPlatform {
    /// Enrolled user whose deposit wallet holds `balance`
    pub async fn funded_user(&self, name: &str, balance: Decimal) -> User {
        let user = self
            .platform
            .referral
            .enroll(
                NewUser::new(name, &format!("{name}@example.com"), "hash"),
                None,
            )
            .await
            .expect("enroll");
        if balance > Decimal::ZERO {
            let wallet = self
                .platform
                .ledger
                .open_wallet(user.id, WalletType::Deposit)
                .await
                .expect("wallet");
            self.platform
                .ledger
                .credit(wallet.id, balance, TransactionType::Deposit, None)
                .await
                .expect("fund");
        }
        user
    }

    pub async fn jackpot(&self, amount: Decimal, price: Decimal, max_winners: i32) -> Jackpot {
        self.platform
            .tickets
            .create_jackpot(NewJackpot {
                name: "Weekly".to_string(),
                amount,
                ticket_price: price,
                max_winners,
                draw_at: Utc::now() + Duration::hours(1),
            })
            .await
            .expect("jackpot")
    }

    /// Move the draw time into the past so the jackpot is due
    pub async fn make_due(&self, jackpot: &Jackpot) {
        assert!(
            self.store
                .set_draw_at(jackpot.id, Utc::now() - Duration::seconds(1))
                .await
        );
    }

    pub async fn balance(&self, user: &User, wallet_type: WalletType) -> Decimal {
        self.platform
            .ledger
            .wallet_for(user.id, wallet_type)
            .await
            .expect("wallet lookup")
            .map(|w| w.balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn assert_reconciled(&self, user: &User) {
        for wallet in self
            .platform
            .ledger
            .wallets_for_user(user.id)
            .await
            .expect("wallets")
        {
            let reconciliation = self
                .platform
                .ledger
                .verify_wallet(wallet.id)
                .await
                .expect("reconciles");
            assert!(reconciliation.is_consistent());
        }
    }
}
