//! Ticket sales and jackpot administration.

use super::{
    errors::{TicketError, TicketResult},
    models::{Jackpot, JackpotId, JackpotStatus, NewJackpot, NewTicket, Ticket, TicketId},
    number::{NumberSource, RandomNumberSource},
};
use crate::{
    db::JackpotRepository,
    errors::UnknownVariant,
    ledger::{
        Ledger, LedgerError, MONEY_SCALE, Posting, Transaction, TransactionType, Wallet,
        WalletType,
        truncate_to_cents,
    },
    notify::{self, Notifier},
    users::UserId,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::{str::FromStr, sync::Arc};

/// Default number of ticket-number collisions tolerated per purchase
pub const DEFAULT_MAX_NUMBER_ATTEMPTS: u32 = 5;

/// Which wallet pays for a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FundingPolicy {
    /// Always the deposit wallet
    #[default]
    DepositOnly,
    /// The ticket bonus wallet when it alone covers the price, else deposit
    BonusFirst,
}

impl FromStr for FundingPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit_only" => Ok(FundingPolicy::DepositOnly),
            "bonus_first" => Ok(FundingPolicy::BonusFirst),
            other => Err(UnknownVariant::new("funding policy", other)),
        }
    }
}

/// Ticket issuance settings
#[derive(Debug, Clone)]
pub struct IssuanceConfig {
    pub funding_policy: FundingPolicy,
    pub max_number_attempts: u32,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            funding_policy: FundingPolicy::default(),
            max_number_attempts: DEFAULT_MAX_NUMBER_ATTEMPTS,
        }
    }
}

impl IssuanceConfig {
    /// Read `TICKET_FUNDING_POLICY`; unknown values fall back to the default
    pub fn from_env() -> Self {
        let funding_policy = match std::env::var("TICKET_FUNDING_POLICY") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                log::warn!("{e}; using deposit_only");
                FundingPolicy::DepositOnly
            }),
            Err(_) => FundingPolicy::default(),
        };

        Self {
            funding_policy,
            ..Self::default()
        }
    }
}

/// Sells tickets and manages jackpots
#[derive(Clone)]
pub struct TicketIssuance {
    jackpots: Arc<dyn JackpotRepository>,
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    numbers: Arc<dyn NumberSource>,
    config: IssuanceConfig,
}

impl TicketIssuance {
    pub fn new(
        jackpots: Arc<dyn JackpotRepository>,
        ledger: Ledger,
        notifier: Arc<dyn Notifier>,
        config: IssuanceConfig,
    ) -> Self {
        Self {
            jackpots,
            ledger,
            notifier,
            numbers: Arc::new(RandomNumberSource::default()),
            config,
        }
    }

    /// Replace the ticket number source
    pub fn with_number_source(mut self, numbers: Arc<dyn NumberSource>) -> Self {
        self.numbers = numbers;
        self
    }

    /// Buy one ticket for `user_id`.
    ///
    /// The debit, the ticket row and the jackpot counters commit together.
    ///
    /// # Errors
    ///
    /// * `TicketError::JackpotNotFound` - unknown jackpot
    /// * `TicketError::JackpotNotActive` - not active or draw time reached
    /// * `TicketError::Ledger` - no funding wallet or insufficient balance
    /// * `TicketError::TicketNumberExhausted` - every generated number collided
    pub async fn purchase(&self, user_id: UserId, jackpot_id: JackpotId) -> TicketResult<Ticket> {
        let jackpot = self.jackpot(jackpot_id).await?;
        if !jackpot.is_open_for_sales(Utc::now()) {
            log::info!(
                "Ticket purchase refused: jackpot {} is {} (draw at {})",
                jackpot.id,
                jackpot.status,
                jackpot.draw_at
            );
            return Err(TicketError::JackpotNotActive {
                jackpot_id,
                status: jackpot.status,
            });
        }

        let mut wallet = self.funding_wallet(user_id, jackpot.ticket_price).await?;

        for attempt in 1..=self.config.max_number_attempts {
            let request = NewTicket {
                ticket_number: self.numbers.next_number(),
                user_id,
                jackpot_id,
                price: jackpot.ticket_price,
            };

            let mut result = self.issue(&request, &wallet).await;
            // The bonus balance was read outside the purchase transaction
            if wallet.wallet_type == WalletType::TicketBonus
                && matches!(
                    result,
                    Err(TicketError::Ledger(LedgerError::InsufficientBalance { .. }))
                )
            {
                log::info!(
                    "Bonus wallet {} no longer covers ticket for user {user_id}; paying from deposit",
                    wallet.id
                );
                wallet = self.deposit_wallet(user_id).await?;
                result = self.issue(&request, &wallet).await;
            }

            match result {
                Ok((ticket, transaction)) => {
                    log::info!(
                        "Ticket {} sold to user {} for jackpot {} (transaction {})",
                        ticket.ticket_number,
                        user_id,
                        jackpot_id,
                        transaction.id
                    );
                    notify::dispatch(
                        &self.notifier,
                        user_id,
                        notify::TICKET_PURCHASED,
                        json!({
                            "ticket_number": ticket.ticket_number,
                            "jackpot_id": jackpot_id,
                            "jackpot_name": jackpot.name,
                            "price": ticket.price,
                        }),
                    );
                    return Ok(ticket);
                }
                Err(TicketError::TicketNumberTaken(number))
                | Err(TicketError::Ledger(LedgerError::DuplicateTransaction(number))) => {
                    log::warn!(
                        "Ticket number collision on {number} (attempt {attempt}/{})",
                        self.config.max_number_attempts
                    );
                }
                Err(e) => {
                    if e.kind().is_expected() {
                        log::info!("Ticket purchase refused for user {user_id}: {e}");
                    } else {
                        log::error!("Ticket purchase failed for user {user_id}: {e}");
                    }
                    return Err(e);
                }
            }
        }

        log::error!(
            "Gave up allocating a ticket number for jackpot {jackpot_id} after {} attempts",
            self.config.max_number_attempts
        );
        Err(TicketError::TicketNumberExhausted(
            self.config.max_number_attempts,
        ))
    }

    async fn funding_wallet(&self, user_id: UserId, price: Decimal) -> TicketResult<Wallet> {
        if self.config.funding_policy == FundingPolicy::BonusFirst
            && let Some(bonus) = self.ledger.wallet_for(user_id, WalletType::TicketBonus).await?
            && bonus.balance >= price
        {
            return Ok(bonus);
        }

        self.deposit_wallet(user_id).await
    }

    async fn deposit_wallet(&self, user_id: UserId) -> TicketResult<Wallet> {
        self.ledger
            .wallet_for(user_id, WalletType::Deposit)
            .await?
            .ok_or_else(|| {
                TicketError::Ledger(LedgerError::NoWallet {
                    user_id,
                    wallet_type: WalletType::Deposit,
                })
            })
    }

    /// Debit `wallet` and insert the ticket in one store transaction
    async fn issue(&self, request: &NewTicket, wallet: &Wallet) -> TicketResult<(Ticket, Transaction)> {
        let payment = Posting::debit(
            wallet.id,
            request.price,
            TransactionType::TicketPurchase,
            Some(format!("jackpot:{}", request.jackpot_id)),
            format!("ticket:{}", request.ticket_number),
        )?;
        self.jackpots
            .issue_ticket(request, &payment, Utc::now())
            .await
    }

    /// Create a jackpot open for sales until `draw_at`
    pub async fn create_jackpot(&self, request: NewJackpot) -> TicketResult<Jackpot> {
        validate_jackpot(&request)?;
        let jackpot = self.jackpots.create_jackpot(&request).await?;
        log::info!(
            "Jackpot {} '{}' created: pool {}, ticket {}, {} winners, draw at {}",
            jackpot.id,
            jackpot.name,
            jackpot.amount,
            jackpot.ticket_price,
            jackpot.max_winners,
            jackpot.draw_at
        );
        Ok(jackpot)
    }

    pub async fn jackpot(&self, jackpot_id: JackpotId) -> TicketResult<Jackpot> {
        self.jackpots
            .find_jackpot(jackpot_id)
            .await?
            .ok_or(TicketError::JackpotNotFound(jackpot_id))
    }

    pub async fn list_jackpots(&self, status: Option<JackpotStatus>) -> TicketResult<Vec<Jackpot>> {
        self.jackpots.list_jackpots(status).await
    }

    pub async fn ticket(&self, ticket_id: TicketId) -> TicketResult<Ticket> {
        self.jackpots
            .find_ticket(ticket_id)
            .await?
            .ok_or(TicketError::TicketNotFound(ticket_id))
    }

    pub async fn tickets_for_user(&self, user_id: UserId) -> TicketResult<Vec<Ticket>> {
        self.jackpots.user_tickets(user_id).await
    }

    pub async fn tickets_for_jackpot(&self, jackpot_id: JackpotId) -> TicketResult<Vec<Ticket>> {
        self.jackpot(jackpot_id).await?;
        self.jackpots.jackpot_tickets(jackpot_id).await
    }
}

fn validate_jackpot(request: &NewJackpot) -> TicketResult<()> {
    let is_money = |d: Decimal| d > Decimal::ZERO && d.normalize().scale() <= MONEY_SCALE;

    if request.name.trim().is_empty() {
        return Err(TicketError::Validation("name must not be empty".to_string()));
    }
    if !is_money(request.amount) {
        return Err(TicketError::Validation(format!(
            "amount must be a positive cent value, got {}",
            request.amount
        )));
    }
    if !is_money(request.ticket_price) {
        return Err(TicketError::Validation(format!(
            "ticket price must be a positive cent value, got {}",
            request.ticket_price
        )));
    }
    if request.max_winners < 1 {
        return Err(TicketError::Validation(
            "max_winners must be at least 1".to_string(),
        ));
    }
    if truncate_to_cents(request.amount / Decimal::from(request.max_winners)).is_zero() {
        return Err(TicketError::Validation(format!(
            "amount {} cannot pay {} winners a cent each",
            request.amount, request.max_winners
        )));
    }
    if request.draw_at <= Utc::now() {
        return Err(TicketError::Validation(
            "draw time must be in the future".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::ledger::WalletId;
    use crate::notify::LogNotifier;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Replays a fixed list of numbers, then repeats the last one
    struct ScriptedNumbers(Mutex<Vec<String>>);

    impl ScriptedNumbers {
        fn new(numbers: &[&str]) -> Self {
            let mut numbers: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
            numbers.reverse();
            Self(Mutex::new(numbers))
        }
    }

    impl NumberSource for ScriptedNumbers {
        fn next_number(&self) -> String {
            let mut numbers = self.0.lock().unwrap();
            if numbers.len() > 1 {
                numbers.pop().unwrap()
            } else {
                numbers[0].clone()
            }
        }
    }

    /// Spends part of the bonus wallet just before the first sale lands,
    /// as a concurrent purchase would
    struct BonusSpendingStore {
        inner: Arc<MemoryStore>,
        ledger: Ledger,
        bonus: WalletId,
        spent: AtomicBool,
    }

    #[async_trait]
    impl JackpotRepository for BonusSpendingStore {
        async fn create_jackpot(&self, jackpot: &NewJackpot) -> TicketResult<Jackpot> {
            self.inner.create_jackpot(jackpot).await
        }

        async fn find_jackpot(&self, jackpot_id: JackpotId) -> TicketResult<Option<Jackpot>> {
            self.inner.find_jackpot(jackpot_id).await
        }

        async fn list_jackpots(&self, status: Option<JackpotStatus>) -> TicketResult<Vec<Jackpot>> {
            self.inner.list_jackpots(status).await
        }

        async fn issue_ticket(
            &self,
            ticket: &NewTicket,
            payment: &Posting,
            now: DateTime<Utc>,
        ) -> TicketResult<(Ticket, Transaction)> {
            if !self.spent.swap(true, Ordering::SeqCst) {
                self.ledger
                    .debit(self.bonus, Decimal::from(2), TransactionType::TicketPurchase, None)
                    .await?;
            }
            self.inner.issue_ticket(ticket, payment, now).await
        }

        async fn find_ticket(&self, ticket_id: TicketId) -> TicketResult<Option<Ticket>> {
            self.inner.find_ticket(ticket_id).await
        }

        async fn user_tickets(&self, user_id: UserId) -> TicketResult<Vec<Ticket>> {
            self.inner.user_tickets(user_id).await
        }

        async fn jackpot_tickets(&self, jackpot_id: JackpotId) -> TicketResult<Vec<Ticket>> {
            self.inner.jackpot_tickets(jackpot_id).await
        }
    }

    fn new_jackpot() -> NewJackpot {
        NewJackpot {
            name: "Weekly".to_string(),
            amount: Decimal::from(1000),
            ticket_price: Decimal::from(3),
            max_winners: 2,
            draw_at: Utc::now() + Duration::hours(1),
        }
    }

    async fn setup(config: IssuanceConfig) -> (TicketIssuance, Ledger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());
        let issuance = TicketIssuance::new(store.clone(), ledger.clone(), Arc::new(LogNotifier), config);
        (issuance, ledger, store)
    }

    async fn funded(ledger: &Ledger, user_id: UserId, wallet_type: WalletType, amount: i64) -> Wallet {
        let wallet = ledger.open_wallet(user_id, wallet_type).await.unwrap();
        ledger
            .credit(wallet.id, Decimal::from(amount), TransactionType::Deposit, None)
            .await
            .unwrap();
        wallet
    }

    #[tokio::test]
    async fn test_purchase_debits_and_counts() {
        let (issuance, ledger, _) = setup(IssuanceConfig::default()).await;
        let wallet = funded(&ledger, 1, WalletType::Deposit, 10).await;
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();

        let ticket = issuance.purchase(1, jackpot.id).await.unwrap();
        assert!(ticket.ticket_number.starts_with("JP-"));
        assert_eq!(ticket.price, Decimal::from(3));

        assert_eq!(ledger.wallet(wallet.id).await.unwrap().balance, Decimal::from(7));
        let jackpot = issuance.jackpot(jackpot.id).await.unwrap();
        assert_eq!(jackpot.total_tickets_sold, 1);
        assert_eq!(jackpot.total_revenue, Decimal::from(3));
    }

    #[tokio::test]
    async fn test_purchase_without_funds_changes_nothing() {
        let (issuance, ledger, _) = setup(IssuanceConfig::default()).await;
        let wallet = funded(&ledger, 1, WalletType::Deposit, 2).await;
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();

        let result = issuance.purchase(1, jackpot.id).await;
        assert!(matches!(
            result,
            Err(TicketError::Ledger(LedgerError::InsufficientBalance { .. }))
        ));
        assert_eq!(ledger.wallet(wallet.id).await.unwrap().balance, Decimal::from(2));
        assert!(issuance.tickets_for_user(1).await.unwrap().is_empty());
        assert_eq!(issuance.jackpot(jackpot.id).await.unwrap().total_tickets_sold, 0);
    }

    #[tokio::test]
    async fn test_purchase_without_wallet() {
        let (issuance, _, _) = setup(IssuanceConfig::default()).await;
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();

        let result = issuance.purchase(9, jackpot.id).await;
        assert!(matches!(
            result,
            Err(TicketError::Ledger(LedgerError::NoWallet { user_id: 9, .. }))
        ));
    }

    #[tokio::test]
    async fn test_purchase_after_draw_time_is_refused() {
        let (issuance, ledger, store) = setup(IssuanceConfig::default()).await;
        funded(&ledger, 1, WalletType::Deposit, 10).await;
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();
        store
            .set_draw_at(jackpot.id, Utc::now() - Duration::seconds(1))
            .await;

        let result = issuance.purchase(1, jackpot.id).await;
        assert!(matches!(result, Err(TicketError::JackpotNotActive { .. })));
    }

    #[tokio::test]
    async fn test_unknown_jackpot() {
        let (issuance, _, _) = setup(IssuanceConfig::default()).await;
        assert!(matches!(
            issuance.purchase(1, 77).await,
            Err(TicketError::JackpotNotFound(77))
        ));
    }

    #[tokio::test]
    async fn test_collision_is_retried() {
        let (issuance, ledger, _) = setup(IssuanceConfig::default()).await;
        funded(&ledger, 1, WalletType::Deposit, 10).await;
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();
        let issuance = issuance.with_number_source(Arc::new(ScriptedNumbers::new(&[
            "JP-1-AAAAAAAA",
            "JP-1-AAAAAAAA",
            "JP-1-BBBBBBBB",
        ])));

        let first = issuance.purchase(1, jackpot.id).await.unwrap();
        let second = issuance.purchase(1, jackpot.id).await.unwrap();
        assert_eq!(first.ticket_number, "JP-1-AAAAAAAA");
        assert_eq!(second.ticket_number, "JP-1-BBBBBBBB");
    }

    #[tokio::test]
    async fn test_collisions_exhaust_attempts() {
        let (issuance, ledger, _) = setup(IssuanceConfig::default()).await;
        let wallet = funded(&ledger, 1, WalletType::Deposit, 10).await;
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();
        let issuance = issuance.with_number_source(Arc::new(ScriptedNumbers::new(&["JP-1-SAME"])));

        issuance.purchase(1, jackpot.id).await.unwrap();
        let result = issuance.purchase(1, jackpot.id).await;
        assert!(matches!(
            result,
            Err(TicketError::TicketNumberExhausted(DEFAULT_MAX_NUMBER_ATTEMPTS))
        ));
        assert_eq!(ledger.wallet(wallet.id).await.unwrap().balance, Decimal::from(7));
    }

    #[tokio::test]
    async fn test_bonus_first_policy() {
        let config = IssuanceConfig {
            funding_policy: FundingPolicy::BonusFirst,
            ..IssuanceConfig::default()
        };
        let (issuance, ledger, _) = setup(config).await;
        let deposit = funded(&ledger, 1, WalletType::Deposit, 10).await;
        let bonus = funded(&ledger, 1, WalletType::TicketBonus, 4).await;
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();

        issuance.purchase(1, jackpot.id).await.unwrap();
        assert_eq!(ledger.wallet(bonus.id).await.unwrap().balance, Decimal::from(1));

        // Bonus no longer covers the price
        issuance.purchase(1, jackpot.id).await.unwrap();
        assert_eq!(ledger.wallet(bonus.id).await.unwrap().balance, Decimal::from(1));
        assert_eq!(ledger.wallet(deposit.id).await.unwrap().balance, Decimal::from(7));
    }

    #[tokio::test]
    async fn test_bonus_spent_mid_purchase_falls_back_to_deposit() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());
        let deposit = funded(&ledger, 1, WalletType::Deposit, 10).await;
        let bonus = funded(&ledger, 1, WalletType::TicketBonus, 4).await;
        let issuance = TicketIssuance::new(
            Arc::new(BonusSpendingStore {
                inner: store,
                ledger: ledger.clone(),
                bonus: bonus.id,
                spent: AtomicBool::new(false),
            }),
            ledger.clone(),
            Arc::new(LogNotifier),
            IssuanceConfig {
                funding_policy: FundingPolicy::BonusFirst,
                ..IssuanceConfig::default()
            },
        );
        let jackpot = issuance.create_jackpot(new_jackpot()).await.unwrap();

        let ticket = issuance.purchase(1, jackpot.id).await.unwrap();
        assert_eq!(ticket.price, Decimal::from(3));
        assert_eq!(ledger.wallet(bonus.id).await.unwrap().balance, Decimal::from(2));
        assert_eq!(ledger.wallet(deposit.id).await.unwrap().balance, Decimal::from(7));
        assert_eq!(issuance.jackpot(jackpot.id).await.unwrap().total_tickets_sold, 1);
    }

    #[tokio::test]
    async fn test_create_jackpot_validation() {
        let (issuance, _, _) = setup(IssuanceConfig::default()).await;

        let mut bad = new_jackpot();
        bad.max_winners = 0;
        assert!(matches!(
            issuance.create_jackpot(bad).await,
            Err(TicketError::Validation(_))
        ));

        let mut bad = new_jackpot();
        bad.ticket_price = Decimal::ZERO;
        assert!(issuance.create_jackpot(bad).await.is_err());

        let mut bad = new_jackpot();
        bad.draw_at = Utc::now() - Duration::minutes(1);
        assert!(issuance.create_jackpot(bad).await.is_err());

        let mut bad = new_jackpot();
        bad.amount = Decimal::new(1001, 3);
        assert!(issuance.create_jackpot(bad).await.is_err());
    }

    #[test]
    fn test_funding_policy_parse() {
        assert_eq!(
            "bonus_first".parse::<FundingPolicy>().unwrap(),
            FundingPolicy::BonusFirst
        );
        assert!("whatever".parse::<FundingPolicy>().is_err());
    }
}
