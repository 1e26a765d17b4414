//! Wires every component onto one store.

use crate::{
    db::{DrawRepository, JackpotRepository, LedgerRepository, UserRepository},
    draw::{DrawEngine, DrawScheduler, SchedulerConfig},
    ledger::Ledger,
    notify::Notifier,
    payments::PaymentRecorder,
    referral::{ReferralCommission, ReferralConfig},
    tickets::{IssuanceConfig, TicketIssuance},
    users::UserDirectory,
};
use std::sync::Arc;

/// Component settings
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub issuance: IssuanceConfig,
    pub referral: ReferralConfig,
}

/// Every component, sharing one store and one notifier
#[derive(Clone)]
pub struct Platform {
    pub ledger: Ledger,
    pub tickets: TicketIssuance,
    pub draws: DrawEngine,
    pub referral: ReferralCommission,
    pub payments: PaymentRecorder,
    pub users: UserDirectory,
}

impl Platform {
    pub fn new<S>(store: Arc<S>, config: PlatformConfig, notifier: Arc<dyn Notifier>) -> Self
    where
        S: UserRepository + LedgerRepository + JackpotRepository + DrawRepository + 'static,
    {
        let ledger = Ledger::new(store.clone());
        let tickets = TicketIssuance::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            config.issuance,
        );
        let draws = DrawEngine::new(store.clone(), store.clone(), ledger.clone(), notifier.clone());
        let referral = ReferralCommission::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            config.referral,
        );
        let payments = PaymentRecorder::new(
            store.clone(),
            ledger.clone(),
            referral.clone(),
            notifier,
        );
        let users = UserDirectory::new(store);

        Self {
            ledger,
            tickets,
            draws,
            referral,
            payments,
            users,
        }
    }

    /// Background scheduler driving this platform's draw engine
    pub fn scheduler(&self, config: SchedulerConfig) -> DrawScheduler {
        DrawScheduler::new(self.draws.clone(), config)
    }
}
