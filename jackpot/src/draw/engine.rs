//! Draw engine: claims a due jackpot, selects winners and settles tickets.

use super::{
    errors::{DrawError, DrawResult},
    models::{ClaimOutcome, DrawOutcome, DrawSummary, Winner},
    selection::{PayoutPlan, select_winners},
};
use crate::{
    db::{DrawRepository, JackpotRepository},
    ledger::{Ledger, Posting, TransactionType, WalletType},
    notify::{self, Notifier},
    tickets::{Jackpot, JackpotId, JackpotStatus, Ticket},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};

/// Idempotency key of a winner's payout
pub fn payout_key(jackpot_id: JackpotId, ticket_id: i64) -> String {
    format!("draw:{jackpot_id}:ticket:{ticket_id}")
}

// Seeds are stored in a signed BIGINT column; the bits round-trip unchanged.
fn seed_to_column(seed: u64) -> i64 {
    i64::from_ne_bytes(seed.to_ne_bytes())
}

fn seed_from_column(seed: i64) -> u64 {
    u64::from_ne_bytes(seed.to_ne_bytes())
}

/// Draw engine
#[derive(Clone)]
pub struct DrawEngine {
    draws: Arc<dyn DrawRepository>,
    jackpots: Arc<dyn JackpotRepository>,
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
}

impl DrawEngine {
    pub fn new(
        draws: Arc<dyn DrawRepository>,
        jackpots: Arc<dyn JackpotRepository>,
        ledger: Ledger,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            draws,
            jackpots,
            ledger,
            notifier,
        }
    }

    /// Draw a due jackpot with a fresh seed from the OS-seeded CSPRNG.
    ///
    /// Safe to call concurrently and repeatedly: exactly one caller wins the
    /// claim, every other one gets `AlreadyDrawn`.
    ///
    /// # Errors
    ///
    /// * `DrawError::JackpotNotFound` - unknown jackpot
    /// * `DrawError::DrawNotDue` - still selling tickets
    pub async fn execute_draw(&self, jackpot_id: JackpotId) -> DrawResult<DrawOutcome> {
        self.execute_draw_with_seed(jackpot_id, rand::random())
            .await
    }

    /// Draw with a caller-supplied seed (verifiable randomness sources, audits)
    pub async fn execute_draw_with_seed(
        &self,
        jackpot_id: JackpotId,
        seed: u64,
    ) -> DrawResult<DrawOutcome> {
        let now = Utc::now();
        match self
            .draws
            .claim_draw(jackpot_id, seed_to_column(seed), now)
            .await?
        {
            ClaimOutcome::Claimed(jackpot) => {
                log::info!(
                    "Draw claimed for jackpot {} '{}' ({} tickets, seed {})",
                    jackpot.id,
                    jackpot.name,
                    jackpot.total_tickets_sold,
                    seed
                );
                self.run(jackpot, seed).await
            }
            ClaimOutcome::NotDue { draw_at } => {
                log::info!("Draw for jackpot {jackpot_id} refused: not due until {draw_at}");
                Err(DrawError::DrawNotDue {
                    jackpot_id,
                    draw_at,
                })
            }
            ClaimOutcome::Busy(status) => {
                log::info!("Jackpot {jackpot_id} already drawn ({status})");
                Ok(DrawOutcome::AlreadyDrawn)
            }
        }
    }

    /// Finish a draw interrupted after its claim, replaying the recorded seed.
    ///
    /// Winners credited before the interruption are skipped, so the end state
    /// matches an uninterrupted run.
    pub async fn resume_draw(&self, jackpot_id: JackpotId) -> DrawResult<DrawOutcome> {
        let jackpot = self
            .jackpots
            .find_jackpot(jackpot_id)
            .await?
            .ok_or(DrawError::JackpotNotFound(jackpot_id))?;

        match jackpot.status {
            JackpotStatus::Completed => {
                log::info!("Jackpot {jackpot_id} already completed; nothing to resume");
                Ok(DrawOutcome::AlreadyDrawn)
            }
            JackpotStatus::Active => Err(DrawError::InvalidState {
                jackpot_id,
                expected: JackpotStatus::Drawing,
                actual: JackpotStatus::Active,
            }),
            JackpotStatus::Drawing => {
                let seed = jackpot.draw_seed.map(seed_from_column).ok_or_else(|| {
                    DrawError::InvariantViolation(format!(
                        "jackpot {jackpot_id} is drawing without a recorded seed"
                    ))
                })?;
                log::warn!("Resuming interrupted draw for jackpot {jackpot_id}");
                self.run(jackpot, seed).await
            }
        }
    }

    /// Active jackpots whose draw time has passed
    pub async fn due_jackpots(&self, now: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        self.draws.due_jackpots(now).await
    }

    /// Jackpots claimed before `started_before` and never completed
    pub async fn stale_draws(&self, started_before: DateTime<Utc>) -> DrawResult<Vec<JackpotId>> {
        self.draws.stale_draws(started_before).await
    }

    async fn run(&self, jackpot: Jackpot, seed: u64) -> DrawResult<DrawOutcome> {
        let max_winners = u32::try_from(jackpot.max_winners)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                DrawError::InvariantViolation(format!(
                    "jackpot {} has max_winners {}",
                    jackpot.id, jackpot.max_winners
                ))
            })?;

        let mut tickets = self.jackpots.jackpot_tickets(jackpot.id).await?;
        tickets.sort_by_key(|t| t.id);
        let ticket_ids: Vec<i64> = tickets.iter().map(|t| t.id).collect();
        let by_id: HashMap<i64, &Ticket> = tickets.iter().map(|t| (t.id, t)).collect();

        let winner_ids = select_winners(&ticket_ids, max_winners as usize, seed);
        let winner_count = u32::try_from(winner_ids.len())
            .map_err(|_| DrawError::InvariantViolation("winner count overflow".to_string()))?;
        let plan = PayoutPlan::new(jackpot.amount, max_winners, winner_count);

        if plan.share.is_zero() && !winner_ids.is_empty() {
            return Err(DrawError::InvariantViolation(format!(
                "jackpot {} pool {} cannot pay {} winners a cent each",
                jackpot.id, jackpot.amount, max_winners
            )));
        }

        let mut winners = Vec::with_capacity(winner_ids.len());
        let mut credited_now = 0;
        for ticket_id in &winner_ids {
            let ticket = by_id.get(ticket_id).ok_or_else(|| {
                DrawError::InvariantViolation(format!("selected unknown ticket {ticket_id}"))
            })?;

            let wallet = self
                .ledger
                .open_wallet(ticket.user_id, WalletType::Winnings)
                .await?;
            let payout = Posting::credit(
                wallet.id,
                plan.share,
                TransactionType::Winning,
                Some(format!("jackpot:{}:ticket:{}", jackpot.id, ticket.ticket_number)),
                payout_key(jackpot.id, ticket.id),
            )?;

            if self
                .draws
                .settle_winner(ticket.id, plan.share, &payout)
                .await?
            {
                credited_now += 1;
                log::info!(
                    "Ticket {} won {} in jackpot {}",
                    ticket.ticket_number,
                    plan.share,
                    jackpot.id
                );
                notify::dispatch(
                    &self.notifier,
                    ticket.user_id,
                    notify::TICKET_WON,
                    json!({
                        "jackpot_id": jackpot.id,
                        "jackpot_name": jackpot.name,
                        "ticket_number": ticket.ticket_number,
                        "amount": plan.share,
                    }),
                );
            }

            winners.push(Winner {
                ticket_id: ticket.id,
                user_id: ticket.user_id,
                amount: plan.share,
            });
        }

        let losers = self.draws.close_losers(jackpot.id).await?;
        let completed = match self
            .draws
            .complete_draw(jackpot.id, winner_count as i32, Utc::now())
            .await
        {
            Ok(completed) => completed,
            // An overlapping run finished first; payouts above were no-ops
            Err(DrawError::InvalidState {
                actual: JackpotStatus::Completed,
                ..
            }) => {
                log::info!(
                    "Jackpot {} was completed by an overlapping draw run",
                    jackpot.id
                );
                return Ok(DrawOutcome::AlreadyDrawn);
            }
            Err(e) => return Err(e),
        };

        log::info!(
            "Jackpot {} completed: {} winners of {} each, {} losing tickets, unclaimed {}, dust {}",
            completed.id,
            winners.len(),
            plan.share,
            losers,
            plan.unclaimed,
            plan.dust
        );

        Ok(DrawOutcome::Completed(DrawSummary {
            jackpot_id: completed.id,
            seed,
            ticket_count: tickets.len(),
            winners,
            share: plan.share,
            unclaimed: plan.unclaimed,
            dust: plan.dust,
            losers,
            credited_now,
        }))
    }
}
