//! Winner selection and payout arithmetic. Pure functions, no I/O.

use crate::{ledger::truncate_to_cents, tickets::TicketId};
use rand::{SeedableRng, rngs::StdRng, seq::index};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pick `min(max_winners, ticket_ids.len())` distinct tickets.
///
/// Seeded partial Fisher-Yates over the given order: the same seed and the
/// same ticket list always yield the same winners, in the same order.
pub fn select_winners(ticket_ids: &[TicketId], max_winners: usize, seed: u64) -> Vec<TicketId> {
    let count = max_winners.min(ticket_ids.len());
    let mut rng = StdRng::seed_from_u64(seed);
    index::sample(&mut rng, ticket_ids.len(), count)
        .into_iter()
        .map(|i| ticket_ids[i])
        .collect()
}

/// How a prize pool splits across winners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPlan {
    /// Fixed per-winner amount
    pub share: Decimal,
    /// Shares left unpaid because fewer tickets than `max_winners` were sold
    pub unclaimed: Decimal,
    /// Sub-cent remainder of the split
    pub dust: Decimal,
}

impl PayoutPlan {
    /// `amount / max_winners` truncated to cents, whatever the ticket count.
    ///
    /// `share * winners + unclaimed + dust == amount` always holds.
    pub fn new(amount: Decimal, max_winners: u32, winners: u32) -> Self {
        let max_winners = Decimal::from(max_winners.max(1));
        let winners = Decimal::from(winners).min(max_winners);
        let share = truncate_to_cents(amount / max_winners);

        Self {
            share,
            unclaimed: share * (max_winners - winners),
            dust: amount - share * max_winners,
        }
    }

    pub fn total_paid(&self, winners: u32) -> Decimal {
        self.share * Decimal::from(winners)
    }
}
