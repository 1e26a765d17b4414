//! Draw data models.

use crate::{
    tickets::{Jackpot, JackpotId, JackpotStatus, TicketId},
    users::UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of the atomic `active -> drawing` claim
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller owns the draw
    Claimed(Jackpot),
    /// Still active, draw time not reached
    NotDue { draw_at: DateTime<Utc> },
    /// Someone else claimed it first (or it already finished)
    Busy(JackpotStatus),
}

/// One credited winner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub ticket_id: TicketId,
    pub user_id: UserId,
    pub amount: Decimal,
}

/// What a completed draw did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawSummary {
    pub jackpot_id: JackpotId,
    /// Seed the selection ran with; re-running selection with it reproduces `winners`
    pub seed: u64,
    pub ticket_count: usize,
    pub winners: Vec<Winner>,
    /// Fixed per-winner share (`amount / max_winners`, truncated to cents)
    pub share: Decimal,
    /// Shares nobody won because fewer tickets than `max_winners` were sold
    pub unclaimed: Decimal,
    /// Sub-cent remainder left by truncating the share
    pub dust: Decimal,
    pub losers: u64,
    /// Winners credited by this run (less than `winners.len()` on a resume)
    pub credited_now: usize,
}

/// Outcome of a draw request
#[derive(Debug, Clone)]
pub enum DrawOutcome {
    Completed(DrawSummary),
    /// The jackpot was already claimed; nothing changed
    AlreadyDrawn,
}

impl DrawOutcome {
    pub fn is_already_drawn(&self) -> bool {
        matches!(self, DrawOutcome::AlreadyDrawn)
    }

    pub fn summary(&self) -> Option<&DrawSummary> {
        match self {
            DrawOutcome::Completed(summary) => Some(summary),
            DrawOutcome::AlreadyDrawn => None,
        }
    }
}
