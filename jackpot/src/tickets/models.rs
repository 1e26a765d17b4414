//! Jackpot and ticket data models.

use crate::{errors::UnknownVariant, users::UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Jackpot ID type
pub type JackpotId = i64;

/// Ticket ID type
pub type TicketId = i64;

/// Jackpot lifecycle: `active -> drawing -> completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JackpotStatus {
    /// Selling tickets
    Active,
    /// Claimed by a draw; no more sales
    Drawing,
    /// Winners credited, losers closed
    Completed,
}

impl std::fmt::Display for JackpotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JackpotStatus::Active => write!(f, "active"),
            JackpotStatus::Drawing => write!(f, "drawing"),
            JackpotStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for JackpotStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(JackpotStatus::Active),
            "drawing" => Ok(JackpotStatus::Drawing),
            "completed" => Ok(JackpotStatus::Completed),
            other => Err(UnknownVariant::new("jackpot status", other)),
        }
    }
}

/// Jackpot model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jackpot {
    pub id: JackpotId,
    pub name: String,
    /// Prize pool
    pub amount: Decimal,
    pub ticket_price: Decimal,
    pub max_winners: i32,
    pub draw_at: DateTime<Utc>,
    pub status: JackpotStatus,
    pub total_tickets_sold: i64,
    pub total_revenue: Decimal,
    pub winners_selected: i32,
    /// Seed the winner selection ran with; recorded at claim time
    pub draw_seed: Option<i64>,
    pub draw_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Jackpot {
    /// Whether a ticket may be sold at `now`
    pub fn is_open_for_sales(&self, now: DateTime<Utc>) -> bool {
        self.status == JackpotStatus::Active && now < self.draw_at
    }

    /// Whether the draw may be claimed at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JackpotStatus::Active && now >= self.draw_at
    }
}

/// Jackpot creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJackpot {
    pub name: String,
    pub amount: Decimal,
    pub ticket_price: Decimal,
    pub max_winners: i32,
    pub draw_at: DateTime<Utc>,
}

/// Ticket status; decided exactly once, at draw time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Won,
    Lost,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Active => write!(f, "active"),
            TicketStatus::Won => write!(f, "won"),
            TicketStatus::Lost => write!(f, "lost"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TicketStatus::Active),
            "won" => Ok(TicketStatus::Won),
            "lost" => Ok(TicketStatus::Lost),
            other => Err(UnknownVariant::new("ticket status", other)),
        }
    }
}

/// Ticket model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub ticket_number: String,
    pub user_id: UserId,
    pub jackpot_id: JackpotId,
    pub status: TicketStatus,
    pub price: Decimal,
    pub winning_amount: Option<Decimal>,
    pub purchased_at: DateTime<Utc>,
}

/// Ticket insert request
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_number: String,
    pub user_id: UserId,
    pub jackpot_id: JackpotId,
    pub price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn jackpot(status: JackpotStatus, draw_in: Duration) -> Jackpot {
        let now = Utc::now();
        Jackpot {
            id: 1,
            name: "Weekly".into(),
            amount: Decimal::from(1000),
            ticket_price: Decimal::from(3),
            max_winners: 2,
            draw_at: now + draw_in,
            status,
            total_tickets_sold: 0,
            total_revenue: Decimal::ZERO,
            winners_selected: 0,
            draw_seed: None,
            draw_started_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_sales_window() {
        let now = Utc::now();
        assert!(jackpot(JackpotStatus::Active, Duration::hours(1)).is_open_for_sales(now));
        assert!(!jackpot(JackpotStatus::Active, Duration::hours(-1)).is_open_for_sales(now));
        assert!(!jackpot(JackpotStatus::Drawing, Duration::hours(1)).is_open_for_sales(now));
    }

    #[test]
    fn test_due() {
        let now = Utc::now();
        assert!(jackpot(JackpotStatus::Active, Duration::seconds(-1)).is_due(now));
        assert!(!jackpot(JackpotStatus::Active, Duration::hours(1)).is_due(now));
        assert!(!jackpot(JackpotStatus::Completed, Duration::hours(-1)).is_due(now));
    }
}
