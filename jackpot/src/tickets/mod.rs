//! Ticket issuance: jackpots, ticket sales and ticket numbers.
//!
//! A purchase is one atomic unit: the ledger debit, the ticket row and the
//! jackpot's sales counters either all commit or none do. Sales close when
//! the jackpot leaves `active` or its draw time passes.

pub mod errors;
pub mod issuance;
pub mod models;
pub mod number;

pub use errors::{TicketError, TicketResult};
pub use issuance::{DEFAULT_MAX_NUMBER_ATTEMPTS, FundingPolicy, IssuanceConfig, TicketIssuance};
pub use models::{
    Jackpot, JackpotId, JackpotStatus, NewJackpot, NewTicket, Ticket, TicketId, TicketStatus,
};
pub use number::{NumberSource, RandomNumberSource, TICKET_PREFIX};
