//! Draw engine: turns a due jackpot into winners and losers exactly once.
//!
//! Lifecycle `active -> drawing -> completed`. The `active -> drawing` step is
//! a compare-and-set that also records the selection seed, so concurrent
//! callers cannot both draw, and an interrupted draw can be finished later
//! with the same winners.

pub mod engine;
pub mod errors;
pub mod models;
pub mod scheduler;
pub mod selection;

pub use engine::{DrawEngine, payout_key};
pub use errors::{DrawError, DrawResult};
pub use models::{ClaimOutcome, DrawOutcome, DrawSummary, Winner};
pub use scheduler::{DrawScheduler, SchedulerConfig, TickReport};
pub use selection::{PayoutPlan, select_winners};
