//! Users, referral links and subscription plans.

pub mod directory;
pub mod errors;
pub mod models;

pub use directory::UserDirectory;
pub use errors::{UserError, UserResult};
pub use models::{NewUser, Plan, PlanId, PlanVerification, User, UserId, UserPlan, UserStatus};
