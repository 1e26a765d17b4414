//! Caller identity from access tokens.
//!
//! Registration, passwords and sessions belong to the external identity
//! provider; this crate only verifies the HS256 access tokens it issues.
//!
//! ## Example
//!
//! ```no_run
//! use jackpot::auth::{Role, TokenVerifier};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let verifier = TokenVerifier::new("a-secret-of-at-least-thirty-two-chars")?;
//!     let token = verifier.issue(1, Role::User, chrono::Duration::minutes(15))?;
//!
//!     let identity = verifier.verify(&token)?;
//!     println!("Caller: {}", identity.user_id);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod models;
pub mod verifier;

pub use errors::{AuthError, AuthResult};
pub use models::{AccessTokenClaims, Identity, Role};
pub use verifier::{MIN_SECRET_LEN, TokenVerifier};
