//! Auth handlers and supporting modules.
//!
//! This module coordinates the whole admission state machine: whitelisted
//! signup, activation and reset verification codes, login, authorization
//! codes, and access tokens.
//!
//! ## Single-use codes
//!
//! Every code (verification, authorization) is stored hashed and consumed
//! through a conditional `UPDATE ... WHERE consumed_at IS NULL` so that
//! concurrent consumption races resolve to exactly one winner. Issuing a
//! new verification code for the same (user, purpose) pair invalidates any
//! outstanding one inside a single transaction.
//!
//! ## Rate limiting
//!
//! A [`rate_limit::RateLimiter`] seam is threaded through the handlers;
//! the default implementation allows everything. Codes carry 256 bits of
//! entropy, so brute-force pressure lands on the notifier, not the codes.

pub(crate) mod login;
mod password;
mod rate_limit;
pub(crate) mod reset;
pub(crate) mod signup;
mod state;
mod storage;
pub(crate) mod token;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use rate_limit::NoopRateLimiter;
pub use state::{AuthConfig, AuthState};
