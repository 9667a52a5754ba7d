//! API handlers for Portero.
//!
//! Route handlers live here; shared validation and storage helpers live in
//! the `auth` submodule next to the flows that use them.

pub mod auth;
pub mod health;
pub mod root;
