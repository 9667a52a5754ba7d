//! # Portero (Gated Signup & Token Issuance)
//!
//! `portero` admits new users from a pre-provisioned whitelist, confirms
//! their identity through out-of-band verification codes, and issues
//! short-lived authorization codes that are exchanged for bearer access
//! tokens. Credential reset rides the same verification mechanism.
//!
//! ## Single-use semantics
//!
//! Verification codes and authorization codes are strictly single-use:
//! consumption is a conditional database update, so concurrent consume
//! attempts resolve to exactly one winner and every loser observes a
//! definitive failure (invalid, expired, or already used).
//!
//! ## Whitelist
//!
//! The `whitelist` table is provisioned administratively and read-only to
//! the service. Signup for an identifier not on the whitelist is rejected
//! before any user record is created.
//!
//! ## Notifications
//!
//! Codes are delivered through a transactional outbox: issuing a code and
//! enqueuing its notification commit together, and a background worker
//! drains the outbox best-effort. Delivery failure never rolls back an
//! issued code.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
