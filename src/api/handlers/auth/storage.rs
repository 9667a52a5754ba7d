//! Database helpers for the admission state machine.
//!
//! Every cross-request race is settled by a store-level conditional
//! operation, never by read-then-write: user creation relies on the
//! primary-key unique violation, code consumption is a conditional update
//! with a `consumed_at IS NULL` predicate, and reissuing a verification
//! code invalidates the prior one under a row lock on the user. Expired
//! rows are left in place and treated the same as absent.

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;

use crate::api::notify::{self, NotifyChannel};

use super::state::AuthConfig;
use super::utils::{
    build_reset_url, build_verify_url, generate_code, hash_code, is_unique_violation,
};

/// Why a verification code exists. Matches the `verification_purpose`
/// Postgres enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Purpose {
    Activation,
    Reset,
}

impl Purpose {
    pub(super) const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Reset => "reset",
        }
    }
}

/// Outcome when attempting to create a new user + activation code.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created,
    NotEligible,
    Conflict,
}

/// Outcome of consuming a verification or authorization code.
///
/// Exactly one concurrent caller can observe `Consumed`; the rest see one
/// of the failure variants.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum ConsumeOutcome {
    Consumed { user_email: String },
    InvalidCode,
    Expired,
    AlreadyConsumed,
}

/// Outcome for reissue requests (resend activation, reset request).
/// Callers respond 204 for every variant to avoid account probing.
#[derive(Debug)]
pub(super) enum ReissueOutcome {
    Issued,
    Cooldown,
    Noop,
}

/// Credential fields needed to authenticate a login attempt.
pub(super) struct CredentialRecord {
    pub(super) secret_hash: String,
    pub(super) active: bool,
}

/// Side-effect-free view of a stored code, used to classify consume misses.
pub(super) struct CodeStatus {
    pub(super) consumed: bool,
    pub(super) expired: bool,
}

/// Whitelist guard: pure lookup, no side effects. Store errors propagate.
pub(super) async fn is_whitelisted(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM whitelist WHERE email = $1) AS eligible";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check whitelist")?;
    Ok(row.get("eligible"))
}

/// Create an inactive user and its first activation code in one transaction.
///
/// Duplicate-signup races resolve through the users primary key: exactly one
/// insert wins, every other caller gets `Conflict` and the original record
/// is untouched.
pub(super) async fn create_user_with_activation(
    pool: &PgPool,
    email: &str,
    secret_hash: &str,
    config: &AuthConfig,
) -> Result<SignupOutcome> {
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    if !is_whitelisted(&mut tx, email).await? {
        let _ = tx.rollback().await;
        return Ok(SignupOutcome::NotEligible);
    }

    let query = r"
        INSERT INTO users (email, secret_hash)
        VALUES ($1, $2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(email)
        .bind(secret_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await;

    if let Err(err) = inserted {
        if is_unique_violation(&err) {
            let _ = tx.rollback().await;
            return Ok(SignupOutcome::Conflict);
        }
        return Err(err).context("failed to insert user");
    }

    let _code = insert_verification_code(&mut tx, email, Purpose::Activation, config).await?;

    tx.commit().await.context("commit signup transaction")?;

    Ok(SignupOutcome::Created)
}

/// Insert a fresh verification code and enqueue its notification.
///
/// Returns the raw code; only its hash is stored. Callers that may race
/// with an existing live code must invalidate priors first (see
/// `reissue_verification_code`).
pub(super) async fn insert_verification_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    purpose: Purpose,
    config: &AuthConfig,
) -> Result<String> {
    let code = generate_code()?;
    let code_hash = hash_code(&code);
    let ttl_seconds = match purpose {
        Purpose::Activation => config.activation_code_ttl_seconds(),
        Purpose::Reset => config.reset_code_ttl_seconds(),
    };

    let query = r"
        INSERT INTO verification_codes (code_hash, user_email, purpose, expires_at)
        VALUES ($1, $2, $3::verification_purpose, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&code_hash)
        .bind(email)
        .bind(purpose.as_str())
        .bind(ttl_seconds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert verification code")?;

    let (template, link) = match purpose {
        Purpose::Activation => (
            "activation_code",
            build_verify_url(config.frontend_base_url(), &code),
        ),
        Purpose::Reset => (
            "reset_code",
            build_reset_url(config.frontend_base_url(), &code),
        ),
    };
    let payload = json!({
        "email": email,
        "link": link,
    });
    let payload_text =
        serde_json::to_string(&payload).context("failed to serialize notification payload")?;
    notify::enqueue(tx, NotifyChannel::Email, email, template, &payload_text).await?;

    Ok(code)
}

/// Reissue a verification code for (user, purpose), invalidating any prior
/// unconsumed one.
///
/// The `FOR UPDATE` row lock on the user serializes concurrent reissues for
/// the same pair, so two racing calls can never leave two live codes.
/// `require_active` gates the flow: resend wants a pending account, reset
/// wants an active one.
pub(super) async fn reissue_verification_code(
    pool: &PgPool,
    email: &str,
    purpose: Purpose,
    require_active: bool,
    config: &AuthConfig,
) -> Result<ReissueOutcome> {
    let mut tx = pool.begin().await.context("begin reissue transaction")?;

    let query = "SELECT active FROM users WHERE email = $1 FOR UPDATE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lock user for reissue")?;

    let Some(row) = row else {
        let _ = tx.rollback().await;
        return Ok(ReissueOutcome::Noop);
    };

    let active: bool = row.get("active");
    if active != require_active {
        let _ = tx.rollback().await;
        return Ok(ReissueOutcome::Noop);
    }

    if reissue_cooldown_active(&mut tx, email, purpose, config.resend_cooldown_seconds()).await? {
        let _ = tx.rollback().await;
        return Ok(ReissueOutcome::Cooldown);
    }

    // Invalidate any outstanding code for this (user, purpose) pair so only
    // the newest one can ever be consumed.
    let query = r"
        UPDATE verification_codes
        SET consumed_at = NOW()
        WHERE user_email = $1
          AND purpose = $2::verification_purpose
          AND consumed_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to invalidate prior verification codes")?;

    let _code = insert_verification_code(&mut tx, email, purpose, config).await?;

    tx.commit().await.context("commit reissue transaction")?;
    Ok(ReissueOutcome::Issued)
}

async fn reissue_cooldown_active(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    purpose: Purpose,
    cooldown_seconds: i64,
) -> Result<bool> {
    // Cooldown prevents repeated reissue requests from spamming the outbox.
    let query = r"
        SELECT 1
        FROM verification_codes
        WHERE user_email = $1
          AND purpose = $2::verification_purpose
          AND issued_at > NOW() - ($3 * INTERVAL '1 second')
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .bind(cooldown_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check reissue cooldown")?;
    Ok(row.is_some())
}

/// Consume a verification code: single-winner conditional update.
///
/// The update flips `consumed_at` only while the code is live, so exactly
/// one of any number of concurrent callers gets the user back. Losers are
/// classified by a follow-up read into the distinct failure reasons.
pub(super) async fn consume_verification_code(
    pool: &PgPool,
    code_hash: &[u8],
    purpose: Purpose,
) -> Result<ConsumeOutcome> {
    let query = r"
        UPDATE verification_codes
        SET consumed_at = NOW()
        WHERE code_hash = $1
          AND purpose = $2::verification_purpose
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code_hash)
        .bind(purpose.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume verification code")?;

    if let Some(row) = row {
        return Ok(ConsumeOutcome::Consumed {
            user_email: row.get("user_email"),
        });
    }

    match peek_verification_code(pool, code_hash, purpose).await? {
        Some(status) => Ok(classify_miss(&status)),
        None => Ok(ConsumeOutcome::InvalidCode),
    }
}

/// Read a verification code without side effects.
pub(super) async fn peek_verification_code(
    pool: &PgPool,
    code_hash: &[u8],
    purpose: Purpose,
) -> Result<Option<CodeStatus>> {
    let query = r"
        SELECT consumed_at IS NOT NULL AS consumed,
               expires_at <= NOW() AS expired
        FROM verification_codes
        WHERE code_hash = $1
          AND purpose = $2::verification_purpose
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code_hash)
        .bind(purpose.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to peek verification code")?;
    Ok(row.map(|row| CodeStatus {
        consumed: row.get("consumed"),
        expired: row.get("expired"),
    }))
}

/// A consumed code reports `AlreadyConsumed` even once it has also expired;
/// replay must stay distinguishable from a merely stale code.
pub(super) fn classify_miss(status: &CodeStatus) -> ConsumeOutcome {
    if status.consumed {
        ConsumeOutcome::AlreadyConsumed
    } else if status.expired {
        ConsumeOutcome::Expired
    } else {
        // The conditional update said no but the row looks live: another
        // consumer won between the two statements.
        ConsumeOutcome::AlreadyConsumed
    }
}

/// Flip a user to active. Idempotent: activating an active user is fine.
pub(super) async fn activate_user(pool: &PgPool, email: &str) -> Result<()> {
    let query = r"
        UPDATE users
        SET active = TRUE,
            updated_at = NOW()
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to activate user")?;
    Ok(())
}

/// Replace a user's secret hash. Returns false when the user is absent.
pub(super) async fn replace_secret(
    pool: &PgPool,
    email: &str,
    secret_hash: &str,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET secret_hash = $2,
            updated_at = NOW()
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(email)
        .bind(secret_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to replace secret")?;
    Ok(result.rows_affected() > 0)
}

/// Look up the stored credential for a login attempt.
pub(super) async fn lookup_credentials(
    pool: &PgPool,
    email: &str,
) -> Result<Option<CredentialRecord>> {
    let query = "SELECT secret_hash, active FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;
    Ok(row.map(|row| CredentialRecord {
        secret_hash: row.get("secret_hash"),
        active: row.get("active"),
    }))
}

/// Issue a fresh authorization code for a logged-in user.
///
/// Sibling codes stay valid: concurrent login sessions are legitimate, and
/// each code is independently single-use.
pub(super) async fn insert_auth_code(pool: &PgPool, email: &str, config: &AuthConfig) -> Result<String> {
    let query = r"
        INSERT INTO auth_codes (code_hash, user_email, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let code = generate_code()?;
        let code_hash = hash_code(&code);
        let result = sqlx::query(query)
            .bind(&code_hash)
            .bind(email)
            .bind(config.auth_code_ttl_seconds())
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(code),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert authorization code"),
        }
    }

    Err(anyhow!("failed to generate unique authorization code"))
}

/// Consume an authorization code: same single-winner shape as verification.
/// A replayed code reports `AlreadyConsumed` and is never re-minted.
pub(super) async fn consume_auth_code(pool: &PgPool, code_hash: &[u8]) -> Result<ConsumeOutcome> {
    let query = r"
        UPDATE auth_codes
        SET consumed_at = NOW()
        WHERE code_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume authorization code")?;

    if let Some(row) = row {
        return Ok(ConsumeOutcome::Consumed {
            user_email: row.get("user_email"),
        });
    }

    match peek_auth_code(pool, code_hash).await? {
        Some(status) => Ok(classify_miss(&status)),
        None => Ok(ConsumeOutcome::InvalidCode),
    }
}

/// Read an authorization code without side effects.
pub(super) async fn peek_auth_code(pool: &PgPool, code_hash: &[u8]) -> Result<Option<CodeStatus>> {
    let query = r"
        SELECT consumed_at IS NOT NULL AS consumed,
               expires_at <= NOW() AS expired
        FROM auth_codes
        WHERE code_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to peek authorization code")?;
    Ok(row.map(|row| CodeStatus {
        consumed: row.get("consumed"),
        expired: row.get("expired"),
    }))
}

/// Mint a store-backed access token for a user.
pub(super) async fn insert_access_token(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<String> {
    let query = r"
        INSERT INTO access_tokens (token_hash, user_email, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_code()?;
        let token_hash = hash_code(&token);
        let result = sqlx::query(query)
            .bind(&token_hash)
            .bind(email)
            .bind(config.access_token_ttl_seconds())
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert access token"),
        }
    }

    Err(anyhow!("failed to generate unique access token"))
}

/// Resolve a presented access token to its user, honoring expiry and
/// revocation.
pub(super) async fn lookup_access_token(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<String>> {
    let query = r"
        SELECT user_email
        FROM access_tokens
        WHERE token_hash = $1
          AND expires_at > NOW()
          AND revoked_at IS NULL
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup access token")?;
    Ok(row.map(|row| row.get("user_email")))
}

/// Revoke an access token. Idempotent: revoking twice or revoking an
/// unknown token is not an error.
pub(super) async fn revoke_access_token(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = r"
        UPDATE access_tokens
        SET revoked_at = NOW()
        WHERE token_hash = $1
          AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke access token")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        CodeStatus, ConsumeOutcome, Purpose, ReissueOutcome, SignupOutcome, classify_miss,
    };

    #[test]
    fn purpose_maps_to_postgres_enum() {
        assert_eq!(Purpose::Activation.as_str(), "activation");
        assert_eq!(Purpose::Reset.as_str(), "reset");
    }

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(format!("{:?}", SignupOutcome::Created), "Created");
        assert_eq!(format!("{:?}", SignupOutcome::NotEligible), "NotEligible");
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn reissue_outcome_debug_names() {
        assert_eq!(format!("{:?}", ReissueOutcome::Issued), "Issued");
        assert_eq!(format!("{:?}", ReissueOutcome::Cooldown), "Cooldown");
        assert_eq!(format!("{:?}", ReissueOutcome::Noop), "Noop");
    }

    #[test]
    fn classify_miss_prefers_already_consumed() {
        let status = CodeStatus {
            consumed: true,
            expired: true,
        };
        assert_eq!(classify_miss(&status), ConsumeOutcome::AlreadyConsumed);
    }

    #[test]
    fn classify_miss_reports_expired() {
        let status = CodeStatus {
            consumed: false,
            expired: true,
        };
        assert_eq!(classify_miss(&status), ConsumeOutcome::Expired);
    }

    #[test]
    fn classify_miss_live_row_means_lost_race() {
        let status = CodeStatus {
            consumed: false,
            expired: false,
        };
        assert_eq!(classify_miss(&status), ConsumeOutcome::AlreadyConsumed);
    }
}
