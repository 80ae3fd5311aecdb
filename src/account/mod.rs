/// Account management system
///
/// The identity core service: registration, login, refresh rotation, logout,
/// credential changes and account deletion. Every authenticated operation
/// starts by validating its initiator.

mod credentials;
mod manager;
mod session;

pub use manager::AccountManager;

use crate::{
    error::{IdentityError, IdentityResult},
    token::AccountClaims,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Upper bound for one page of listed sessions
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Registration parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterParams {
    #[validate(email)]
    pub email: String,
    pub username: String,
    pub password: String,
    /// Role name, `system_user`/`user` or `system_admin`/`admin`
    pub role: String,
}

impl RegisterParams {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: password.into(),
            role: role.into(),
        }
    }

    /// Trim and lowercase the email, then check its shape
    fn normalized(mut self) -> IdentityResult<Self> {
        self.email = normalize_email(&self.email);
        self.username = self.username.trim().to_string();

        self.validate()
            .map_err(|_| IdentityError::EmailNotAllowed(self.email.clone()))?;

        Ok(self)
    }
}

/// Who is making an authenticated call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    pub account_id: Uuid,
    pub session_id: Uuid,
}

impl Initiator {
    pub fn new(account_id: Uuid, session_id: Uuid) -> Self {
        Self {
            account_id,
            session_id,
        }
    }
}

impl From<&AccountClaims> for Initiator {
    fn from(claims: &AccountClaims) -> Self {
        Self::new(claims.sub, claims.sid)
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Keep page sizes within `1..=MAX_PAGE_LIMIT`
pub(crate) fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::{SessionPolicyConfig, TokenConfig},
        db::{create_in_memory_pool, run_migrations, SqliteStore},
        events::EventProducer,
        token::TokenCodec,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    pub struct Harness {
        pub manager: AccountManager,
        pub store: Arc<SqliteStore>,
        pub clock: Arc<ManualClock>,
    }

    pub fn token_config() -> TokenConfig {
        TokenConfig {
            issuer: "identity-test".to_string(),
            access_secret: "access-secret-key-for-testing-only-000".to_string(),
            refresh_secret: "refresh-secret-key-for-testing-only-00".to_string(),
            refresh_hash_key: "refresh-hash-key-for-testing-only-0000".to_string(),
            access_ttl_secs: 900,
            refresh_ttl_secs: 30 * 24 * 3600,
            leeway_secs: 0,
        }
    }

    pub async fn create_test_manager() -> Harness {
        create_test_manager_with(SessionPolicyConfig::default()).await
    }

    pub async fn create_test_manager_with(policy: SessionPolicyConfig) -> Harness {
        let pool = create_in_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let store = Arc::new(SqliteStore::new(pool));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
        ));
        let manager = AccountManager::new(
            store.clone(),
            Arc::new(TokenCodec::new(&token_config()).unwrap()),
            clock.clone(),
            EventProducer::new("accounts.v1", "identity-test"),
            policy,
        );

        Harness {
            manager,
            store,
            clock,
        }
    }

    pub fn alice() -> RegisterParams {
        RegisterParams::new("a@x.com", "alice", "Abc12345!", "user")
    }

    pub async fn count_rows(store: &SqliteStore, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    pub async fn staged_event_types(store: &SqliteStore) -> Vec<String> {
        sqlx::query_scalar("SELECT event_type FROM outbox_events ORDER BY rowid")
            .fetch_all(store.pool())
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_params_normalization() {
        let params = RegisterParams::new("  A@X.Com ", " alice ", "Abc12345!", "user")
            .normalized()
            .unwrap();
        assert_eq!(params.email, "a@x.com");
        assert_eq!(params.username, "alice");
    }

    #[test]
    fn test_register_params_rejects_bad_email() {
        let err = RegisterParams::new("not-an-email", "alice", "Abc12345!", "user")
            .normalized()
            .unwrap_err();
        assert!(matches!(err, IdentityError::EmailNotAllowed(_)));
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(500), MAX_PAGE_LIMIT);
    }
}
