/// Application context and dependency injection
use crate::{
    account::AccountManager,
    clock::{Clock, SystemClock},
    config::IdentityConfig,
    db::{self, SqliteStore},
    error::IdentityResult,
    events::EventProducer,
    token::TokenCodec,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Context holding all shared services
#[derive(Clone)]
pub struct IdentityContext {
    pub config: Arc<IdentityConfig>,
    pub db: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub tokens: Arc<TokenCodec>,
    pub account_manager: Arc<AccountManager>,
}

impl IdentityContext {
    /// Create a new context from configuration
    pub async fn new(config: IdentityConfig) -> IdentityResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create a context driven by the given clock
    pub async fn with_clock(config: IdentityConfig, clock: Arc<dyn Clock>) -> IdentityResult<Self> {
        // Validate configuration
        config.validate()?;

        let db = db::create_pool(
            &config.storage.database_path,
            db::DatabaseOptions {
                max_connections: config.storage.max_connections,
                ..Default::default()
            },
        )
        .await?;

        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let store = Arc::new(SqliteStore::new(db.clone()));
        let tokens = Arc::new(TokenCodec::new(&config.tokens)?);
        let producer = EventProducer::new(config.events.topic.clone(), config.service.name.clone());

        let account_manager = Arc::new(AccountManager::new(
            store.clone(),
            tokens.clone(),
            clock,
            producer,
            config.sessions.clone(),
        ));

        tracing::info!(
            database = %config.storage.database_path.display(),
            issuer = %config.tokens.issuer,
            "Identity context initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            store,
            tokens,
            account_manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{account::RegisterParams, error::IdentityError};
    use std::collections::HashMap;

    fn config(database_path: &str) -> IdentityConfig {
        let vars = HashMap::from([
            ("IDENTITY_ACCESS_SECRET", "a".repeat(32)),
            ("IDENTITY_REFRESH_SECRET", "r".repeat(32)),
            ("IDENTITY_REFRESH_HASH_KEY", "h".repeat(32)),
            ("IDENTITY_DATABASE_PATH", database_path.to_string()),
        ]);
        IdentityConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_context_in_memory() {
        let ctx = IdentityContext::new(config(":memory:")).await.unwrap();

        let account = ctx
            .account_manager
            .register(RegisterParams::new("a@x.com", "alice", "Abc12345!", "user"))
            .await
            .unwrap();
        let pair = ctx
            .account_manager
            .login_by_email("a@x.com", "Abc12345!")
            .await
            .unwrap();

        let claims = ctx.tokens.parse_access_claims(&pair.access).unwrap();
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.iss, "identity-core");

        let staged = ctx.store.pending_outbox_events(10).await.unwrap();
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().all(|e| e.topic == "accounts.v1" && e.producer == "identity-core"));
    }

    #[tokio::test]
    async fn test_context_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.sqlite");

        let ctx = IdentityContext::new(config(&path.to_string_lossy())).await.unwrap();
        ctx.account_manager
            .register(RegisterParams::new("a@x.com", "alice", "Abc12345!", "user"))
            .await
            .unwrap();
        ctx.db.close().await;

        // reopening runs migrations again without harm and sees the data
        let reopened = IdentityContext::new(config(&path.to_string_lossy())).await.unwrap();
        assert!(reopened
            .account_manager
            .account_exists_by_username("alice")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_context_rejects_invalid_config() {
        let mut bad = config(":memory:");
        bad.tokens.refresh_secret = bad.tokens.access_secret.clone();

        assert!(matches!(
            IdentityContext::new(bad).await,
            Err(IdentityError::Config(_))
        ));
    }
}
