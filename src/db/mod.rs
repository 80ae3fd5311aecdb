/// Database layer for the identity core
///
/// Defines the store contract the account service depends on, the pool and
/// migration helpers, and the SQLite implementation of the contract.

pub mod account;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::{
    error::{IdentityError, IdentityResult},
    events::OutboxSink,
};
use account::{Account, AccountEmail, AccountPassword, AccountStatus, OrgMember, Page, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool.
///
/// The path `:memory:` yields a private in-memory database.
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> IdentityResult<SqlitePool> {
    if path.as_os_str() == ":memory:" {
        return create_in_memory_pool().await;
    }

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            IdentityError::Internal(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await
        .map_err(IdentityError::Database)?;

    Ok(pool)
}

/// Single-connection in-memory pool.
///
/// Every connection to `sqlite::memory:` is its own database, so the pool is
/// pinned to one connection that never idles out. A caller holding an open
/// `StoreTx` owns that connection until it commits or drops the transaction.
pub async fn create_in_memory_pool() -> IdentityResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(IdentityError::Database)?
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(IdentityError::Database)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> IdentityResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| IdentityError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> IdentityResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(IdentityError::Database)?;

    Ok(())
}

/// Persistence contract of the account service.
///
/// Reads and single-statement writes run directly against the store. Writes
/// that must land together go through a [`StoreTx`] obtained from `begin`.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account_by_id(&self, account_id: Uuid) -> IdentityResult<Option<Account>>;

    async fn get_account_by_email(&self, email: &str) -> IdentityResult<Option<Account>>;

    async fn get_account_by_username(&self, username: &str) -> IdentityResult<Option<Account>>;

    async fn get_account_email(&self, account_id: Uuid) -> IdentityResult<Option<AccountEmail>>;

    async fn get_account_password(
        &self,
        account_id: Uuid,
    ) -> IdentityResult<Option<AccountPassword>>;

    async fn get_session(&self, session_id: Uuid) -> IdentityResult<Option<Session>>;

    /// Session lookup filtered by owner
    async fn get_account_session(
        &self,
        account_id: Uuid,
        session_id: Uuid,
    ) -> IdentityResult<Option<Session>>;

    /// Stored refresh fingerprint of a session
    async fn get_session_fingerprint(&self, session_id: Uuid) -> IdentityResult<Option<String>>;

    /// Sessions of one account, most recently used first
    async fn list_account_sessions(
        &self,
        account_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> IdentityResult<Page<Session>>;

    async fn account_has_org_membership(&self, account_id: Uuid) -> IdentityResult<bool>;

    /// Replace the fingerprint only if it still equals `expected`.
    ///
    /// Returns `false` when another writer rotated or deleted the session
    /// first. At most one of several concurrent callers presenting the same
    /// `expected` value observes `true`.
    async fn rotate_session_fingerprint(
        &self,
        session_id: Uuid,
        expected: &str,
        replacement: &str,
        used_at: DateTime<Utc>,
    ) -> IdentityResult<bool>;

    /// Delete one session, but only if `account_id` owns it
    async fn delete_account_session(
        &self,
        account_id: Uuid,
        session_id: Uuid,
    ) -> IdentityResult<bool>;

    async fn delete_account_sessions(&self, account_id: Uuid) -> IdentityResult<u64>;

    async fn set_email_verified(&self, email: &str, at: DateTime<Utc>) -> IdentityResult<bool>;

    /// Insert a membership, or return the one already stored for the same
    /// account and organization
    async fn create_org_member(&self, member: &OrgMember) -> IdentityResult<OrgMember>;

    async fn delete_org_member(&self, member_id: Uuid) -> IdentityResult<bool>;

    /// Open a transaction. Dropping the handle without `commit` rolls it back.
    async fn begin(&self) -> IdentityResult<Box<dyn StoreTx>>;
}

/// Writes staged inside one transaction, plus outbox staging
#[async_trait]
pub trait StoreTx: OutboxSink {
    async fn create_account(&mut self, account: &Account) -> IdentityResult<()>;

    async fn create_account_password(&mut self, password: &AccountPassword) -> IdentityResult<()>;

    async fn create_account_email(&mut self, email: &AccountEmail) -> IdentityResult<()>;

    async fn create_session(&mut self, session: &Session, fingerprint: &str) -> IdentityResult<()>;

    async fn update_account_password(
        &mut self,
        account_id: Uuid,
        hash: &str,
        changed_at: DateTime<Utc>,
    ) -> IdentityResult<()>;

    async fn update_account_username(
        &mut self,
        account_id: Uuid,
        username: &str,
        changed_at: DateTime<Utc>,
    ) -> IdentityResult<()>;

    async fn delete_account_sessions(&mut self, account_id: Uuid) -> IdentityResult<u64>;

    /// Delete the account and everything it owns
    /// `false` when no such account exists
    async fn update_account_status(
        &mut self,
        account_id: Uuid,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> IdentityResult<bool>;

    async fn delete_account(&mut self, account_id: Uuid) -> IdentityResult<()>;

    async fn commit(self: Box<Self>) -> IdentityResult<()>;
}
