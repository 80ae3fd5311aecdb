/// SQLite implementation of the store contract
///
/// Uses runtime-built queries with manual row mapping, so no DATABASE_URL is
/// needed at compile time.
use super::{
    account::{Account, AccountEmail, AccountPassword, AccountStatus, OrgMember, Page, Role, Session},
    AccountStore, StoreTx,
};
use crate::{
    error::{IdentityError, IdentityResult},
    events::{EventType, OutboxEvent, OutboxSink},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str =
    "a.id, a.username, a.role, a.status, a.created_at, a.updated_at, a.username_changed_at";

/// Store backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Staged events not yet marked published, oldest first
    pub async fn pending_outbox_events(&self, limit: u32) -> IdentityResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            "SELECT id, topic, event_key, event_type, version, producer, payload, created_at
             FROM outbox_events
             WHERE published_at IS NULL
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(outbox_event_from_row).collect()
    }

    /// Mark staged events as delivered
    pub async fn mark_outbox_published(
        &self,
        event_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> IdentityResult<u64> {
        let mut marked = 0;
        for id in event_ids {
            let result = sqlx::query(
                "UPDATE outbox_events SET published_at = ?1 WHERE id = ?2 AND published_at IS NULL",
            )
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
            marked += result.rows_affected();
        }

        Ok(marked)
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn get_account_by_id(&self, account_id: Uuid) -> IdentityResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts a WHERE a.id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_account_by_email(&self, email: &str) -> IdentityResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts a
             JOIN account_emails e ON e.account_id = a.id
             WHERE e.email = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_account_by_username(&self, username: &str) -> IdentityResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts a WHERE a.username = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_account_email(&self, account_id: Uuid) -> IdentityResult<Option<AccountEmail>> {
        let row = sqlx::query(
            "SELECT account_id, email, verified, created_at, updated_at
             FROM account_emails WHERE account_id = ?1",
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(AccountEmail {
                account_id: uuid_column(&row, "account_id")?,
                email: row.try_get("email")?,
                verified: row.try_get("verified")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn get_account_password(
        &self,
        account_id: Uuid,
    ) -> IdentityResult<Option<AccountPassword>> {
        let row = sqlx::query(
            "SELECT account_id, hash, created_at, updated_at, changed_at
             FROM account_passwords WHERE account_id = ?1",
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(AccountPassword {
                account_id: uuid_column(&row, "account_id")?,
                hash: row.try_get("hash")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
                changed_at: row.try_get("changed_at")?,
            })
        })
        .transpose()
    }

    async fn get_session(&self, session_id: Uuid) -> IdentityResult<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, account_id, last_used, created_at FROM sessions WHERE id = ?1",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn get_account_session(
        &self,
        account_id: Uuid,
        session_id: Uuid,
    ) -> IdentityResult<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, account_id, last_used, created_at
             FROM sessions WHERE id = ?1 AND account_id = ?2",
        )
        .bind(session_id.to_string())
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn get_session_fingerprint(&self, session_id: Uuid) -> IdentityResult<Option<String>> {
        let fingerprint = sqlx::query_scalar::<_, String>(
            "SELECT hash_token FROM sessions WHERE id = ?1",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(fingerprint)
    }

    async fn list_account_sessions(
        &self,
        account_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> IdentityResult<Page<Session>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE account_id = ?1")
            .bind(account_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT id, account_id, last_used, created_at
             FROM sessions
             WHERE account_id = ?1
             ORDER BY last_used DESC, id ASC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(account_id.to_string())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows.iter().map(session_from_row).collect::<IdentityResult<_>>()?,
            total: total.max(0) as u64,
            limit,
            offset,
        })
    }

    async fn account_has_org_membership(&self, account_id: Uuid) -> IdentityResult<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM organization_members WHERE account_id = ?1)",
        )
        .bind(account_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    async fn rotate_session_fingerprint(
        &self,
        session_id: Uuid,
        expected: &str,
        replacement: &str,
        used_at: DateTime<Utc>,
    ) -> IdentityResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET hash_token = ?1, last_used = ?2
             WHERE id = ?3 AND hash_token = ?4",
        )
        .bind(replacement)
        .bind(used_at)
        .bind(session_id.to_string())
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_account_session(
        &self,
        account_id: Uuid,
        session_id: Uuid,
    ) -> IdentityResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1 AND account_id = ?2")
            .bind(session_id.to_string())
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_account_sessions(&self, account_id: Uuid) -> IdentityResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE account_id = ?1")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn set_email_verified(&self, email: &str, at: DateTime<Utc>) -> IdentityResult<bool> {
        let result =
            sqlx::query("UPDATE account_emails SET verified = 1, updated_at = ?1 WHERE email = ?2")
                .bind(at)
                .bind(email)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_org_member(&self, member: &OrgMember) -> IdentityResult<OrgMember> {
        sqlx::query(
            "INSERT INTO organization_members (id, account_id, organization_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (account_id, organization_id) DO NOTHING",
        )
        .bind(member.id.to_string())
        .bind(member.account_id.to_string())
        .bind(member.organization_id.to_string())
        .bind(member.created_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, account_id, organization_id, created_at FROM organization_members
             WHERE account_id = ?1 AND organization_id = ?2",
        )
        .bind(member.account_id.to_string())
        .bind(member.organization_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        org_member_from_row(&row)
    }

    async fn delete_org_member(&self, member_id: Uuid) -> IdentityResult<bool> {
        let result = sqlx::query("DELETE FROM organization_members WHERE id = ?1")
            .bind(member_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn begin(&self) -> IdentityResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

/// Open SQLite transaction. Rolled back on drop unless committed.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl OutboxSink for SqliteTx {
    async fn emit(&mut self, event: &OutboxEvent) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO outbox_events
             (id, topic, event_key, event_type, version, producer, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(event.id.to_string())
        .bind(&event.topic)
        .bind(&event.key)
        .bind(event.event_type.as_str())
        .bind(event.version)
        .bind(&event.producer)
        .bind(event.payload.to_string())
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn create_account(&mut self, account: &Account) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO accounts (id, username, role, status, created_at, updated_at, username_changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(account.role.as_str())
        .bind(account.status.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .bind(account.username_changed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| on_unique_violation(e, || IdentityError::UsernameAlreadyTaken(account.username.clone())))?;

        Ok(())
    }

    async fn create_account_password(&mut self, password: &AccountPassword) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO account_passwords (account_id, hash, created_at, updated_at, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(password.account_id.to_string())
        .bind(&password.hash)
        .bind(password.created_at)
        .bind(password.updated_at)
        .bind(password.changed_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn create_account_email(&mut self, email: &AccountEmail) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO account_emails (account_id, email, verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(email.account_id.to_string())
        .bind(&email.email)
        .bind(email.verified)
        .bind(email.created_at)
        .bind(email.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| on_unique_violation(e, || IdentityError::EmailAlreadyExist(email.email.clone())))?;

        Ok(())
    }

    async fn create_session(&mut self, session: &Session, fingerprint: &str) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, account_id, hash_token, last_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(session.id.to_string())
        .bind(session.account_id.to_string())
        .bind(fingerprint)
        .bind(session.last_used)
        .bind(session.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_account_password(
        &mut self,
        account_id: Uuid,
        hash: &str,
        changed_at: DateTime<Utc>,
    ) -> IdentityResult<()> {
        let result = sqlx::query(
            "UPDATE account_passwords SET hash = ?1, updated_at = ?2, changed_at = ?2
             WHERE account_id = ?3",
        )
        .bind(hash)
        .bind(changed_at)
        .bind(account_id.to_string())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::AccountNotFound(account_id.to_string()));
        }

        Ok(())
    }

    async fn update_account_username(
        &mut self,
        account_id: Uuid,
        username: &str,
        changed_at: DateTime<Utc>,
    ) -> IdentityResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET username = ?1, username_changed_at = ?2, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(username)
        .bind(changed_at)
        .bind(account_id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| on_unique_violation(e, || IdentityError::UsernameAlreadyTaken(username.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::AccountNotFound(account_id.to_string()));
        }

        Ok(())
    }

    async fn delete_account_sessions(&mut self, account_id: Uuid) -> IdentityResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE account_id = ?1")
            .bind(account_id.to_string())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn update_account_status(
        &mut self,
        account_id: Uuid,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> IdentityResult<bool> {
        let result = sqlx::query("UPDATE accounts SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(at)
            .bind(account_id.to_string())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_account(&mut self, account_id: Uuid) -> IdentityResult<()> {
        let id = account_id.to_string();

        for statement in [
            "DELETE FROM sessions WHERE account_id = ?1",
            "DELETE FROM account_emails WHERE account_id = ?1",
            "DELETE FROM account_passwords WHERE account_id = ?1",
        ] {
            sqlx::query(statement)
                .bind(&id)
                .execute(&mut *self.tx)
                .await?;
        }

        let result = sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(&id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::AccountNotFound(id));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> IdentityResult<()> {
        let SqliteTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

fn on_unique_violation(e: sqlx::Error, conflict: impl FnOnce() -> IdentityError) -> IdentityError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => conflict(),
        _ => IdentityError::Database(e),
    }
}

fn uuid_column(row: &SqliteRow, column: &str) -> IdentityResult<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw)
        .map_err(|e| IdentityError::Internal(format!("Invalid uuid in column {}: {}", column, e)))
}

fn account_from_row(row: &SqliteRow) -> IdentityResult<Account> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;

    Ok(Account {
        id: uuid_column(row, "id")?,
        username: row.try_get("username")?,
        role: Role::parse(&role)
            .map_err(|_| IdentityError::Internal(format!("Unrecognized stored role: {}", role)))?,
        status: AccountStatus::parse(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        username_changed_at: row.try_get("username_changed_at")?,
    })
}

fn session_from_row(row: &SqliteRow) -> IdentityResult<Session> {
    Ok(Session {
        id: uuid_column(row, "id")?,
        account_id: uuid_column(row, "account_id")?,
        last_used: row.try_get("last_used")?,
        created_at: row.try_get("created_at")?,
    })
}

fn org_member_from_row(row: &SqliteRow) -> IdentityResult<OrgMember> {
    Ok(OrgMember {
        id: uuid_column(row, "id")?,
        account_id: uuid_column(row, "account_id")?,
        organization_id: uuid_column(row, "organization_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn outbox_event_from_row(row: &SqliteRow) -> IdentityResult<OutboxEvent> {
    let event_type: String = row.try_get("event_type")?;
    let payload: String = row.try_get("payload")?;

    Ok(OutboxEvent {
        id: uuid_column(row, "id")?,
        topic: row.try_get("topic")?,
        key: row.try_get("event_key")?,
        event_type: serde_json::from_value::<EventType>(serde_json::Value::String(event_type))
            .map_err(|e| IdentityError::Internal(format!("Unknown staged event type: {}", e)))?,
        version: row.try_get("version")?,
        producer: row.try_get("producer")?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| IdentityError::Internal(format!("Corrupt staged payload: {}", e)))?,
        created_at: row.try_get("created_at")?,
    })
}
