/// Session lifecycle: login, refresh rotation, logout and session listing
use super::{clamp_limit, normalize_email, AccountManager, Initiator};
use crate::{
    db::account::{Account, Page, Session},
    error::{IdentityError, IdentityResult},
    events::AccountEvent,
    metrics, policy,
    token::{fingerprints_match, TokenPair},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn outcome<T>(result: &IdentityResult<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.code(),
    }
}

impl AccountManager {
    /// Login with email and password
    pub async fn login_by_email(&self, email: &str, password: &str) -> IdentityResult<TokenPair> {
        let result = async {
            let account = self
                .store
                .get_account_by_email(&normalize_email(email))
                .await?;
            self.login_with_password(account, password).await
        }
        .await;

        metrics::record_login("email", outcome(&result));
        result
    }

    /// Login with username and password
    pub async fn login_by_username(
        &self,
        username: &str,
        password: &str,
    ) -> IdentityResult<TokenPair> {
        let result = async {
            let account = self.store.get_account_by_username(username).await?;
            self.login_with_password(account, password).await
        }
        .await;

        metrics::record_login("username", outcome(&result));
        result
    }

    /// Login for an email already proven by a federated identity provider
    pub async fn login_by_federated_email(&self, email: &str) -> IdentityResult<TokenPair> {
        let result = async {
            let email = normalize_email(email);
            let account = self
                .store
                .get_account_by_email(&email)
                .await?
                .ok_or_else(|| IdentityError::AccountNotFound(email.clone()))?;

            if !account.is_active() {
                return Err(IdentityError::InitiatorNotActive(account.id.to_string()));
            }

            self.create_session(&account).await
        }
        .await;

        metrics::record_login("federated", outcome(&result));
        result
    }

    /// Unknown account and wrong password are both reported as
    /// `InvalidCredentials`
    async fn login_with_password(
        &self,
        account: Option<Account>,
        password: &str,
    ) -> IdentityResult<TokenPair> {
        let Some(account) = account else {
            policy::check_password_against_dummy(password);
            return Err(IdentityError::InvalidCredentials);
        };

        if !account.is_active() {
            return Err(IdentityError::InitiatorNotActive(account.id.to_string()));
        }

        let Some(credential) = self.store.get_account_password(account.id).await? else {
            policy::check_password_against_dummy(password);
            return Err(IdentityError::InvalidCredentials);
        };

        match policy::check_password_match(&credential.hash, password) {
            Ok(()) => {}
            Err(IdentityError::PasswordInvalid) => {
                warn!(account_id = %account.id, "Rejected login: wrong password");
                return Err(IdentityError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        }

        self.create_session(&account).await
    }

    /// Open a new session and mint its first token pair.
    ///
    /// The session row and the login event commit together; on failure no
    /// pair is returned.
    async fn create_session(&self, account: &Account) -> IdentityResult<TokenPair> {
        let session_id = Uuid::new_v4();
        let pair = self.tokens.issue_pair(account, session_id)?;
        let fingerprint = self.tokens.fingerprint_refresh(&pair.refresh)?;

        let now = self.clock.now();
        let session = Session {
            id: session_id,
            account_id: account.id,
            last_used: now,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.create_session(&session, &fingerprint).await?;
        self.stage(
            tx.as_mut(),
            &AccountEvent::Login {
                account_id: account.id,
                session_id,
            },
        )
        .await?;
        tx.commit().await?;

        info!(account_id = %account.id, session_id = %session_id, "Session created");

        Ok(pair)
    }

    /// Exchange a refresh token for a new pair on the same session.
    ///
    /// Only the most recently issued refresh token of a session is accepted,
    /// and each one is accepted once.
    pub async fn refresh(&self, refresh_token: &str) -> IdentityResult<TokenPair> {
        let result = self.rotate_refresh(refresh_token).await;
        metrics::record_refresh(outcome(&result));
        result
    }

    async fn rotate_refresh(&self, refresh_token: &str) -> IdentityResult<TokenPair> {
        let claims = self.tokens.parse_refresh_claims(refresh_token)?;

        let account = self
            .store
            .get_account_by_id(claims.sub)
            .await?
            .ok_or_else(|| IdentityError::AccountNotFound(claims.sub.to_string()))?;

        if !account.is_active() {
            return Err(IdentityError::InitiatorNotActive(account.id.to_string()));
        }

        let stored = self
            .store
            .get_session_fingerprint(claims.sid)
            .await?
            .ok_or_else(|| IdentityError::SessionNotFound(claims.sid.to_string()))?;

        let presented = self.tokens.fingerprint_refresh(refresh_token)?;
        if !fingerprints_match(&stored, &presented) {
            warn!(
                account_id = %account.id,
                session_id = %claims.sid,
                "Refresh token replay rejected"
            );
            return Err(IdentityError::SessionTokenMismatch);
        }

        let pair = self.tokens.issue_pair(&account, claims.sid)?;
        let next = self.tokens.fingerprint_refresh(&pair.refresh)?;

        // Conditioned on the fingerprint we just matched
        let rotated = self
            .store
            .rotate_session_fingerprint(claims.sid, &stored, &next, self.clock.now())
            .await?;
        if !rotated {
            warn!(
                account_id = %account.id,
                session_id = %claims.sid,
                "Refresh lost a concurrent rotation"
            );
            return Err(IdentityError::SessionTokenMismatch);
        }

        debug!(account_id = %account.id, session_id = %claims.sid, "Session refreshed");

        Ok(pair)
    }

    /// Verify an access token and resolve its initiator
    pub async fn authenticate(&self, access_token: &str) -> IdentityResult<(Initiator, Account)> {
        let claims = self.tokens.parse_access_claims(access_token)?;
        let initiator = Initiator::from(&claims);
        let account = self.validate_session(&initiator).await?;

        Ok((initiator, account))
    }

    /// End the initiator's current session
    pub async fn logout(&self, initiator: &Initiator) -> IdentityResult<()> {
        self.delete_own_session(initiator, initiator.session_id).await
    }

    /// Delete one of the initiator's sessions.
    ///
    /// A session owned by another account is reported as not found and left
    /// untouched.
    pub async fn delete_own_session(
        &self,
        initiator: &Initiator,
        session_id: Uuid,
    ) -> IdentityResult<()> {
        let account = self.validate_session(initiator).await?;

        if !self
            .store
            .delete_account_session(account.id, session_id)
            .await?
        {
            return Err(IdentityError::SessionNotFound(session_id.to_string()));
        }

        metrics::record_sessions_revoked("logout", 1);
        info!(account_id = %account.id, session_id = %session_id, "Session deleted");

        Ok(())
    }

    /// Delete every session of the initiator, the current one included
    pub async fn delete_own_sessions(&self, initiator: &Initiator) -> IdentityResult<u64> {
        let account = self.validate_session(initiator).await?;

        let revoked = self.store.delete_account_sessions(account.id).await?;

        metrics::record_sessions_revoked("logout_all", revoked);
        info!(account_id = %account.id, revoked, "All sessions deleted");

        Ok(revoked)
    }

    pub async fn get_own_session(
        &self,
        initiator: &Initiator,
        session_id: Uuid,
    ) -> IdentityResult<Session> {
        let account = self.validate_session(initiator).await?;

        self.store
            .get_account_session(account.id, session_id)
            .await?
            .ok_or_else(|| IdentityError::SessionNotFound(session_id.to_string()))
    }

    pub async fn get_own_sessions(
        &self,
        initiator: &Initiator,
        limit: u32,
        offset: u32,
    ) -> IdentityResult<Page<Session>> {
        let account = self.validate_session(initiator).await?;

        self.store
            .list_account_sessions(account.id, clamp_limit(limit), offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::{
        account::RegisterParams,
        db::{account::AccountStatus, AccountStore},
        error::ErrorKind,
    };

    #[tokio::test]
    async fn test_login_issues_scoped_pair() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();

        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();
        let (initiator, authed) = h.manager.authenticate(&pair.access).await.unwrap();

        assert_eq!(initiator, Initiator::new(account.id, pair.session_id));
        assert_eq!(authed.id, account.id);

        // stored value is the fingerprint, never the raw token
        let stored = h
            .store
            .get_session_fingerprint(pair.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored, pair.refresh);
        assert_eq!(stored, h.manager.tokens.fingerprint_refresh(&pair.refresh).unwrap());

        assert_eq!(
            staged_event_types(&h.store).await,
            vec!["account.created", "account.login"]
        );
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let h = create_test_manager().await;
        h.manager.register(alice()).await.unwrap();

        let wrong_password = h.manager.login_by_email("a@x.com", "Wrong1234!").await.unwrap_err();
        let unknown_email = h.manager.login_by_email("x@x.com", "Abc12345!").await.unwrap_err();
        let unknown_user = h.manager.login_by_username("nobody", "Abc12345!").await.unwrap_err();

        for err in [&wrong_password, &unknown_email, &unknown_user] {
            assert!(matches!(err, IdentityError::InvalidCredentials));
            assert_eq!(err.code(), "INVALID_CREDENTIALS");
        }
        assert_eq!(count_rows(&h.store, "sessions").await, 0);
    }

    #[tokio::test]
    async fn test_unknown_account_login_pays_hash_cost() {
        let h = create_test_manager().await;
        h.manager.register(alice()).await.unwrap();
        // warm the stand-in hash
        let _ = h.manager.login_by_email("x@x.com", "Abc12345!").await;

        let started = std::time::Instant::now();
        let _ = h.manager.login_by_email("a@x.com", "Wrong1234!").await;
        let wrong_password = started.elapsed();

        let started = std::time::Instant::now();
        let _ = h.manager.login_by_email("nobody@x.com", "Wrong1234!").await;
        let unknown_account = started.elapsed();

        assert!(
            unknown_account * 4 >= wrong_password,
            "unknown account took {:?}, wrong password took {:?}",
            unknown_account,
            wrong_password
        );
    }

    #[tokio::test]
    async fn test_login_by_username() {
        let h = create_test_manager().await;
        h.manager.register(alice()).await.unwrap();

        let first = h.manager.login_by_username("alice", "Abc12345!").await.unwrap();
        let second = h.manager.login_by_username("alice", "Abc12345!").await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(count_rows(&h.store, "sessions").await, 2);
    }

    #[tokio::test]
    async fn test_inactive_account_cannot_login() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();
        h.manager
            .set_account_status(account.id, AccountStatus::Suspended)
            .await
            .unwrap();

        let err = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap_err();
        assert!(matches!(err, IdentityError::InitiatorNotActive(_)));
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        assert!(matches!(
            h.manager.login_by_federated_email("a@x.com").await,
            Err(IdentityError::InitiatorNotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_federated_login() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();

        let pair = h.manager.login_by_federated_email("A@X.com").await.unwrap();
        let (initiator, _) = h.manager.authenticate(&pair.access).await.unwrap();
        assert_eq!(initiator.account_id, account.id);

        assert!(matches!(
            h.manager.login_by_federated_email("ghost@x.com").await,
            Err(IdentityError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_once() {
        let h = create_test_manager().await;
        h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();

        let rotated = h.manager.refresh(&pair.refresh).await.unwrap();
        assert_eq!(rotated.session_id, pair.session_id);
        assert_ne!(rotated.refresh, pair.refresh);

        assert!(matches!(
            h.manager.refresh(&pair.refresh).await,
            Err(IdentityError::SessionTokenMismatch)
        ));

        // the replay did not burn the current token
        let again = h.manager.refresh(&rotated.refresh).await.unwrap();
        assert_eq!(again.session_id, pair.session_id);
    }

    #[tokio::test]
    async fn test_refresh_updates_last_used() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();
        let initiator = Initiator::new(account.id, pair.session_id);

        let before = h.manager.get_own_session(&initiator, pair.session_id).await.unwrap();
        h.clock.advance(chrono::Duration::hours(3));
        h.manager.refresh(&pair.refresh).await.unwrap();
        let after = h.manager.get_own_session(&initiator, pair.session_id).await.unwrap();

        assert_eq!(after.last_used - before.last_used, chrono::Duration::hours(3));
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn test_refresh_rejects_garbage_and_access_tokens() {
        let h = create_test_manager().await;
        h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();

        for token in ["garbage", pair.access.as_str()] {
            let err = h.manager.refresh(token).await.unwrap_err();
            assert!(matches!(err, IdentityError::InvalidToken));
            assert_eq!(err.kind(), ErrorKind::Internal);
        }
    }

    #[tokio::test]
    async fn test_refresh_after_logout() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();

        h.manager
            .logout(&Initiator::new(account.id, pair.session_id))
            .await
            .unwrap();

        assert!(matches!(
            h.manager.refresh(&pair.refresh).await,
            Err(IdentityError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_own_session_isolation() {
        let h = create_test_manager().await;
        let alice_account = h.manager.register(alice()).await.unwrap();
        h.manager
            .register(RegisterParams::new("b@x.com", "bob", "Abc12345!", "user"))
            .await
            .unwrap();

        let alice_pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();
        let bob_pair = h.manager.login_by_email("b@x.com", "Abc12345!").await.unwrap();
        let alice_initiator = Initiator::new(alice_account.id, alice_pair.session_id);

        assert!(matches!(
            h.manager
                .delete_own_session(&alice_initiator, bob_pair.session_id)
                .await,
            Err(IdentityError::SessionNotFound(_))
        ));
        assert!(h.manager.refresh(&bob_pair.refresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_own_sessions_and_listing() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();

        let mut last = None;
        for _ in 0..3 {
            last = Some(h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap());
            h.clock.advance(chrono::Duration::minutes(1));
        }
        let current = last.unwrap();
        let initiator = Initiator::new(account.id, current.session_id);

        let page = h.manager.get_own_sessions(&initiator, 0, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.limit, 1);
        assert_eq!(page.items.len(), 1);
        // most recently used first
        assert_eq!(page.items[0].id, current.session_id);

        let everything = h.manager.get_own_sessions(&initiator, 1000, 0).await.unwrap();
        assert_eq!(everything.limit, 100);
        assert_eq!(everything.items.len(), 3);

        assert_eq!(h.manager.delete_own_sessions(&initiator).await.unwrap(), 3);
        assert!(matches!(
            h.manager.get_own_sessions(&initiator, 10, 0).await,
            Err(IdentityError::InitiatorInvalidSession(_))
        ));
    }

    #[tokio::test]
    async fn test_get_own_session_scoped() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();
        h.manager
            .register(RegisterParams::new("b@x.com", "bob", "Abc12345!", "user"))
            .await
            .unwrap();

        let mine = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();
        let theirs = h.manager.login_by_email("b@x.com", "Abc12345!").await.unwrap();
        let initiator = Initiator::new(account.id, mine.session_id);

        let session = h.manager.get_own_session(&initiator, mine.session_id).await.unwrap();
        assert_eq!(session.account_id, account.id);

        assert!(matches!(
            h.manager.get_own_session(&initiator, theirs.session_id).await,
            Err(IdentityError::SessionNotFound(_))
        ));
    }
}
