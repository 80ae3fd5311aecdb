/// Credential changes: password and username
use super::{AccountManager, Initiator};
use crate::{
    db::account::Account,
    error::{IdentityError, IdentityResult},
    events::AccountEvent,
    metrics, policy,
};
use tracing::info;

impl AccountManager {
    /// Replace the initiator's password and revoke every session of the account
    pub async fn update_password(
        &self,
        initiator: &Initiator,
        old_password: &str,
        new_password: &str,
    ) -> IdentityResult<()> {
        let account = self.validate_session(initiator).await?;

        let credential = self
            .store
            .get_account_password(account.id)
            .await?
            .ok_or_else(|| IdentityError::AccountNotFound(account.id.to_string()))?;

        let now = self.clock.now();
        if let Some(changed_at) = credential.changed_at {
            policy::can_change_password(changed_at, now)?;
        }

        policy::check_password_match(&credential.hash, old_password)?;
        policy::validate_password(new_password)?;

        let hash = policy::hash_password(new_password)?;

        let mut tx = self.store.begin().await?;
        tx.update_account_password(account.id, &hash, now).await?;
        let revoked = tx.delete_account_sessions(account.id).await?;
        self.stage(
            tx.as_mut(),
            &AccountEvent::PasswordChanged {
                account_id: account.id,
            },
        )
        .await?;
        tx.commit().await?;

        metrics::record_sessions_revoked("password_change", revoked);
        info!(account_id = %account.id, revoked, "Password changed, sessions revoked");

        Ok(())
    }

    /// Rename the initiator's account after re-verifying its password
    pub async fn update_username(
        &self,
        initiator: &Initiator,
        password: &str,
        new_username: &str,
    ) -> IdentityResult<Account> {
        let account = self.validate_session(initiator).await?;

        let now = self.clock.now();
        if let Some(changed_at) = account.username_changed_at {
            policy::can_change_username(changed_at, now)?;
        }

        let new_username = new_username.trim();
        policy::validate_username(new_username)?;

        if self
            .store
            .get_account_by_username(new_username)
            .await?
            .is_some()
        {
            return Err(IdentityError::UsernameAlreadyTaken(new_username.to_string()));
        }

        let credential = self
            .store
            .get_account_password(account.id)
            .await?
            .ok_or_else(|| IdentityError::AccountNotFound(account.id.to_string()))?;
        policy::check_password_match(&credential.hash, password)?;

        let mut tx = self.store.begin().await?;
        tx.update_account_username(account.id, new_username, now).await?;
        let revoked = if self.sessions.revoke_on_username_change {
            tx.delete_account_sessions(account.id).await?
        } else {
            0
        };
        self.stage(
            tx.as_mut(),
            &AccountEvent::UsernameChanged {
                account_id: account.id,
                username: new_username.to_string(),
                previous_username: account.username.clone(),
            },
        )
        .await?;
        tx.commit().await?;

        if revoked > 0 {
            metrics::record_sessions_revoked("username_change", revoked);
        }
        info!(account_id = %account.id, revoked, "Username changed");

        self.get_account_by_id(account.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::{
        account::RegisterParams,
        config::SessionPolicyConfig,
        db::AccountStore,
        error::ErrorKind,
    };
    use chrono::Duration;

    #[tokio::test]
    async fn test_password_change_revokes_all_sessions() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();

        let mut pairs = Vec::new();
        for _ in 0..3 {
            pairs.push(h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap());
        }
        let initiator = Initiator::new(account.id, pairs[0].session_id);

        h.manager
            .update_password(&initiator, "Abc12345!", "Xyz98765!")
            .await
            .unwrap();

        for pair in &pairs {
            assert!(matches!(
                h.manager.refresh(&pair.refresh).await,
                Err(IdentityError::SessionNotFound(_))
            ));
        }

        assert!(h.manager.login_by_email("a@x.com", "Xyz98765!").await.is_ok());
        assert!(matches!(
            h.manager.login_by_email("a@x.com", "Abc12345!").await,
            Err(IdentityError::InvalidCredentials)
        ));
        assert_eq!(
            staged_event_types(&h.store).await.last().map(String::as_str),
            Some("account.login")
        );
    }

    #[tokio::test]
    async fn test_password_cooldown() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();

        h.manager
            .update_password(&Initiator::new(account.id, pair.session_id), "Abc12345!", "Xyz98765!")
            .await
            .unwrap();

        let pair = h.manager.login_by_email("a@x.com", "Xyz98765!").await.unwrap();
        let initiator = Initiator::new(account.id, pair.session_id);

        h.clock.advance(Duration::days(30) - Duration::seconds(1));
        let err = h
            .manager
            .update_password(&initiator, "Xyz98765!", "Qwe45678!")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::CannotChangePasswordYet));
        assert_eq!(err.kind(), ErrorKind::CooldownActive);

        h.clock.advance(Duration::seconds(1));
        h.manager
            .update_password(&initiator, "Xyz98765!", "Qwe45678!")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_password_change_rejections_leave_state() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();
        let initiator = Initiator::new(account.id, pair.session_id);

        assert!(matches!(
            h.manager.update_password(&initiator, "Wrong1234!", "Xyz98765!").await,
            Err(IdentityError::PasswordInvalid)
        ));
        assert!(matches!(
            h.manager.update_password(&initiator, "Abc12345!", "weak").await,
            Err(IdentityError::PasswordNotAllowed(_))
        ));

        // session survived and the old password still works
        assert!(h.manager.refresh(&pair.refresh).await.is_ok());
        assert!(h.manager.login_by_email("a@x.com", "Abc12345!").await.is_ok());

        let stored = h.store.get_account_password(account.id).await.unwrap().unwrap();
        assert!(stored.changed_at.is_none());
    }

    #[tokio::test]
    async fn test_username_change_revokes_sessions_by_default() {
        let h = create_test_manager().await;
        let account = h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();

        let updated = h
            .manager
            .update_username(&Initiator::new(account.id, pair.session_id), "Abc12345!", "alice2")
            .await
            .unwrap();

        assert_eq!(updated.username, "alice2");
        assert!(updated.username_changed_at.is_some());
        assert_eq!(count_rows(&h.store, "sessions").await, 0);
        assert_eq!(
            staged_event_types(&h.store).await.last().map(String::as_str),
            Some("account.username.change")
        );
        assert!(h.manager.login_by_username("alice2", "Abc12345!").await.is_ok());
    }

    #[tokio::test]
    async fn test_username_change_can_keep_sessions() {
        let h = create_test_manager_with(SessionPolicyConfig {
            revoke_on_username_change: false,
        })
        .await;
        let account = h.manager.register(alice()).await.unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();

        h.manager
            .update_username(&Initiator::new(account.id, pair.session_id), "Abc12345!", "alice2")
            .await
            .unwrap();

        assert!(h.manager.refresh(&pair.refresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_username_change_rules() {
        let h = create_test_manager_with(SessionPolicyConfig {
            revoke_on_username_change: false,
        })
        .await;
        let account = h.manager.register(alice()).await.unwrap();
        h.manager
            .register(RegisterParams::new("b@x.com", "bob", "Abc12345!", "user"))
            .await
            .unwrap();
        let pair = h.manager.login_by_email("a@x.com", "Abc12345!").await.unwrap();
        let initiator = Initiator::new(account.id, pair.session_id);

        assert!(matches!(
            h.manager.update_username(&initiator, "Abc12345!", "bob").await,
            Err(IdentityError::UsernameAlreadyTaken(_))
        ));
        assert!(matches!(
            h.manager.update_username(&initiator, "Abc12345!", "no").await,
            Err(IdentityError::UsernameNotAllowed(_))
        ));
        assert!(matches!(
            h.manager.update_username(&initiator, "Wrong1234!", "alice2").await,
            Err(IdentityError::PasswordInvalid)
        ));

        h.manager
            .update_username(&initiator, "Abc12345!", "alice2")
            .await
            .unwrap();

        h.clock.advance(Duration::days(13));
        assert!(matches!(
            h.manager.update_username(&initiator, "Abc12345!", "alice3").await,
            Err(IdentityError::CannotChangeUsernameYet)
        ));

        h.clock.advance(Duration::days(1));
        let renamed = h
            .manager
            .update_username(&initiator, "Abc12345!", "alice3")
            .await
            .unwrap();
        assert_eq!(renamed.username, "alice3");
    }
}
