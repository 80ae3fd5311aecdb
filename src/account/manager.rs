/// Account manager: registration, lookups, email verification, deletion
use super::{normalize_email, Initiator, RegisterParams};
use crate::{
    clock::Clock,
    config::SessionPolicyConfig,
    db::{
        account::{Account, AccountEmail, AccountPassword, AccountStatus, OrgMember, Role},
        AccountStore, StoreTx,
    },
    error::{IdentityError, IdentityResult},
    events::{AccountEvent, EventProducer},
    metrics, policy,
    token::TokenCodec,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Identity core service
pub struct AccountManager {
    pub(super) store: Arc<dyn AccountStore>,
    pub(super) tokens: Arc<TokenCodec>,
    pub(super) clock: Arc<dyn Clock>,
    producer: EventProducer,
    pub(super) sessions: SessionPolicyConfig,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        store: Arc<dyn AccountStore>,
        tokens: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
        producer: EventProducer,
        sessions: SessionPolicyConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            clock,
            producer,
            sessions,
        }
    }

    /// Resolve an initiator to its active account.
    ///
    /// The account must exist and be active, and the session must exist and
    /// belong to that account.
    pub async fn validate_session(&self, initiator: &Initiator) -> IdentityResult<Account> {
        let account = self
            .store
            .get_account_by_id(initiator.account_id)
            .await?
            .ok_or_else(|| IdentityError::InitiatorNotFound(initiator.account_id.to_string()))?;

        if !account.is_active() {
            return Err(IdentityError::InitiatorNotActive(account.id.to_string()));
        }

        let session = self
            .store
            .get_session(initiator.session_id)
            .await?
            .ok_or_else(|| IdentityError::InitiatorInvalidSession(initiator.session_id.to_string()))?;

        if session.account_id != account.id {
            return Err(IdentityError::InitiatorInvalidSession(
                initiator.session_id.to_string(),
            ));
        }

        Ok(account)
    }

    /// Register a new account
    pub async fn register(&self, params: RegisterParams) -> IdentityResult<Account> {
        self.create_account(params, None).await
    }

    /// Register an account on behalf of a system admin
    pub async fn register_by_admin(
        &self,
        initiator_id: Uuid,
        params: RegisterParams,
    ) -> IdentityResult<Account> {
        let admin = self
            .store
            .get_account_by_id(initiator_id)
            .await?
            .ok_or_else(|| IdentityError::InitiatorNotFound(initiator_id.to_string()))?;

        if !admin.is_active() {
            return Err(IdentityError::InitiatorNotActive(admin.id.to_string()));
        }

        if !admin.is_admin() {
            return Err(IdentityError::NotEnoughRights(format!(
                "account {} cannot register accounts",
                admin.id
            )));
        }

        self.create_account(params, Some(admin.id)).await
    }

    async fn create_account(
        &self,
        params: RegisterParams,
        admin_id: Option<Uuid>,
    ) -> IdentityResult<Account> {
        let params = params.normalized()?;

        if self.store.get_account_by_email(&params.email).await?.is_some() {
            return Err(IdentityError::EmailAlreadyExist(params.email));
        }

        if self
            .store
            .get_account_by_username(&params.username)
            .await?
            .is_some()
        {
            return Err(IdentityError::UsernameAlreadyTaken(params.username));
        }

        let role = Role::parse(&params.role)?;

        policy::validate_password(&params.password)?;
        policy::validate_username(&params.username)?;

        let hash = policy::hash_password(&params.password)?;
        let now = self.clock.now();

        let account = Account {
            id: Uuid::new_v4(),
            username: params.username,
            role,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
            username_changed_at: None,
        };
        let password = AccountPassword {
            account_id: account.id,
            hash,
            created_at: now,
            updated_at: now,
            changed_at: None,
        };
        let email = AccountEmail {
            account_id: account.id,
            email: params.email,
            verified: false,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.create_account(&account).await?;
        tx.create_account_password(&password).await?;
        tx.create_account_email(&email).await?;

        let created = AccountEvent::Created {
            account_id: account.id,
            username: account.username.clone(),
            role,
            email: email.email.clone(),
        };
        self.stage(tx.as_mut(), &created).await?;

        if let Some(admin_id) = admin_id {
            let by_admin = AccountEvent::CreatedByAdmin {
                account_id: account.id,
                username: account.username.clone(),
                role,
                email: email.email.clone(),
                admin_id,
            };
            self.stage(tx.as_mut(), &by_admin).await?;
        }

        tx.commit().await?;

        metrics::record_registration(if admin_id.is_some() { "admin" } else { "self" });
        info!(
            account_id = %account.id,
            role = role.as_str(),
            "Account created"
        );

        Ok(account)
    }

    /// Get account by id
    pub async fn get_account_by_id(&self, account_id: Uuid) -> IdentityResult<Account> {
        self.store
            .get_account_by_id(account_id)
            .await?
            .ok_or_else(|| IdentityError::AccountNotFound(account_id.to_string()))
    }

    /// Get account by email
    pub async fn get_account_by_email(&self, email: &str) -> IdentityResult<Account> {
        let email = normalize_email(email);
        self.store
            .get_account_by_email(&email)
            .await?
            .ok_or_else(|| IdentityError::AccountNotFound(email.clone()))
    }

    /// Get account by username
    pub async fn get_account_by_username(&self, username: &str) -> IdentityResult<Account> {
        self.store
            .get_account_by_username(username)
            .await?
            .ok_or_else(|| IdentityError::AccountNotFound(username.to_string()))
    }

    pub async fn account_exists_by_email(&self, email: &str) -> IdentityResult<bool> {
        Ok(self
            .store
            .get_account_by_email(&normalize_email(email))
            .await?
            .is_some())
    }

    pub async fn account_exists_by_username(&self, username: &str) -> IdentityResult<bool> {
        Ok(self.store.get_account_by_username(username).await?.is_some())
    }

    /// Mark an email verified. Called by the verification consumer.
    pub async fn verify_email(&self, email: &str) -> IdentityResult<AccountEmail> {
        let account = self.get_account_by_email(email).await?;

        let email = normalize_email(email);
        if !self.store.set_email_verified(&email, self.clock.now()).await? {
            return Err(IdentityError::AccountEmailNotFound(email));
        }

        debug!(account_id = %account.id, "Email verified");

        self.store
            .get_account_email(account.id)
            .await?
            .ok_or_else(|| IdentityError::AccountEmailNotFound(account.id.to_string()))
    }

    /// Email record of the initiator
    pub async fn get_own_email(&self, initiator: &Initiator) -> IdentityResult<AccountEmail> {
        let account = self.validate_session(initiator).await?;

        self.store
            .get_account_email(account.id)
            .await?
            .ok_or_else(|| IdentityError::AccountEmailNotFound(account.id.to_string()))
    }

    /// Delete the initiator's account with everything it owns
    pub async fn delete_own_account(&self, initiator: &Initiator) -> IdentityResult<()> {
        let account = self.validate_session(initiator).await?;

        if self.store.account_has_org_membership(account.id).await? {
            return Err(IdentityError::AccountHasMembershipInOrg(account.id.to_string()));
        }

        let mut tx = self.store.begin().await?;
        let revoked = tx.delete_account_sessions(account.id).await?;
        tx.delete_account(account.id).await?;
        self.stage(tx.as_mut(), &AccountEvent::Deleted { account_id: account.id })
            .await?;
        tx.commit().await?;

        metrics::record_sessions_revoked("account_deleted", revoked);
        info!(account_id = %account.id, "Account deleted");

        Ok(())
    }

    /// Change account status; leaving `active` revokes every session
    pub async fn set_account_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
    ) -> IdentityResult<Account> {
        let mut tx = self.store.begin().await?;
        if !tx
            .update_account_status(account_id, status, self.clock.now())
            .await?
        {
            return Err(IdentityError::AccountNotFound(account_id.to_string()));
        }

        let revoked = if status != AccountStatus::Active {
            tx.delete_account_sessions(account_id).await?
        } else {
            0
        };
        tx.commit().await?;

        metrics::record_sessions_revoked("account_status", revoked);

        info!(account_id = %account_id, status = status.as_str(), "Account status changed");

        self.get_account_by_id(account_id).await
    }

    /// Replicate an organization membership reported by the organization service
    pub async fn record_org_member(
        &self,
        member_id: Uuid,
        account_id: Uuid,
        organization_id: Uuid,
    ) -> IdentityResult<OrgMember> {
        let account = self.get_account_by_id(account_id).await?;

        let member = OrgMember {
            id: member_id,
            account_id: account.id,
            organization_id,
            created_at: self.clock.now(),
        };
        let stored = self.store.create_org_member(&member).await?;

        debug!(
            account_id = %account.id,
            organization_id = %organization_id,
            member_id = %stored.id,
            "Org membership recorded"
        );

        Ok(stored)
    }

    /// Drop a replicated membership; `false` when it was not known
    pub async fn remove_org_member(&self, member_id: Uuid) -> IdentityResult<bool> {
        self.store.delete_org_member(member_id).await
    }

    /// Stage an event in the caller's transaction
    pub(super) async fn stage(
        &self,
        tx: &mut dyn StoreTx,
        event: &AccountEvent,
    ) -> IdentityResult<()> {
        tx.emit(&self.producer.envelope(event, self.clock.now())).await
    }
}
