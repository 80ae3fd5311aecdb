/// Account database models
use crate::error::{IdentityError, IdentityResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// System role of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemUser,
    SystemAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SystemUser => "system_user",
            Role::SystemAdmin => "system_admin",
        }
    }

    /// Parse a role name; the short forms `user` and `admin` are accepted too
    pub fn parse(s: &str) -> IdentityResult<Self> {
        match s.to_lowercase().as_str() {
            "system_user" | "user" => Ok(Role::SystemUser),
            "system_admin" | "admin" => Ok(Role::SystemAdmin),
            _ => Err(IdentityError::RoleNotSupported(s.to_string())),
        }
    }
}

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Deactivated,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Deactivated => "deactivated",
            AccountStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> IdentityResult<Self> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "deactivated" => Ok(AccountStatus::Deactivated),
            "suspended" => Ok(AccountStatus::Suspended),
            _ => Err(IdentityError::Internal(format!(
                "Unrecognized account status: {}",
                s
            ))),
        }
    }
}

/// Account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on the first username change; `None` means never changed
    pub username_changed_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Only active accounts may authenticate or mutate themselves
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::SystemAdmin
    }
}

/// Password credential, one per account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPassword {
    pub account_id: Uuid,
    #[serde(skip_serializing)]
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on the first password change; `None` means never changed
    pub changed_at: Option<DateTime<Utc>>,
}

/// Email record, one per account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEmail {
    pub account_id: Uuid,
    pub email: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authenticated device/client binding.
///
/// The stored refresh fingerprint never leaves the store layer except through
/// `AccountStore::get_session_fingerprint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Replicated organization membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgMember {
    pub id: Uuid,
    pub account_id: Uuid,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One page of a paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("user").unwrap(), Role::SystemUser);
        assert_eq!(Role::parse("system_admin").unwrap(), Role::SystemAdmin);
        assert_eq!(Role::parse("ADMIN").unwrap(), Role::SystemAdmin);
        assert!(matches!(
            Role::parse("moderator"),
            Err(IdentityError::RoleNotSupported(_))
        ));
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Deactivated,
            AccountStatus::Suspended,
        ] {
            assert_eq!(AccountStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(AccountStatus::parse("banned").is_err());
    }
}
