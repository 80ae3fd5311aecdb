/// Unified error types for the identity core
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification every error falls into.
///
/// Callers branch on the kind; the variant carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidCredential,
    NotAllowed,
    CooldownActive,
    Forbidden,
    Internal,
}

/// Main error type for identity operations
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account email not found: {0}")]
    AccountEmailNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Login failure. Unknown account and wrong password both land here.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Password is invalid")]
    PasswordInvalid,

    /// The presented refresh token is not the latest one issued for its session
    #[error("Session token mismatch")]
    SessionTokenMismatch,

    #[error("Password is not allowed: {0}")]
    PasswordNotAllowed(String),

    #[error("Username is not allowed: {0}")]
    UsernameNotAllowed(String),

    #[error("Email is not allowed: {0}")]
    EmailNotAllowed(String),

    #[error("Role is not supported: {0}")]
    RoleNotSupported(String),

    #[error("Email already exists: {0}")]
    EmailAlreadyExist(String),

    #[error("Username already taken: {0}")]
    UsernameAlreadyTaken(String),

    #[error("Password cannot be changed yet")]
    CannotChangePasswordYet,

    #[error("Username cannot be changed yet")]
    CannotChangeUsernameYet,

    #[error("Initiator not found: {0}")]
    InitiatorNotFound(String),

    #[error("Initiator is not active: {0}")]
    InitiatorNotActive(String),

    #[error("Initiator session is invalid: {0}")]
    InitiatorInvalidSession(String),

    #[error("Not enough rights: {0}")]
    NotEnoughRights(String),

    #[error("Account has membership in an organization: {0}")]
    AccountHasMembershipInOrg(String),

    /// Signature, expiry and format failures are deliberately indistinguishable
    #[error("Invalid token")]
    InvalidToken,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::AccountNotFound(_)
            | IdentityError::AccountEmailNotFound(_)
            | IdentityError::SessionNotFound(_)
            | IdentityError::InitiatorNotFound(_) => ErrorKind::NotFound,

            IdentityError::InvalidCredentials
            | IdentityError::PasswordInvalid
            | IdentityError::SessionTokenMismatch
            | IdentityError::InitiatorInvalidSession(_) => ErrorKind::InvalidCredential,

            IdentityError::PasswordNotAllowed(_)
            | IdentityError::UsernameNotAllowed(_)
            | IdentityError::EmailNotAllowed(_)
            | IdentityError::RoleNotSupported(_)
            | IdentityError::EmailAlreadyExist(_)
            | IdentityError::UsernameAlreadyTaken(_) => ErrorKind::NotAllowed,

            IdentityError::CannotChangePasswordYet | IdentityError::CannotChangeUsernameYet => {
                ErrorKind::CooldownActive
            }

            IdentityError::InitiatorNotActive(_)
            | IdentityError::NotEnoughRights(_)
            | IdentityError::AccountHasMembershipInOrg(_) => ErrorKind::Forbidden,

            IdentityError::InvalidToken
            | IdentityError::Database(_)
            | IdentityError::Internal(_)
            | IdentityError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            IdentityError::AccountEmailNotFound(_) => "ACCOUNT_EMAIL_NOT_FOUND",
            IdentityError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            IdentityError::InvalidCredentials => "INVALID_CREDENTIALS",
            IdentityError::PasswordInvalid => "PASSWORD_INVALID",
            IdentityError::SessionTokenMismatch => "SESSION_TOKEN_MISMATCH",
            IdentityError::PasswordNotAllowed(_) => "PASSWORD_IS_NOT_ALLOWED",
            IdentityError::UsernameNotAllowed(_) => "USERNAME_IS_NOT_ALLOWED",
            IdentityError::EmailNotAllowed(_) => "EMAIL_IS_NOT_ALLOWED",
            IdentityError::RoleNotSupported(_) => "ACCOUNT_ROLE_NOT_SUPPORTED",
            IdentityError::EmailAlreadyExist(_) => "EMAIL_ALREADY_EXIST",
            IdentityError::UsernameAlreadyTaken(_) => "USERNAME_ALREADY_TAKEN",
            IdentityError::CannotChangePasswordYet => "CANNOT_CHANGE_PASSWORD_YET",
            IdentityError::CannotChangeUsernameYet => "CANNOT_CHANGE_USERNAME_YET",
            IdentityError::InitiatorNotFound(_) => "INITIATOR_NOT_FOUND",
            IdentityError::InitiatorNotActive(_) => "INITIATOR_IS_NOT_ACTIVE",
            IdentityError::InitiatorInvalidSession(_) => "INITIATOR_INVALID_SESSION",
            IdentityError::NotEnoughRights(_) => "NOT_ENOUGH_RIGHTS",
            IdentityError::AccountHasMembershipInOrg(_) => "CANNOT_DELETE_ACCOUNT_ORG_MEMBER",
            IdentityError::InvalidToken
            | IdentityError::Database(_)
            | IdentityError::Internal(_)
            | IdentityError::Config(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            IdentityError::EmailAlreadyExist(_) | IdentityError::UsernameAlreadyTaken(_) => {
                StatusCode::CONFLICT
            }
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidCredential => StatusCode::UNAUTHORIZED,
                ErrorKind::NotAllowed => StatusCode::BAD_REQUEST,
                ErrorKind::CooldownActive => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(), // Don't leak details
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;
