/// Credential policy
///
/// Pure acceptability rules for passwords and usernames, change cooldowns, and
/// the slow salted hash used to store and verify passwords.
use crate::error::{IdentityError, IdentityResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;

pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 32;
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;

/// The only non-alphanumeric characters a password may contain
pub const ALLOWED_PASSWORD_SPECIALS: &str = "-.!#$%&?,@";

pub fn password_change_cooldown() -> Duration {
    Duration::days(30)
}

pub fn username_change_cooldown() -> Duration {
    Duration::days(14)
}

/// Check that a candidate password satisfies the composition rules
pub fn validate_password(candidate: &str) -> IdentityResult<()> {
    let len = candidate.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
        return Err(IdentityError::PasswordNotAllowed(format!(
            "password must be between {} and {} characters",
            PASSWORD_MIN_LEN, PASSWORD_MAX_LEN
        )));
    }

    let (mut has_upper, mut has_lower, mut has_digit, mut has_special) =
        (false, false, false, false);

    for c in candidate.chars() {
        if c.is_uppercase() {
            has_upper = true;
        } else if c.is_lowercase() {
            has_lower = true;
        } else if c.is_ascii_digit() {
            has_digit = true;
        } else if ALLOWED_PASSWORD_SPECIALS.contains(c) {
            has_special = true;
        } else {
            return Err(IdentityError::PasswordNotAllowed(format!(
                "password contains invalid character '{}'",
                c
            )));
        }
    }

    if !has_upper {
        return Err(IdentityError::PasswordNotAllowed(
            "need at least one uppercase letter".to_string(),
        ));
    }
    if !has_lower {
        return Err(IdentityError::PasswordNotAllowed(
            "need at least one lowercase letter".to_string(),
        ));
    }
    if !has_digit {
        return Err(IdentityError::PasswordNotAllowed(
            "need at least one digit".to_string(),
        ));
    }
    if !has_special {
        return Err(IdentityError::PasswordNotAllowed(format!(
            "need at least one special character from {}",
            ALLOWED_PASSWORD_SPECIALS
        )));
    }

    Ok(())
}

/// Check that a candidate username is well formed
pub fn validate_username(candidate: &str) -> IdentityResult<()> {
    let len = candidate.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(IdentityError::UsernameNotAllowed(format!(
            "username must be between {} and {} characters",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        )));
    }

    if let Some(c) = candidate
        .chars()
        .find(|c| !(c.is_alphabetic() || c.is_ascii_digit() || *c == '_' || *c == '-'))
    {
        return Err(IdentityError::UsernameNotAllowed(format!(
            "username contains invalid character '{}'",
            c
        )));
    }

    Ok(())
}

/// Allowed iff at least 30 days have passed since the last change
pub fn can_change_password(last_changed_at: DateTime<Utc>, now: DateTime<Utc>) -> IdentityResult<()> {
    if now - last_changed_at >= password_change_cooldown() {
        Ok(())
    } else {
        Err(IdentityError::CannotChangePasswordYet)
    }
}

/// Allowed iff at least 14 days have passed since the last change
pub fn can_change_username(last_changed_at: DateTime<Utc>, now: DateTime<Utc>) -> IdentityResult<()> {
    if now - last_changed_at >= username_change_cooldown() {
        Ok(())
    } else {
        Err(IdentityError::CannotChangeUsernameYet)
    }
}

/// Hash a password with Argon2id and a random salt
pub fn hash_password(password: &str) -> IdentityResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Internal(format!("Password hashing failed: {}", e)))
}

/// Compare a candidate against a stored PHC hash.
///
/// A mismatch is `PasswordInvalid`; a malformed hash or any other verifier
/// failure is `Internal`.
pub fn check_password_match(stored_hash: &str, candidate: &str) -> IdentityResult<()> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| IdentityError::Internal(format!("Invalid password hash format: {}", e)))?;

    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(()),
        Err(argon2::password_hash::Error::Password) => Err(IdentityError::PasswordInvalid),
        Err(e) => Err(IdentityError::Internal(format!(
            "Password verification failed: {}",
            e
        ))),
    }
}

lazy_static! {
    /// Stand-in hash verified when no account matches a login key
    static ref DUMMY_PASSWORD_HASH: Option<String> = hash_password("Dummy-Passw0rd!").ok();
}

/// Spend the same Argon2 work as a real verification without a stored hash.
///
/// Keeps the unknown-account login path as slow as the wrong-password path.
pub fn check_password_against_dummy(candidate: &str) {
    if let Some(hash) = DUMMY_PASSWORD_HASH.as_ref() {
        let _ = check_password_match(hash, candidate);
    }
}
