/// Token codec
///
/// Mints and verifies the access/refresh JWT pair and computes the one-way
/// fingerprint of a refresh token that sessions store in place of the token.

mod fingerprint;

pub use fingerprint::{fingerprints_match, RefreshFingerprinter};

use crate::{
    config::TokenConfig,
    db::account::{Account, Role},
    error::{IdentityError, IdentityResult},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which half of the pair a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by both access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountClaims {
    pub iss: String,
    pub aud: String,
    /// Account id
    pub sub: Uuid,
    /// Session id
    pub sid: Uuid,
    pub role: Role,
    pub typ: TokenType,
    /// Unique per token, so two tokens minted in the same second never collide
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Access/refresh pair handed to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub session_id: Uuid,
    pub access: String,
    pub refresh: String,
}

/// Signs, verifies and fingerprints account tokens
pub struct TokenCodec {
    issuer: String,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway_secs: u64,
    fingerprinter: RefreshFingerprinter,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> IdentityResult<Self> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(IdentityError::Config(
                "token signing secrets cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            issuer: config.issuer.clone(),
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: Duration::seconds(config.access_ttl_secs),
            refresh_ttl: Duration::seconds(config.refresh_ttl_secs),
            leeway_secs: config.leeway_secs,
            fingerprinter: RefreshFingerprinter::new(config.refresh_hash_key.as_bytes())?,
        })
    }

    /// Generate a short-lived access token
    pub fn generate_access(&self, account: &Account, session_id: Uuid) -> IdentityResult<String> {
        let claims = self.claims(account, session_id, TokenType::Access, self.access_ttl);

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|e| IdentityError::Internal(format!("Failed to generate access token: {}", e)))
    }

    /// Generate a long-lived refresh token
    pub fn generate_refresh(&self, account: &Account, session_id: Uuid) -> IdentityResult<String> {
        let claims = self.claims(account, session_id, TokenType::Refresh, self.refresh_ttl);

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .map_err(|e| IdentityError::Internal(format!("Failed to generate refresh token: {}", e)))
    }

    /// Mint both halves of a pair scoped to one session
    pub fn issue_pair(&self, account: &Account, session_id: Uuid) -> IdentityResult<TokenPair> {
        Ok(TokenPair {
            session_id,
            access: self.generate_access(account, session_id)?,
            refresh: self.generate_refresh(account, session_id)?,
        })
    }

    pub fn parse_access_claims(&self, token: &str) -> IdentityResult<AccountClaims> {
        self.verify(token, &self.access_decoding, TokenType::Access)
    }

    pub fn parse_refresh_claims(&self, token: &str) -> IdentityResult<AccountClaims> {
        self.verify(token, &self.refresh_decoding, TokenType::Refresh)
    }

    /// One-way fingerprint of a raw refresh token, safe to store
    pub fn fingerprint_refresh(&self, raw_refresh: &str) -> IdentityResult<String> {
        self.fingerprinter.fingerprint(raw_refresh)
    }

    fn claims(
        &self,
        account: &Account,
        session_id: Uuid,
        typ: TokenType,
        ttl: Duration,
    ) -> AccountClaims {
        let now = Utc::now();
        AccountClaims {
            iss: self.issuer.clone(),
            aud: self.issuer.clone(),
            sub: account.id,
            sid: session_id,
            role: account.role,
            typ,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    fn verify(
        &self,
        token: &str,
        key: &DecodingKey,
        expected: TokenType,
    ) -> IdentityResult<AccountClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = self.leeway_secs;

        // Expired, forged and garbled tokens all collapse into one error
        let data = decode::<AccountClaims>(token, key, &validation).map_err(|e| {
            tracing::debug!("Token verification failed: {}", e);
            IdentityError::InvalidToken
        })?;

        if data.claims.typ != expected {
            tracing::debug!("Token type mismatch: expected {:?}", expected);
            return Err(IdentityError::InvalidToken);
        }

        Ok(data.claims)
    }
}
