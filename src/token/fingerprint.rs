/// Refresh token fingerprints: HMAC-SHA256 over a domain-separated message
use crate::error::{IdentityError, IdentityResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const REFRESH_DOMAIN: &str = "refresh.";

/// Keyed one-way digest of refresh tokens
pub struct RefreshFingerprinter {
    key: Vec<u8>,
}

impl RefreshFingerprinter {
    pub fn new(key: &[u8]) -> IdentityResult<Self> {
        if key.is_empty() {
            return Err(IdentityError::Config(
                "refresh hash key cannot be empty".to_string(),
            ));
        }

        Ok(Self { key: key.to_vec() })
    }

    pub fn fingerprint(&self, raw_refresh: &str) -> IdentityResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| IdentityError::Internal(format!("Failed to init HMAC: {}", e)))?;
        mac.update(REFRESH_DOMAIN.as_bytes());
        mac.update(raw_refresh.as_bytes());

        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}

/// Constant-time equality for stored vs recomputed fingerprints
pub fn fingerprints_match(stored: &str, computed: &str) -> bool {
    stored.as_bytes().ct_eq(computed.as_bytes()).into()
}
