//! Credential verification for authenticated joins.
//!
//! Credentials are presented only on join events; connections themselves
//! are established without one (the anonymous flow is first-class). The
//! verifier is a collaborator boundary: the default implementation checks
//! HMAC-signed tokens locally, but a remote auth service can stand in
//! without touching the connection handling.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Lifetime of an issued credential (12 hours).
const CREDENTIAL_TTL_SECS: u64 = 12 * 60 * 60;

/// Errors from credential verification.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Malformed, tampered, or expired credential. Rejects only the join
    /// attempt that presented it; the connection stays live.
    #[error("invalid credential")]
    Invalid,
}

/// Verifies a join-time credential, resolving the user id it binds.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<String, CredentialError>;
}

/// Derives a 32-byte HMAC key from the configured credential secret.
/// Uses SHA-256 with a domain-separation prefix so the derived key is
/// independent of any other use of the secret.
pub fn derive_credential_secret(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"solace-credential-v1:");
    hasher.update(secret.as_bytes());
    let result = hasher.finalize();
    let mut derived = [0u8; 32];
    derived.copy_from_slice(&result);
    derived
}

/// HMAC-SHA256 credential verifier.
///
/// Credential format: `base64(user_id|expires_unix_secs|hmac_signature)`.
/// The signature binds the user id to a time window, preventing both
/// impersonation (different user id) and replay (after expiry).
#[derive(Clone)]
pub struct HmacCredentialVerifier {
    secret: [u8; 32],
}

impl HmacCredentialVerifier {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Issues a signed credential for `user_id`, valid for
    /// [`CREDENTIAL_TTL_SECS`]. The account system calls this after its own
    /// login flow; tests use it directly.
    pub fn issue_credential(&self, user_id: &str) -> String {
        let expires = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + CREDENTIAL_TTL_SECS;

        let payload = format!("{}|{}", user_id, expires);

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC key length is valid");
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        use base64::Engine;
        let token = format!("{}|{}", payload, hex::encode(signature));
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token.as_bytes())
    }
}

impl CredentialVerifier for HmacCredentialVerifier {
    fn verify(&self, credential: &str) -> Result<String, CredentialError> {
        use base64::Engine;

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(credential.as_bytes())
            .map_err(|_| CredentialError::Invalid)?;

        let token = String::from_utf8(decoded).map_err(|_| CredentialError::Invalid)?;

        // Parse: user_id|expires|signature_hex
        let parts: Vec<&str> = token.splitn(3, '|').collect();
        if parts.len() != 3 {
            return Err(CredentialError::Invalid);
        }

        let user_id = parts[0];
        let expires_str = parts[1];
        let sig_hex = parts[2];

        let payload = format!("{}|{}", user_id, expires_str);
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC key length is valid");
        mac.update(payload.as_bytes());
        let expected_sig = mac.finalize().into_bytes();
        let provided_sig = hex::decode(sig_hex).map_err(|_| CredentialError::Invalid)?;

        if expected_sig.as_slice() != provided_sig.as_slice() {
            return Err(CredentialError::Invalid);
        }

        let expires: u64 = expires_str.parse().map_err(|_| CredentialError::Invalid)?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        if now > expires {
            return Err(CredentialError::Invalid);
        }

        Ok(user_id.to_string())
    }
}
