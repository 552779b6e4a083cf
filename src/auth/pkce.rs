//! PKCE verifier/challenge generation and random protocol tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// 32 random bytes encode to a 43-character verifier, the RFC 7636 minimum.
const VERIFIER_BYTES: usize = 32;
const RANDOM_TOKEN_BYTES: usize = 32;

/// A PKCE verifier and its S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a fresh verifier and its challenge.
///
/// Fails with [`AuthError::CryptoUnavailable`] when the OS random source
/// cannot be read; there is no fallback to a weaker generator.
pub fn generate_challenge() -> Result<PkceChallenge, AuthError> {
    let verifier = URL_SAFE_NO_PAD.encode(secure_random_bytes(VERIFIER_BYTES)?);
    let challenge = compute_code_challenge(&verifier);
    Ok(PkceChallenge {
        verifier,
        challenge,
    })
}

/// `base64url(SHA-256(verifier))`.
pub fn compute_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// URL-safe random token used for `state` and `nonce`.
pub fn random_token() -> Result<String, AuthError> {
    Ok(URL_SAFE_NO_PAD.encode(secure_random_bytes(RANDOM_TOKEN_BYTES)?))
}

fn secure_random_bytes(len: usize) -> Result<Vec<u8>, AuthError> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|err| AuthError::CryptoUnavailable(err.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_meets_length_bounds() {
        let pkce = generate_challenge().unwrap();
        assert!(pkce.verifier.len() >= 43);
        assert!(pkce.verifier.len() <= 128);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636.
        assert_eq!(
            compute_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_is_derived_from_verifier() {
        let pkce = generate_challenge().unwrap();
        assert_eq!(pkce.challenge, compute_code_challenge(&pkce.verifier));
    }

    #[test]
    fn random_tokens_are_independent() {
        let a = random_token().unwrap();
        let b = random_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }
}
