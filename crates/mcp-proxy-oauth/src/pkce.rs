//! Random credential generation and PKCE S256 verification.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::credentials::constant_time_eq;

/// Length of generated client identifiers.
pub const CLIENT_ID_LEN: usize = 32;
/// Length of generated client secrets.
pub const CLIENT_SECRET_LEN: usize = 48;
/// Length of generated authorization codes.
pub const AUTH_CODE_LEN: usize = 32;
/// Length of generated access and refresh tokens.
pub const TOKEN_LEN: usize = 48;

/// Generate a random base64url string of exactly `len` characters.
pub fn random_string(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(len);
    encoded
}

/// Compute the S256 challenge for a verifier: `base64url(sha256(verifier))`.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Check a verifier against a stored S256 challenge in constant time.
pub fn verify_s256(verifier: &str, challenge: &str) -> bool {
    constant_time_eq(&s256_challenge(verifier), challenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string_length_and_alphabet() {
        for len in [CLIENT_ID_LEN, CLIENT_SECRET_LEN, AUTH_CODE_LEN, TOKEN_LEN] {
            let s = random_string(len);
            assert_eq!(s.len(), len);
            assert!(
                s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
    }

    #[test]
    fn test_random_strings_differ() {
        assert_ne!(random_string(TOKEN_LEN), random_string(TOKEN_LEN));
    }

    #[test]
    fn test_s256_rfc7636_vector() {
        // RFC 7636 Appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            s256_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert!(verify_s256(verifier, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"));
        assert!(!verify_s256("wrong", "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"));
    }
}
