//! Signed session cookies for magic authentication.
//!
//! A session token binds an identity to its issue time with HMAC-SHA256.
//! Verification is stateless: any process holding the secret can check a
//! token, and a token minted under another secret never validates.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a session cookie stays valid after it was issued (7 days).
pub const COOKIE_LIFETIME_SECS: i64 = 86_400 * 7;

const FIELD_DELIMITER: char = '|';

/// Session cookie decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("Token is not valid base64 text")]
    InvalidEncoding,
    #[error("Invalid token format")]
    InvalidFormat,
    #[error("Token signature mismatch")]
    SignatureMismatch,
    #[error("Token expired")]
    Expired,
    #[error("Invalid secret key")]
    InvalidKey,
}

/// A decoded, verified session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// The authenticated email address.
    pub identity: String,
    /// Unix timestamp (seconds) at which the cookie was minted.
    pub issued_at: i64,
    /// Hex-encoded HMAC over `identity|issued_at`.
    pub signature: String,
}

/// Encodes and verifies session tokens under a fixed secret and lifetime.
#[derive(Clone)]
pub struct SignedCookieCodec {
    secret: Vec<u8>,
    lifetime_secs: i64,
}

impl std::fmt::Debug for SignedCookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedCookieCodec")
            .field("lifetime_secs", &self.lifetime_secs)
            .finish_non_exhaustive()
    }
}

impl SignedCookieCodec {
    /// Create a codec with the default 7 day lifetime.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            lifetime_secs: COOKIE_LIFETIME_SECS,
        }
    }

    /// Override the cookie lifetime.
    pub fn with_lifetime(mut self, lifetime_secs: i64) -> Self {
        self.lifetime_secs = lifetime_secs;
        self
    }

    /// Lifetime in seconds.
    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_secs
    }

    /// Mint a token for `identity`, issued now.
    pub fn encode(&self, identity: &str) -> Result<String, CookieError> {
        self.encode_at(identity, Utc::now().timestamp())
    }

    /// Mint a token for `identity` with an explicit issue time.
    pub fn encode_at(&self, identity: &str, issued_at: i64) -> Result<String, CookieError> {
        let signature = sign_data(&signed_payload(identity, issued_at), &self.secret)?;
        let raw = format!(
            "{}{}{}{}{}",
            identity, FIELD_DELIMITER, issued_at, FIELD_DELIMITER, signature
        );
        Ok(STANDARD.encode(raw))
    }

    /// Decode and verify a token against the current time.
    pub fn decode(&self, token: &str) -> Result<SessionCookie, CookieError> {
        self.decode_at(token, Utc::now().timestamp())
    }

    /// Decode and verify a token as of `now` (unix seconds).
    pub fn decode_at(&self, token: &str, now: i64) -> Result<SessionCookie, CookieError> {
        let decoded = STANDARD
            .decode(token.trim())
            .map_err(|_| CookieError::InvalidEncoding)?;
        let decoded = String::from_utf8(decoded).map_err(|_| CookieError::InvalidEncoding)?;

        let parts: Vec<&str> = decoded.split(FIELD_DELIMITER).collect();
        let [identity, timestamp, signature] = parts.as_slice() else {
            return Err(CookieError::InvalidFormat);
        };
        let issued_at = timestamp
            .parse::<i64>()
            .map_err(|_| CookieError::InvalidFormat)?;

        let expected = sign_data(&signed_payload(identity, issued_at), &self.secret)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(CookieError::SignatureMismatch);
        }

        if now.saturating_sub(issued_at) > self.lifetime_secs {
            return Err(CookieError::Expired);
        }

        Ok(SessionCookie {
            identity: identity.to_string(),
            issued_at,
            signature: signature.to_string(),
        })
    }
}

fn signed_payload(identity: &str, issued_at: i64) -> String {
    format!("{}{}{}", identity, FIELD_DELIMITER, issued_at)
}

/// Sign data using HMAC-SHA256.
fn sign_data(data: &str, secret: &[u8]) -> Result<String, CookieError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CookieError::InvalidKey)?;
    mac.update(data.as_bytes());
    let result = mac.finalize();
    Ok(hex::encode(result.into_bytes()))
}

/// Generate a random 32-byte secret.
pub fn generate_secret() -> Vec<u8> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0u8; 32];
    rng.fill(&mut bytes[..]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> SignedCookieCodec {
        SignedCookieCodec::new(b"0123456789abcdef0123456789abcdef")
    }

    fn raw_parts(token: &str) -> Vec<String> {
        let decoded = String::from_utf8(STANDARD.decode(token).unwrap()).unwrap();
        decoded.split('|').map(str::to_string).collect()
    }

    #[test]
    fn test_roundtrip() {
        let codec = codec();
        for identity in ["user@example.com", "Mixed.Case+tag@sub.example.org", ""] {
            let token = codec.encode(identity).unwrap();
            let cookie = codec.decode(&token).unwrap();
            assert_eq!(cookie.identity, identity);
        }
    }

    #[test]
    fn test_wrong_secret() {
        let token = codec().encode_at("user@example.com", NOW).unwrap();
        let other = SignedCookieCodec::new(generate_secret());
        assert_eq!(
            other.decode_at(&token, NOW),
            Err(CookieError::SignatureMismatch)
        );
    }

    #[test]
    fn test_flipped_signature_byte_is_rejected() {
        let codec = codec();
        let token = codec.encode_at("user@example.com", NOW).unwrap();
        let parts = raw_parts(&token);
        let signature = parts[2].as_bytes();

        for i in 0..signature.len() {
            let mut tampered = signature.to_vec();
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let raw = format!(
                "{}|{}|{}",
                parts[0],
                parts[1],
                String::from_utf8(tampered).unwrap()
            );
            let forged = STANDARD.encode(raw);
            assert_eq!(
                codec.decode_at(&forged, NOW),
                Err(CookieError::SignatureMismatch),
                "byte {} flip accepted",
                i
            );
        }
    }

    #[test]
    fn test_uppercased_signature_is_rejected() {
        let codec = codec();
        let token = codec.encode_at("user@example.com", NOW).unwrap();
        let parts = raw_parts(&token);
        let forged = STANDARD.encode(format!(
            "{}|{}|{}",
            parts[0],
            parts[1],
            parts[2].to_uppercase()
        ));
        assert!(codec.decode_at(&forged, NOW).is_err());
    }

    #[test]
    fn test_expiry_boundary() {
        let codec = codec();
        let token = codec.encode_at("user@example.com", NOW).unwrap();

        assert!(codec.decode_at(&token, NOW + COOKIE_LIFETIME_SECS).is_ok());
        assert_eq!(
            codec.decode_at(&token, NOW + COOKIE_LIFETIME_SECS + 1),
            Err(CookieError::Expired)
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = codec();
        assert_eq!(
            codec.decode_at("%%%not-base64", NOW),
            Err(CookieError::InvalidEncoding)
        );
        assert_eq!(
            codec.decode_at(&STANDARD.encode("only|two"), NOW),
            Err(CookieError::InvalidFormat)
        );
        assert_eq!(
            codec.decode_at(&STANDARD.encode("a|b|c|d"), NOW),
            Err(CookieError::InvalidFormat)
        );
        assert_eq!(
            codec.decode_at(&STANDARD.encode("a@b.com|soon|sig"), NOW),
            Err(CookieError::InvalidFormat)
        );
        assert_eq!(codec.decode_at("", NOW), Err(CookieError::InvalidFormat));
    }

    #[test]
    fn test_identity_with_delimiter_never_validates() {
        let codec = codec();
        let token = codec.encode_at("a|b@example.com", NOW).unwrap();
        assert_eq!(codec.decode_at(&token, NOW), Err(CookieError::InvalidFormat));
    }
}
