//! Signed-ID issuance and verification.
//!
//! Clients render optimistically under IDs they obtained ahead of time. To
//! keep them from injecting messages under arbitrary IDs, every
//! client-proposed ID carries an HMAC-SHA-256 signature minted by the server
//! and checked before the store accepts it.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on IDs handed out per request; bounds pre-fetch abuse.
pub const MAX_BATCH: usize = 3;

/// An `(id, signature)` capability pair. The signature proves the id was
/// minted here; it is consumed once, when a thread or message is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedId {
    pub id: String,
    pub signature: String,
}

#[derive(Debug, Error)]
pub enum IdError {
    #[error("requested {requested} ids, maximum per batch is {max}")]
    TooManyRequested { requested: usize, max: usize },

    #[error("id signature mismatch")]
    InvalidSignature,
}

/// Server-side issuer. Holds the signing secret; cheap to clone.
#[derive(Clone)]
pub struct IdIssuer {
    secret: Vec<u8>,
}

impl IdIssuer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Issue `count` signed ids, failing when `count` exceeds [`MAX_BATCH`].
    pub fn issue(&self, count: usize) -> Result<Vec<SignedId>, IdError> {
        if count > MAX_BATCH {
            return Err(IdError::TooManyRequested {
                requested: count,
                max: MAX_BATCH,
            });
        }
        Ok((0..count)
            .map(|_| {
                let id = self.mint_id();
                let signature = self.sign(&id);
                SignedId { id, signature }
            })
            .collect())
    }

    /// A random, URL-safe id with 128 bits of entropy. Unsigned; used for
    /// server-minted identifiers (threads, stream ids) that never round-trip
    /// through a client.
    pub fn mint_id(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn sign(&self, id: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(id.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time signature check, via the MAC's own tag comparison.
    pub fn verify(&self, id: &str, signature: &str) -> bool {
        let Ok(expected) = STANDARD.decode(signature) else {
            return false;
        };
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(id.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// [`verify`](Self::verify) as a `Result`, for `?` at store boundaries.
    pub fn require_valid(&self, signed: &SignedId) -> Result<(), IdError> {
        if self.verify(&signed.id, &signed.signature) {
            Ok(())
        } else {
            Err(IdError::InvalidSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> IdIssuer {
        IdIssuer::new(b"test-secret")
    }

    #[test]
    fn test_issued_ids_verify() {
        let issuer = issuer();
        for signed in issuer.issue(3).unwrap() {
            assert!(issuer.verify(&signed.id, &signed.signature));
            assert!(issuer.require_valid(&signed).is_ok());
        }
    }

    #[test]
    fn test_batch_ceiling() {
        let err = issuer().issue(4).unwrap_err();
        assert!(matches!(
            err,
            IdError::TooManyRequested { requested: 4, max: 3 }
        ));
    }

    #[test]
    fn test_ids_are_distinct_and_url_safe() {
        let ids = issuer().issue(3).unwrap();
        assert_ne!(ids[0].id, ids[1].id);
        assert_ne!(ids[1].id, ids[2].id);
        for signed in &ids {
            assert!(signed
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn test_mutated_id_fails_verification() {
        let issuer = issuer();
        let signed = issuer.issue(1).unwrap().remove(0);

        let mut id_bytes = signed.id.into_bytes();
        id_bytes[0] ^= 0x01;
        let mutated = String::from_utf8(id_bytes).unwrap();
        assert!(!issuer.verify(&mutated, &signed.signature));
    }

    #[test]
    fn test_mutated_signature_fails_verification() {
        let issuer = issuer();
        let signed = issuer.issue(1).unwrap().remove(0);

        let mut raw = STANDARD.decode(&signed.signature).unwrap();
        raw[0] ^= 0x01;
        let mutated = STANDARD.encode(raw);
        assert!(!issuer.verify(&signed.id, &mutated));
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let issuer = issuer();
        let signed = issuer.issue(1).unwrap().remove(0);
        assert!(!issuer.verify(&signed.id, "not base64 ???"));
        assert!(!issuer.verify(&signed.id, ""));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signed = issuer().issue(1).unwrap().remove(0);
        let other = IdIssuer::new(b"another-secret");
        assert!(!other.verify(&signed.id, &signed.signature));
    }
}
