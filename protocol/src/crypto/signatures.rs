//! # Digital Signatures
//!
//! ECDSA (secp256k1) signing and verification — the backbone of
//! authentication in meshchain.
//!
//! Every transaction is authenticated with an ECDSA signature over its
//! canonical signable form. This module provides the signing and
//! verification functions that make that possible.
//!
//! ## Why not just use `k256` directly everywhere?
//!
//! We could, and in a couple of places we do. But wrapping the operations
//! gives us:
//!
//! 1. A single place to audit all signing operations.
//! 2. Consistent error types across the codebase.
//! 3. Type safety — you can't accidentally pass a hash where a message goes.
//!
//! ## Strictness
//!
//! Signing uses RFC 6979 deterministic nonces (`k256`'s default), so a
//! given key signing a given message always produces the same signature.
//! No nonce-reuse bugs possible.

use thiserror::Error;

use super::keys::{Keypair, PublicKey, Signature};

/// Errors during signature operations.
///
/// Intentionally vague — we don't tell attackers why verification failed.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature bytes")]
    InvalidSignatureBytes,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Sign a message using a meshchain keypair.
///
/// Produces a 64-byte ECDSA signature over the given message bytes, using
/// RFC 6979 deterministic nonces — signing the same message with the same
/// key always produces the same signature.
///
/// # Example
///
/// ```
/// use meshchain_protocol::crypto::{Keypair, sign, verify};
///
/// let keypair = Keypair::generate();
/// let message = b"send 100 to alice";
/// let signature = sign(&keypair, message);
///
/// assert!(verify(&keypair.public_key(), message, &signature));
/// ```
pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verify an ECDSA signature against a public key and message.
///
/// Returns `true` if the signature is valid, `false` otherwise. We
/// intentionally don't distinguish between "invalid signature" and "wrong
/// public key" — both are just "nope."
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature)
}

/// Verify a signature using raw byte components.
///
/// This is the "I got these bytes off the wire and need to check them"
/// variant. Parses the public key and signature bytes, then verifies.
pub fn verify_raw(
    public_key_bytes: &[u8; 33],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), SignatureError> {
    let public_key = PublicKey::from_bytes(*public_key_bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
    let signature = Signature::from_hex(&hex::encode(signature_bytes))
        .map_err(|_| SignatureError::InvalidSignatureBytes)?;

    if public_key.verify(message, &signature) {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}

/// Sign a message and return the signature as raw bytes.
///
/// Convenience function for building wire-format messages where the
/// signature needs to land directly as bytes rather than round-tripping
/// through the typed wrapper.
pub fn sign_to_bytes(keypair: &Keypair, message: &[u8]) -> Vec<u8> {
    sign(keypair, message).as_bytes().to_vec()
}

/// Batch-verify multiple signatures.
///
/// All signatures must be valid for this to return `Ok`. If any single
/// signature fails, the entire batch fails — we don't tell you which one.
/// If you need to know which one is bad, verify them individually.
pub fn batch_verify(items: &[(PublicKey, Vec<u8>, Signature)]) -> Result<(), SignatureError> {
    for (pubkey, message, signature) in items {
        if !verify(pubkey, message, signature) {
            return Err(SignatureError::VerificationFailed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_sign_and_verify() {
        let kp = Keypair::generate();
        let msg = b"hello, world";
        let sig = sign(&kp, msg);
        assert!(verify(&kp.public_key(), msg, &sig));
    }

    #[test]
    fn test_wrong_message_fails() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"correct message");
        assert!(!verify(&kp.public_key(), b"wrong message", &sig));
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let msg = b"test message";
        let sig = sign(&kp1, msg);
        assert!(!verify(&kp2.public_key(), msg, &sig));
    }

    #[test]
    fn test_deterministic_signatures() {
        // RFC 6979: same key + same message always yields the same signature.
        let kp = Keypair::generate();
        let msg = b"determinism is underrated";
        let sig1 = sign(&kp, msg);
        let sig2 = sign(&kp, msg);
        assert_eq!(sig1.as_bytes(), sig2.as_bytes());
    }

    #[test]
    fn test_sign_to_bytes_roundtrip() {
        let kp = Keypair::generate();
        let msg = b"bytes go in, bytes come out";
        let sig_bytes = sign_to_bytes(&kp, msg);

        let pk_bytes = kp.public_key_bytes();
        assert!(verify_raw(&pk_bytes, msg, &sig_bytes).is_ok());
    }

    #[test]
    fn test_verify_raw_with_invalid_pubkey() {
        // The all-zero placeholder is not a valid secp256k1 point.
        let bad_pk = [0u8; 33];
        let msg = b"doesn't matter";
        let sig = [0u8; 64];
        assert!(verify_raw(&bad_pk, msg, &sig).is_err());
    }

    #[test]
    fn test_empty_message() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"");
        assert!(verify(&kp.public_key(), b"", &sig));
    }

    #[test]
    fn test_large_message() {
        let kp = Keypair::generate();
        let msg = vec![0xAB; 1_000_000];
        let sig = sign(&kp, &msg);
        assert!(verify(&kp.public_key(), &msg, &sig));
    }

    #[test]
    fn test_batch_verify_success() {
        let items: Vec<(PublicKey, Vec<u8>, Signature)> = (0..10)
            .map(|i| {
                let kp = Keypair::generate();
                let msg = format!("message number {}", i).into_bytes();
                let sig = sign(&kp, &msg);
                (kp.public_key(), msg, sig)
            })
            .collect();

        assert!(batch_verify(&items).is_ok());
    }

    #[test]
    fn test_batch_verify_one_bad_apple() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();

        let msg1 = b"valid".to_vec();
        let sig1 = sign(&kp1, &msg1);

        let msg2 = b"also valid".to_vec();
        let sig2 = sign(&kp2, &msg2);

        // Swap the public key on the second one to make it invalid.
        let items = vec![
            (kp1.public_key(), msg1, sig1),
            (kp1.public_key(), msg2, sig2),
        ];

        assert!(batch_verify(&items).is_err());
    }

    #[test]
    fn test_batch_verify_empty() {
        assert!(batch_verify(&[]).is_ok());
    }
}
