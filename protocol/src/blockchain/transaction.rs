//! # Transaction
//!
//! A transfer of value between two addresses, where an address *is* a
//! 33-byte compressed secp256k1 public key — there is no separate
//! address-derivation step.
//!
//! The canonical signable form is the ASCII string
//! `"<sender_hex>,<receiver_hex>,<nonce>,<amount>"`; the wire form appends
//! `,<signature_hex>`. A transaction's hash is the SHA-256 of its wire
//! form, so signing a transaction and then mutating any field changes its
//! hash — there is no way to "re-sign in place."

use thiserror::Error;

use crate::crypto::{Keypair, PublicKey, Signature};

/// Errors from transaction construction, (de)serialisation, and validation.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("malformed transaction wire form: expected 5 comma-separated fields, got {0}")]
    MalformedWireForm(usize),

    #[error("invalid hex in transaction field {field}: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("invalid integer in transaction field {field}: {source}")]
    InvalidInteger {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid public key in transaction field {field}: {source}")]
    InvalidPublicKey {
        field: &'static str,
        #[source]
        source: crate::crypto::keys::KeyError,
    },
}

/// A signed transfer of `amount` from `sender` to `receiver`, sequenced by
/// `nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: PublicKey,
    pub receiver: PublicKey,
    pub nonce: u64,
    pub amount: u64,
    pub signature: Signature,
}

impl Transaction {
    /// Builds and signs a transaction in one step.
    pub fn new_signed(sender: &Keypair, receiver: PublicKey, nonce: u64, amount: u64) -> Self {
        let mut tx = Self {
            sender: sender.public_key(),
            receiver,
            nonce,
            amount,
            signature: Signature::from_hex("").expect("empty hex string always decodes"),
        };
        tx.sign(sender);
        tx
    }

    /// The canonical signable ASCII string:
    /// `"<sender_hex>,<receiver_hex>,<nonce>,<amount>"`.
    pub fn data_to_sign(&self) -> String {
        format!(
            "{},{},{},{}",
            self.sender.to_hex(),
            self.receiver.to_hex(),
            self.nonce,
            self.amount
        )
    }

    /// Signs this transaction in place with `key`. `key`'s public key must
    /// match `self.sender` for the resulting signature to later verify —
    /// this method does not enforce that, since it's also used to produce
    /// deliberately-invalid test vectors.
    pub fn sign(&mut self, key: &Keypair) {
        self.signature = key.sign(self.data_to_sign().as_bytes());
    }

    /// Verifies the signature against `self.sender`.
    pub fn validate_signature(&self) -> bool {
        self.sender.verify(self.data_to_sign().as_bytes(), &self.signature)
    }

    /// The wire form: `data_to_sign()` with `,<signature_hex>` appended.
    pub fn serialize(&self) -> String {
        format!("{},{}", self.data_to_sign(), self.signature.to_hex())
    }

    /// Parses the wire form produced by [`Transaction::serialize`].
    pub fn deserialize(data: &str) -> Result<Self, TransactionError> {
        let parts: Vec<&str> = data.split(',').collect();
        if parts.len() != 5 {
            return Err(TransactionError::MalformedWireForm(parts.len()));
        }

        let sender = PublicKey::from_hex(parts[0]).map_err(|source| TransactionError::InvalidPublicKey {
            field: "sender",
            source,
        })?;
        let receiver = PublicKey::from_hex(parts[1]).map_err(|source| TransactionError::InvalidPublicKey {
            field: "receiver",
            source,
        })?;
        let nonce = parts[2]
            .parse()
            .map_err(|source| TransactionError::InvalidInteger { field: "nonce", source })?;
        let amount = parts[3]
            .parse()
            .map_err(|source| TransactionError::InvalidInteger { field: "amount", source })?;
        let signature = Signature::from_hex(parts[4]).map_err(|source| TransactionError::InvalidHex {
            field: "signature",
            source,
        })?;

        Ok(Self {
            sender,
            receiver,
            nonce,
            amount,
            signature,
        })
    }

    /// SHA-256 of the wire form — a transaction's stable identity for the
    /// mempool and for its `last_seen` entry.
    pub fn hash(&self) -> String {
        crate::crypto::hash::sha256_hex(self.serialize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair_from_seed(n: u8) -> Keypair {
        Keypair::from_bytes(&[n; 32]).unwrap()
    }

    #[test]
    fn sign_then_validate_succeeds() {
        let sender = keypair_from_seed(1);
        let receiver = keypair_from_seed(2).public_key();
        let tx = Transaction::new_signed(&sender, receiver, 0, 100);
        assert!(tx.validate_signature());
    }

    #[test]
    fn perturbed_sender_fails_validation() {
        let sender = keypair_from_seed(1);
        let receiver = keypair_from_seed(2).public_key();
        let mut tx = Transaction::new_signed(&sender, receiver, 0, 100);
        tx.sender = keypair_from_seed(3).public_key();
        assert!(!tx.validate_signature());
    }

    #[test]
    fn perturbed_receiver_fails_validation() {
        let sender = keypair_from_seed(1);
        let receiver = keypair_from_seed(2).public_key();
        let mut tx = Transaction::new_signed(&sender, receiver, 0, 100);
        tx.receiver = keypair_from_seed(4).public_key();
        assert!(!tx.validate_signature());
    }

    #[test]
    fn perturbed_nonce_fails_validation() {
        let sender = keypair_from_seed(1);
        let receiver = keypair_from_seed(2).public_key();
        let mut tx = Transaction::new_signed(&sender, receiver, 0, 100);
        tx.nonce = 1;
        assert!(!tx.validate_signature());
    }

    #[test]
    fn perturbed_amount_fails_validation() {
        let sender = keypair_from_seed(1);
        let receiver = keypair_from_seed(2).public_key();
        let mut tx = Transaction::new_signed(&sender, receiver, 0, 100);
        tx.amount = 101;
        assert!(!tx.validate_signature());
    }

    #[test]
    fn serialize_deserialize_round_trip_is_stable() {
        let sender = keypair_from_seed(5);
        let receiver = keypair_from_seed(6).public_key();
        let tx = Transaction::new_signed(&sender, receiver, 7, 42);
        let wire = tx.serialize();
        let parsed = Transaction::deserialize(&wire).unwrap();
        assert_eq!(parsed.serialize(), wire);
        assert_eq!(parsed, tx);
    }

    #[test]
    fn hash_is_deterministic() {
        let sender = keypair_from_seed(1);
        let receiver = keypair_from_seed(2).public_key();
        let tx = Transaction::new_signed(&sender, receiver, 0, 1);
        assert_eq!(tx.hash(), tx.hash());
        assert_eq!(tx.hash().len(), 64);
    }

    #[test]
    fn deserialize_rejects_wrong_field_count() {
        assert!(Transaction::deserialize("a,b,c").is_err());
    }

    #[test]
    fn deserialize_rejects_bad_hex() {
        assert!(Transaction::deserialize("nothex,nothex,0,0,nothex").is_err());
    }

    #[test]
    fn deserialize_rejects_bad_integers() {
        let sender = keypair_from_seed(1).public_key().to_hex();
        let receiver = keypair_from_seed(2).public_key().to_hex();
        let data = format!("{sender},{receiver},notanumber,0,ab");
        assert!(Transaction::deserialize(&data).is_err());
    }

    #[test]
    fn data_to_sign_matches_expected_ascii_form() {
        let sender = keypair_from_seed(1);
        let receiver = keypair_from_seed(2).public_key();
        let tx = Transaction::new_signed(&sender, receiver.clone(), 3, 400);
        assert_eq!(
            tx.data_to_sign(),
            format!("{},{},{},{}", sender.public_key().to_hex(), receiver.to_hex(), 3, 400)
        );
    }
}
