//! The seam between the ledger and whatever holds private keys.
//!
//! The ledger never creates keys. It is handed a [`SignatureVerifier`] and
//! asks it whether a transfer was authorized by its sender.

use super::transaction::Transaction;
use crate::error::Result;
use crate::utils::{
    address_from_public_key, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    public_key_from_pkcs8,
};

pub trait SignatureVerifier: Send + Sync {
    /// `message` is the transaction hash. Implementations must also check
    /// that `public_key` belongs to `sender`.
    fn verify(&self, sender: &str, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// ECDSA P-256 / SHA-256 with Base58Check addresses derived from the public key.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcdsaP256Verifier;

impl SignatureVerifier for EcdsaP256Verifier {
    fn verify(&self, sender: &str, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        if address_from_public_key(public_key) != sender {
            return false;
        }
        ecdsa_p256_sha256_sign_verify(public_key, signature, message)
    }
}

/// Signs transfers with a PKCS#8 key supplied by the caller.
pub struct Signer {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
    address: String,
}

impl Signer {
    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Signer> {
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        let address = address_from_public_key(&public_key);
        Ok(Signer {
            pkcs8,
            public_key,
            address,
        })
    }

    pub fn address(&self) -> &str {
        self.address.as_str()
    }

    pub fn public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn sign(&self, mut tx: Transaction) -> Result<Transaction> {
        let signature = ecdsa_p256_sha256_sign_digest(&self.pkcs8, &tx.hash())?;
        tx.set_signature(signature);
        Ok(tx)
    }

    /// Builds and signs a transfer from this signer's address.
    pub fn transfer(
        &self,
        recipient: &str,
        amount: u64,
        nonce: u64,
        timestamp: i64,
    ) -> Result<Transaction> {
        self.sign(Transaction::new_transfer(
            &self.address,
            recipient,
            amount,
            nonce,
            timestamp,
            &self.public_key,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::new_key_pair;

    #[test]
    fn test_verifier_checks_address_binding() {
        let alice = Signer::from_pkcs8(new_key_pair().unwrap()).unwrap();
        let mallory = Signer::from_pkcs8(new_key_pair().unwrap()).unwrap();
        let verifier = EcdsaP256Verifier;

        let honest = alice.transfer("bob", 3, 0, 0).unwrap();
        assert!(honest.verify_signature(&verifier));

        // mallory signs a transfer that claims to spend alice's funds
        let forged = mallory
            .sign(Transaction::new_transfer(
                alice.address(),
                "mallory",
                3,
                0,
                0,
                mallory.public_key(),
            ))
            .unwrap();
        assert!(!forged.verify_signature(&verifier));
    }

    #[test]
    fn test_signer_rejects_garbage_key() {
        assert!(Signer::from_pkcs8(vec![1, 2, 3]).is_err());
    }
}
