use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use std::time::{SystemTime, UNIX_EPOCH};

/// 32-byte SHA-256 output used for block, transaction and Merkle hashes.
pub type Hash256 = [u8; 32];

/// The all-zero hash: genesis parent and empty Merkle root.
pub const ZERO_HASH: Hash256 = [0u8; 32];

pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LedgerError::Crypto(format!("System time error: {e}")))?
        .as_millis();

    if duration > i64::MAX as u128 {
        return Err(LedgerError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

/// SHA-256 into a fixed-size array.
pub fn sha256_hash(data: &[u8]) -> Hash256 {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let mut out = ZERO_HASH;
    out.copy_from_slice(context.finish().as_ref());
    out
}

pub fn hash_to_hex(hash: &Hash256) -> String {
    HEXLOWER.encode(hash)
}

pub fn hash_from_hex(s: &str) -> Result<Hash256> {
    let bytes = HEXLOWER
        .decode(s.to_ascii_lowercase().as_bytes())
        .map_err(|e| LedgerError::Malformed(format!("Invalid hex hash: {e}")))?;
    if bytes.len() != 32 {
        return Err(LedgerError::Malformed(format!(
            "Hash must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = ZERO_HASH;
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| LedgerError::Malformed(format!("Invalid base58 encoding: {e}")))
}

/// Generates a PKCS#8 encoded P-256 key pair. The ledger never calls this;
/// it exists for wallets and test fixtures.
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| LedgerError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| LedgerError::Crypto(format!("Failed to create key pair from PKCS8: {e}")))?;
    Ok(key_pair.public_key().as_ref().to_vec())
}

pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| LedgerError::Crypto(format!("Failed to create key pair from PKCS8: {e}")))?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| LedgerError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let peer_public_key =
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key);
    peer_public_key.verify(message, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256_hash(b"abc");
        assert_eq!(
            hash_to_hex(&hash),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_digest(b"abc"), hash.to_vec());
    }

    #[test]
    fn test_hex_round_trip_and_errors() {
        let hash = sha256_hash(b"ledger");
        let hex = hash_to_hex(&hash);
        assert_eq!(hash_from_hex(&hex).unwrap(), hash);
        assert_eq!(hash_from_hex(&hex.to_uppercase()).unwrap(), hash);
        assert!(hash_from_hex("abcd").is_err());
        assert!(hash_from_hex("zz").is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let pkcs8 = new_key_pair().unwrap();
        let public_key = public_key_from_pkcs8(&pkcs8).unwrap();
        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, b"message").unwrap();

        assert!(ecdsa_p256_sha256_sign_verify(&public_key, &signature, b"message"));
        assert!(!ecdsa_p256_sha256_sign_verify(&public_key, &signature, b"tampered"));
    }
}
