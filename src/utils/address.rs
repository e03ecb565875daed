//! Base58Check addresses derived from public keys.
//!
//! The ledger treats addresses as opaque strings; this module only exists so
//! the default signature verifier can check that a transaction's public key
//! belongs to its sender.

use super::crypto::{base58_decode, base58_encode, ripemd160_digest, sha256_digest};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// version + pub_key_hash + checksum, base58 encoded
pub fn convert_address(pub_hash_key: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_hash_key);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}

pub fn address_from_public_key(public_key: &[u8]) -> String {
    convert_address(hash_pub_key(public_key).as_slice())
}

pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };
    if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }
    let (body, actual) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    body[0] == VERSION && checksum(body) == actual
}
