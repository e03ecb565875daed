//! Utility functions and helpers
//!
//! Hashing, signatures, address encoding and storage serialization shared by
//! the rest of the crate.

pub mod address;
pub mod crypto;
pub mod serialization;

pub use address::{
    address_from_public_key, convert_address, hash_pub_key, validate_address,
    ADDRESS_CHECK_SUM_LEN,
};
pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, hash_from_hex, hash_to_hex, new_key_pair,
    public_key_from_pkcs8, ripemd160_digest, sha256_digest, sha256_hash, Hash256, ZERO_HASH,
};

pub use serialization::{deserialize, serialize};
