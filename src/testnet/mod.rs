//! Testnet helpers
//!
//! Throwaway wallets, low-difficulty ledgers and block mining shortcuts for
//! unit tests.

pub mod test_utils;

pub use test_utils::*;
