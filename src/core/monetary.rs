//! Monetary policy
//!
//! Amounts are integers in base units. One coin is 100,000,000 base units.
//! The block reward starts at 50 coins and halves every 210,000 blocks; after
//! 64 halvings it is zero.

use crate::config::ConsensusParams;

/// Number of base units in one coin
pub const BASE_UNITS_PER_COIN: u64 = 100_000_000;

/// Initial block reward in base units (50 coins)
pub const INITIAL_BLOCK_REWARD: u64 = 50 * BASE_UNITS_PER_COIN;

/// Blocks between reward halvings
pub const HALVING_INTERVAL: u64 = 210_000;

/// Halving count at which the reward drops to zero
pub const MAX_HALVINGS: u64 = 64;

/// Coinbase amount a block at `height` must pay.
pub fn block_reward(height: u64, params: &ConsensusParams) -> u64 {
    let halvings = height / params.halving_interval;
    if halvings >= params.max_halvings || halvings >= 64 {
        return 0;
    }
    params.initial_block_reward >> halvings
}

/// Utility functions for monetary conversions
pub mod conversions {
    use super::*;

    /// Format base units as a human-readable string
    ///
    /// # Examples
    /// ```
    /// use work_ledger::core::monetary::conversions::format_units;
    /// assert_eq!(format_units(100_000_000), "1.00000000 coins");
    /// assert_eq!(format_units(1_000), "0.00001000 coins");
    /// ```
    pub fn format_units(units: u64) -> String {
        format!(
            "{}.{:08} coins",
            units / BASE_UNITS_PER_COIN,
            units % BASE_UNITS_PER_COIN
        )
    }

    /// Convert whole coins to base units, saturating on overflow
    pub fn coins_to_units(coins: u64) -> u64 {
        coins.saturating_mul(BASE_UNITS_PER_COIN)
    }
}
