use crate::core::monetary::{HALVING_INTERVAL, INITIAL_BLOCK_REWARD, MAX_HALVINGS};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Genesis timestamp shared by every node on the network (2022-01-01T00:00:00Z).
pub const GENESIS_TIMESTAMP: i64 = 1_640_995_200_000;

/// Rules every node on a network must agree on. Two nodes with different
/// parameters build different genesis blocks and never sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Leading zero bits required of the genesis block and of early blocks
    pub initial_difficulty: u32,
    pub min_difficulty: u32,
    pub max_difficulty: u32,
    /// Desired interval between blocks in milliseconds
    pub target_block_time_ms: u64,
    /// Blocks per retarget window
    pub retarget_window: u64,
    pub initial_block_reward: u64,
    pub halving_interval: u64,
    pub max_halvings: u64,
    /// Body size limit including the coinbase
    pub max_block_transactions: usize,
    pub max_future_block_time_ms: i64,
    /// Deepest rollback a single reorganization may perform
    pub max_reorg_depth: u64,
    /// Lets blocks mint `SystemCredit` transactions. Off on any real network.
    pub allow_system_credit: bool,
    pub genesis_address: String,
    pub genesis_timestamp: i64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            initial_difficulty: 16,
            min_difficulty: 1,
            max_difficulty: 64,
            target_block_time_ms: 120_000,
            retarget_window: 10,
            initial_block_reward: INITIAL_BLOCK_REWARD,
            halving_interval: HALVING_INTERVAL,
            max_halvings: MAX_HALVINGS,
            max_block_transactions: 1_000,
            max_future_block_time_ms: 2 * 60 * 60 * 1000,
            max_reorg_depth: 100,
            allow_system_credit: false,
            genesis_address: "genesis".to_string(),
            genesis_timestamp: GENESIS_TIMESTAMP,
        }
    }
}

impl ConsensusParams {
    /// Cheap proof of work for tests and local experiments.
    pub fn for_testing() -> Self {
        ConsensusParams {
            initial_difficulty: 4,
            min_difficulty: 1,
            max_difficulty: 10,
            target_block_time_ms: 1_000,
            ..ConsensusParams::default()
        }
    }

    pub fn with_genesis_address(mut self, address: &str) -> Self {
        self.genesis_address = address.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_difficulty == 0 || self.min_difficulty > self.max_difficulty {
            return Err(LedgerError::Config(format!(
                "Difficulty bounds [{}, {}] are invalid",
                self.min_difficulty, self.max_difficulty
            )));
        }
        // work is 2^difficulty held in a u128 and summed over the chain
        if self.max_difficulty > 96 {
            return Err(LedgerError::Config(format!(
                "max_difficulty {} exceeds 96",
                self.max_difficulty
            )));
        }
        if !(self.min_difficulty..=self.max_difficulty).contains(&self.initial_difficulty) {
            return Err(LedgerError::Config(format!(
                "initial_difficulty {} is outside [{}, {}]",
                self.initial_difficulty, self.min_difficulty, self.max_difficulty
            )));
        }
        if self.retarget_window < 2 {
            return Err(LedgerError::Config(
                "retarget_window must be at least 2".to_string(),
            ));
        }
        if self.halving_interval == 0 {
            return Err(LedgerError::Config(
                "halving_interval must be positive".to_string(),
            ));
        }
        if self.max_block_transactions == 0 {
            return Err(LedgerError::Config(
                "max_block_transactions must leave room for the coinbase".to_string(),
            ));
        }
        if self.genesis_address.is_empty() {
            return Err(LedgerError::Config(
                "genesis_address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
