//! Data storage and persistence
//!
//! The sled-backed chain store and the in-memory pool of pending transfers.

pub mod chain_store;
pub mod memory_pool;

pub use chain_store::{ChainCommit, ChainStore, LoadedChain, StoredBlock};
pub use memory_pool::MemoryPool;
