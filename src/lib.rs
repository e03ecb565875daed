//! # Work Ledger
//!
//! An account-based proof-of-work ledger node. Blocks carry signed
//! transfers between addresses; nodes agree on the chain with the most
//! cumulative work and gossip blocks and transactions over TCP.
//!
//! ## Layout
//! - `core/`: blocks, transactions, Merkle commitments, proof of work,
//!   difficulty retargeting, account state and the [`Ledger`] itself
//! - `storage/`: the sled-backed chain store and the transaction pool
//! - `node/`: the [`Node`] handle that serializes access to ledger and pool,
//!   plus the [`Miner`]
//! - `network/`: wire messages, transports, peer sessions, the
//!   [`Synchronizer`] and the TCP [`Server`]
//! - `config/`: consensus parameters and node settings
//! - `utils/`: hashing, signatures, address encoding, serialization
//! - `cli/`: arguments for the `work-ledger` binary
//!
//! ## Where to start
//! 1. `core/ledger.rs` for block acceptance, fork choice and reorgs
//! 2. `storage/memory_pool.rs` for transaction admission
//! 3. `network/session.rs` for the peer protocol

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::{ConsensusParams, NetworkSettings, NodeSettings, Settings};
pub use core::{
    block_reward, AcceptOutcome, Acceptance, Account, Block, BlockHeader, BlockRef,
    EcdsaP256Verifier, Ledger, MerkleTree, ProofOfWork, SignatureVerifier, Signer, Transaction,
    TxKind,
};
pub use error::{ErrorClass, LedgerError, Rejection, Result, Violation};
pub use network::{
    memory_pair, Direction, DisconnectReason, Message, PeerState, Server, Synchronizer,
    TcpTransport, Transport,
};
pub use node::{CancelToken, Miner, Node, NodeEvent, NodeStatus};
pub use storage::{ChainStore, MemoryPool};
pub use utils::{
    address_from_public_key, current_timestamp, hash_to_hex, new_key_pair, sha256_digest,
    validate_address, Hash256,
};
