//! Core ledger functionality
//!
//! Blocks, account-model transactions, proof of work, difficulty retargeting
//! and the ledger that ties them into a canonical chain.

pub mod account;
pub mod block;
pub mod difficulty;
pub mod ledger;
pub mod merkle;
pub mod monetary;
pub mod proof_of_work;
pub mod signature;
pub mod transaction;

pub use account::{Account, AccountTable, BlockUndo};
pub use block::{work_for_difficulty, Block, BlockHeader};
pub use difficulty::DifficultyAdjustment;
pub use ledger::{AcceptOutcome, Acceptance, BlockRef, Ledger};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use monetary::{block_reward, BASE_UNITS_PER_COIN, INITIAL_BLOCK_REWARD};
pub use proof_of_work::ProofOfWork;
pub use signature::{EcdsaP256Verifier, SignatureVerifier, Signer};
pub use transaction::{Transaction, TxKind, PROTOCOL_SENDER};
