//! Test utilities for ledger testing

use crate::config::ConsensusParams;
use crate::core::{
    block_reward, Block, EcdsaP256Verifier, Ledger, ProofOfWork, SignatureVerifier, Signer,
    Transaction,
};
use crate::error::Result;
use crate::utils::{new_key_pair, Hash256};
use std::sync::Arc;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("temp dir")
}

/// Low-difficulty parameters with a chosen genesis recipient
pub fn test_params(genesis_address: &str) -> ConsensusParams {
    ConsensusParams::for_testing().with_genesis_address(genesis_address)
}

pub fn verifier() -> Arc<dyn SignatureVerifier> {
    Arc::new(EcdsaP256Verifier)
}

/// In-memory ledger whose genesis reward goes to `genesis_address`
pub fn test_ledger(genesis_address: &str) -> Ledger {
    Ledger::new(test_params(genesis_address), verifier()).expect("test ledger")
}

/// A fresh key pair that signs transfers
pub struct TestWallet {
    signer: Signer,
}

impl Default for TestWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWallet {
    pub fn new() -> TestWallet {
        let pkcs8 = new_key_pair().expect("key pair");
        TestWallet {
            signer: Signer::from_pkcs8(pkcs8).expect("signer"),
        }
    }

    pub fn address(&self) -> &str {
        self.signer.address()
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn transfer(&self, recipient: &str, amount: u64, nonce: u64) -> Transaction {
        self.signer
            .transfer(recipient, amount, nonce, 0)
            .expect("signed transfer")
    }
}

/// Searches a nonce for `block` at the difficulty it already carries
pub fn solve(block: Block) -> Block {
    let header = ProofOfWork::new(block.header().clone())
        .run(|| false)
        .expect("search never aborts");
    block.with_header(header)
}

/// Mines a child of the current tip
pub fn mine(ledger: &Ledger, miner: &str, transactions: Vec<Transaction>) -> Block {
    solve(
        ledger
            .block_template(miner, transactions)
            .expect("template on tip"),
    )
}

/// Mines a child of any known block
pub fn mine_on(
    ledger: &Ledger,
    parent: &Hash256,
    miner: &str,
    transactions: Vec<Transaction>,
    timestamp: i64,
) -> Result<Block> {
    Ok(solve(ledger.template_on(
        parent,
        miner,
        transactions,
        timestamp,
    )?))
}

/// Coinbase-only branch of `length` blocks on top of `parent`, which may
/// itself be unknown to any ledger. Every block inherits the parent's
/// difficulty, so the branch must not cross a retarget height.
pub fn build_branch(parent: &Block, length: usize, miner: &str, params: &ConsensusParams) -> Vec<Block> {
    let mut branch: Vec<Block> = Vec::with_capacity(length);
    for _ in 0..length {
        let tip = branch.last().unwrap_or(parent);
        let height = tip.get_height() + 1;
        let timestamp = tip.get_timestamp() + 1_000;
        let coinbase =
            Transaction::new_coinbase(miner, block_reward(height, params), height, timestamp);
        let block = Block::assemble(
            tip.hash(),
            height,
            timestamp,
            tip.get_difficulty(),
            vec![coinbase],
        );
        branch.push(solve(block));
    }
    branch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallets_are_unique() {
        let a = TestWallet::new();
        let b = TestWallet::new();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_built_branch_is_accepted() {
        let mut ledger = test_ledger("genesis");
        let branch = build_branch(ledger.tip(), 3, "miner", &test_params("genesis"));
        for block in branch {
            ledger.accept_block(block).unwrap();
        }
        assert_eq!(ledger.height(), 3);
        assert!(ledger.verify_integrity().is_ok());
    }
}
