use crate::config::ConsensusParams;
use crate::core::monetary::block_reward;
use crate::core::proof_of_work::ProofOfWork;
use crate::core::{MerkleProof, MerkleTree, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, hash_to_hex, serialize, sha256_hash, Hash256, ZERO_HASH};
use serde::{Deserialize, Serialize};

/// Work credited for a block mined at `difficulty` leading zero bits. Halving
/// the target doubles the expected number of hashes, so work is `2^difficulty`.
pub fn work_for_difficulty(difficulty: u32) -> u128 {
    1u128 << difficulty.min(127)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockHeader {
    height: u64,
    previous_hash: Hash256,
    merkle_root: Hash256,
    timestamp: i64,
    difficulty: u32,
    nonce: u64,
}

impl BlockHeader {
    pub fn new(
        height: u64,
        previous_hash: Hash256,
        merkle_root: Hash256,
        timestamp: i64,
        difficulty: u32,
    ) -> BlockHeader {
        BlockHeader {
            height,
            previous_hash,
            merkle_root,
            timestamp,
            difficulty,
            nonce: 0,
        }
    }

    /// Fixed big-endian layout hashed for proof of work.
    pub fn prepare_data(&self, nonce: u64) -> [u8; 92] {
        let mut data = [0u8; 92];
        data[0..8].copy_from_slice(&self.height.to_be_bytes());
        data[8..40].copy_from_slice(&self.previous_hash);
        data[40..72].copy_from_slice(&self.merkle_root);
        data[72..80].copy_from_slice(&self.timestamp.to_be_bytes());
        data[80..84].copy_from_slice(&self.difficulty.to_be_bytes());
        data[84..92].copy_from_slice(&nonce.to_be_bytes());
        data
    }

    pub fn hash(&self) -> Hash256 {
        sha256_hash(&self.prepare_data(self.nonce))
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> Hash256 {
        sha256_hash(&self.prepare_data(nonce))
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_previous_hash(&self) -> &Hash256 {
        &self.previous_hash
    }

    pub fn get_merkle_root(&self) -> &Hash256 {
        &self.merkle_root
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Wraps a header and body without checking that they agree.
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Block {
        Block {
            header,
            transactions,
        }
    }

    /// Unmined block whose header commits to `transactions`.
    pub fn assemble(
        previous_hash: Hash256,
        height: u64,
        timestamp: i64,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Block {
        let merkle_root = MerkleTree::calculate_merkle_root(&transactions);
        Block {
            header: BlockHeader::new(height, previous_hash, merkle_root, timestamp, difficulty),
            transactions,
        }
    }

    /// The genesis block is a pure function of the consensus parameters, so
    /// every node on a network derives the same one.
    pub fn genesis(params: &ConsensusParams) -> Result<Block> {
        let coinbase = Transaction::new_coinbase(
            &params.genesis_address,
            block_reward(0, params),
            0,
            params.genesis_timestamp,
        );
        let block = Block::assemble(
            ZERO_HASH,
            0,
            params.genesis_timestamp,
            params.initial_difficulty,
            vec![coinbase],
        );
        let header = ProofOfWork::new(block.header.clone())
            .run(|| false)
            .ok_or_else(|| LedgerError::Invariant("genesis search ended early".to_string()))?;
        Ok(block.with_header(header))
    }

    pub fn with_header(mut self, header: BlockHeader) -> Block {
        self.header = header;
        self
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn hash_hex(&self) -> String {
        hash_to_hex(&self.hash())
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }

    pub fn get_previous_hash(&self) -> &Hash256 {
        self.header.get_previous_hash()
    }

    pub fn get_height(&self) -> u64 {
        self.header.height
    }

    pub fn get_timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn get_difficulty(&self) -> u32 {
        self.header.difficulty
    }

    pub fn get_merkle_root(&self) -> &Hash256 {
        &self.header.merkle_root
    }

    pub fn get_nonce(&self) -> u64 {
        self.header.nonce
    }

    pub fn work(&self) -> u128 {
        work_for_difficulty(self.header.difficulty)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Verify that the block's Merkle root matches its transactions
    pub fn verify_merkle_root(&self) -> bool {
        MerkleTree::calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Generate a Merkle proof for a transaction in this block
    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::new(&self.transactions).generate_proof(transaction_index)
    }

    /// Verify a Merkle proof against this block's Merkle root
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        proof.merkle_root == self.header.merkle_root && MerkleTree::verify_proof(proof)
    }
}
