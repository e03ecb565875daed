use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::utils::{sha256_hash, Hash256, ZERO_HASH};
use serde::{Deserialize, Serialize};

/// Root committed by a block with no transactions. Blocks always carry a
/// coinbase, so only callers hashing arbitrary lists ever see it.
pub const EMPTY_MERKLE_ROOT: Hash256 = ZERO_HASH;

/// Binary Merkle tree over transaction hashes.
///
/// Levels are built bottom-up by hashing `left || right`. A level with an odd
/// number of nodes pairs its last node with itself. That rule makes a list
/// ending in `[.., x]` and one ending in `[.., x, x]` commit to the same root;
/// blocks reject duplicate transaction hashes, so the ambiguity never reaches
/// the chain.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves, the last level holds the root.
    levels: Vec<Vec<Hash256>>,
}

/// Merkle proof for transaction verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Transaction hash being proven
    pub transaction_hash: Hash256,
    pub merkle_root: Hash256,
    /// Sibling hashes from the leaf upwards
    pub proof_path: Vec<ProofElement>,
    /// Index of the transaction in the block
    pub transaction_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: Hash256,
    /// true if the sibling sits to the right of the running hash
    pub is_right: bool,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction]) -> MerkleTree {
        Self::from_hashes(transactions.iter().map(Transaction::hash).collect())
    }

    pub fn from_hashes(leaves: Vec<Hash256>) -> MerkleTree {
        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let parent = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(parent);
        }
        MerkleTree { levels }
    }

    /// Root of `transactions`, or [`EMPTY_MERKLE_ROOT`] for an empty list.
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        MerkleTree::new(transactions).root()
    }

    pub fn root(&self) -> Hash256 {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => *root,
            None => EMPTY_MERKLE_ROOT,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn generate_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        let leaf_count = self.leaf_count();
        if transaction_index >= leaf_count {
            return Err(LedgerError::Malformed(format!(
                "Transaction index {transaction_index} out of bounds ({leaf_count} leaves)"
            )));
        }

        let mut proof_path = Vec::with_capacity(self.levels.len());
        let mut index = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = index % 2 == 0;
            let sibling = if is_right {
                // odd tail pairs with itself
                level.get(index + 1).unwrap_or(&level[index])
            } else {
                &level[index - 1]
            };
            proof_path.push(ProofElement {
                hash: *sibling,
                is_right,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            transaction_hash: self.levels[0][transaction_index],
            merkle_root: self.root(),
            proof_path,
            transaction_index,
        })
    }

    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let computed = proof
            .proof_path
            .iter()
            .fold(proof.transaction_hash, |current, element| {
                if element.is_right {
                    hash_pair(&current, &element.hash)
                } else {
                    hash_pair(&element.hash, &current)
                }
            });
        computed == proof.merkle_root
    }
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    sha256_hash(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Hash256 {
        sha256_hash(&[n])
    }

    fn coinbases(count: u64) -> Vec<Transaction> {
        (0..count)
            .map(|h| Transaction::new_coinbase("miner", 50, h, 0))
            .collect()
    }

    #[test]
    fn test_empty_list_commits_to_zero() {
        assert_eq!(MerkleTree::calculate_merkle_root(&[]), EMPTY_MERKLE_ROOT);
        assert_eq!(MerkleTree::from_hashes(vec![]).leaf_count(), 0);
    }

    #[test]
    fn test_single_leaf_is_its_own_root() {
        let txs = coinbases(1);
        assert_eq!(MerkleTree::calculate_merkle_root(&txs), txs[0].hash());
    }

    #[test]
    fn test_two_leaves() {
        let tree = MerkleTree::from_hashes(vec![leaf(1), leaf(2)]);
        assert_eq!(tree.root(), hash_pair(&leaf(1), &leaf(2)));
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        let three = MerkleTree::from_hashes(vec![leaf(1), leaf(2), leaf(3)]);
        let expected = hash_pair(&hash_pair(&leaf(1), &leaf(2)), &hash_pair(&leaf(3), &leaf(3)));
        assert_eq!(three.root(), expected);

        let padded = MerkleTree::from_hashes(vec![leaf(1), leaf(2), leaf(3), leaf(3)]);
        assert_eq!(three.root(), padded.root());
    }

    #[test]
    fn test_root_is_deterministic_and_order_sensitive() {
        let txs = coinbases(5);
        assert_eq!(
            MerkleTree::calculate_merkle_root(&txs),
            MerkleTree::calculate_merkle_root(&txs.clone())
        );

        let mut swapped = txs.clone();
        swapped.swap(0, 1);
        assert_ne!(
            MerkleTree::calculate_merkle_root(&txs),
            MerkleTree::calculate_merkle_root(&swapped)
        );
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        for count in 1..=9u8 {
            let tree = MerkleTree::from_hashes((0..count).map(leaf).collect());
            for index in 0..count as usize {
                let proof = tree.generate_proof(index).unwrap();
                assert_eq!(proof.merkle_root, tree.root());
                assert!(MerkleTree::verify_proof(&proof), "count {count} index {index}");
            }
        }
    }

    #[test]
    fn test_tampered_proof_fails() {
        let tree = MerkleTree::from_hashes((0..4).map(leaf).collect());
        let mut proof = tree.generate_proof(2).unwrap();
        proof.transaction_hash = leaf(9);
        assert!(!MerkleTree::verify_proof(&proof));

        assert!(tree.generate_proof(4).is_err());
    }
}
