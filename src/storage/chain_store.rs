//! Durable chain state in sled.
//!
//! Layout:
//! - `blocks`:   block hash -> [`StoredBlock`] (canonical and side branches)
//! - `heights`:  big-endian height -> canonical block hash
//! - `undo`:     block hash -> [`BlockUndo`] for canonical blocks
//! - `accounts`: address -> [`Account`]
//! - `meta`:     `tip`, `genesis`
//!
//! Every accepted block is written in one multi-tree transaction and flushed
//! before the ledger changes its in-memory view.

use crate::core::{Account, Block, BlockUndo};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, hash_to_hex, serialize, Hash256, ZERO_HASH};
use log::info;
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use std::path::Path;

const BLOCKS_TREE: &str = "blocks";
const HEIGHTS_TREE: &str = "heights";
const UNDO_TREE: &str = "undo";
const ACCOUNTS_TREE: &str = "accounts";
const META_TREE: &str = "meta";

const TIP_KEY: &str = "tip";
const GENESIS_KEY: &str = "genesis";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct StoredBlock {
    pub block: Block,
    pub cumulative_work: u128,
}

/// Everything one accepted block changes.
#[derive(Debug, Default)]
pub struct ChainCommit {
    pub blocks: Vec<(Hash256, StoredBlock)>,
    /// Canonical heights to (re)point
    pub canonical: Vec<(u64, Hash256)>,
    /// Canonical heights that no longer exist after a reorganization
    pub stale_heights: Vec<u64>,
    pub undo_put: Vec<(Hash256, BlockUndo)>,
    pub undo_remove: Vec<Hash256>,
    /// `None` removes the account
    pub accounts: Vec<(String, Option<Account>)>,
    pub tip: Hash256,
}

/// Chain state read back at startup.
#[derive(Debug)]
pub struct LoadedChain {
    pub genesis: Hash256,
    pub tip: Hash256,
    pub blocks: HashMap<Hash256, StoredBlock>,
    pub canonical: Vec<Hash256>,
    pub undo: HashMap<Hash256, BlockUndo>,
    pub accounts: HashMap<String, Account>,
}

pub struct ChainStore {
    db: Db,
    blocks: Tree,
    heights: Tree,
    undo: Tree,
    accounts: Tree,
    meta: Tree,
}

impl ChainStore {
    pub fn open(path: &Path) -> Result<ChainStore> {
        let db = sled::open(path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let heights = db.open_tree(HEIGHTS_TREE)?;
        let undo = db.open_tree(UNDO_TREE)?;
        let accounts = db.open_tree(ACCOUNTS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        info!("Opened chain store at {}", path.display());
        Ok(ChainStore {
            db,
            blocks,
            heights,
            undo,
            accounts,
            meta,
        })
    }

    /// Writes the genesis block into an empty store.
    pub fn initialize(&self, genesis: &StoredBlock, accounts: &[(String, Account)]) -> Result<()> {
        let hash = genesis.block.hash();
        let mut commit = ChainCommit {
            blocks: vec![(hash, genesis.clone())],
            canonical: vec![(0, hash)],
            tip: hash,
            ..ChainCommit::default()
        };
        commit.accounts = accounts
            .iter()
            .map(|(address, account)| (address.clone(), Some(*account)))
            .collect();
        self.meta.insert(GENESIS_KEY, &hash[..])?;
        self.commit(&commit)
    }

    pub fn commit(&self, commit: &ChainCommit) -> Result<()> {
        let blocks = commit
            .blocks
            .iter()
            .map(|(hash, stored)| Ok((*hash, serialize(stored)?)))
            .collect::<Result<Vec<_>>>()?;
        let undo = commit
            .undo_put
            .iter()
            .map(|(hash, record)| Ok((*hash, serialize(record)?)))
            .collect::<Result<Vec<_>>>()?;
        let accounts = commit
            .accounts
            .iter()
            .map(|(address, account)| {
                let bytes = match account {
                    Some(account) => Some(serialize(account)?),
                    None => None,
                };
                Ok((address.as_bytes(), bytes))
            })
            .collect::<Result<Vec<_>>>()?;

        (
            &self.blocks,
            &self.heights,
            &self.undo,
            &self.accounts,
            &self.meta,
        )
            .transaction(|(tx_blocks, tx_heights, tx_undo, tx_accounts, tx_meta)| {
                for (hash, bytes) in &blocks {
                    tx_blocks.insert(&hash[..], bytes.as_slice())?;
                }
                for height in &commit.stale_heights {
                    tx_heights.remove(&height.to_be_bytes()[..])?;
                }
                for (height, hash) in &commit.canonical {
                    tx_heights.insert(&height.to_be_bytes()[..], &hash[..])?;
                }
                for hash in &commit.undo_remove {
                    tx_undo.remove(&hash[..])?;
                }
                for (hash, bytes) in &undo {
                    tx_undo.insert(&hash[..], bytes.as_slice())?;
                }
                for (address, bytes) in &accounts {
                    match bytes {
                        Some(bytes) => tx_accounts.insert(*address, bytes.as_slice())?,
                        None => tx_accounts.remove(*address)?,
                    };
                }
                tx_meta.insert(TIP_KEY, &commit.tip[..])?;
                Ok::<(), ConflictableTransactionError<LedgerError>>(())
            })?;
        self.db.flush()?;
        Ok(())
    }

    /// `None` for a store that was never initialized.
    pub fn load(&self) -> Result<Option<LoadedChain>> {
        let tip = match self.meta.get(TIP_KEY)? {
            Some(bytes) => to_hash(&bytes)?,
            None => return Ok(None),
        };
        let genesis = match self.meta.get(GENESIS_KEY)? {
            Some(bytes) => to_hash(&bytes)?,
            None => return Err(LedgerError::Database("missing genesis marker".to_string())),
        };

        let mut blocks = HashMap::new();
        for entry in self.blocks.iter() {
            let (key, value) = entry?;
            blocks.insert(to_hash(&key)?, deserialize::<StoredBlock>(&value)?);
        }

        let mut canonical = Vec::new();
        for entry in self.heights.iter() {
            let (key, value) = entry?;
            let height = to_height(&key)?;
            if height != canonical.len() as u64 {
                return Err(LedgerError::Database(format!(
                    "canonical index skips from {} to {height}",
                    canonical.len()
                )));
            }
            canonical.push(to_hash(&value)?);
        }
        if canonical.first() != Some(&genesis) || canonical.last() != Some(&tip) {
            return Err(LedgerError::Database(format!(
                "canonical index does not run from genesis to tip {}",
                hash_to_hex(&tip)
            )));
        }

        let mut undo = HashMap::new();
        for entry in self.undo.iter() {
            let (key, value) = entry?;
            undo.insert(to_hash(&key)?, deserialize::<BlockUndo>(&value)?);
        }

        let mut accounts = HashMap::new();
        for entry in self.accounts.iter() {
            let (key, value) = entry?;
            let address = String::from_utf8(key.to_vec())
                .map_err(|e| LedgerError::Database(format!("non UTF-8 address key: {e}")))?;
            accounts.insert(address, deserialize::<Account>(&value)?);
        }

        Ok(Some(LoadedChain {
            genesis,
            tip,
            blocks,
            canonical,
            undo,
            accounts,
        }))
    }
}

fn to_hash(bytes: &[u8]) -> Result<Hash256> {
    if bytes.len() != 32 {
        return Err(LedgerError::Database(format!(
            "expected a 32-byte hash, found {} bytes",
            bytes.len()
        )));
    }
    let mut hash = ZERO_HASH;
    hash.copy_from_slice(bytes);
    Ok(hash)
}

fn to_height(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Database("height key is not 8 bytes".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusParams;
    use tempfile::tempdir;

    fn genesis() -> StoredBlock {
        let block = Block::genesis(&ConsensusParams::for_testing()).unwrap();
        let cumulative_work = block.work();
        StoredBlock {
            block,
            cumulative_work,
        }
    }

    #[test]
    fn test_empty_store_loads_none() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_initialize_and_reload() {
        let dir = tempdir().unwrap();
        let genesis = genesis();
        let hash = genesis.block.hash();
        {
            let store = ChainStore::open(dir.path()).unwrap();
            let account = Account {
                balance: 5,
                nonce: 0,
            };
            store
                .initialize(&genesis, &[("genesis".to_string(), account)])
                .unwrap();
        }

        let store = ChainStore::open(dir.path()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.genesis, hash);
        assert_eq!(loaded.tip, hash);
        assert_eq!(loaded.canonical, vec![hash]);
        assert_eq!(loaded.blocks[&hash], genesis);
        assert_eq!(loaded.accounts["genesis"].balance, 5);
    }

    #[test]
    fn test_commit_rewrites_heights_and_accounts() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let genesis = genesis();
        let genesis_hash = genesis.block.hash();
        store
            .initialize(&genesis, &[("a".to_string(), Account::default())])
            .unwrap();

        let child = Block::assemble(genesis_hash, 1, 1, 1, vec![]);
        let child_hash = child.hash();
        store
            .commit(&ChainCommit {
                blocks: vec![(
                    child_hash,
                    StoredBlock {
                        block: child,
                        cumulative_work: 3,
                    },
                )],
                canonical: vec![(1, child_hash)],
                undo_put: vec![(child_hash, BlockUndo::default())],
                accounts: vec![("a".to_string(), None)],
                tip: child_hash,
                ..ChainCommit::default()
            })
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.canonical, vec![genesis_hash, child_hash]);
        assert!(loaded.undo.contains_key(&child_hash));
        assert!(loaded.accounts.is_empty());

        store
            .commit(&ChainCommit {
                stale_heights: vec![1],
                undo_remove: vec![child_hash],
                tip: genesis_hash,
                ..ChainCommit::default()
            })
            .unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.canonical, vec![genesis_hash]);
        assert!(loaded.undo.is_empty());
        // side blocks stay known
        assert!(loaded.blocks.contains_key(&child_hash));
    }
}
