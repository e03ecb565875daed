//! The node handle.
//!
//! One lock guards the ledger and the pool together, so a block and the pool
//! cleanup it causes are a single step to every other thread. Subscribers
//! hear about accepted blocks and transactions after the lock is released.

pub mod miner;

pub use miner::{CancelToken, Miner, MiningJob};

use crate::config::Settings;
use crate::core::{
    Acceptance, Account, Block, BlockRef, EcdsaP256Verifier, Ledger, SignatureVerifier,
    Transaction,
};
use crate::error::{LedgerError, Rejection, Result};
use crate::storage::MemoryPool;
use crate::utils::{current_timestamp, Hash256};
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Identifies a peer session inside this process.
pub type PeerId = u64;

#[derive(Debug, Clone)]
pub enum NodeEvent {
    BlockAccepted {
        block: Block,
        origin: Option<PeerId>,
    },
    TransactionAccepted {
        transaction: Transaction,
        origin: Option<PeerId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub height: u64,
    pub tip: Hash256,
    pub cumulative_work: u128,
    pub next_difficulty: u32,
    pub known_blocks: usize,
    pub mempool_size: usize,
    pub halted: bool,
}

struct NodeState {
    ledger: Ledger,
    mempool: MemoryPool,
}

#[derive(Clone)]
pub struct Node {
    state: Arc<Mutex<NodeState>>,
    tip_version: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Vec<Sender<NodeEvent>>>>,
}

impl Node {
    pub fn new(ledger: Ledger, mempool: MemoryPool) -> Node {
        Node {
            state: Arc::new(Mutex::new(NodeState { ledger, mempool })),
            tip_version: Arc::new(AtomicU64::new(0)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Builds a node from settings with the default ECDSA verifier. Without
    /// a data directory the chain lives in memory only.
    pub fn open(settings: &Settings) -> Result<Node> {
        Self::open_with_verifier(settings, Arc::new(EcdsaP256Verifier))
    }

    pub fn open_with_verifier(
        settings: &Settings,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Node> {
        let params = settings.consensus.clone();
        let ledger = match &settings.node.data_dir {
            Some(dir) => Ledger::open(params, verifier, dir)?,
            None => Ledger::new(params, verifier)?,
        };
        let mempool = MemoryPool::new(
            settings.node.mempool_capacity,
            Duration::from_secs(settings.node.mempool_expiry_secs),
        );
        info!(
            "Node ready at height {} with {} known blocks",
            ledger.height(),
            ledger.known_blocks()
        );
        Ok(Node::new(ledger, mempool))
    }

    fn lock(&self) -> Result<MutexGuard<'_, NodeState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Invariant("node state lock poisoned".to_string()))
    }

    pub fn submit_transaction(&self, transaction: Transaction) -> Result<Hash256> {
        self.submit_transaction_from(transaction, None)
    }

    pub fn submit_transaction_from(
        &self,
        transaction: Transaction,
        origin: Option<PeerId>,
    ) -> Result<Hash256> {
        let now = current_timestamp()?;
        let hash = {
            let mut guard = self.lock()?;
            let state = &mut *guard;
            state
                .mempool
                .submit(transaction.clone(), &state.ledger, now)?
        };
        self.publish(NodeEvent::TransactionAccepted {
            transaction,
            origin,
        });
        Ok(hash)
    }

    pub fn submit_block(&self, block: Block) -> Result<Acceptance> {
        self.submit_block_from(block, None)
    }

    pub fn submit_block_from(&self, block: Block, origin: Option<PeerId>) -> Result<Acceptance> {
        let acceptance = {
            let mut guard = self.lock()?;
            self.apply_block(&mut guard, block.clone())?
        };
        self.publish(NodeEvent::BlockAccepted { block, origin });
        Ok(acceptance)
    }

    /// Accepts a block built from [`Node::mining_snapshot`] unless the tip
    /// has moved since, in which case the work is stale.
    pub fn submit_mined_block(&self, block: Block, version: u64) -> Result<Acceptance> {
        let acceptance = {
            let mut guard = self.lock()?;
            if self.tip_version() != version
                || *block.get_previous_hash() != guard.ledger.tip_hash()
            {
                return Err(LedgerError::Rejected(Rejection::StaleWork));
            }
            self.apply_block(&mut guard, block.clone())?
        };
        self.publish(NodeEvent::BlockAccepted {
            block,
            origin: None,
        });
        Ok(acceptance)
    }

    fn apply_block(&self, state: &mut NodeState, block: Block) -> Result<Acceptance> {
        let acceptance = state.ledger.accept_block(block)?;
        if acceptance.tip_changed() {
            let confirmed: Vec<Hash256> =
                acceptance.confirmed.iter().map(Transaction::hash).collect();
            let evicted = state.mempool.evict(&confirmed);
            if !acceptance.abandoned.is_empty() {
                let now = current_timestamp()?;
                state
                    .mempool
                    .resurrect(acceptance.abandoned.clone(), &state.ledger, now);
            }
            let stale = state.mempool.reconcile(&state.ledger);
            debug!("Pool cleanup after block: {evicted} confirmed, {stale} stale");
            self.tip_version.fetch_add(1, Ordering::SeqCst);
        }
        Ok(acceptance)
    }

    /// Tip, version and a ready-to-mine template under one lock.
    pub fn mining_snapshot(&self, miner_address: &str) -> Result<MiningJob> {
        let guard = self.lock()?;
        let limit = guard
            .ledger
            .params()
            .max_block_transactions
            .saturating_sub(1);
        let transactions = guard.mempool.select_for_block(limit, &guard.ledger);
        let template = guard.ledger.block_template(miner_address, transactions)?;
        Ok(MiningJob {
            parent: guard.ledger.tip_hash(),
            version: self.tip_version(),
            template,
        })
    }

    /// Bumped on every tip change.
    pub fn tip_version(&self) -> u64 {
        self.tip_version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> Receiver<NodeEvent> {
        let (sender, receiver) = channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }
        receiver
    }

    fn publish(&self, event: NodeEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        Ok(self.lock()?.ledger.balance(address))
    }

    pub fn get_account(&self, address: &str) -> Result<Account> {
        Ok(self.lock()?.ledger.account(address))
    }

    pub fn get_height(&self) -> Result<u64> {
        Ok(self.lock()?.ledger.height())
    }

    pub fn get_tip_hash(&self) -> Result<Hash256> {
        Ok(self.lock()?.ledger.tip_hash())
    }

    pub fn get_cumulative_work(&self) -> Result<u128> {
        Ok(self.lock()?.ledger.cumulative_work())
    }

    pub fn get_block(&self, key: BlockRef) -> Result<Option<Block>> {
        Ok(self.lock()?.ledger.get_block(key).cloned())
    }

    pub fn get_mempool_snapshot(&self) -> Result<Vec<Transaction>> {
        Ok(self.lock()?.mempool.snapshot())
    }

    pub fn contains_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.lock()?.ledger.contains_block(hash))
    }

    pub fn contains_transaction(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.lock()?.mempool.contains(hash))
    }

    pub fn status(&self) -> Result<NodeStatus> {
        let guard = self.lock()?;
        Ok(NodeStatus {
            height: guard.ledger.height(),
            tip: guard.ledger.tip_hash(),
            cumulative_work: guard.ledger.cumulative_work(),
            next_difficulty: guard.ledger.next_difficulty()?,
            known_blocks: guard.ledger.known_blocks(),
            mempool_size: guard.mempool.len(),
            halted: guard.ledger.is_halted(),
        })
    }

    pub fn locator(&self) -> Result<Vec<Hash256>> {
        Ok(self.lock()?.ledger.locator())
    }

    pub fn blocks_after(&self, locator: &[Hash256], limit: usize) -> Result<(Vec<Block>, bool)> {
        Ok(self.lock()?.ledger.blocks_after(locator, limit))
    }

    /// Full replay of the canonical chain against the live account table.
    pub fn verify_integrity(&self) -> Result<()> {
        self.lock()?.ledger.verify_integrity()
    }

    /// Drops pool entries older than the expiry window.
    pub fn prune_mempool(&self) -> Result<usize> {
        let now = current_timestamp()?;
        Ok(self.lock()?.mempool.prune_expired(now))
    }
}
