//! Pending transfers waiting for a block.
//!
//! Every transfer is checked against the confirmed account table plus the
//! sender's own queued transfers, so a sender can queue a run of consecutive
//! nonces but never a gap, a duplicate nonce, or more than it can pay for.

use crate::core::{Account, Ledger, Transaction};
use crate::error::{LedgerError, Rejection, Result, Violation};
use crate::utils::{hash_to_hex, Hash256};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

struct PoolEntry {
    transaction: Transaction,
    seq: u64,
    received_at: i64,
}

/// ( K -> tx hash, V => queued transfer ), iterated in arrival order
pub struct MemoryPool {
    entries: HashMap<Hash256, PoolEntry>,
    order: BTreeMap<u64, Hash256>,
    by_sender: HashMap<String, BTreeMap<u64, Hash256>>,
    next_seq: u64,
    capacity: usize,
    expiry_ms: i64,
}

impl MemoryPool {
    pub fn new(capacity: usize, expiry: Duration) -> MemoryPool {
        MemoryPool {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            by_sender: HashMap::new(),
            next_seq: 0,
            capacity,
            expiry_ms: expiry.as_millis().min(i64::MAX as u128) as i64,
        }
    }

    /// Validates `tx` against `ledger` and the queue, then admits it.
    /// `now` is the local clock in milliseconds.
    pub fn submit(&mut self, tx: Transaction, ledger: &Ledger, now: i64) -> Result<Hash256> {
        if tx.is_privileged() {
            return Err(LedgerError::Malformed(format!(
                "{:?} transactions are only valid inside blocks",
                tx.get_kind()
            )));
        }
        tx.validate_structure()?;
        let hash = tx.hash();
        if self.entries.contains_key(&hash) {
            return Err(LedgerError::Rejected(Rejection::AlreadyKnown));
        }
        if !tx.verify_signature(ledger.verifier()) {
            return Err(Violation::BadSignature.into());
        }

        let confirmed = ledger.account(tx.get_sender());
        if tx.get_nonce() < confirmed.nonce {
            return Err(Violation::StaleNonce {
                expected: confirmed.nonce,
                found: tx.get_nonce(),
            }
            .into());
        }
        let (expected, queued_spend) = self.queued_run(tx.get_sender(), confirmed);
        if self.has_nonce(tx.get_sender(), tx.get_nonce()) {
            return Err(Violation::DuplicateNonce {
                nonce: tx.get_nonce(),
            }
            .into());
        }
        if tx.get_nonce() != expected {
            return Err(Violation::NonceGap {
                expected,
                found: tx.get_nonce(),
            }
            .into());
        }
        let available = confirmed.balance.saturating_sub(queued_spend);
        if tx.get_amount() > available {
            return Err(Violation::InsufficientBalance {
                required: tx.get_amount(),
                available,
            }
            .into());
        }

        if self.entries.len() >= self.capacity {
            self.prune_expired(now);
            if self.entries.len() >= self.capacity {
                return Err(LedgerError::Rejected(Rejection::PoolFull {
                    capacity: self.capacity,
                }));
            }
        }

        self.insert(hash, tx, now);
        debug!("Queued transaction {}", hash_to_hex(&hash));
        Ok(hash)
    }

    /// Next nonce after the sender's contiguous queued run and what that
    /// run spends.
    fn queued_run(&self, sender: &str, confirmed: Account) -> (u64, u64) {
        let mut expected = confirmed.nonce;
        let mut spend: u64 = 0;
        if let Some(queued) = self.by_sender.get(sender) {
            while let Some(hash) = queued.get(&expected) {
                if let Some(entry) = self.entries.get(hash) {
                    spend = spend.saturating_add(entry.transaction.get_amount());
                }
                expected += 1;
            }
        }
        (expected, spend)
    }

    fn has_nonce(&self, sender: &str, nonce: u64) -> bool {
        self.by_sender
            .get(sender)
            .map(|queued| queued.contains_key(&nonce))
            .unwrap_or(false)
    }

    fn insert(&mut self, hash: Hash256, transaction: Transaction, now: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, hash);
        self.by_sender
            .entry(transaction.get_sender().to_string())
            .or_default()
            .insert(transaction.get_nonce(), hash);
        self.entries.insert(
            hash,
            PoolEntry {
                transaction,
                seq,
                received_at: now,
            },
        );
    }

    fn remove(&mut self, hash: &Hash256) -> Option<Transaction> {
        let entry = self.entries.remove(hash)?;
        self.order.remove(&entry.seq);
        let sender = entry.transaction.get_sender();
        if let Some(queued) = self.by_sender.get_mut(sender) {
            if queued.get(&entry.transaction.get_nonce()) == Some(hash) {
                queued.remove(&entry.transaction.get_nonce());
            }
            if queued.is_empty() {
                self.by_sender.remove(sender);
            }
        }
        Some(entry.transaction)
    }

    /// Picks up to `limit` transfers that apply cleanly on top of `ledger`,
    /// in arrival order. A sender's transfer is taken only once its
    /// predecessor nonce has been taken and the running balance covers it.
    pub fn select_for_block(&self, limit: usize, ledger: &Ledger) -> Vec<Transaction> {
        let mut state: HashMap<&str, Account> = HashMap::new();
        let mut picked: HashSet<Hash256> = HashSet::new();
        let mut selected = Vec::new();

        // arrival order can put a later nonce first, so sweep until stable
        loop {
            let mut progress = false;
            for hash in self.order.values() {
                if selected.len() >= limit {
                    return selected;
                }
                if picked.contains(hash) {
                    continue;
                }
                let tx = match self.entries.get(hash) {
                    Some(entry) => &entry.transaction,
                    None => continue,
                };
                let sender = state
                    .entry(tx.get_sender())
                    .or_insert_with(|| ledger.account(tx.get_sender()));
                if tx.get_nonce() != sender.nonce || tx.get_amount() > sender.balance {
                    continue;
                }
                sender.nonce += 1;
                sender.balance -= tx.get_amount();
                picked.insert(*hash);
                selected.push(tx.clone());
                progress = true;
            }
            if !progress {
                return selected;
            }
        }
    }

    /// Drops transactions a block just confirmed.
    pub fn evict(&mut self, hashes: &[Hash256]) -> usize {
        hashes
            .iter()
            .filter(|hash| self.remove(hash).is_some())
            .count()
    }

    /// Re-queues transfers from blocks that left the canonical chain.
    /// Those that no longer validate are dropped.
    pub fn resurrect(&mut self, transactions: Vec<Transaction>, ledger: &Ledger, now: i64) -> usize {
        let mut restored = 0;
        for tx in transactions {
            let hash = tx.hash_hex();
            match self.submit(tx, ledger, now) {
                Ok(_) => restored += 1,
                Err(e) => debug!("Dropped abandoned transaction {hash}: {e}"),
            }
        }
        if restored > 0 {
            info!("Returned {restored} abandoned transactions to the pool");
        }
        restored
    }

    /// Removes transfers whose nonce the chain has already used.
    pub fn reconcile(&mut self, ledger: &Ledger) -> usize {
        let stale: Vec<Hash256> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.transaction.get_nonce() < ledger.next_nonce(entry.transaction.get_sender())
            })
            .map(|(hash, _)| *hash)
            .collect();
        self.evict(&stale)
    }

    pub fn prune_expired(&mut self, now: i64) -> usize {
        let expired: Vec<Hash256> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.received_at) > self.expiry_ms)
            .map(|(hash, _)| *hash)
            .collect();
        let removed = self.evict(&expired);
        if removed > 0 {
            info!("Expired {removed} transactions from the pool");
        }
        removed
    }

    /// Every queued transfer in arrival order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.order
            .values()
            .filter_map(|hash| self.entries.get(hash))
            .map(|entry| entry.transaction.clone())
            .collect()
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Transaction> {
        self.entries.get(hash).map(|entry| &entry.transaction)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{mine, test_ledger, TestWallet};

    fn pool() -> MemoryPool {
        MemoryPool::new(100, Duration::from_secs(60))
    }

    #[test]
    fn test_accepts_consecutive_nonces() {
        let alice = TestWallet::new();
        let ledger = test_ledger(alice.address());
        let mut pool = pool();

        pool.submit(alice.transfer("bob", 10, 0), &ledger, 0).unwrap();
        pool.submit(alice.transfer("bob", 10, 1), &ledger, 0).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_rejects_nonce_gap() {
        let alice = TestWallet::new();
        let ledger = test_ledger(alice.address());
        let mut pool = pool();

        let result = pool.submit(alice.transfer("bob", 10, 2), &ledger, 0);
        assert!(matches!(
            result,
            Err(LedgerError::Consensus(Violation::NonceGap { expected: 0, found: 2 }))
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_reused_nonces() {
        let alice = TestWallet::new();
        let ledger = test_ledger(alice.address());
        let mut pool = pool();
        let tx = alice.transfer("bob", 10, 0);

        pool.submit(tx.clone(), &ledger, 0).unwrap();
        assert!(matches!(
            pool.submit(tx, &ledger, 0),
            Err(LedgerError::Rejected(Rejection::AlreadyKnown))
        ));
        assert!(matches!(
            pool.submit(alice.transfer("carol", 10, 0), &ledger, 0),
            Err(LedgerError::Consensus(Violation::DuplicateNonce { nonce: 0 }))
        ));
    }

    #[test]
    fn test_queued_spend_counts_against_balance() {
        let alice = TestWallet::new();
        let ledger = test_ledger(alice.address());
        let balance = ledger.balance(alice.address());
        let mut pool = pool();

        pool.submit(alice.transfer("bob", balance - 5, 0), &ledger, 0)
            .unwrap();
        assert!(matches!(
            pool.submit(alice.transfer("bob", 6, 1), &ledger, 0),
            Err(LedgerError::Consensus(Violation::InsufficientBalance {
                required: 6,
                available: 5
            }))
        ));
    }

    #[test]
    fn test_rejects_privileged_and_unsigned() {
        let ledger = test_ledger("genesis");
        let mut pool = pool();

        let credit = Transaction::new_system_credit("bob", 5, 1, 0);
        assert!(matches!(
            pool.submit(credit, &ledger, 0),
            Err(LedgerError::Malformed(_))
        ));
        let unsigned = Transaction::new_transfer("alice", "bob", 5, 0, 0, b"pk");
        assert!(matches!(
            pool.submit(unsigned, &ledger, 0),
            Err(LedgerError::Malformed(_))
        ));
    }

    #[test]
    fn test_full_pool_prunes_expired_first() {
        let alice = TestWallet::new();
        let bob = TestWallet::new();
        let mut ledger = test_ledger(alice.address());
        let block = mine(&ledger, bob.address(), vec![]);
        ledger.accept_block(block).unwrap();
        let mut pool = MemoryPool::new(1, Duration::from_secs(1));

        pool.submit(alice.transfer("carol", 1, 0), &ledger, 0).unwrap();
        assert!(matches!(
            pool.submit(bob.transfer("carol", 1, 0), &ledger, 500),
            Err(LedgerError::Rejected(Rejection::PoolFull { capacity: 1 }))
        ));
        pool.submit(bob.transfer("carol", 1, 0), &ledger, 5_000)
            .unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.snapshot()[0].get_sender(), bob.address());
    }

    #[test]
    fn test_selection_follows_nonce_order() {
        let alice = TestWallet::new();
        let ledger = test_ledger(alice.address());
        let mut pool = pool();
        let first = alice.transfer("bob", 10, 0);
        let second = alice.transfer("bob", 10, 1);
        pool.submit(first.clone(), &ledger, 0).unwrap();
        pool.submit(second.clone(), &ledger, 0).unwrap();

        assert_eq!(pool.select_for_block(10, &ledger), vec![first.clone(), second]);
        assert_eq!(pool.select_for_block(1, &ledger), vec![first]);
    }

    #[test]
    fn test_evict_and_reconcile_after_block() {
        let alice = TestWallet::new();
        let mut ledger = test_ledger(alice.address());
        let mut pool = pool();
        let first = alice.transfer("bob", 10, 0);
        let second = alice.transfer("bob", 10, 1);
        pool.submit(first.clone(), &ledger, 0).unwrap();
        pool.submit(second.clone(), &ledger, 0).unwrap();

        // a competing block confirms `first` without the pool's help
        let block = mine(&ledger, "miner", vec![first]);
        ledger.accept_block(block).unwrap();

        assert_eq!(pool.reconcile(&ledger), 1);
        assert_eq!(pool.snapshot(), vec![second.clone()]);
        assert_eq!(pool.evict(&[second.hash()]), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_resurrect_drops_invalid() {
        let alice = TestWallet::new();
        let ledger = test_ledger(alice.address());
        let mut pool = pool();

        let restored = pool.resurrect(
            vec![alice.transfer("bob", 10, 0), alice.transfer("bob", 10, 5)],
            &ledger,
            0,
        );
        assert_eq!(restored, 1);
        assert_eq!(pool.len(), 1);
    }
}
