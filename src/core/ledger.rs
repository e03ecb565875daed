//! The ledger: block tree, canonical chain, fork choice and account state.
//!
//! Blocks pass four gates before anything changes: structure, linkage,
//! proof of work, then semantics (Merkle root, signatures, reward, balances
//! and nonces). A block whose parent is the tip extends the chain. A block on
//! a side branch is validated against that branch's state, rebuilt on a
//! scratch copy of the account table, and becomes canonical only if its branch
//! carries strictly more cumulative work than the current tip.

use crate::config::ConsensusParams;
use crate::core::account::{AccountTable, BlockUndo};
use crate::core::monetary::block_reward;
use crate::core::signature::SignatureVerifier;
use crate::core::{Account, Block, DifficultyAdjustment, ProofOfWork, Transaction};
use crate::error::{LedgerError, Rejection, Result, Violation};
use crate::storage::chain_store::{ChainCommit, ChainStore, StoredBlock};
use crate::utils::{current_timestamp, hash_from_hex, hash_to_hex, Hash256, ZERO_HASH};
use log::{error, info};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

struct BlockEntry {
    block: Block,
    cumulative_work: u128,
    /// Present exactly while the block is on the canonical chain
    undo: Option<BlockUndo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The block became the new tip on top of the old one
    Extended,
    /// The block's branch overtook the canonical chain
    Reorganized { fork_height: u64, depth: u64 },
    /// Valid, stored, but not enough work to become canonical
    SideBranch,
}

#[derive(Debug, Clone)]
pub struct Acceptance {
    pub hash: Hash256,
    pub height: u64,
    pub outcome: AcceptOutcome,
    /// Transactions that just became canonical
    pub confirmed: Vec<Transaction>,
    /// Transfers from blocks that left the canonical chain and were not
    /// re-confirmed by the new branch
    pub abandoned: Vec<Transaction>,
}

impl Acceptance {
    pub fn tip_changed(&self) -> bool {
        self.outcome != AcceptOutcome::SideBranch
    }
}

/// Block lookup key for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Hash(Hash256),
    Height(u64),
}

impl FromStr for BlockRef {
    type Err = LedgerError;

    /// 64 hex characters name a hash, anything else must be a height.
    fn from_str(s: &str) -> Result<BlockRef> {
        if s.len() == 64 {
            return Ok(BlockRef::Hash(hash_from_hex(s)?));
        }
        s.parse::<u64>()
            .map(BlockRef::Height)
            .map_err(|_| LedgerError::Malformed(format!("'{s}' is neither a block hash nor a height")))
    }
}

pub struct Ledger {
    params: ConsensusParams,
    verifier: Arc<dyn SignatureVerifier>,
    blocks: HashMap<Hash256, BlockEntry>,
    canonical: Vec<Hash256>,
    accounts: AccountTable,
    cumulative_work: u128,
    store: Option<ChainStore>,
    halted: Option<String>,
}

impl Ledger {
    /// In-memory ledger holding only the genesis block.
    pub fn new(params: ConsensusParams, verifier: Arc<dyn SignatureVerifier>) -> Result<Ledger> {
        Self::from_genesis(params, verifier, None)
    }

    /// Opens (or creates) a persistent ledger. An existing store resumes from
    /// its last committed tip without replaying the chain.
    pub fn open(
        params: ConsensusParams,
        verifier: Arc<dyn SignatureVerifier>,
        path: &Path,
    ) -> Result<Ledger> {
        let store = ChainStore::open(path)?;
        let loaded = match store.load()? {
            Some(loaded) => loaded,
            None => return Self::from_genesis(params, verifier, Some(store)),
        };

        params.validate()?;
        let genesis = Block::genesis(&params)?;
        if loaded.genesis != genesis.hash() {
            return Err(LedgerError::Config(format!(
                "stored chain starts at {}, these consensus parameters produce {}",
                hash_to_hex(&loaded.genesis),
                genesis.hash_hex()
            )));
        }

        let mut undo = loaded.undo;
        let blocks = loaded
            .blocks
            .into_iter()
            .map(|(hash, stored)| {
                let entry = BlockEntry {
                    block: stored.block,
                    cumulative_work: stored.cumulative_work,
                    undo: undo.remove(&hash),
                };
                (hash, entry)
            })
            .collect::<HashMap<_, _>>();
        let cumulative_work = blocks
            .get(&loaded.tip)
            .map(|entry| entry.cumulative_work)
            .ok_or_else(|| LedgerError::Database("tip block is missing".to_string()))?;

        let mut ledger = Ledger {
            params,
            verifier,
            blocks,
            canonical: loaded.canonical,
            accounts: AccountTable::from_accounts(loaded.accounts),
            cumulative_work,
            store: Some(store),
            halted: None,
        };
        ledger.check_invariants()?;
        info!(
            "Resumed ledger at height {} (tip {}, {} known blocks)",
            ledger.height(),
            hash_to_hex(&ledger.tip_hash()),
            ledger.blocks.len()
        );
        Ok(ledger)
    }

    fn from_genesis(
        params: ConsensusParams,
        verifier: Arc<dyn SignatureVerifier>,
        store: Option<ChainStore>,
    ) -> Result<Ledger> {
        params.validate()?;
        let genesis = Block::genesis(&params)?;
        let hash = genesis.hash();
        let mut accounts = AccountTable::new();
        accounts.apply_block(&genesis, &params)?;
        let work = genesis.work();

        if let Some(store) = &store {
            let initial: Vec<(String, Account)> = accounts
                .iter()
                .map(|(address, account)| (address.clone(), *account))
                .collect();
            store.initialize(
                &StoredBlock {
                    block: genesis.clone(),
                    cumulative_work: work,
                },
                &initial,
            )?;
        }
        info!("Initialized ledger with genesis {}", hash_to_hex(&hash));

        let mut blocks = HashMap::new();
        blocks.insert(
            hash,
            BlockEntry {
                block: genesis,
                cumulative_work: work,
                undo: None,
            },
        );
        Ok(Ledger {
            params,
            verifier,
            blocks,
            canonical: vec![hash],
            accounts,
            cumulative_work: work,
            store,
            halted: None,
        })
    }

    /// Runs a candidate block through every gate and, if it passes, records
    /// it. Rejections leave the ledger untouched.
    pub fn accept_block(&mut self, block: Block) -> Result<Acceptance> {
        self.ensure_running()?;
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return Err(LedgerError::Rejected(Rejection::AlreadyKnown));
        }

        self.check_structure(&block)?;
        let parent_hash = *block.get_previous_hash();
        let parent = match self.blocks.get(&parent_hash) {
            Some(entry) => entry,
            None => return Err(Violation::UnknownParent.into()),
        };
        let parent_work = parent.cumulative_work;
        Self::check_linkage(&block, &parent.block, &self.params)?;
        self.check_work(&block)?;
        self.check_semantics(&block)?;

        let cumulative_work = parent_work.saturating_add(block.work());
        if parent_hash == self.tip_hash() {
            self.extend(hash, block, cumulative_work)
        } else {
            self.accept_on_branch(hash, block, cumulative_work)
        }
    }

    fn extend(&mut self, hash: Hash256, block: Block, cumulative_work: u128) -> Result<Acceptance> {
        let undo = self.accounts.apply_block(&block, &self.params)?;
        let height = block.get_height();
        let work = block.work();

        if let Some(store) = &self.store {
            let commit = ChainCommit {
                blocks: vec![(
                    hash,
                    StoredBlock {
                        block: block.clone(),
                        cumulative_work,
                    },
                )],
                canonical: vec![(height, hash)],
                undo_put: vec![(hash, undo.clone())],
                accounts: self.account_values(undo.touched()),
                tip: hash,
                ..ChainCommit::default()
            };
            if let Err(e) = store.commit(&commit) {
                self.accounts.revert(&undo);
                return Err(e);
            }
        }

        let confirmed = block.get_transactions().to_vec();
        self.blocks.insert(
            hash,
            BlockEntry {
                block,
                cumulative_work,
                undo: Some(undo),
            },
        );
        self.canonical.push(hash);
        self.cumulative_work += work;
        self.check_invariants()?;

        info!(
            "Accepted block {} at height {height} ({} transactions)",
            hash_to_hex(&hash),
            confirmed.len()
        );
        Ok(Acceptance {
            hash,
            height,
            outcome: AcceptOutcome::Extended,
            confirmed,
            abandoned: vec![],
        })
    }

    fn accept_on_branch(
        &mut self,
        hash: Hash256,
        block: Block,
        cumulative_work: u128,
    ) -> Result<Acceptance> {
        let (fork_height, branch) = self.branch_to_fork(block.get_previous_hash())?;
        let depth = self.height() - fork_height;
        if depth > self.params.max_reorg_depth {
            return Err(Violation::ReorgTooDeep {
                depth,
                limit: self.params.max_reorg_depth,
            }
            .into());
        }

        let (mut scratch, branch_undos) = match self.branch_state(fork_height, &branch) {
            Ok(state) => state,
            Err(e) => return Err(self.halt(format!("side branch no longer replays: {e}"))),
        };
        let candidate_undo = scratch.apply_block(&block, &self.params)?;
        let height = block.get_height();

        if cumulative_work <= self.cumulative_work {
            if let Some(store) = &self.store {
                store.commit(&ChainCommit {
                    blocks: vec![(
                        hash,
                        StoredBlock {
                            block: block.clone(),
                            cumulative_work,
                        },
                    )],
                    tip: self.tip_hash(),
                    ..ChainCommit::default()
                })?;
            }
            self.blocks.insert(
                hash,
                BlockEntry {
                    block,
                    cumulative_work,
                    undo: None,
                },
            );
            info!(
                "Stored side-branch block {} at height {height} (fork at {fork_height})",
                hash_to_hex(&hash)
            );
            return Ok(Acceptance {
                hash,
                height,
                outcome: AcceptOutcome::SideBranch,
                confirmed: vec![],
                abandoned: vec![],
            });
        }

        self.reorganize(
            hash,
            block,
            cumulative_work,
            fork_height,
            branch_undos,
            candidate_undo,
            scratch,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn reorganize(
        &mut self,
        hash: Hash256,
        block: Block,
        cumulative_work: u128,
        fork_height: u64,
        branch_undos: Vec<(Hash256, BlockUndo)>,
        candidate_undo: BlockUndo,
        scratch: AccountTable,
    ) -> Result<Acceptance> {
        let old_height = self.height();
        let height = block.get_height();
        let abandoned_hashes = self.canonical[fork_height as usize + 1..].to_vec();

        let mut new_canonical: Vec<Hash256> = branch_undos.iter().map(|(h, _)| *h).collect();
        new_canonical.push(hash);

        let mut confirmed = Vec::new();
        for h in &new_canonical[..new_canonical.len() - 1] {
            confirmed.extend(self.entry(h)?.block.get_transactions().iter().cloned());
        }
        confirmed.extend(block.get_transactions().iter().cloned());
        let confirmed_ids: HashSet<Hash256> = confirmed.iter().map(Transaction::hash).collect();

        let mut abandoned = Vec::new();
        let mut dirty: HashSet<String> = HashSet::new();
        for h in &abandoned_hashes {
            let entry = self.entry(h)?;
            abandoned.extend(
                entry
                    .block
                    .get_transactions()
                    .iter()
                    .filter(|tx| !tx.is_privileged() && !confirmed_ids.contains(&tx.hash()))
                    .cloned(),
            );
            if let Some(undo) = &entry.undo {
                dirty.extend(undo.touched().map(str::to_string));
            }
        }
        for (_, undo) in &branch_undos {
            dirty.extend(undo.touched().map(str::to_string));
        }
        dirty.extend(candidate_undo.touched().map(str::to_string));

        if let Some(store) = &self.store {
            let mut undo_put = branch_undos.clone();
            undo_put.push((hash, candidate_undo.clone()));
            let commit = ChainCommit {
                blocks: vec![(
                    hash,
                    StoredBlock {
                        block: block.clone(),
                        cumulative_work,
                    },
                )],
                canonical: new_canonical
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (fork_height + 1 + i as u64, *h))
                    .collect(),
                stale_heights: (height + 1..=old_height).collect(),
                undo_put,
                undo_remove: abandoned_hashes.clone(),
                accounts: dirty
                    .iter()
                    .map(|address| (address.clone(), scratch.lookup(address)))
                    .collect(),
                tip: hash,
            };
            store.commit(&commit)?;
        }

        let mut work = self.cumulative_work;
        for h in &abandoned_hashes {
            if let Some(entry) = self.blocks.get_mut(h) {
                entry.undo = None;
                work -= entry.block.work();
            }
        }
        for (h, undo) in branch_undos {
            if let Some(entry) = self.blocks.get_mut(&h) {
                work += entry.block.work();
                entry.undo = Some(undo);
            }
        }
        work += block.work();
        self.blocks.insert(
            hash,
            BlockEntry {
                block,
                cumulative_work,
                undo: Some(candidate_undo),
            },
        );
        self.canonical.truncate(fork_height as usize + 1);
        self.canonical.extend(new_canonical);
        self.accounts = scratch;
        self.cumulative_work = work;
        self.check_invariants()?;

        let depth = old_height - fork_height;
        info!(
            "Reorganized to {} at height {height}: rolled back {depth} blocks to fork at {fork_height}, {} transactions abandoned",
            hash_to_hex(&hash),
            abandoned.len()
        );
        Ok(Acceptance {
            hash,
            height,
            outcome: AcceptOutcome::Reorganized { fork_height, depth },
            confirmed,
            abandoned,
        })
    }

    /// Walks back from `start` until it meets the canonical chain. Returns the
    /// fork height and the side-branch hashes above it, oldest first.
    fn branch_to_fork(&self, start: &Hash256) -> Result<(u64, Vec<Hash256>)> {
        let mut branch = Vec::new();
        let mut cursor = *start;
        loop {
            let entry = self.entry(&cursor)?;
            let height = entry.block.get_height();
            if self.canonical.get(height as usize) == Some(&cursor) {
                branch.reverse();
                return Ok((height, branch));
            }
            branch.push(cursor);
            cursor = *entry.block.get_previous_hash();
        }
    }

    /// Account table as of the tip of `branch`, plus undo records for each of
    /// its blocks.
    fn branch_state(
        &self,
        fork_height: u64,
        branch: &[Hash256],
    ) -> Result<(AccountTable, Vec<(Hash256, BlockUndo)>)> {
        let mut scratch = self.accounts.clone();
        for h in self.canonical[fork_height as usize + 1..].iter().rev() {
            let undo = self.entry(h)?.undo.as_ref().ok_or_else(|| {
                LedgerError::Invariant(format!("canonical block {} has no undo", hash_to_hex(h)))
            })?;
            scratch.revert(undo);
        }
        let mut undos = Vec::with_capacity(branch.len());
        for h in branch {
            let undo = scratch.apply_block(&self.entry(h)?.block, &self.params)?;
            undos.push((*h, undo));
        }
        Ok((scratch, undos))
    }

    fn check_structure(&self, block: &Block) -> Result<()> {
        let transactions = block.get_transactions();
        if transactions.is_empty() {
            return Err(LedgerError::Malformed("block has no transactions".to_string()));
        }
        if transactions.len() > self.params.max_block_transactions {
            return Err(LedgerError::Malformed(format!(
                "block carries {} transactions, limit is {}",
                transactions.len(),
                self.params.max_block_transactions
            )));
        }
        match block.coinbase() {
            Some(coinbase) if coinbase.get_nonce() == block.get_height() => {}
            Some(_) => {
                return Err(LedgerError::Malformed(
                    "coinbase nonce must equal the block height".to_string(),
                ))
            }
            None => {
                return Err(LedgerError::Malformed(
                    "first transaction must be the coinbase".to_string(),
                ))
            }
        }
        let mut seen = HashSet::with_capacity(transactions.len());
        for (index, tx) in transactions.iter().enumerate() {
            if index > 0 && tx.is_coinbase() {
                return Err(LedgerError::Malformed(format!(
                    "extra coinbase at position {index}"
                )));
            }
            tx.validate_structure()?;
            if !seen.insert(tx.hash()) {
                return Err(LedgerError::Malformed(format!(
                    "transaction {} appears twice",
                    tx.hash_hex()
                )));
            }
        }
        Ok(())
    }

    fn check_linkage(block: &Block, parent: &Block, params: &ConsensusParams) -> Result<()> {
        let expected = parent.get_height() + 1;
        if block.get_height() != expected {
            return Err(Violation::BadHeight {
                expected,
                found: block.get_height(),
            }
            .into());
        }
        if block.get_timestamp() < parent.get_timestamp() {
            return Err(Violation::TimestampBeforeParent.into());
        }
        if block.get_timestamp() > current_timestamp()? + params.max_future_block_time_ms {
            return Err(Violation::TimestampTooFarAhead.into());
        }
        Ok(())
    }

    fn check_work(&self, block: &Block) -> Result<()> {
        let expected = self.difficulty_for_child(block.get_previous_hash())?;
        if block.get_difficulty() != expected {
            return Err(Violation::WrongDifficulty {
                expected,
                found: block.get_difficulty(),
            }
            .into());
        }
        if !ProofOfWork::verify(block.header(), expected) {
            return Err(Violation::InsufficientWork.into());
        }
        Ok(())
    }

    fn check_semantics(&self, block: &Block) -> Result<()> {
        if !block.verify_merkle_root() {
            return Err(Violation::MerkleMismatch.into());
        }
        let expected = block_reward(block.get_height(), &self.params);
        if let Some(coinbase) = block.coinbase() {
            if coinbase.get_amount() != expected {
                return Err(Violation::WrongReward {
                    expected,
                    found: coinbase.get_amount(),
                }
                .into());
            }
        }
        let verifier = self.verifier.as_ref();
        if block
            .get_transactions()
            .iter()
            .any(|tx| !tx.verify_signature(verifier))
        {
            return Err(Violation::BadSignature.into());
        }
        Ok(())
    }

    /// Difficulty a child of `parent_hash` must carry.
    pub fn difficulty_for_child(&self, parent_hash: &Hash256) -> Result<u32> {
        let parent = match self.blocks.get(parent_hash) {
            Some(entry) => &entry.block,
            None => return Err(Violation::UnknownParent.into()),
        };
        let height = parent.get_height() + 1;
        if !DifficultyAdjustment::is_retarget_height(height, &self.params) {
            return Ok(parent.get_difficulty());
        }

        // genesis carries a configured timestamp, not a mined one
        let window = self.params.retarget_window as usize;
        let mut timestamps = Vec::with_capacity(window);
        let mut cursor = Some(parent);
        while let Some(block) = cursor {
            if timestamps.len() == window || block.get_height() == 0 {
                break;
            }
            timestamps.push(block.get_timestamp());
            cursor = self.block_by_hash(block.get_previous_hash());
        }
        timestamps.reverse();
        Ok(DifficultyAdjustment::next_difficulty(
            height,
            parent.get_difficulty(),
            &timestamps,
            &self.params,
        ))
    }

    pub fn next_difficulty(&self) -> Result<u32> {
        self.difficulty_for_child(&self.tip_hash())
    }

    /// Unmined block on `parent` paying the block reward to `miner`. The
    /// body is truncated to the block size limit.
    pub fn template_on(
        &self,
        parent_hash: &Hash256,
        miner: &str,
        mut transactions: Vec<Transaction>,
        timestamp: i64,
    ) -> Result<Block> {
        let parent = match self.blocks.get(parent_hash) {
            Some(entry) => &entry.block,
            None => return Err(Violation::UnknownParent.into()),
        };
        let height = parent.get_height() + 1;
        let timestamp = timestamp.max(parent.get_timestamp());
        let coinbase =
            Transaction::new_coinbase(miner, block_reward(height, &self.params), height, timestamp);
        transactions.truncate(self.params.max_block_transactions.saturating_sub(1));

        let mut body = Vec::with_capacity(transactions.len() + 1);
        body.push(coinbase);
        body.extend(transactions);
        Ok(Block::assemble(
            *parent_hash,
            height,
            timestamp,
            self.difficulty_for_child(parent_hash)?,
            body,
        ))
    }

    pub fn block_template(&self, miner: &str, transactions: Vec<Transaction>) -> Result<Block> {
        self.template_on(&self.tip_hash(), miner, transactions, current_timestamp()?)
    }

    /// Block hashes at exponentially spaced heights from the tip back to
    /// genesis, so a peer can find where our chains diverge.
    pub fn locator(&self) -> Vec<Hash256> {
        let mut locator = Vec::new();
        let mut height = self.height();
        let mut step = 1u64;
        loop {
            locator.push(self.canonical[height as usize]);
            if height == 0 {
                break;
            }
            if locator.len() >= 10 {
                step *= 2;
            }
            height = height.saturating_sub(step);
        }
        locator
    }

    /// Canonical blocks following the first locator entry we recognize,
    /// at most `limit` of them, and whether more remain.
    pub fn blocks_after(&self, locator: &[Hash256], limit: usize) -> (Vec<Block>, bool) {
        let start = locator.iter().find_map(|hash| {
            self.blocks
                .get(hash)
                .map(|entry| entry.block.get_height())
                .filter(|height| self.canonical.get(*height as usize) == Some(hash))
        });
        let start = match start {
            Some(height) => height as usize + 1,
            None => return (vec![], false),
        };
        let end = start.saturating_add(limit).min(self.canonical.len());
        let blocks = self.canonical[start.min(end)..end]
            .iter()
            .filter_map(|hash| self.block_by_hash(hash).cloned())
            .collect();
        (blocks, end < self.canonical.len())
    }

    /// Replays the canonical chain from genesis through every gate and
    /// returns the resulting account table.
    pub fn replay_from_genesis(&self) -> Result<AccountTable> {
        let mut table = AccountTable::new();
        let mut work: u128 = 0;
        let mut parent: Option<&Block> = None;
        for (height, hash) in self.canonical.iter().enumerate() {
            let block = &self.entry(hash)?.block;
            let replayed = match parent {
                None => Self::check_genesis(block, &self.params),
                Some(parent) => Self::check_linkage(block, parent, &self.params)
                    .and_then(|_| self.check_work(block)),
            }
            .and_then(|_| self.check_structure(block))
            .and_then(|_| self.check_semantics(block))
            .and_then(|_| table.apply_block(block, &self.params).map(|_| ()));
            if let Err(e) = replayed {
                return Err(LedgerError::Invariant(format!(
                    "block {} at height {height} fails replay: {e}",
                    hash_to_hex(hash)
                )));
            }
            work += block.work();
            parent = Some(block);
        }
        if work != self.cumulative_work {
            return Err(LedgerError::Invariant(format!(
                "replayed work {work} differs from recorded {}",
                self.cumulative_work
            )));
        }
        Ok(table)
    }

    /// Confirms the account table matches a full replay.
    pub fn verify_integrity(&self) -> Result<()> {
        let mut replayed = self.replay_from_genesis()?;
        replayed.compact();
        let mut current = self.accounts.clone();
        current.compact();
        if replayed != current {
            return Err(LedgerError::Invariant(
                "account table diverges from chain replay".to_string(),
            ));
        }
        Ok(())
    }

    fn check_genesis(block: &Block, params: &ConsensusParams) -> Result<()> {
        if block.get_height() != 0
            || block.get_previous_hash() != &ZERO_HASH
            || block.get_difficulty() != params.initial_difficulty
            || !ProofOfWork::validate(block.header())
        {
            return Err(LedgerError::Invariant("genesis block is not valid".to_string()));
        }
        Ok(())
    }

    fn check_invariants(&mut self) -> Result<()> {
        let tip = self.tip_hash();
        let problem = match self.blocks.get(&tip) {
            None => Some("tip block is not indexed".to_string()),
            Some(entry) if entry.cumulative_work != self.cumulative_work => Some(format!(
                "cumulative work {} disagrees with tip record {}",
                self.cumulative_work, entry.cumulative_work
            )),
            Some(entry) if entry.block.get_height() + 1 != self.canonical.len() as u64 => Some(
                format!(
                    "tip height {} does not match chain length {}",
                    entry.block.get_height(),
                    self.canonical.len()
                ),
            ),
            Some(entry) if self.canonical.len() > 1 => {
                let parent = self.canonical[self.canonical.len() - 2];
                (*entry.block.get_previous_hash() != parent)
                    .then(|| "tip does not link to its predecessor".to_string())
            }
            Some(_) => None,
        };
        match problem {
            Some(reason) => Err(self.halt(reason)),
            None => Ok(()),
        }
    }

    fn halt(&mut self, reason: String) -> LedgerError {
        error!("Ledger halted: {reason}");
        self.halted = Some(reason.clone());
        LedgerError::Invariant(reason)
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(LedgerError::Invariant(format!("ledger is halted: {reason}"))),
            None => Ok(()),
        }
    }

    fn entry(&self, hash: &Hash256) -> Result<&BlockEntry> {
        self.blocks.get(hash).ok_or_else(|| {
            LedgerError::Invariant(format!("block {} is not indexed", hash_to_hex(hash)))
        })
    }

    fn account_values<'a>(
        &self,
        addresses: impl Iterator<Item = &'a str>,
    ) -> Vec<(String, Option<Account>)> {
        addresses
            .map(|address| (address.to_string(), self.accounts.lookup(address)))
            .collect()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn verifier(&self) -> &dyn SignatureVerifier {
        self.verifier.as_ref()
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.canonical[self.canonical.len() - 1]
    }

    pub fn tip(&self) -> &Block {
        &self.blocks[&self.tip_hash()].block
    }

    pub fn height(&self) -> u64 {
        self.canonical.len() as u64 - 1
    }

    pub fn cumulative_work(&self) -> u128 {
        self.cumulative_work
    }

    pub fn account(&self, address: &str) -> Account {
        self.accounts.get(address)
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.accounts.get(address).balance
    }

    pub fn next_nonce(&self, address: &str) -> u64 {
        self.accounts.get(address).nonce
    }

    pub fn accounts(&self) -> &AccountTable {
        &self.accounts
    }

    pub fn contains_block(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn is_canonical(&self, hash: &Hash256) -> bool {
        self.blocks
            .get(hash)
            .map(|entry| self.canonical.get(entry.block.get_height() as usize) == Some(hash))
            .unwrap_or(false)
    }

    pub fn known_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Option<&Block> {
        self.blocks.get(hash).map(|entry| &entry.block)
    }

    pub fn block_at(&self, height: u64) -> Option<&Block> {
        self.canonical
            .get(height as usize)
            .and_then(|hash| self.block_by_hash(hash))
    }

    pub fn get_block(&self, key: BlockRef) -> Option<&Block> {
        match key {
            BlockRef::Hash(hash) => self.block_by_hash(&hash),
            BlockRef::Height(height) => self.block_at(height),
        }
    }
}
