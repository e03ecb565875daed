//! Balance and nonce table materialized from the canonical chain.

use crate::config::ConsensusParams;
use crate::core::{Block, Transaction, TxKind};
use crate::error::{Result, Violation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Account {
    pub balance: u64,
    /// Number of transfers this address has sent; the next one must carry it.
    pub nonce: u64,
}

impl Account {
    fn is_empty(&self) -> bool {
        self.balance == 0 && self.nonce == 0
    }
}

/// Prior values of every account a block touched, in first-touch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockUndo {
    entries: Vec<(String, Option<Account>)>,
}

impl BlockUndo {
    pub fn touched(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(address, _)| address.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountTable {
    accounts: HashMap<String, Account>,
}

impl AccountTable {
    pub fn new() -> AccountTable {
        AccountTable::default()
    }

    pub fn from_accounts(accounts: HashMap<String, Account>) -> AccountTable {
        AccountTable { accounts }
    }

    pub fn get(&self, address: &str) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    /// `None` when the address has never been touched.
    pub fn lookup(&self, address: &str) -> Option<Account> {
        self.accounts.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Account)> {
        self.accounts.iter()
    }

    /// Applies every transaction of `block` in order. Either all of them
    /// apply and the undo record is returned, or the table is left exactly
    /// as it was and the first violation is returned.
    ///
    /// Signatures, rewards and structure are checked by the caller; this
    /// enforces balances, nonces and the system-credit switch.
    pub fn apply_block(&mut self, block: &Block, params: &ConsensusParams) -> Result<BlockUndo> {
        let mut undo = BlockUndo::default();
        for tx in block.get_transactions() {
            if let Err(e) = self.apply_transaction(tx, params, &mut undo) {
                self.revert(&undo);
                return Err(e);
            }
        }
        Ok(undo)
    }

    pub fn revert(&mut self, undo: &BlockUndo) {
        for (address, previous) in undo.entries.iter().rev() {
            match previous {
                Some(account) => {
                    self.accounts.insert(address.clone(), *account);
                }
                None => {
                    self.accounts.remove(address);
                }
            }
        }
    }

    fn apply_transaction(
        &mut self,
        tx: &Transaction,
        params: &ConsensusParams,
        undo: &mut BlockUndo,
    ) -> Result<()> {
        match tx.get_kind() {
            TxKind::Coinbase => self.credit(tx.get_recipient(), tx.get_amount(), undo),
            TxKind::SystemCredit => {
                if !params.allow_system_credit {
                    return Err(Violation::SystemCreditDisabled.into());
                }
                self.credit(tx.get_recipient(), tx.get_amount(), undo)
            }
            TxKind::Transfer => {
                let sender = self.get(tx.get_sender());
                if tx.get_nonce() < sender.nonce {
                    return Err(Violation::StaleNonce {
                        expected: sender.nonce,
                        found: tx.get_nonce(),
                    }
                    .into());
                }
                if tx.get_nonce() > sender.nonce {
                    return Err(Violation::NonceGap {
                        expected: sender.nonce,
                        found: tx.get_nonce(),
                    }
                    .into());
                }
                if sender.balance < tx.get_amount() {
                    return Err(Violation::InsufficientBalance {
                        required: tx.get_amount(),
                        available: sender.balance,
                    }
                    .into());
                }
                self.record(tx.get_sender(), undo);
                self.accounts.insert(
                    tx.get_sender().to_string(),
                    Account {
                        balance: sender.balance - tx.get_amount(),
                        nonce: sender.nonce + 1,
                    },
                );
                self.credit(tx.get_recipient(), tx.get_amount(), undo)
            }
        }
    }

    fn credit(&mut self, address: &str, amount: u64, undo: &mut BlockUndo) -> Result<()> {
        let current = self.get(address);
        let balance = current
            .balance
            .checked_add(amount)
            .ok_or(Violation::BalanceOverflow)?;
        self.record(address, undo);
        self.accounts.insert(
            address.to_string(),
            Account {
                balance,
                nonce: current.nonce,
            },
        );
        Ok(())
    }

    fn record(&self, address: &str, undo: &mut BlockUndo) {
        if undo.entries.iter().any(|(a, _)| a == address) {
            return;
        }
        undo.entries
            .push((address.to_string(), self.accounts.get(address).copied()));
    }

    /// Drops zero accounts so replayed and rolled-back tables compare equal.
    pub fn compact(&mut self) {
        self.accounts.retain(|_, account| !account.is_empty());
    }

    pub(crate) fn set(&mut self, address: &str, account: Option<Account>) {
        match account {
            Some(account) => {
                self.accounts.insert(address.to_string(), account);
            }
            None => {
                self.accounts.remove(address);
            }
        }
    }
}
