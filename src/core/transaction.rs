//! Account-model transactions.
//!
//! A transaction moves `amount` base units from `sender` to `recipient`. The
//! sender's `nonce` must equal the number of transfers it has already had
//! confirmed, which makes replays impossible. Coinbase and system-credit
//! transactions are privileged: they are marked by their kind tag, carry the
//! protocol sender and no signature, and only ever appear inside blocks.

use super::signature::SignatureVerifier;
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, hash_to_hex, serialize, sha256_hash, Hash256};
use serde::{Deserialize, Serialize};

/// Sender used by every privileged transaction.
pub const PROTOCOL_SENDER: &str = "system";

/// Addresses longer than this are rejected as malformed.
pub const MAX_ADDRESS_LEN: usize = 128;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Transfer,
    Coinbase,
    SystemCredit,
}

impl TxKind {
    fn tag(self) -> u8 {
        match self {
            TxKind::Transfer => 0,
            TxKind::Coinbase => 1,
            TxKind::SystemCredit => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    kind: TxKind,
    sender: String,
    recipient: String,
    amount: u64,
    nonce: u64,
    timestamp: i64,
    public_key: Vec<u8>,
    signature: Vec<u8>,
}

impl Transaction {
    /// Unsigned transfer; sign it with [`super::signature::Signer`].
    pub fn new_transfer(
        sender: &str,
        recipient: &str,
        amount: u64,
        nonce: u64,
        timestamp: i64,
        public_key: &[u8],
    ) -> Transaction {
        Transaction {
            kind: TxKind::Transfer,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            nonce,
            timestamp,
            public_key: public_key.to_vec(),
            signature: vec![],
        }
    }

    /// The nonce of a coinbase is the height of its block, so two coinbases
    /// paying the same miner never share a hash.
    pub fn new_coinbase(recipient: &str, reward: u64, height: u64, timestamp: i64) -> Transaction {
        Transaction {
            kind: TxKind::Coinbase,
            sender: PROTOCOL_SENDER.to_string(),
            recipient: recipient.to_string(),
            amount: reward,
            nonce: height,
            timestamp,
            public_key: vec![],
            signature: vec![],
        }
    }

    /// Credit issued by a collaborator outside the ledger (shielded pool
    /// withdrawals, faucets). `reference` distinguishes otherwise identical credits.
    pub fn new_system_credit(
        recipient: &str,
        amount: u64,
        reference: u64,
        timestamp: i64,
    ) -> Transaction {
        Transaction {
            kind: TxKind::SystemCredit,
            sender: PROTOCOL_SENDER.to_string(),
            recipient: recipient.to_string(),
            amount,
            nonce: reference,
            timestamp,
            public_key: vec![],
            signature: vec![],
        }
    }

    /// Canonical hash over every field except the signature. This is both the
    /// transaction id and the message that gets signed.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(
            64 + self.sender.len() + self.recipient.len() + self.public_key.len(),
        );
        data.push(self.kind.tag());
        put_bytes(&mut data, self.sender.as_bytes());
        put_bytes(&mut data, self.recipient.as_bytes());
        data.extend(self.amount.to_be_bytes());
        data.extend(self.nonce.to_be_bytes());
        data.extend(self.timestamp.to_be_bytes());
        put_bytes(&mut data, &self.public_key);
        sha256_hash(&data)
    }

    pub fn hash_hex(&self) -> String {
        hash_to_hex(&self.hash())
    }

    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }

    pub fn get_kind(&self) -> TxKind {
        self.kind
    }

    pub fn get_sender(&self) -> &str {
        self.sender.as_str()
    }

    pub fn get_recipient(&self) -> &str {
        self.recipient.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind == TxKind::Coinbase
    }

    pub fn is_privileged(&self) -> bool {
        self.kind != TxKind::Transfer
    }

    /// Checks that need no chain state.
    pub fn validate_structure(&self) -> Result<()> {
        check_address("recipient", &self.recipient)?;
        if self.is_privileged() {
            if self.sender != PROTOCOL_SENDER {
                return Err(LedgerError::Malformed(format!(
                    "{:?} transaction must come from the protocol sender",
                    self.kind
                )));
            }
            if !self.signature.is_empty() || !self.public_key.is_empty() {
                return Err(LedgerError::Malformed(format!(
                    "{:?} transaction must not be signed",
                    self.kind
                )));
            }
            return Ok(());
        }

        check_address("sender", &self.sender)?;
        if self.sender == PROTOCOL_SENDER {
            return Err(LedgerError::Malformed(
                "transfers cannot spend from the protocol sender".to_string(),
            ));
        }
        if self.amount == 0 {
            return Err(LedgerError::Malformed(
                "transfer amount must be positive".to_string(),
            ));
        }
        if self.public_key.is_empty() || self.signature.is_empty() {
            return Err(LedgerError::Malformed(
                "transfer is missing its public key or signature".to_string(),
            ));
        }
        Ok(())
    }

    /// Privileged transactions have nothing to verify.
    pub fn verify_signature(&self, verifier: &dyn SignatureVerifier) -> bool {
        if self.is_privileged() {
            return true;
        }
        verifier.verify(
            &self.sender,
            &self.public_key,
            &self.hash(),
            &self.signature,
        )
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

fn put_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
    data.extend((bytes.len() as u32).to_be_bytes());
    data.extend(bytes);
}

fn check_address(field: &str, address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(LedgerError::Malformed(format!("{field} address is empty")));
    }
    if address.len() > MAX_ADDRESS_LEN {
        return Err(LedgerError::Malformed(format!(
            "{field} address exceeds {MAX_ADDRESS_LEN} bytes"
        )));
    }
    Ok(())
}
