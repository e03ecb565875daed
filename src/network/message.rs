//! Peer wire messages.
//!
//! One JSON object per line, adjacently tagged:
//! `{"type":"newBlock","payload":{"block":{...}}}`.

use crate::core::{Block, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::Hash256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub protocol_version: u32,
    /// Random per process, used to detect connections to ourselves
    pub node_id: Uuid,
    pub height: u64,
    pub tip: Hash256,
    pub cumulative_work: u128,
    /// Where this node accepts connections, if anywhere
    pub listen_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Message {
    Version(VersionInfo),
    GetBlocks { locator: Vec<Hash256> },
    Blocks { blocks: Vec<Block>, more: bool },
    NewBlock { block: Block },
    Transaction { transaction: Transaction },
    GetPeers,
    Peers { addresses: Vec<String> },
    Ping { nonce: u64 },
    Pong { nonce: u64 },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::GetBlocks { .. } => "getBlocks",
            Message::Blocks { .. } => "blocks",
            Message::NewBlock { .. } => "newBlock",
            Message::Transaction { .. } => "transaction",
            Message::GetPeers => "getPeers",
            Message::Peers { .. } => "peers",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
        }
    }

    /// One frame, newline terminated.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)
            .map_err(|e| LedgerError::Serialization(format!("Failed to encode {}: {e}", self.kind())))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Anything that does not parse is the sender's fault.
    pub fn decode(frame: &[u8]) -> Result<Message> {
        let frame = frame.strip_suffix(b"\n").unwrap_or(frame);
        serde_json::from_slice(frame)
            .map_err(|e| LedgerError::Malformed(format!("undecodable message: {e}")))
    }
}
