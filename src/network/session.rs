//! One peer connection.
//!
//! A session runs on its own thread. Each turn it flushes queued outbound
//! messages, waits one poll interval for a frame, handles it, and then
//! checks the violation count, liveness and ping schedule. Peer input only
//! reaches the ledger through the node's submit methods.

use super::message::{Message, VersionInfo, PROTOCOL_VERSION};
use super::synchronizer::SyncContext;
use super::transport::Transport;
use crate::core::Block;
use crate::error::{ErrorClass, LedgerError, Rejection, Result, Violation};
use crate::node::PeerId;
use crate::utils::{hash_to_hex, Hash256};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;

/// Longest locator we answer; a chain of any realistic height needs far fewer.
const MAX_LOCATOR_LEN: usize = 256;
/// Most addresses accepted from one `peers` message.
const MAX_PEER_ADDRESSES: usize = 1_000;
/// Most addresses sent in one `peers` message.
const SHARED_PEER_ADDRESSES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Registered, nothing sent yet
    Connecting,
    /// Our version is out, theirs has not arrived or we are still
    /// catching up with them
    Handshaking,
    /// Versions exchanged and we are not behind
    Synced,
    /// Exchanging blocks, transactions or pings in steady state
    Active,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Shutdown,
    TransportClosed(String),
    TooManyViolations(u32),
    LivenessTimeout,
    SelfConnection,
    IncompatibleVersion(u32),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Shutdown => write!(f, "shutting down"),
            DisconnectReason::TransportClosed(msg) => write!(f, "transport closed: {msg}"),
            DisconnectReason::TooManyViolations(n) => write!(f, "{n} protocol violations"),
            DisconnectReason::LivenessTimeout => write!(f, "peer went silent"),
            DisconnectReason::SelfConnection => write!(f, "connected to ourselves"),
            DisconnectReason::IncompatibleVersion(v) => {
                write!(f, "protocol version {v}, we speak {PROTOCOL_VERSION}")
            }
        }
    }
}

enum Flow {
    Continue,
    Disconnect(DisconnectReason),
}

pub struct PeerSession {
    id: PeerId,
    transport: Box<dyn Transport>,
    direction: Direction,
    ctx: Arc<SyncContext>,
    outbound: Receiver<Message>,
    state: PeerState,
    remote: Option<VersionInfo>,
    violations: u32,
    last_heard: Instant,
    last_ping: Instant,
    pending_ping: Option<u64>,
}

impl PeerSession {
    pub fn new(
        id: PeerId,
        transport: Box<dyn Transport>,
        direction: Direction,
        ctx: Arc<SyncContext>,
        outbound: Receiver<Message>,
    ) -> PeerSession {
        let now = Instant::now();
        PeerSession {
            id,
            transport,
            direction,
            ctx,
            outbound,
            state: PeerState::Connecting,
            remote: None,
            violations: 0,
            last_heard: now,
            last_ping: now,
            pending_ping: None,
        }
    }

    /// Drives the connection until it ends and returns why it ended.
    pub fn run(mut self) -> DisconnectReason {
        let label = self.transport.peer_label();
        debug!("Session {} with {label} started ({:?})", self.id, self.direction);
        let reason = self.drive();
        self.set_state(PeerState::Disconnected);
        self.transport.close();
        self.ctx.unregister(self.id);
        match &reason {
            DisconnectReason::Shutdown => info!("Closed session with {label}"),
            reason => warn!("Disconnected from {label}: {reason}"),
        }
        reason
    }

    fn drive(&mut self) -> DisconnectReason {
        let greeting = self
            .ctx
            .version_info()
            .and_then(|info| self.send(&Message::Version(info)));
        if let Err(e) = greeting {
            return DisconnectReason::TransportClosed(e.to_string());
        }
        self.set_state(PeerState::Handshaking);

        let poll = self.ctx.settings.poll_interval();
        loop {
            if self.ctx.shutdown.is_cancelled() {
                return DisconnectReason::Shutdown;
            }
            while let Ok(message) = self.outbound.try_recv() {
                if let Err(e) = self.send(&message) {
                    return DisconnectReason::TransportClosed(e.to_string());
                }
            }

            match self.transport.receive(poll) {
                Ok(Some(frame)) => {
                    self.last_heard = Instant::now();
                    if let Flow::Disconnect(reason) = self.handle_frame(&frame) {
                        return reason;
                    }
                }
                Ok(None) => {}
                Err(e) => return DisconnectReason::TransportClosed(e.to_string()),
            }

            if self.violations >= self.ctx.settings.max_violations {
                return DisconnectReason::TooManyViolations(self.violations);
            }
            if self.last_heard.elapsed() > self.ctx.settings.liveness_timeout() {
                return DisconnectReason::LivenessTimeout;
            }
            if self.remote.is_some() && self.last_ping.elapsed() >= self.ctx.settings.ping_interval()
            {
                let nonce = rand::random::<u64>();
                if let Err(e) = self.send(&Message::Ping { nonce }) {
                    return DisconnectReason::TransportClosed(e.to_string());
                }
                self.pending_ping = Some(nonce);
                self.last_ping = Instant::now();
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Flow {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                self.violation(&e);
                return Flow::Continue;
            }
        };
        let kind = message.kind();
        debug!("Received {kind} from {}", self.transport.peer_label());
        match self.handle(message) {
            Ok(flow) => flow,
            Err(e) if e.class() == ErrorClass::TransientNetworkFailure => {
                Flow::Disconnect(DisconnectReason::TransportClosed(e.to_string()))
            }
            Err(e) => {
                error!(
                    "Failed to handle {kind} from {}: {e}",
                    self.transport.peer_label()
                );
                Flow::Continue
            }
        }
    }

    fn handle(&mut self, message: Message) -> Result<Flow> {
        let message = match message {
            Message::Version(info) => return self.handle_version(info),
            message => message,
        };
        if self.remote.is_none() {
            self.violation(&LedgerError::Malformed(format!(
                "{} before version",
                message.kind()
            )));
            return Ok(Flow::Continue);
        }

        match message {
            Message::Version(_) => {}
            Message::GetBlocks { locator } => self.handle_get_blocks(locator)?,
            Message::Blocks { blocks, more } => self.handle_blocks(blocks, more)?,
            Message::NewBlock { block } => self.handle_new_block(block)?,
            Message::Transaction { transaction } => {
                self.mark_active();
                if self.ctx.mark_seen(transaction.hash()) {
                    match self
                        .ctx
                        .node
                        .submit_transaction_from(transaction, Some(self.id))
                    {
                        Ok(hash) => debug!("Accepted relayed transaction {}", hash_to_hex(&hash)),
                        Err(e) => self.reject(&e),
                    }
                }
            }
            Message::GetPeers => {
                let mut addresses = self.ctx.active_listen_addrs();
                addresses.extend(self.ctx.peers.get_known_addresses()?);
                addresses.sort();
                addresses.dedup();
                addresses.truncate(SHARED_PEER_ADDRESSES);
                self.send(&Message::Peers { addresses })?;
            }
            Message::Peers { addresses } => {
                if addresses.len() > MAX_PEER_ADDRESSES {
                    self.violation(&LedgerError::Malformed(format!(
                        "{} peer addresses in one message",
                        addresses.len()
                    )));
                } else {
                    let added = self.ctx.peers.add_known(addresses)?;
                    if added > 0 {
                        debug!("Learned {added} peer addresses");
                    }
                }
            }
            Message::Ping { nonce } => {
                self.mark_active();
                self.send(&Message::Pong { nonce })?;
            }
            Message::Pong { nonce } => {
                if self.pending_ping == Some(nonce) {
                    self.pending_ping = None;
                    self.mark_active();
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn handle_version(&mut self, info: VersionInfo) -> Result<Flow> {
        if self.remote.is_some() {
            self.violation(&LedgerError::Malformed("repeated version".to_string()));
            return Ok(Flow::Continue);
        }
        if info.node_id == self.ctx.node_id {
            return Ok(Flow::Disconnect(DisconnectReason::SelfConnection));
        }
        if info.protocol_version != PROTOCOL_VERSION {
            return Ok(Flow::Disconnect(DisconnectReason::IncompatibleVersion(
                info.protocol_version,
            )));
        }

        info!(
            "Handshake with {} (height {}, work {})",
            self.transport.peer_label(),
            info.height,
            info.cumulative_work
        );
        if let Some(addr) = &info.listen_addr {
            self.ctx.peers.add_known([addr.clone()])?;
        }
        let behind = info.cumulative_work > self.ctx.node.get_cumulative_work()?;
        self.remote = Some(info.clone());
        self.ctx.set_remote(self.id, info);

        if behind {
            self.request_blocks()?;
        } else {
            self.set_state(PeerState::Synced);
        }
        self.send(&Message::GetPeers)?;
        Ok(Flow::Continue)
    }

    fn handle_get_blocks(&mut self, locator: Vec<Hash256>) -> Result<()> {
        if locator.len() > MAX_LOCATOR_LEN {
            self.violation(&LedgerError::Malformed(format!(
                "locator with {} entries",
                locator.len()
            )));
            return Ok(());
        }
        let (blocks, more) = self
            .ctx
            .node
            .blocks_after(&locator, self.ctx.settings.sync_batch_size)?;
        debug!(
            "Serving {} blocks to {} (more: {more})",
            blocks.len(),
            self.transport.peer_label()
        );
        self.send(&Message::Blocks { blocks, more })
    }

    fn handle_blocks(&mut self, blocks: Vec<Block>, more: bool) -> Result<()> {
        if blocks.len() > self.ctx.settings.sync_batch_size {
            self.violation(&LedgerError::Malformed(format!(
                "batch of {} blocks",
                blocks.len()
            )));
            return Ok(());
        }

        let received = blocks.len();
        let mut accepted = 0;
        // last block of the batch we now hold, whether new or already stored
        let mut resume_from = None;
        for block in blocks {
            let hash = block.hash();
            self.ctx.mark_seen(hash);
            match self.ctx.node.submit_block_from(block, Some(self.id)) {
                Ok(_) => {
                    accepted += 1;
                    resume_from = Some(hash);
                }
                Err(LedgerError::Rejected(Rejection::AlreadyKnown)) => resume_from = Some(hash),
                Err(e) if e.is_peer_fault() => {
                    self.violation(&e);
                    return Ok(());
                }
                Err(e) => {
                    self.reject(&e);
                    resume_from = None;
                    break;
                }
            }
        }
        if received > 0 {
            info!(
                "Synced {accepted} of {received} blocks from {}",
                self.transport.peer_label()
            );
        }

        match resume_from.filter(|_| more) {
            Some(last) => self.request_blocks_after(last),
            None => {
                if self.state == PeerState::Handshaking {
                    self.set_state(PeerState::Synced);
                }
                Ok(())
            }
        }
    }

    fn handle_new_block(&mut self, block: Block) -> Result<()> {
        self.mark_active();
        let hash = block.hash();
        if !self.ctx.mark_seen(hash) {
            return Ok(());
        }
        match self.ctx.node.submit_block_from(block, Some(self.id)) {
            Ok(_) => Ok(()),
            Err(LedgerError::Consensus(Violation::UnknownParent)) => {
                // let the block be processed again once we have its ancestors
                self.ctx.forget_seen(&hash);
                self.request_blocks()
            }
            Err(e) => {
                self.reject(&e);
                Ok(())
            }
        }
    }

    fn request_blocks(&mut self) -> Result<()> {
        let locator = self.ctx.node.locator()?;
        self.send(&Message::GetBlocks { locator })
    }

    /// Continues a batch transfer past `last`, which may sit on a side
    /// branch our own locator would never name.
    fn request_blocks_after(&mut self, last: Hash256) -> Result<()> {
        let mut locator = self.ctx.node.locator()?;
        locator.insert(0, last);
        locator.truncate(MAX_LOCATOR_LEN);
        self.send(&Message::GetBlocks { locator })
    }

    /// Sorts a failed submission into peer fault, benign, or local trouble.
    fn reject(&mut self, e: &LedgerError) {
        if e.is_peer_fault() {
            self.violation(e);
        } else if e.class() == ErrorClass::InternalInvariantFailure
            || e.class() == ErrorClass::Environment
        {
            error!("Local failure on input from {}: {e}", self.transport.peer_label());
        } else {
            debug!("Ignored input from {}: {e}", self.transport.peer_label());
        }
    }

    fn violation(&mut self, e: &LedgerError) {
        self.violations += 1;
        warn!(
            "Violation {}/{} from {}: {e}",
            self.violations,
            self.ctx.settings.max_violations,
            self.transport.peer_label()
        );
    }

    fn mark_active(&mut self) {
        if self.state == PeerState::Synced {
            self.set_state(PeerState::Active);
        }
    }

    fn set_state(&mut self, state: PeerState) {
        self.state = state;
        self.ctx.set_state(self.id, state);
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let frame = message.encode()?;
        self.transport.send(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkSettings;
    use crate::network::synchronizer::Synchronizer;
    use crate::network::transport::{memory_pair, MemoryTransport};
    use crate::node::Node;
    use crate::storage::MemoryPool;
    use crate::core::Ledger;
    use crate::testnet::{build_branch, test_ledger, test_params};
    use std::time::Duration;
    use uuid::Uuid;

    fn settings() -> NetworkSettings {
        NetworkSettings {
            poll_interval_ms: 10,
            max_violations: 3,
            ..NetworkSettings::default()
        }
    }

    fn synchronizer_with(ledger: Ledger, settings: NetworkSettings) -> Synchronizer {
        let node = Node::new(ledger, MemoryPool::new(100, Duration::from_secs(60)));
        Synchronizer::new(node, settings, None)
    }

    fn test_synchronizer() -> Synchronizer {
        synchronizer_with(test_ledger("founder"), settings())
    }

    fn next_message(remote: &mut MemoryTransport) -> Message {
        let frame = remote
            .receive(Duration::from_secs(2))
            .unwrap()
            .expect("no frame from session");
        Message::decode(&frame).unwrap()
    }

    fn remote_version(sync: &Synchronizer, node_id: Uuid) -> Message {
        let mut info = sync.context().version_info().unwrap();
        info.node_id = node_id;
        Message::Version(info)
    }

    #[test]
    fn test_undecodable_frames_disconnect() {
        let sync = test_synchronizer();
        let (local, mut remote) = memory_pair("local", "remote");
        let handle = sync.attach(local, Direction::Inbound).unwrap();

        assert!(matches!(next_message(&mut remote), Message::Version(_)));
        for _ in 0..3 {
            remote.send(b"{not json\n").unwrap();
        }

        assert_eq!(handle.join().unwrap(), DisconnectReason::TooManyViolations(3));
        assert_eq!(sync.session_count(), 0);
    }

    #[test]
    fn test_messages_before_version_are_violations() {
        let sync = test_synchronizer();
        let (local, mut remote) = memory_pair("local", "remote");
        let handle = sync.attach(local, Direction::Outbound).unwrap();

        next_message(&mut remote);
        for nonce in 0..3 {
            remote.send(&Message::Ping { nonce }.encode().unwrap()).unwrap();
        }
        assert_eq!(handle.join().unwrap(), DisconnectReason::TooManyViolations(3));
    }

    #[test]
    fn test_self_connection_is_dropped() {
        let sync = test_synchronizer();
        let (local, mut remote) = memory_pair("local", "remote");
        let handle = sync.attach(local, Direction::Outbound).unwrap();

        next_message(&mut remote);
        let version = remote_version(&sync, sync.node_id());
        remote.send(&version.encode().unwrap()).unwrap();

        assert_eq!(handle.join().unwrap(), DisconnectReason::SelfConnection);
    }

    #[test]
    fn test_handshake_then_ping() {
        let sync = test_synchronizer();
        let (local, mut remote) = memory_pair("local", "remote");
        let handle = sync.attach(local, Direction::Inbound).unwrap();

        next_message(&mut remote);
        let version = remote_version(&sync, Uuid::new_v4());
        remote.send(&version.encode().unwrap()).unwrap();

        // equal work, so no block request
        assert_eq!(next_message(&mut remote), Message::GetPeers);
        assert_eq!(sync.peer_summaries()[0].state, PeerState::Synced);

        remote.send(&Message::Ping { nonce: 5 }.encode().unwrap()).unwrap();
        assert_eq!(next_message(&mut remote), Message::Pong { nonce: 5 });
        assert_eq!(sync.peer_summaries()[0].state, PeerState::Active);

        sync.shutdown();
        assert_eq!(handle.join().unwrap(), DisconnectReason::Shutdown);
    }

    #[test]
    fn test_silent_peer_is_dropped() {
        let settings = NetworkSettings {
            liveness_timeout_secs: 1,
            ping_interval_secs: 60,
            ..settings()
        };
        let sync = synchronizer_with(test_ledger("founder"), settings);
        let (local, mut remote) = memory_pair("local", "remote");
        let handle = sync.attach(local, Direction::Inbound).unwrap();

        assert!(matches!(next_message(&mut remote), Message::Version(_)));
        assert_eq!(sync.session_count(), 1);

        assert_eq!(handle.join().unwrap(), DisconnectReason::LivenessTimeout);
        assert_eq!(sync.session_count(), 0);
    }

    #[test]
    fn test_catch_up_continues_through_stored_side_branch() {
        let params = test_params("founder");
        let mut ledger = test_ledger("founder");
        let genesis = ledger.tip().clone();
        for block in build_branch(&genesis, 3, "miner-a", &params) {
            ledger.accept_block(block).unwrap();
        }
        let rival = build_branch(&genesis, 5, "miner-b", &params);
        for block in &rival[..2] {
            ledger.accept_block(block.clone()).unwrap();
        }
        let sync = synchronizer_with(
            ledger,
            NetworkSettings {
                sync_batch_size: 2,
                ..settings()
            },
        );
        let (local, mut remote) = memory_pair("local", "remote");
        let handle = sync.attach(local, Direction::Outbound).unwrap();

        next_message(&mut remote);
        let mut version = remote_version(&sync, Uuid::new_v4());
        if let Message::Version(info) = &mut version {
            info.height = 5;
            info.cumulative_work += rival[0].work() * 2;
        }
        remote.send(&version.encode().unwrap()).unwrap();
        assert!(matches!(next_message(&mut remote), Message::GetBlocks { .. }));
        assert_eq!(next_message(&mut remote), Message::GetPeers);

        // both blocks are already stored on the side branch
        let batch = Message::Blocks {
            blocks: rival[..2].to_vec(),
            more: true,
        };
        remote.send(&batch.encode().unwrap()).unwrap();
        match next_message(&mut remote) {
            Message::GetBlocks { locator } => assert_eq!(locator[0], rival[1].hash()),
            other => panic!("expected getBlocks, got {other:?}"),
        }

        let batch = Message::Blocks {
            blocks: rival[2..4].to_vec(),
            more: true,
        };
        remote.send(&batch.encode().unwrap()).unwrap();
        match next_message(&mut remote) {
            Message::GetBlocks { locator } => assert_eq!(locator[0], rival[3].hash()),
            other => panic!("expected getBlocks, got {other:?}"),
        }

        let batch = Message::Blocks {
            blocks: rival[4..].to_vec(),
            more: false,
        };
        remote.send(&batch.encode().unwrap()).unwrap();
        let node = sync.context().node.clone();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while node.get_tip_hash().unwrap() != rival[4].hash() {
            assert!(std::time::Instant::now() < deadline, "branch never became canonical");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(node.get_height().unwrap(), 5);

        sync.shutdown();
        assert_eq!(handle.join().unwrap(), DisconnectReason::Shutdown);
    }
}
