//! Shared state of every peer session and the relay that fans node events
//! out to them.

use super::message::{Message, VersionInfo, PROTOCOL_VERSION};
use super::peer_manager::PeerManager;
use super::session::{Direction, DisconnectReason, PeerSession, PeerState};
use super::transport::{TcpTransport, Transport};
use crate::config::NetworkSettings;
use crate::error::{LedgerError, Result};
use crate::node::{CancelToken, Node, NodeEvent, PeerId};
use crate::utils::Hash256;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// Bounded set of recently seen block and transaction hashes, so each item
/// is relayed at most once.
struct SeenCache {
    hashes: HashSet<Hash256>,
    order: VecDeque<Hash256>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self {
            hashes: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, hash: Hash256) -> bool {
        if !self.hashes.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.hashes.remove(&oldest);
            }
        }
        true
    }

    fn forget(&mut self, hash: &Hash256) {
        if self.hashes.remove(hash) {
            self.order.retain(|h| h != hash);
        }
    }
}

struct SessionHandle {
    sender: Sender<Message>,
    label: String,
    direction: Direction,
    state: PeerState,
    remote: Option<VersionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: PeerId,
    pub label: String,
    pub direction: Direction,
    pub state: PeerState,
    pub height: Option<u64>,
    pub listen_addr: Option<String>,
}

pub struct SyncContext {
    pub node: Node,
    pub settings: NetworkSettings,
    pub peers: PeerManager,
    pub node_id: Uuid,
    pub listen_addr: Option<String>,
    pub shutdown: CancelToken,
    seen: Mutex<SeenCache>,
    sessions: Mutex<HashMap<PeerId, SessionHandle>>,
    next_id: AtomicU64,
}

impl SyncContext {
    fn lock_error<E: std::fmt::Display>(e: E) -> LedgerError {
        LedgerError::Network(format!("Failed to acquire session lock: {e}"))
    }

    /// Our `version` message as of now.
    pub fn version_info(&self) -> Result<VersionInfo> {
        let status = self.node.status()?;
        Ok(VersionInfo {
            protocol_version: PROTOCOL_VERSION,
            node_id: self.node_id,
            height: status.height,
            tip: status.tip,
            cumulative_work: status.cumulative_work,
            listen_addr: self.listen_addr.clone(),
        })
    }

    /// True the first time `hash` is seen.
    pub fn mark_seen(&self, hash: Hash256) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(hash),
            Err(_) => true,
        }
    }

    pub fn forget_seen(&self, hash: &Hash256) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.forget(hash);
        }
    }

    fn register(&self, label: String, direction: Direction, sender: Sender<Message>) -> Result<PeerId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut sessions = self.sessions.lock().map_err(Self::lock_error)?;
        sessions.insert(
            id,
            SessionHandle {
                sender,
                label,
                direction,
                state: PeerState::Connecting,
                remote: None,
            },
        );
        Ok(id)
    }

    pub(crate) fn set_state(&self, id: PeerId, state: PeerState) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(handle) = sessions.get_mut(&id) {
                handle.state = state;
            }
        }
    }

    pub(crate) fn set_remote(&self, id: PeerId, remote: VersionInfo) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(handle) = sessions.get_mut(&id) {
                handle.remote = Some(remote);
            }
        }
    }

    pub(crate) fn unregister(&self, id: PeerId) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&id);
        }
    }

    /// Listen addresses of peers we are talking to right now.
    pub fn active_listen_addrs(&self) -> Vec<String> {
        match self.sessions.lock() {
            Ok(sessions) => sessions
                .values()
                .filter_map(|handle| handle.remote.as_ref())
                .filter_map(|remote| remote.listen_addr.clone())
                .collect(),
            Err(_) => vec![],
        }
    }

    /// Queues `message` for every handshaken session except `except`.
    pub fn broadcast(&self, message: &Message, except: Option<PeerId>) -> usize {
        let sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(_) => return 0,
        };
        sessions
            .iter()
            .filter(|(id, handle)| Some(**id) != except && handle.remote.is_some())
            .filter(|(_, handle)| handle.sender.send(message.clone()).is_ok())
            .count()
    }

    pub fn peer_summaries(&self) -> Vec<PeerSummary> {
        let sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(_) => return vec![],
        };
        let mut summaries: Vec<PeerSummary> = sessions
            .iter()
            .map(|(id, handle)| PeerSummary {
                id: *id,
                label: handle.label.clone(),
                direction: handle.direction,
                state: handle.state,
                height: handle.remote.as_ref().map(|remote| remote.height),
                listen_addr: handle.remote.as_ref().and_then(|r| r.listen_addr.clone()),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    fn relay(&self, event: NodeEvent) {
        let (message, origin, hash) = match event {
            NodeEvent::BlockAccepted { block, origin } => {
                let hash = block.hash();
                (Message::NewBlock { block }, origin, hash)
            }
            NodeEvent::TransactionAccepted {
                transaction,
                origin,
            } => {
                let hash = transaction.hash();
                (Message::Transaction { transaction }, origin, hash)
            }
        };
        // peer-originated items were marked on receipt
        if origin.is_none() {
            self.mark_seen(hash);
        }
        let sent = self.broadcast(&message, origin);
        debug!("Relayed {} to {sent} peers", message.kind());
    }
}

/// Owns the peer sessions of one node.
pub struct Synchronizer {
    ctx: Arc<SyncContext>,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl Synchronizer {
    pub fn new(node: Node, settings: NetworkSettings, listen_addr: Option<String>) -> Synchronizer {
        let peers = PeerManager::new(settings.max_peers, listen_addr.clone());
        let seen = SeenCache::new(settings.seen_cache_size);
        Synchronizer {
            ctx: Arc::new(SyncContext {
                node,
                settings,
                peers,
                node_id: Uuid::new_v4(),
                listen_addr,
                shutdown: CancelToken::new(),
                seen: Mutex::new(seen),
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
            relay: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Starts the thread that forwards node events to peers.
    pub fn start(&self) -> Result<()> {
        let events = self.ctx.node.subscribe();
        let ctx = Arc::clone(&self.ctx);
        let handle = thread::Builder::new()
            .name("relay".to_string())
            .spawn(move || {
                let poll = ctx.settings.poll_interval();
                while !ctx.shutdown.is_cancelled() {
                    match events.recv_timeout(poll) {
                        Ok(event) => ctx.relay(event),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Relay stopped");
            })
            .map_err(|e| LedgerError::Io(format!("Failed to start relay thread: {e}")))?;
        if let Ok(mut relay) = self.relay.lock() {
            *relay = Some(handle);
        }
        Ok(())
    }

    /// Runs a session over `transport` on its own thread.
    pub fn attach<T: Transport + 'static>(
        &self,
        transport: T,
        direction: Direction,
    ) -> Result<JoinHandle<DisconnectReason>> {
        self.spawn_session(Box::new(transport), direction, None)
    }

    /// Attaches a session whose connection slot is released in the peer
    /// manager under `addr` when it ends.
    pub fn attach_tracked(
        &self,
        transport: Box<dyn Transport>,
        direction: Direction,
        addr: String,
    ) -> Result<JoinHandle<DisconnectReason>> {
        self.spawn_session(transport, direction, Some(addr))
    }

    /// Dials `addr` over TCP and attaches an outbound session.
    pub fn connect(&self, addr: &str) -> Result<JoinHandle<DisconnectReason>> {
        if !self.ctx.peers.record_connection(addr)? {
            return Err(LedgerError::Network(format!("Already connected to {addr}")));
        }
        let transport = match TcpTransport::connect(
            addr,
            self.ctx.settings.io_timeout(),
            self.ctx.settings.max_frame_bytes,
        ) {
            Ok(transport) => transport,
            Err(e) => {
                self.ctx.peers.record_disconnection(addr)?;
                return Err(e);
            }
        };
        self.ctx.peers.add_known([addr])?;
        info!("Dialed {addr}");
        self.spawn_session(Box::new(transport), Direction::Outbound, Some(addr.to_string()))
    }

    fn spawn_session(
        &self,
        transport: Box<dyn Transport>,
        direction: Direction,
        tracked_addr: Option<String>,
    ) -> Result<JoinHandle<DisconnectReason>> {
        let (sender, outbound) = channel();
        let label = tracked_addr.clone().unwrap_or_else(|| transport.peer_label());
        let id = self.ctx.register(label.clone(), direction, sender)?;
        let ctx = Arc::clone(&self.ctx);
        let session = PeerSession::new(id, transport, direction, Arc::clone(&self.ctx), outbound);
        let spawned = thread::Builder::new()
            .name(format!("peer-{id}"))
            .spawn(move || {
                let reason = session.run();
                if let Some(addr) = tracked_addr {
                    if let Err(e) = ctx.peers.record_disconnection(&addr) {
                        warn!("Failed to record disconnection: {e}");
                    }
                }
                reason
            });
        spawned.map_err(|e| {
            self.ctx.unregister(id);
            LedgerError::Io(format!("Failed to start session for {label}: {e}"))
        })
    }

    pub fn peer_summaries(&self) -> Vec<PeerSummary> {
        self.ctx.peer_summaries()
    }

    pub fn session_count(&self) -> usize {
        self.ctx.peer_summaries().len()
    }

    pub fn node_id(&self) -> Uuid {
        self.ctx.node_id
    }

    /// Stops the relay and tells every session to close.
    pub fn shutdown(&self) {
        self.ctx.shutdown.cancel();
        let handle = self.relay.lock().ok().and_then(|mut relay| relay.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        info!("Synchronizer stopped");
    }
}
