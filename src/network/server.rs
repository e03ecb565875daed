use super::session::Direction;
use super::synchronizer::Synchronizer;
use super::transport::TcpTransport;
use crate::error::{LedgerError, Result};
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Accepts inbound peers and keeps outbound connections topped up.
pub struct Server {
    synchronizer: Arc<Synchronizer>,
    listener: TcpListener,
}

impl Server {
    pub fn bind(synchronizer: Arc<Synchronizer>, addr: &str) -> Result<Server> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| LedgerError::Network(format!("Failed to bind to {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| LedgerError::Network(format!("Failed to configure listener: {e}")))?;
        info!("Server listening on {addr}");
        Ok(Server {
            synchronizer,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| LedgerError::Network(format!("Failed to read listen address: {e}")))
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    /// Accepts connections until the synchronizer shuts down. Outbound
    /// dialing runs on a separate maintenance thread so an unreachable peer
    /// never holds up inbound accepts.
    pub fn run(&self, bootstrap_peers: &[String]) -> Result<()> {
        let ctx = Arc::clone(self.synchronizer.context());
        ctx.peers.add_known(bootstrap_peers.iter().cloned())?;
        let maintenance = Self::spawn_maintenance(Arc::clone(&self.synchronizer))?;

        let poll = ctx.settings.poll_interval();
        while !ctx.shutdown.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.accept(stream, peer_addr),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll),
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    thread::sleep(poll);
                }
            }
        }
        if maintenance.join().is_err() {
            error!("Maintenance thread panicked");
        }
        info!("Server stopped");
        Ok(())
    }

    /// Runs [`Server::run`] on its own thread.
    pub fn spawn(self, bootstrap_peers: Vec<String>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("server".to_string())
            .spawn(move || {
                if let Err(e) = self.run(&bootstrap_peers) {
                    error!("Server failed: {e}");
                }
            })
            .map_err(|e| LedgerError::Io(format!("Failed to start server thread: {e}")))
    }

    fn accept(&self, stream: std::net::TcpStream, peer_addr: SocketAddr) {
        let ctx = self.synchronizer.context();
        if !ctx.peers.should_accept_connection().unwrap_or(false) {
            warn!("Rejecting connection from {peer_addr}: connection limit reached");
            return;
        }
        let addr = peer_addr.to_string();
        match ctx.peers.record_connection(&addr) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Already connected to {addr}");
                return;
            }
            Err(e) => {
                warn!("Failed to record connection: {e}");
                return;
            }
        }

        // the listener is nonblocking; sessions read with timeouts instead
        let attached = stream
            .set_nonblocking(false)
            .map_err(|e| LedgerError::Network(format!("Failed to configure stream: {e}")))
            .and_then(|_| {
                TcpTransport::new(stream, ctx.settings.io_timeout(), ctx.settings.max_frame_bytes)
            })
            .and_then(|transport| {
                self.synchronizer
                    .attach_tracked(Box::new(transport), Direction::Inbound, addr.clone())
            });
        if let Err(e) = attached {
            error!("Failed to start session with {addr}: {e}");
            let _ = ctx.peers.record_disconnection(&addr);
        }
    }

    /// Dials known peers at once and then every discovery interval, pruning
    /// expired pool entries on the same schedule.
    fn spawn_maintenance(synchronizer: Arc<Synchronizer>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("maintenance".to_string())
            .spawn(move || {
                let ctx = Arc::clone(synchronizer.context());
                let poll = ctx.settings.poll_interval();
                let mut last_round: Option<Instant> = None;
                while !ctx.shutdown.is_cancelled() {
                    let due = last_round
                        .map(|at| at.elapsed() >= ctx.settings.discovery_interval())
                        .unwrap_or(true);
                    if due {
                        Self::dial_known_peers(&synchronizer);
                        match ctx.node.prune_mempool() {
                            Ok(0) => {}
                            Ok(n) => debug!("Pruned {n} expired transactions"),
                            Err(e) => warn!("Failed to prune the pool: {e}"),
                        }
                        last_round = Some(Instant::now());
                    }
                    thread::sleep(poll);
                }
                debug!("Maintenance stopped");
            })
            .map_err(|e| LedgerError::Io(format!("Failed to start maintenance thread: {e}")))
    }

    fn dial_known_peers(synchronizer: &Synchronizer) {
        let peers = match synchronizer.context().peers.get_peers_to_connect() {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Failed to list peers: {e}");
                return;
            }
        };
        for addr in peers {
            if synchronizer.context().shutdown.is_cancelled() {
                return;
            }
            if let Err(e) = synchronizer.connect(&addr) {
                warn!("Failed to connect to peer {addr}: {e}");
            }
        }
    }
}
