//! Peer-to-peer networking
//!
//! Newline-delimited JSON messages over TCP. Each connection is a
//! [`PeerSession`] thread; the [`Synchronizer`] owns the sessions and relays
//! node events to them, and the [`Server`] accepts and dials connections.

pub mod message;
pub mod peer_manager;
pub mod server;
pub mod session;
pub mod synchronizer;
pub mod transport;

pub use message::{Message, VersionInfo, PROTOCOL_VERSION};
pub use peer_manager::PeerManager;
pub use server::Server;
pub use session::{Direction, DisconnectReason, PeerSession, PeerState};
pub use synchronizer::{PeerSummary, SyncContext, Synchronizer};
pub use transport::{memory_pair, MemoryTransport, TcpTransport, Transport};
