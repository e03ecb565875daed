use crate::error::{LedgerError, Result};
use log::info;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::RwLock;

/// Peer bookkeeping for the synchronizer
///
/// - Known addresses learned from bootstrap config and `peers` messages
/// - Currently connected addresses
/// - A connection cap shared by inbound and outbound sessions
pub struct PeerManager {
    known_peers: RwLock<HashSet<String>>,
    connected_peers: RwLock<HashSet<String>>,
    max_connections: usize,
    /// Our own listen address, never dialed
    local_addr: Option<String>,
}

impl PeerManager {
    pub fn new(max_connections: usize, local_addr: Option<String>) -> Self {
        Self {
            known_peers: RwLock::new(HashSet::new()),
            connected_peers: RwLock::new(HashSet::new()),
            max_connections,
            local_addr,
        }
    }

    fn lock_error<E: std::fmt::Display>(e: E) -> LedgerError {
        LedgerError::Network(format!("Failed to acquire peer lock: {e}"))
    }

    /// Remembers addresses for later dialing. Returns how many were new.
    pub fn add_known<I, S>(&self, addresses: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known = self.known_peers.write().map_err(Self::lock_error)?;
        let mut added = 0;
        for address in addresses {
            let address = address.into();
            if address.is_empty() || Some(&address) == self.local_addr.as_ref() {
                continue;
            }
            if known.insert(address) {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn get_known_addresses(&self) -> Result<Vec<String>> {
        let known = self.known_peers.read().map_err(Self::lock_error)?;
        let mut addresses: Vec<String> = known.iter().cloned().collect();
        addresses.sort();
        Ok(addresses)
    }

    /// Known peers we are not connected to, shuffled, capped at the free
    /// connection slots.
    pub fn get_peers_to_connect(&self) -> Result<Vec<String>> {
        let connected = self.get_connected_addresses()?;
        if connected.len() >= self.max_connections {
            return Ok(vec![]);
        }
        let needed = self.max_connections - connected.len();

        let mut candidates: Vec<String> = self
            .get_known_addresses()?
            .into_iter()
            .filter(|address| !connected.contains(address))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(needed);
        Ok(candidates)
    }

    /// Returns false when the address was already connected.
    pub fn record_connection(&self, address: &str) -> Result<bool> {
        let mut connected = self.connected_peers.write().map_err(Self::lock_error)?;
        let inserted = connected.insert(address.to_string());
        if inserted {
            info!("Connected to peer: {address}");
        }
        Ok(inserted)
    }

    pub fn record_disconnection(&self, address: &str) -> Result<()> {
        let mut connected = self.connected_peers.write().map_err(Self::lock_error)?;
        if connected.remove(address) {
            info!("Disconnected from peer: {address}");
        }
        Ok(())
    }

    pub fn get_connected_addresses(&self) -> Result<HashSet<String>> {
        let connected = self.connected_peers.read().map_err(Self::lock_error)?;
        Ok(connected.clone())
    }

    pub fn get_connected_count(&self) -> Result<usize> {
        let connected = self.connected_peers.read().map_err(Self::lock_error)?;
        Ok(connected.len())
    }

    pub fn is_connected(&self, address: &str) -> Result<bool> {
        let connected = self.connected_peers.read().map_err(Self::lock_error)?;
        Ok(connected.contains(address))
    }

    pub fn should_accept_connection(&self) -> Result<bool> {
        Ok(self.get_connected_count()? < self.max_connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let manager = PeerManager::new(8, None);
        assert!(manager.record_connection("127.0.0.1:2001").unwrap());
        assert!(!manager.record_connection("127.0.0.1:2001").unwrap());
        assert_eq!(manager.get_connected_count().unwrap(), 1);

        manager.record_disconnection("127.0.0.1:2001").unwrap();
        assert_eq!(manager.get_connected_count().unwrap(), 0);
    }

    #[test]
    fn test_connection_limits() {
        let manager = PeerManager::new(2, None);
        assert!(manager.should_accept_connection().unwrap());
        manager.record_connection("127.0.0.1:2001").unwrap();
        manager.record_connection("127.0.0.1:2002").unwrap();
        assert!(!manager.should_accept_connection().unwrap());
        assert!(manager.get_peers_to_connect().unwrap().is_empty());
    }

    #[test]
    fn test_known_peers_skip_self_and_connected() {
        let manager = PeerManager::new(8, Some("127.0.0.1:5470".to_string()));
        let added = manager
            .add_known(["127.0.0.1:5470", "127.0.0.1:5471", "127.0.0.1:5472", ""])
            .unwrap();
        assert_eq!(added, 2);

        manager.record_connection("127.0.0.1:5471").unwrap();
        assert_eq!(
            manager.get_peers_to_connect().unwrap(),
            vec!["127.0.0.1:5472".to_string()]
        );
    }
}
