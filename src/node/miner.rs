use super::Node;
use crate::core::{Acceptance, Block, ProofOfWork};
use crate::error::{ErrorClass, LedgerError, Rejection, Result};
use crate::utils::{hash_to_hex, Hash256};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Shared stop flag for long-running loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the miner searches on: a template built against `parent` while the
/// tip version was `version`.
#[derive(Debug, Clone)]
pub struct MiningJob {
    pub parent: Hash256,
    pub version: u64,
    pub template: Block,
}

/// Builds templates from the node, searches without holding the node lock,
/// and hands solved blocks back through the normal acceptance path.
pub struct Miner {
    node: Node,
    address: String,
}

impl Miner {
    pub fn new(node: Node, address: &str) -> Miner {
        Miner {
            node,
            address: address.to_string(),
        }
    }

    /// One template, one search. `Ok(None)` means the search was abandoned
    /// because of `stop` or because the tip moved.
    pub fn mine_once(&self, stop: &CancelToken) -> Result<Option<Acceptance>> {
        let job = self.node.mining_snapshot(&self.address)?;
        let node = &self.node;
        let header = match ProofOfWork::new(job.template.header().clone())
            .run(|| stop.is_cancelled() || node.tip_version() != job.version)
        {
            Some(header) => header,
            None => {
                debug!(
                    "Abandoned template on {} at height {}",
                    hash_to_hex(&job.parent),
                    job.template.get_height()
                );
                return Ok(None);
            }
        };

        let block = job.template.with_header(header);
        match self.node.submit_mined_block(block, job.version) {
            Ok(acceptance) => Ok(Some(acceptance)),
            Err(LedgerError::Rejected(Rejection::StaleWork)) => {
                debug!("Discarded stale work on {}", hash_to_hex(&job.parent));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Mines until `stop` is cancelled or the ledger halts.
    pub fn run(&self, stop: &CancelToken) {
        info!("Miner started, paying {}", self.address);
        while !stop.is_cancelled() {
            match self.mine_once(stop) {
                Ok(Some(acceptance)) => info!(
                    "Mined block {} at height {}",
                    hash_to_hex(&acceptance.hash),
                    acceptance.height
                ),
                Ok(None) => {}
                Err(e) if e.class() == ErrorClass::InternalInvariantFailure => {
                    error!("Miner stopping: {e}");
                    break;
                }
                Err(e) => {
                    error!("Mining attempt failed: {e}");
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
        info!("Miner stopped");
    }

    pub fn spawn(self, stop: CancelToken) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || self.run(&stop))
            .map_err(|e| LedgerError::Io(format!("Failed to start miner thread: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPool;
    use crate::testnet::{test_ledger, TestWallet};

    fn node(genesis_address: &str) -> Node {
        Node::new(
            test_ledger(genesis_address),
            MemoryPool::new(100, Duration::from_secs(600)),
        )
    }

    #[test]
    fn test_mine_once_includes_pending_transfer() {
        let alice = TestWallet::new();
        let node = node(alice.address());
        node.submit_transaction(alice.transfer("bob", 3, 0)).unwrap();

        let miner = Miner::new(node.clone(), "miner");
        let acceptance = miner.mine_once(&CancelToken::new()).unwrap().unwrap();

        assert_eq!(acceptance.height, 1);
        assert_eq!(node.get_balance("bob").unwrap(), 3);
        assert!(node.get_balance("miner").unwrap() > 0);
    }

    #[test]
    fn test_cancelled_search_returns_none() {
        let node = node("genesis");
        let stop = CancelToken::new();
        stop.cancel();

        let miner = Miner::new(node.clone(), "miner");
        assert!(miner.mine_once(&stop).unwrap().is_none());
        assert_eq!(node.get_height().unwrap(), 0);
    }

    #[test]
    fn test_spawned_miner_stops_on_cancel() {
        let node = node("genesis");
        let stop = CancelToken::new();
        let handle = Miner::new(node.clone(), "miner")
            .spawn(stop.clone())
            .unwrap();

        while node.get_height().unwrap() < 2 {
            thread::sleep(Duration::from_millis(10));
        }
        stop.cancel();
        handle.join().unwrap();
        assert!(node.verify_integrity().is_ok());
    }
}
