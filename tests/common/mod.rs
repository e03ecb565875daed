#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use work_ledger::{
    new_key_pair, Acceptance, CancelToken, ConsensusParams, Miner, NetworkSettings, Node,
    Settings, Signer, Synchronizer, Transaction,
};

pub struct TestWallet {
    signer: Signer,
}

impl TestWallet {
    pub fn new() -> TestWallet {
        let pkcs8 = new_key_pair().expect("key pair");
        TestWallet {
            signer: Signer::from_pkcs8(pkcs8).expect("signer"),
        }
    }

    pub fn address(&self) -> &str {
        self.signer.address()
    }

    pub fn transfer(&self, recipient: &str, amount: u64, nonce: u64) -> Transaction {
        self.signer
            .transfer(recipient, amount, nonce, 0)
            .expect("signed transfer")
    }
}

pub fn test_settings(genesis_address: &str, data_dir: Option<&Path>) -> Settings {
    let mut settings = Settings::default();
    settings.consensus = ConsensusParams::for_testing().with_genesis_address(genesis_address);
    settings.node.data_dir = data_dir.map(Path::to_path_buf);
    settings.network = fast_network();
    settings
}

pub fn fast_network() -> NetworkSettings {
    NetworkSettings {
        poll_interval_ms: 10,
        io_timeout_ms: 2_000,
        ..NetworkSettings::default()
    }
}

pub fn test_node(genesis_address: &str) -> Node {
    Node::open(&test_settings(genesis_address, None)).expect("node")
}

/// Mines one block on the node's tip, including whatever the pool offers.
pub fn mine_block(node: &Node, miner: &str) -> Acceptance {
    Miner::new(node.clone(), miner)
        .mine_once(&CancelToken::new())
        .expect("mining")
        .expect("tip moved during a single-threaded search")
}

pub fn synchronizer(node: &Node) -> Arc<Synchronizer> {
    let synchronizer = Arc::new(Synchronizer::new(node.clone(), fast_network(), None));
    synchronizer.start().expect("relay");
    synchronizer
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}
