mod common;

use common::{mine_block, test_node, TestWallet};
use work_ledger::{
    block_reward, AcceptOutcome, BlockRef, ConsensusParams, LedgerError, Rejection, Violation,
};

#[test]
fn test_transfer_is_confirmed_and_balances_move() {
    let alice = TestWallet::new();
    let bob = TestWallet::new();
    let carol = TestWallet::new();
    let node = test_node(alice.address());
    let funded = node.get_balance(alice.address()).unwrap();
    assert!(funded > 10);

    let hash = node
        .submit_transaction(alice.transfer(bob.address(), 10, 0))
        .unwrap();
    assert!(node.contains_transaction(&hash).unwrap());

    let acceptance = mine_block(&node, carol.address());
    assert_eq!(acceptance.outcome, AcceptOutcome::Extended);
    assert_eq!(acceptance.height, 1);

    let status = node.status().unwrap();
    let params = ConsensusParams::for_testing();
    assert_eq!(node.get_balance(alice.address()).unwrap(), funded - 10);
    assert_eq!(node.get_balance(bob.address()).unwrap(), 10);
    assert_eq!(
        node.get_balance(carol.address()).unwrap(),
        block_reward(1, &params)
    );
    assert_eq!(node.get_account(alice.address()).unwrap().nonce, 1);
    assert_eq!(status.mempool_size, 0);
    assert!(node.verify_integrity().is_ok());
}

#[test]
fn test_nonce_gap_is_rejected_until_filled() {
    let alice = TestWallet::new();
    let bob = TestWallet::new();
    let node = test_node(alice.address());

    let result = node.submit_transaction(alice.transfer(bob.address(), 5, 1));
    assert!(matches!(
        result,
        Err(LedgerError::Consensus(Violation::NonceGap { .. }))
    ));
    assert!(node.get_mempool_snapshot().unwrap().is_empty());

    node.submit_transaction(alice.transfer(bob.address(), 5, 0))
        .unwrap();
    node.submit_transaction(alice.transfer(bob.address(), 5, 1))
        .unwrap();
    let duplicate = node.submit_transaction(alice.transfer(bob.address(), 5, 1));
    assert!(duplicate.is_err());

    mine_block(&node, bob.address());
    assert_eq!(node.get_account(alice.address()).unwrap().nonce, 2);
    assert!(node.get_mempool_snapshot().unwrap().is_empty());
}

#[test]
fn test_overspend_is_rejected() {
    let alice = TestWallet::new();
    let bob = TestWallet::new();
    let node = test_node(alice.address());
    let funded = node.get_balance(alice.address()).unwrap();

    let result = node.submit_transaction(alice.transfer(bob.address(), funded + 1, 0));
    assert!(matches!(
        result,
        Err(LedgerError::Consensus(Violation::InsufficientBalance { .. }))
    ));
}

#[test]
fn test_heavier_fork_reorganizes_and_resurrects() {
    let alice = TestWallet::new();
    let bob = TestWallet::new();
    let ours = test_node(alice.address());
    let theirs = test_node(alice.address());

    let transfer = alice.transfer(bob.address(), 25, 0);
    let transfer_hash = ours.submit_transaction(transfer.clone()).unwrap();
    let first = mine_block(&ours, alice.address());
    assert!(first.confirmed.contains(&transfer));
    assert_eq!(ours.get_balance(bob.address()).unwrap(), 25);

    // a competing branch twice as long that never saw the transfer
    mine_block(&theirs, bob.address());
    mine_block(&theirs, bob.address());
    let branch: Vec<_> = (1..=2)
        .map(|height| {
            theirs
                .get_block(BlockRef::Height(height))
                .unwrap()
                .unwrap()
        })
        .collect();

    let side = ours.submit_block(branch[0].clone()).unwrap();
    assert_eq!(side.outcome, AcceptOutcome::SideBranch);
    assert_eq!(ours.get_tip_hash().unwrap(), first.hash);

    let reorg = ours.submit_block(branch[1].clone()).unwrap();
    assert_eq!(
        reorg.outcome,
        AcceptOutcome::Reorganized {
            fork_height: 0,
            depth: 1
        }
    );
    assert_eq!(ours.get_tip_hash().unwrap(), theirs.get_tip_hash().unwrap());
    assert_eq!(reorg.abandoned, vec![transfer]);

    // the transfer is pending again and bob's credit is undone
    let params = ConsensusParams::for_testing();
    assert_eq!(
        ours.get_balance(bob.address()).unwrap(),
        block_reward(1, &params) + block_reward(2, &params)
    );
    assert!(ours.contains_transaction(&transfer_hash).unwrap());
    assert!(ours.verify_integrity().is_ok());

    let stale = ours.submit_block(branch[1].clone());
    assert!(matches!(
        stale,
        Err(LedgerError::Rejected(Rejection::AlreadyKnown))
    ));
}
