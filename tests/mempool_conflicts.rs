//! Double-spend handling: conflict exclusion at assembly, eviction once
//! the winning branch commits.

mod helpers;

use abcfe_node::consensus::ValidatorSet;
use abcfe_node::crypto::KeyPair;
use abcfe_node::mempool::Mempool;
use helpers::*;

#[test]
fn conflicting_spender_excluded_then_evicted() {
    let (_dir, ledger) = temp_ledger();
    let alice = KeyPair::generate();
    let genesis_tx = commit_genesis(&ledger, &alice, 1000);
    let mempool = Mempool::new();

    // Two valid transactions spending the same output.
    let t1 = signed_transfer(
        &alice, genesis_tx, 0, 1000, addr(0xB3), 90, MIN_FEE, GENESIS_TS + 1,
    );
    let t2 = signed_transfer(
        &alice, genesis_tx, 0, 1000, addr(0xC3), 90, MIN_FEE, GENESIS_TS + 1,
    );
    let fee1 = ledger.validate_tx(&t1).unwrap();
    let fee2 = ledger.validate_tx(&t2).unwrap();
    mempool.insert(t1.clone(), fee1).unwrap();
    mempool.insert(t2.clone(), fee2).unwrap();
    assert_eq!(mempool.len(), 2);
    assert!(mempool.conflicts(&genesis_tx, 0));

    // Assembly takes exactly one of the two; the loser stays pending.
    let block = ledger
        .build_block(&mempool, &alice, GENESIS_TS + 1)
        .unwrap();
    assert_eq!(block.transactions.len(), 2);
    let included = block.transactions[1].id;
    assert!(included == t1.id || included == t2.id);
    assert_eq!(mempool.len(), 2);

    let mut validators = ValidatorSet::default();
    ledger.validate_block(&block, false, &validators).unwrap();
    ledger.add_block(&block, &mut validators).unwrap();
    mempool.purge(&[included]);
    assert_eq!(mempool.len(), 1);

    // The loser now spends a spent output; the next assembly evicts it.
    let next = ledger
        .build_block(&mempool, &alice, GENESIS_TS + 2)
        .unwrap();
    assert_eq!(next.transactions.len(), 1);
    assert!(next.transactions[0].is_coinbase());
    assert!(mempool.is_empty());

    // Exactly one recipient was paid.
    let paid_b = ledger.balance(&addr(0xB3)).unwrap();
    let paid_c = ledger.balance(&addr(0xC3)).unwrap();
    assert_eq!(paid_b + paid_c, 90);
}

#[test]
fn resubmitting_committed_transaction_is_rejected() {
    let (_dir, ledger) = temp_ledger();
    let alice = KeyPair::generate();
    let genesis_tx = commit_genesis(&ledger, &alice, 1000);
    let mempool = Mempool::new();

    let tx = signed_transfer(
        &alice, genesis_tx, 0, 1000, addr(0xB4), 90, MIN_FEE, GENESIS_TS + 1,
    );
    mempool.insert(tx.clone(), MIN_FEE).unwrap();
    // Same signed bytes again: duplicate id.
    assert!(mempool.insert(tx.clone(), MIN_FEE).is_err());

    let block = ledger
        .build_block(&mempool, &alice, GENESIS_TS + 1)
        .unwrap();
    let mut validators = ValidatorSet::default();
    ledger.validate_block(&block, false, &validators).unwrap();
    ledger.add_block(&block, &mut validators).unwrap();
    mempool.purge(&[tx.id]);

    // After commit the inputs are spent; validation refuses readmission.
    assert!(ledger.validate_tx(&tx).is_err());
}
