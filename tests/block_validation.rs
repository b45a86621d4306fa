//! The block rejection chain, edge by edge.

mod helpers;

use abcfe_node::consensus::ValidatorSet;
use abcfe_node::crypto::KeyPair;
use abcfe_node::ledger::{
    now_unix, Block, Ledger, LedgerError, Transaction, TxInput, TxOutput, TxType,
    ValidationError, MAX_TXS_PER_BLOCK,
};
use abcfe_node::mempool::Mempool;
use abcfe_node::types::{Hash, Signature};
use helpers::*;

fn validation_err(result: Result<(), LedgerError>) -> ValidationError {
    match result {
        Err(LedgerError::Validation(err)) => err,
        other => panic!("expected validation error, got {other:?}"),
    }
}

/// A structurally complete block at height 1 carrying only its coinbase.
fn empty_block(ledger: &Ledger, proposer: &KeyPair, ts: i64) -> Block {
    ledger
        .build_block(&Mempool::new(), proposer, ts)
        .unwrap()
}

#[test]
fn stale_height_rejected() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();

    let block = empty_block(&ledger, &kp, GENESIS_TS + 1);
    ledger.validate_block(&block, false, &vals).unwrap();
    ledger.add_block(&block, &mut ValidatorSet::default()).unwrap();

    // Replaying the committed block: its height is now behind the tip.
    assert!(matches!(
        validation_err(ledger.validate_block(&block, false, &vals)),
        ValidationError::HeightMismatch { expected: 2, got: 1 }
    ));
}

#[test]
fn wrong_prev_hash_rejected() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();

    let mut block = empty_block(&ledger, &kp, GENESIS_TS + 1);
    block.header.prev_hash = Hash([0xEE; 32]);
    block.header.hash = block.header.compute_hash().unwrap();
    assert!(matches!(
        validation_err(ledger.validate_block(&block, false, &vals)),
        ValidationError::PrevHashMismatch
    ));
}

#[test]
fn tampered_transactions_break_merkle() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();

    let mut block = empty_block(&ledger, &kp, GENESIS_TS + 1);
    let extra = Transaction::coinbase(addr(9), 1, 99, GENESIS_TS).unwrap();
    block.transactions.push(extra);
    assert!(matches!(
        validation_err(ledger.validate_block(&block, false, &vals)),
        ValidationError::MerkleMismatch
    ));
}

#[test]
fn tampered_header_breaks_hash() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();

    let mut block = empty_block(&ledger, &kp, GENESIS_TS + 1);
    block.header.timestamp += 1;
    assert!(matches!(
        validation_err(ledger.validate_block(&block, false, &vals)),
        ValidationError::BlockHashMismatch
    ));
}

#[test]
fn timestamp_boundaries() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();

    // One behind the parent: rejected.
    let behind = empty_block(&ledger, &kp, GENESIS_TS - 1);
    assert!(matches!(
        validation_err(ledger.validate_block(&behind, false, &vals)),
        ValidationError::TimestampBehindParent { .. }
    ));

    // Exactly the parent timestamp: accepted.
    let level = empty_block(&ledger, &kp, GENESIS_TS);
    ledger.validate_block(&level, false, &vals).unwrap();

    // Beyond the future-drift allowance: rejected.
    let ahead = empty_block(&ledger, &kp, now_unix() + 8000);
    assert!(matches!(
        validation_err(ledger.validate_block(&ahead, false, &vals)),
        ValidationError::TimestampTooFarAhead { .. }
    ));
}

#[test]
fn empty_proposer_rejected() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();

    let built = empty_block(&ledger, &kp, GENESIS_TS + 1);
    let block = Block::new(
        built.header.prev_hash,
        1,
        GENESIS_TS + 1,
        abcfe_node::types::Address::zero(),
        built.transactions.clone(),
    )
    .unwrap();
    assert!(matches!(
        validation_err(ledger.validate_block(&block, false, &vals)),
        ValidationError::EmptyProposer
    ));
}

#[test]
fn transaction_count_boundary() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();
    let prev = ledger.tip().unwrap().1;

    let filler = |n: usize| -> Vec<Transaction> {
        (0..n)
            .map(|i| {
                Transaction::new(
                    GENESIS_TS + 1,
                    vec![TxInput {
                        ref_tx: Hash([0xAA; 32]),
                        ref_index: i as u32,
                        signature: Signature::empty(),
                        public_key: Vec::new(),
                    }],
                    vec![TxOutput {
                        address: addr(7),
                        amount: 1,
                        tx_type: TxType::General,
                    }],
                    format!("filler/{i}"),
                    Vec::new(),
                )
                .unwrap()
            })
            .collect()
    };

    // Coinbase + MAX fillers: one past the cap.
    let coinbase = Transaction::coinbase(kp.address(), BLOCK_REWARD, 1, GENESIS_TS + 1).unwrap();
    let mut txs = vec![coinbase.clone()];
    txs.extend(filler(MAX_TXS_PER_BLOCK));
    let over = Block::new(prev, 1, GENESIS_TS + 1, kp.address(), txs).unwrap();
    assert!(matches!(
        validation_err(ledger.validate_block(&over, false, &vals)),
        ValidationError::TooManyTransactions { .. }
    ));

    // Exactly at the cap the count check passes; rejection, if any, comes
    // from the unfunded filler inputs instead.
    let mut txs = vec![coinbase];
    txs.extend(filler(MAX_TXS_PER_BLOCK - 1));
    let at_cap = Block::new(prev, 1, GENESIS_TS + 1, kp.address(), txs).unwrap();
    assert!(!matches!(
        validation_err(ledger.validate_block(&at_cap, false, &vals)),
        ValidationError::TooManyTransactions { .. }
    ));
}

#[test]
fn double_spend_across_blocks_rejected() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    let genesis_tx = commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();

    let spend_once = signed_transfer(
        &kp,
        genesis_tx,
        0,
        1000,
        addr(0xB1),
        100,
        MIN_FEE,
        GENESIS_TS + 1,
    );
    let mempool = Mempool::new();
    mempool.insert(spend_once.clone(), MIN_FEE).unwrap();
    let block = ledger.build_block(&mempool, &kp, GENESIS_TS + 1).unwrap();
    ledger.validate_block(&block, false, &vals).unwrap();
    ledger.add_block(&block, &mut ValidatorSet::default()).unwrap();

    // A later transaction spending the same output fails on the spent flag.
    let spend_again = signed_transfer(
        &kp,
        genesis_tx,
        0,
        1000,
        addr(0xC1),
        100,
        MIN_FEE,
        GENESIS_TS + 2,
    );
    assert!(matches!(
        ledger.validate_tx(&spend_again),
        Err(LedgerError::Validation(ValidationError::UtxoSpent { .. }))
    ));
}

#[test]
fn duplicate_input_within_block_rejected() {
    let (_dir, ledger) = temp_ledger();
    let kp = KeyPair::generate();
    let genesis_tx = commit_genesis(&ledger, &kp, 1000);
    let vals = ValidatorSet::default();
    let prev = ledger.tip().unwrap().1;

    let a = signed_transfer(&kp, genesis_tx, 0, 1000, addr(1), 100, MIN_FEE, GENESIS_TS + 1);
    let b = signed_transfer(&kp, genesis_tx, 0, 1000, addr(2), 100, MIN_FEE, GENESIS_TS + 1);
    let coinbase =
        Transaction::coinbase(kp.address(), BLOCK_REWARD + 2 * MIN_FEE, 1, GENESIS_TS + 1).unwrap();
    let block = Block::new(prev, 1, GENESIS_TS + 1, kp.address(), vec![coinbase, a, b]).unwrap();
    assert!(matches!(
        validation_err(ledger.validate_block(&block, false, &vals)),
        ValidationError::DuplicateInput { .. }
    ));
}

#[test]
fn genesis_boundaries() {
    let (_dir, ledger) = temp_ledger();

    // Valid genesis needs height 0, zero prev hash, no inputs.
    let genesis = Ledger::genesis_block(&[addr(1)], &[100], GENESIS_TS).unwrap();
    ledger
        .validate_block(&genesis, false, &ValidatorSet::default())
        .unwrap();

    let mut bad_prev = genesis.clone();
    bad_prev.header.prev_hash = Hash([1u8; 32]);
    bad_prev.header.hash = bad_prev.header.compute_hash().unwrap();
    assert!(matches!(
        validation_err(ledger.validate_block(&bad_prev, false, &ValidatorSet::default())),
        ValidationError::BadGenesis(_)
    ));

    // Once a genesis is committed a second one is out of sequence.
    ledger
        .add_block(&genesis, &mut ValidatorSet::default())
        .unwrap();
    assert!(matches!(
        validation_err(ledger.validate_block(&genesis, false, &ValidatorSet::default())),
        ValidationError::HeightMismatch { .. }
    ));
}
