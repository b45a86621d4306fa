#![allow(dead_code)]

use std::sync::Arc;

use abcfe_node::consensus::ValidatorSet;
use abcfe_node::crypto::KeyPair;
use abcfe_node::ledger::{Ledger, LedgerConfig, Transaction, TxInput, TxOutput, TxType};
use abcfe_node::storage::Store;
use abcfe_node::types::{Address, Hash, Signature};

pub const MIN_FEE: u64 = 10;
pub const BLOCK_REWARD: u64 = 50;
pub const GENESIS_TS: i64 = 1_700_000_000;

#[allow(dead_code)]
pub fn temp_ledger() -> (tempfile::TempDir, Arc<Ledger>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let ledger = Ledger::open(
        store,
        LedgerConfig {
            min_fee: MIN_FEE,
            block_reward: BLOCK_REWARD,
            max_memo_size: 256,
            max_data_size: 1024,
        },
    )
    .unwrap();
    (dir, Arc::new(ledger))
}

/// Commits a genesis funding `owner` with `amount`. Returns the genesis
/// transaction id (whose output 0 is the funded UTXO).
#[allow(dead_code)]
pub fn commit_genesis(ledger: &Ledger, owner: &KeyPair, amount: u64) -> Hash {
    commit_genesis_multi(ledger, &[(owner.address(), amount)])
}

#[allow(dead_code)]
pub fn commit_genesis_multi(ledger: &Ledger, funded: &[(Address, u64)]) -> Hash {
    let addresses: Vec<Address> = funded.iter().map(|(a, _)| *a).collect();
    let balances: Vec<u64> = funded.iter().map(|(_, b)| *b).collect();
    let genesis = Ledger::genesis_block(&addresses, &balances, GENESIS_TS).unwrap();
    let mut validators = ValidatorSet::default();
    ledger.validate_block(&genesis, false, &validators).unwrap();
    ledger.add_block(&genesis, &mut validators).unwrap();
    genesis.transactions[0].id
}

/// A signed transfer spending `(ref_tx, ref_index)` of `input_amount`:
/// pays `amount` to `to`, returns change to the signer, leaves `fee`
/// implicit.
#[allow(dead_code)]
pub fn signed_transfer(
    signer: &KeyPair,
    ref_tx: Hash,
    ref_index: u32,
    input_amount: u64,
    to: Address,
    amount: u64,
    fee: u64,
    timestamp: i64,
) -> Transaction {
    let mut outputs = vec![TxOutput {
        address: to,
        amount,
        tx_type: TxType::General,
    }];
    let change = input_amount - amount - fee;
    if change > 0 {
        outputs.push(TxOutput {
            address: signer.address(),
            amount: change,
            tx_type: TxType::General,
        });
    }
    let mut tx = Transaction::new(
        timestamp,
        vec![TxInput {
            ref_tx,
            ref_index,
            signature: Signature::empty(),
            public_key: Vec::new(),
        }],
        outputs,
        String::new(),
        Vec::new(),
    )
    .unwrap();
    tx.sign_inputs(signer).unwrap();
    tx
}

#[allow(dead_code)]
pub fn addr(tag: u8) -> Address {
    Address([tag; 20])
}
