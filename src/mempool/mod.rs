//! Pending transactions awaiting inclusion.
//!
//! Keyed by id under a read-write lock. Selection for block assembly is
//! fee-descending with the id as a deterministic tie-break. Spend-conflict
//! detection lets the block builder and the UTXO view hide inputs that an
//! in-flight transaction already claims.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::ledger::block::MAX_TXS_PER_BLOCK;
use crate::ledger::tx::Transaction;
use crate::types::Hash;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {0} already pending")]
    Duplicate(Hash),
}

/// A pending transaction with its fee cached at admission.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub fee: u64,
}

#[derive(Default)]
pub struct Mempool {
    entries: RwLock<HashMap<Hash, MempoolEntry>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a validated transaction. The fee was computed by the
    /// validation pass and is cached for fee-ordered selection.
    pub fn insert(&self, tx: Transaction, fee: u64) -> Result<(), MempoolError> {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&tx.id) {
            return Err(MempoolError::Duplicate(tx.id));
        }
        entries.insert(tx.id, MempoolEntry { tx, fee });
        Ok(())
    }

    /// Up to `MAX_TXS_PER_BLOCK` entries, highest fee first. Ties break on
    /// id so every node drains in the same order.
    pub fn take_for_block(&self) -> Vec<MempoolEntry> {
        let entries = self.entries.read().unwrap();
        let mut selected: Vec<MempoolEntry> = entries.values().cloned().collect();
        selected.sort_by(|a, b| b.fee.cmp(&a.fee).then_with(|| a.tx.id.cmp(&b.tx.id)));
        selected.truncate(MAX_TXS_PER_BLOCK);
        selected
    }

    /// Removes committed or invalidated transactions.
    pub fn purge(&self, ids: &[Hash]) {
        let mut entries = self.entries.write().unwrap();
        for id in ids {
            entries.remove(id);
        }
    }

    /// Whether any pending transaction already spends `ref_tx:ref_index`.
    pub fn conflicts(&self, ref_tx: &Hash, ref_index: u32) -> bool {
        let entries = self.entries.read().unwrap();
        entries.values().any(|e| {
            e.tx.inputs
                .iter()
                .any(|i| i.ref_tx == *ref_tx && i.ref_index == ref_index)
        })
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.entries.read().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot for the read API, fee-descending.
    pub fn list(&self) -> Vec<Transaction> {
        self.take_for_block().into_iter().map(|e| e.tx).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tx::{TxInput, TxOutput, TxType};
    use crate::types::{Address, Signature};

    fn tx_spending(ref_tx: Hash, ref_index: u32, memo: &str) -> Transaction {
        Transaction::new(
            1_700_000_000,
            vec![TxInput {
                ref_tx,
                ref_index,
                signature: Signature::empty(),
                public_key: Vec::new(),
            }],
            vec![TxOutput {
                address: Address([1u8; 20]),
                amount: 10,
                tx_type: TxType::General,
            }],
            memo.to_string(),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_insert_rejected() {
        let pool = Mempool::new();
        let tx = tx_spending(Hash([1u8; 32]), 0, "a");
        pool.insert(tx.clone(), 10).unwrap();
        assert!(matches!(
            pool.insert(tx, 10),
            Err(MempoolError::Duplicate(_))
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn selection_is_fee_descending() {
        let pool = Mempool::new();
        pool.insert(tx_spending(Hash([1u8; 32]), 0, "low"), 5).unwrap();
        pool.insert(tx_spending(Hash([2u8; 32]), 0, "high"), 50).unwrap();
        pool.insert(tx_spending(Hash([3u8; 32]), 0, "mid"), 20).unwrap();
        let fees: Vec<u64> = pool.take_for_block().iter().map(|e| e.fee).collect();
        assert_eq!(fees, vec![50, 20, 5]);
    }

    #[test]
    fn conflicts_sees_pending_inputs() {
        let pool = Mempool::new();
        let spent = Hash([7u8; 32]);
        pool.insert(tx_spending(spent, 2, "spender"), 10).unwrap();
        assert!(pool.conflicts(&spent, 2));
        assert!(!pool.conflicts(&spent, 3));
        assert!(!pool.conflicts(&Hash([8u8; 32]), 2));
    }

    #[test]
    fn purge_removes_entries() {
        let pool = Mempool::new();
        let tx = tx_spending(Hash([1u8; 32]), 0, "gone");
        let id = tx.id;
        pool.insert(tx, 10).unwrap();
        pool.purge(&[id]);
        assert!(pool.is_empty());
        assert!(!pool.contains(&id));
    }
}
