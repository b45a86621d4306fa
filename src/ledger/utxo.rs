use serde::{Deserialize, Serialize};

use crate::ledger::tx::TxOutput;
use crate::types::Hash;

/// An output tracked through its lifecycle: created at block commit,
/// flipped to spent at the commit that consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub ref_tx: Hash,
    pub ref_index: u32,
    pub output: TxOutput,
    pub height: u64,
    pub spent: bool,
    pub spent_height: u64,
}

impl Utxo {
    pub fn new(ref_tx: Hash, ref_index: u32, output: TxOutput, height: u64) -> Self {
        Self {
            ref_tx,
            ref_index,
            output,
            height,
            spent: false,
            spent_height: 0,
        }
    }

    pub fn amount(&self) -> u64 {
        self.output.amount
    }
}

/// Rolling per-address totals backing the `addr/` namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub balance: u64,
    pub sent_count: u64,
    pub recv_count: u64,
    pub updated_height: u64,
}
