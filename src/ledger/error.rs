use thiserror::Error;

use crate::storage::StoreError;
use crate::types::{Address, Hash};

/// Block or transaction rejection. Reported to the caller; never escalated.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("prev_hash does not match block at parent height")]
    PrevHashMismatch,
    #[error("merkle root mismatch")]
    MerkleMismatch,
    #[error("block hash mismatch")]
    BlockHashMismatch,
    #[error("timestamp {got} behind parent {parent}")]
    TimestampBehindParent { parent: i64, got: i64 },
    #[error("timestamp {got} too far ahead of local time {now}")]
    TimestampTooFarAhead { now: i64, got: i64 },
    #[error("proposer address is empty")]
    EmptyProposer,
    #[error("proposer {0} is not an active validator")]
    UnknownProposer(Address),
    #[error("proposer signature does not verify")]
    BadProposerSignature,
    #[error("too many transactions: {got} > {max}")]
    TooManyTransactions { max: usize, got: usize },
    #[error("duplicate transaction {0} in block")]
    DuplicateTx(Hash),
    #[error("duplicate input {ref_tx}:{ref_index} in block")]
    DuplicateInput { ref_tx: Hash, ref_index: u32 },
    #[error("transaction id mismatch: stored {stored}, computed {computed}")]
    TxIdMismatch { stored: Hash, computed: Hash },
    #[error("malformed coinbase: {0}")]
    BadCoinbase(&'static str),
    #[error("output amount must be positive")]
    ZeroAmount,
    #[error("memo exceeds {max} bytes")]
    OversizeMemo { max: usize },
    #[error("data exceeds {max} bytes")]
    OversizeData { max: usize },
    #[error("referenced output {ref_tx}:{ref_index} not found")]
    UnknownUtxo { ref_tx: Hash, ref_index: u32 },
    #[error("referenced output {ref_tx}:{ref_index} already spent")]
    UtxoSpent { ref_tx: Hash, ref_index: u32 },
    #[error("input signer {derived} does not own referenced output of {owner}")]
    OwnerMismatch { owner: Address, derived: Address },
    #[error("input signature does not verify")]
    BadInputSignature,
    #[error("inputs {inputs} do not cover outputs {outputs} plus min fee {min_fee}")]
    InsufficientInputs {
        inputs: u64,
        outputs: u64,
        min_fee: u64,
    },
    #[error("commit signatures carry {have} of {total} voting power, quorum not reached")]
    QuorumNotReached { have: u64, total: u64 },
    #[error("commit signature from {0} does not verify")]
    BadCommitSignature(Address),
    #[error("commit signer {0} is not an active validator")]
    UnknownCommitSigner(Address),
    #[error("invalid genesis: {0}")]
    BadGenesis(&'static str),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed block/transaction; the offending item is dropped.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Store failure; fatal for the current height, retried via round change.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    /// Meta cursor unreadable after a committed write. Treated as corruption.
    #[error("ledger cursor invariant violated: {0}")]
    CursorInvariant(&'static str),
}
