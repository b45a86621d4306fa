pub mod block;
pub mod chain;
pub mod error;
pub mod tx;
pub mod utxo;

pub use block::{Block, BlockHeader, CommitSignature, MAX_TXS_PER_BLOCK};
pub use chain::{now_unix, Ledger, LedgerConfig, LedgerRead};
pub use error::{LedgerError, ValidationError};
pub use tx::{Transaction, TxInput, TxOutput, TxType};
pub use utxo::{AccountSummary, Utxo};
