pub mod engine;
pub mod validator;
pub mod vote;

pub use engine::{
    ConsensusEngine, ConsensusOutbound, ConsensusState, ConsensusStatus, BLOCK_PRODUCE_MS,
    ROUND_TIMEOUT_MS, SYNC_AFTER_TIMEOUTS,
};
pub use validator::{select_proposer, Validator, ValidatorSet};
pub use vote::{Vote, VoteKind, VoteSet};
