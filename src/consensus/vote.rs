use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::KeyPair;
use crate::ledger::block::CommitSignature;
use crate::ledger::now_unix;
use crate::types::{Address, Hash, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Prevote,
    Precommit,
}

impl std::fmt::Display for VoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteKind::Prevote => write!(f, "prevote"),
            VoteKind::Precommit => write!(f, "precommit"),
        }
    }
}

/// A validator's signed vote for a block at `(height, round)`. The
/// signature covers the block hash and is verified against the voter's
/// registered public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub height: u64,
    pub round: u32,
    pub kind: VoteKind,
    pub block_hash: Hash,
    pub voter: Address,
    pub signature: Signature,
    pub timestamp: i64,
}

impl Vote {
    pub fn signed(
        height: u64,
        round: u32,
        kind: VoteKind,
        block_hash: Hash,
        keypair: &KeyPair,
    ) -> Self {
        Self {
            height,
            round,
            kind,
            block_hash,
            voter: keypair.address(),
            signature: keypair.sign(block_hash.as_bytes()),
            timestamp: now_unix(),
        }
    }
}

/// Votes of one kind for one `(height, round)`. Each validator contributes
/// at most once; accumulated power feeds the quorum predicate.
#[derive(Debug, Clone)]
pub struct VoteSet {
    pub height: u64,
    pub round: u32,
    pub kind: VoteKind,
    votes: HashMap<Address, Vote>,
    voted_power: u64,
}

impl VoteSet {
    pub fn new(height: u64, round: u32, kind: VoteKind) -> Self {
        Self {
            height,
            round,
            kind,
            votes: HashMap::new(),
            voted_power: 0,
        }
    }

    /// Adds a vote carrying `power`. Returns false on a duplicate voter.
    pub fn add(&mut self, vote: Vote, power: u64) -> bool {
        if self.votes.contains_key(&vote.voter) {
            return false;
        }
        self.votes.insert(vote.voter, vote);
        self.voted_power = self.voted_power.saturating_add(power);
        true
    }

    pub fn contains(&self, voter: &Address) -> bool {
        self.votes.contains_key(voter)
    }

    pub fn voted_power(&self) -> u64 {
        self.voted_power
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// `voted_power · 3 > total_power · 2`.
    pub fn has_quorum(&self, total_power: u64) -> bool {
        self.voted_power as u128 * 3 > total_power as u128 * 2
    }

    /// The quorum certificate entries, ordered by voter address so every
    /// node assembles an identical list.
    pub fn commit_signatures(&self) -> Vec<CommitSignature> {
        let mut sigs: Vec<CommitSignature> = self
            .votes
            .values()
            .map(|v| CommitSignature {
                validator: v.voter,
                signature: v.signature.clone(),
                timestamp: v.timestamp,
            })
            .collect();
        sigs.sort_by_key(|cs| cs.validator);
        sigs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote_from(tag: u8) -> Vote {
        Vote {
            height: 1,
            round: 0,
            kind: VoteKind::Prevote,
            block_hash: Hash([9u8; 32]),
            voter: Address([tag; 20]),
            signature: Signature::empty(),
            timestamp: 0,
        }
    }

    #[test]
    fn one_vote_per_validator() {
        let mut set = VoteSet::new(1, 0, VoteKind::Prevote);
        assert!(set.add(vote_from(1), 10));
        assert!(!set.add(vote_from(1), 10));
        assert_eq!(set.voted_power(), 10);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn quorum_is_strictly_more_than_two_thirds() {
        let mut set = VoteSet::new(1, 0, VoteKind::Precommit);
        set.add(vote_from(1), 10);
        set.add(vote_from(2), 10);
        // 20 of 30: 60 > 60 is false; exactly two thirds is not a quorum.
        assert!(!set.has_quorum(30));
        set.add(vote_from(3), 1);
        assert!(set.has_quorum(30));
    }

    #[test]
    fn commit_signatures_sorted_by_voter() {
        let mut set = VoteSet::new(1, 0, VoteKind::Precommit);
        set.add(vote_from(3), 1);
        set.add(vote_from(1), 1);
        set.add(vote_from(2), 1);
        let sigs = set.commit_signatures();
        let order: Vec<u8> = sigs.iter().map(|cs| cs.validator.0[0]).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
