use serde::{Deserialize, Serialize};

use crate::codec::canonical_hash;
use crate::crypto::sha256;
use crate::ledger::tx::Transaction;
use crate::types::{Address, Hash, Signature};

pub const BLOCK_VERSION: u32 = 1;

/// Hard cap on transactions per block, coinbase included.
pub const MAX_TXS_PER_BLOCK: usize = 1000;

/// Blocks may not claim a timestamp more than two hours ahead of local time.
pub const MAX_FUTURE_DRIFT_SECS: i64 = 7200;

/// Field order is part of the canonical form; do not reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: Hash,
    pub prev_hash: Hash,
    pub version: u32,
    pub height: u64,
    pub merkle_root: Hash,
    pub timestamp: i64,
}

impl BlockHeader {
    /// SHA-256 over the canonical JSON of the header with `hash` zeroed.
    pub fn compute_hash(&self) -> serde_json::Result<Hash> {
        let mut header = self.clone();
        header.hash = Hash::zero();
        canonical_hash(&header)
    }
}

/// One precommit of the quorum certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSignature {
    pub validator: Address,
    pub signature: Signature,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub proposer: Address,
    pub proposer_signature: Signature,
    pub commit_signatures: Vec<CommitSignature>,
}

impl Block {
    /// Assembles a block with its merkle root and header hash finalized.
    /// The proposer signature is attached separately by the proposer.
    pub fn new(
        prev_hash: Hash,
        height: u64,
        timestamp: i64,
        proposer: Address,
        transactions: Vec<Transaction>,
    ) -> serde_json::Result<Self> {
        let ids: Vec<Hash> = transactions.iter().map(|tx| tx.id).collect();
        let mut header = BlockHeader {
            hash: Hash::zero(),
            prev_hash,
            version: BLOCK_VERSION,
            height,
            merkle_root: merkle_root(&ids),
            timestamp,
        };
        header.hash = header.compute_hash()?;
        Ok(Self {
            header,
            transactions,
            proposer,
            proposer_signature: Signature::empty(),
            commit_signatures: Vec::new(),
        })
    }

    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }
}

/// Recursively paired SHA-256 over transaction ids. Odd levels duplicate
/// the tail. An empty set yields the zero hash.
pub fn merkle_root(ids: &[Hash]) -> Hash {
    if ids.is_empty() {
        return Hash::zero();
    }
    let mut level: Vec<Hash> = ids.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(tail) = level.last().copied() {
                level.push(tail);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_bytes());
                buf[32..].copy_from_slice(pair[1].as_bytes());
                Hash(sha256(&buf))
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Hash> {
        (0..n).map(|i| Hash([i as u8; 32])).collect()
    }

    #[test]
    fn merkle_empty_is_zero() {
        assert!(merkle_root(&[]).is_zero());
    }

    #[test]
    fn merkle_single_is_identity() {
        let id = Hash([3u8; 32]);
        assert_eq!(merkle_root(&[id]), id);
    }

    #[test]
    fn merkle_odd_duplicates_tail() {
        // Three leaves behave as [a, b, c, c].
        let three = merkle_root(&ids(3));
        let mut four = ids(3);
        four.push(four[2]);
        assert_eq!(three, merkle_root(&four));
    }

    #[test]
    fn merkle_order_sensitive() {
        let forward = merkle_root(&ids(4));
        let mut reversed = ids(4);
        reversed.reverse();
        assert_ne!(forward, merkle_root(&reversed));
    }

    #[test]
    fn header_hash_zeroes_hash_field() {
        let block = Block::new(Hash::zero(), 1, 1_700_000_000, Address([1u8; 20]), vec![]).unwrap();
        // Recomputing over the finalized header must reproduce the stored hash.
        assert_eq!(block.header.compute_hash().unwrap(), block.hash());
    }

    #[test]
    fn header_hash_tracks_height() {
        let a = Block::new(Hash::zero(), 1, 1_700_000_000, Address([1u8; 20]), vec![]).unwrap();
        let b = Block::new(Hash::zero(), 2, 1_700_000_000, Address([1u8; 20]), vec![]).unwrap();
        assert_ne!(a.hash(), b.hash());
    }
}
