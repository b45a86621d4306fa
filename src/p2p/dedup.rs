//! Relay deduplication.
//!
//! Three time-bounded caches keep flood relay from echoing: one keyed on
//! message content, one on proposal identity, one on vote identity.
//! Eviction is scan-on-insert past the cap; an LRU is not required for
//! this traffic envelope.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::consensus::VoteKind;
use crate::crypto::sha256;
use crate::types::Address;

pub const CONTENT_TTL: Duration = Duration::from_secs(60);
pub const CONTENT_CAP: usize = 1000;
pub const PROPOSAL_TTL: Duration = Duration::from_secs(30);
pub const PROPOSAL_CAP: usize = 500;
pub const VOTE_TTL: Duration = Duration::from_secs(30);
pub const VOTE_CAP: usize = 2000;

pub struct TtlCache {
    ttl: Duration,
    cap: usize,
    entries: Mutex<HashMap<String, Instant>>,
}

impl TtlCache {
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self {
            ttl,
            cap,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records `key`; returns false when it was already present and fresh
    /// (a duplicate).
    pub fn insert(&self, key: String) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if let Some(at) = entries.get(&key) {
            if now.duration_since(*at) < self.ttl {
                return false;
            }
        }
        if entries.len() >= self.cap {
            let ttl = self.ttl;
            entries.retain(|_, at| now.duration_since(*at) < ttl);
        }
        entries.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct DedupCaches {
    content: TtlCache,
    proposal: TtlCache,
    vote: TtlCache,
}

impl Default for DedupCaches {
    fn default() -> Self {
        Self {
            content: TtlCache::new(CONTENT_TTL, CONTENT_CAP),
            proposal: TtlCache::new(PROPOSAL_TTL, PROPOSAL_CAP),
            vote: TtlCache::new(VOTE_TTL, VOTE_CAP),
        }
    }
}

impl DedupCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content key: `(type, origin, first 8 bytes of the payload digest)`.
    /// Returns false on a duplicate.
    pub fn first_sight_content(&self, kind: u8, from: &str, payload: &[u8]) -> bool {
        let digest = sha256(payload);
        self.content
            .insert(format!("{kind}:{from}:{}", hex::encode(&digest[..8])))
    }

    /// Proposal key: `height:round:proposer`.
    pub fn first_sight_proposal(&self, height: u64, round: u32, proposer: &Address) -> bool {
        self.proposal.insert(format!("{height}:{round}:{proposer}"))
    }

    /// Vote key: `height:round:kind:voter`.
    pub fn first_sight_vote(
        &self,
        height: u64,
        round: u32,
        kind: VoteKind,
        voter: &Address,
    ) -> bool {
        self.vote.insert(format!("{height}:{round}:{kind}:{voter}"))
    }
}
