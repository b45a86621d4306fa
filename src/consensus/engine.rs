//! Round-driven BFT state machine.
//!
//! A single periodic tick drives height/round progression. One mutex
//! guards the whole round state; every handler (tick, proposal, vote,
//! timeout) enters it before reading or mutating, and commit happens
//! inside the same critical section so two quorum certificates at the
//! same height cannot race. Lock order is round state first, validator
//! set second.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::consensus::validator::{select_proposer, ValidatorSet};
use crate::consensus::vote::{Vote, VoteKind, VoteSet};
use crate::crypto::{self, KeyPair};
use crate::ledger::{now_unix, Block, Ledger, LedgerError};
use crate::mempool::Mempool;
use crate::types::{Address, Hash};

/// Tick interval of the round loop.
pub const BLOCK_PRODUCE_MS: u64 = 3000;

/// A round that makes no progress for this long advances to the next
/// proposer.
pub const ROUND_TIMEOUT_MS: u64 = 20_000;

/// Consecutive timeouts before falling back to peer block sync.
pub const SYNC_AFTER_TIMEOUTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusState {
    Idle,
    Proposing,
    Voting,
    Committing,
}

/// Outbound capability the engine depends on; implemented by the p2p
/// wiring. All calls are fire-and-forget.
pub trait ConsensusOutbound: Send + Sync {
    fn broadcast_proposal(&self, height: u64, round: u32, block: &Block);
    fn broadcast_vote(&self, vote: &Vote);
    fn request_sync(&self);
}

type CommitHook = Box<dyn Fn(&Block) + Send + Sync>;

/// Immutable status snapshot for the read API.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusStatus {
    pub state: ConsensusState,
    pub height: u64,
    pub round: u32,
    pub consecutive_timeouts: u32,
    pub validator_count: usize,
    pub active_validators: usize,
    pub total_voting_power: u64,
    pub is_validator: bool,
}

struct RoundState {
    state: ConsensusState,
    height: u64,
    round: u32,
    proposed_block: Option<Block>,
    prevotes: Option<VoteSet>,
    precommits: Option<VoteSet>,
    consecutive_timeouts: u32,
    timer: Option<JoinHandle<()>>,
}

impl RoundState {
    fn clear_round(&mut self) {
        self.proposed_block = None;
        self.prevotes = None;
        self.precommits = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Messages to send once the round lock is released.
#[derive(Default)]
struct Outgoing {
    proposal: Option<(u64, u32, Block)>,
    votes: Vec<Vote>,
    committed: Option<Block>,
    request_sync: bool,
}

pub struct ConsensusEngine {
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    validators: RwLock<ValidatorSet>,
    local: Option<KeyPair>,
    produce_blocks: bool,
    inner: Mutex<RoundState>,
    outbound: RwLock<Option<Arc<dyn ConsensusOutbound>>>,
    on_commit: RwLock<Option<CommitHook>>,
}

impl ConsensusEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        mempool: Arc<Mempool>,
        validators: ValidatorSet,
        local: Option<KeyPair>,
        produce_blocks: bool,
    ) -> Self {
        let height = ledger.tip().map(|(h, _)| h + 1).unwrap_or(0);
        Self {
            ledger,
            mempool,
            validators: RwLock::new(validators),
            local,
            produce_blocks,
            inner: Mutex::new(RoundState {
                state: ConsensusState::Idle,
                height,
                round: 0,
                proposed_block: None,
                prevotes: None,
                precommits: None,
                consecutive_timeouts: 0,
                timer: None,
            }),
            outbound: RwLock::new(None),
            on_commit: RwLock::new(None),
        }
    }

    /// Wires the p2p broadcast capability. Called once at startup.
    pub fn set_outbound(&self, outbound: Arc<dyn ConsensusOutbound>) {
        *self.outbound.write().unwrap() = Some(outbound);
    }

    /// Registers the block-commit callback (p2p dissemination).
    pub fn set_on_commit<F: Fn(&Block) + Send + Sync + 'static>(&self, hook: F) {
        *self.on_commit.write().unwrap() = Some(Box::new(hook));
    }

    pub fn local_address(&self) -> Option<Address> {
        self.local.as_ref().map(KeyPair::address)
    }

    pub fn status(&self) -> ConsensusStatus {
        let inner = self.inner.lock().unwrap();
        let vals = self.validators.read().unwrap();
        ConsensusStatus {
            state: inner.state,
            height: inner.height,
            round: inner.round,
            consecutive_timeouts: inner.consecutive_timeouts,
            validator_count: vals.len(),
            active_validators: vals.active_count(),
            total_voting_power: vals.total_voting_power(),
            is_validator: self
                .local_address()
                .map(|a| vals.is_active(&a))
                .unwrap_or(false),
        }
    }

    pub fn validator_set(&self) -> ValidatorSet {
        self.validators.read().unwrap().clone()
    }

    /// Spawns the round loop. Runs until the stop channel flips.
    pub fn start(self: &Arc<Self>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(BLOCK_PRODUCE_MS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.run_round(),
                    _ = stop.changed() => {
                        engine.shutdown();
                        break;
                    }
                }
            }
        })
    }

    fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.clear_round();
        inner.state = ConsensusState::Idle;
        info!("consensus engine stopped");
    }

    // ---- round loop ------------------------------------------------------

    /// One tick of the round loop.
    pub fn run_round(self: &Arc<Self>) {
        let outgoing = {
            let mut inner = self.inner.lock().unwrap();
            let Some((tip_height, _)) = self.ledger.tip() else {
                // No genesis yet; sync-only nodes wait for it over p2p.
                return;
            };
            let vals = self.validators.read().unwrap();

            if vals.active_count() == 0 {
                drop(vals);
                self.solo_produce(&mut inner)
            } else {
                // Resync to the ledger tip when a peer-delivered block
                // advanced it out-of-band.
                if inner.round == 0 && inner.height != tip_height + 1 {
                    inner.height = tip_height + 1;
                    inner.clear_round();
                    inner.state = ConsensusState::Idle;
                }
                // Mid-round: vote sets are armed, the timer is running.
                if inner.prevotes.is_some() {
                    return;
                }
                let Some(proposer) = select_proposer(&vals, inner.height, inner.round) else {
                    return;
                };
                if Some(proposer) == self.local_address() {
                    self.propose(&mut inner, &vals)
                } else {
                    inner.prevotes = Some(VoteSet::new(inner.height, inner.round, VoteKind::Prevote));
                    inner.precommits =
                        Some(VoteSet::new(inner.height, inner.round, VoteKind::Precommit));
                    inner.state = ConsensusState::Voting;
                    self.arm_timer(&mut inner);
                    Outgoing::default()
                }
            }
        };
        self.flush(outgoing);
    }

    /// Builds and broadcasts a proposal for the current `(height, round)`,
    /// casting the proposer's own prevote.
    fn propose(self: &Arc<Self>, inner: &mut RoundState, vals: &ValidatorSet) -> Outgoing {
        let mut outgoing = Outgoing::default();
        let Some(keypair) = &self.local else {
            return outgoing;
        };
        inner.state = ConsensusState::Proposing;
        let block = match self.ledger.build_block(&self.mempool, keypair, now_unix()) {
            Ok(block) => block,
            Err(err) => {
                // Build failures (IO included) retry via the timeout path.
                warn!(%err, height = inner.height, "block assembly failed");
                inner.state = ConsensusState::Idle;
                self.arm_timer(inner);
                return outgoing;
            }
        };
        debug!(height = inner.height, round = inner.round, hash = %block.hash(), "proposing");

        let mut prevotes = VoteSet::new(inner.height, inner.round, VoteKind::Prevote);
        let vote = Vote::signed(
            inner.height,
            inner.round,
            VoteKind::Prevote,
            block.hash(),
            keypair,
        );
        prevotes.add(vote.clone(), vals.voting_power(&vote.voter));
        inner.proposed_block = Some(block.clone());
        inner.prevotes = Some(prevotes);
        inner.precommits = Some(VoteSet::new(inner.height, inner.round, VoteKind::Precommit));
        inner.state = ConsensusState::Voting;
        self.arm_timer(inner);

        outgoing.proposal = Some((inner.height, inner.round, block));
        outgoing.votes.push(vote);
        outgoing
    }

    /// Solo mode: no active validators, the configured producer commits
    /// immediately.
    fn solo_produce(&self, inner: &mut RoundState) -> Outgoing {
        let mut outgoing = Outgoing::default();
        if !self.produce_blocks {
            return outgoing;
        }
        let Some(keypair) = &self.local else {
            return outgoing;
        };
        let block = match self.ledger.build_block(&self.mempool, keypair, now_unix()) {
            Ok(block) => block,
            Err(err) => {
                warn!(%err, "solo block assembly failed");
                return outgoing;
            }
        };
        let mut vals = self.validators.write().unwrap();
        if let Err(err) = self.ledger.validate_block(&block, false, &vals) {
            error!(%err, "solo block failed validation");
            return outgoing;
        }
        if let Err(err) = self.ledger.add_block(&block, &mut vals) {
            error!(%err, height = block.height(), "solo commit failed");
            return outgoing;
        }
        drop(vals);
        self.purge_committed(&block);
        inner.height = block.height() + 1;
        inner.round = 0;
        inner.state = ConsensusState::Idle;
        info!(height = block.height(), txs = block.transactions.len(), "solo block committed");
        outgoing.committed = Some(block);
        outgoing
    }

    // ---- p2p handlers ----------------------------------------------------

    /// Handles a proposal received from the network.
    pub fn on_proposal(self: &Arc<Self>, round: u32, block: Block) {
        let outgoing = {
            let mut inner = self.inner.lock().unwrap();
            let Some((tip_height, _)) = self.ledger.tip() else {
                return;
            };
            if block.height() != tip_height + 1 {
                debug!(
                    height = block.height(),
                    tip = tip_height,
                    "dropping proposal outside next height"
                );
                return;
            }
            if let Some(existing) = &inner.proposed_block {
                if existing.hash() == block.hash() {
                    return;
                }
            }
            let vals = self.validators.read().unwrap();
            if select_proposer(&vals, block.height(), round) != Some(block.proposer) {
                warn!(
                    height = block.height(),
                    round,
                    proposer = %block.proposer,
                    "dropping proposal from wrong proposer"
                );
                return;
            }
            if let Err(err) = self.ledger.validate_block(&block, false, &vals) {
                warn!(%err, height = block.height(), "dropping invalid proposal");
                return;
            }

            // Adopt the proposal's round; a lagging node catches up here.
            // Vote sets pre-armed for the same (height, round) keep any
            // votes that raced ahead of the proposal.
            inner.height = block.height();
            inner.round = round;
            let mut prevotes = match inner.prevotes.take() {
                Some(set) if set.height == block.height() && set.round == round => set,
                _ => VoteSet::new(block.height(), round, VoteKind::Prevote),
            };
            let precommits = match inner.precommits.take() {
                Some(set) if set.height == block.height() && set.round == round => set,
                _ => VoteSet::new(block.height(), round, VoteKind::Precommit),
            };
            let mut outgoing = Outgoing::default();
            if let Some(keypair) = &self.local {
                if vals.is_active(&keypair.address()) {
                    let vote = Vote::signed(
                        inner.height,
                        round,
                        VoteKind::Prevote,
                        block.hash(),
                        keypair,
                    );
                    prevotes.add(vote.clone(), vals.voting_power(&vote.voter));
                    outgoing.votes.push(vote);
                }
            }
            inner.proposed_block = Some(block);
            inner.prevotes = Some(prevotes);
            inner.precommits = Some(precommits);
            inner.state = ConsensusState::Voting;
            self.arm_timer(&mut inner);
            outgoing
        };
        self.flush(outgoing);
    }

    /// Handles a vote received from the network.
    pub fn on_vote(self: &Arc<Self>, vote: Vote) {
        let outgoing = {
            let mut inner = self.inner.lock().unwrap();
            if vote.height != inner.height || vote.round != inner.round {
                // Votes never apply retroactively to other rounds.
                return;
            }
            let vals = self.validators.read().unwrap();
            let Some(validator) = vals.get(&vote.voter).filter(|v| v.is_active()) else {
                debug!(voter = %vote.voter, "dropping vote from non-validator");
                return;
            };
            if crypto::verify(
                &validator.public_key,
                vote.block_hash.as_bytes(),
                &vote.signature,
            )
            .is_err()
            {
                warn!(voter = %vote.voter, "dropping vote with bad signature");
                return;
            }
            let power = validator.voting_power;
            let total = vals.total_voting_power();

            let mut outgoing = Outgoing::default();
            let ready = match vote.kind {
                VoteKind::Prevote => {
                    let reached = {
                        let Some(set) = inner.prevotes.as_mut() else {
                            return;
                        };
                        if !set.add(vote, power) {
                            return;
                        }
                        set.has_quorum(total)
                    };
                    if reached {
                        self.cast_precommit(&mut inner, &vals, &mut outgoing)
                    } else {
                        false
                    }
                }
                VoteKind::Precommit => {
                    let reached = {
                        let Some(set) = inner.precommits.as_mut() else {
                            return;
                        };
                        if !set.add(vote, power) {
                            return;
                        }
                        set.has_quorum(total)
                    };
                    reached && inner.proposed_block.is_some()
                }
            };
            // The validator read guard must be released before commit takes
            // the writer side.
            drop(vals);
            if ready {
                outgoing.committed = self.commit(&mut inner);
            }
            outgoing
        };
        self.flush(outgoing);
    }

    /// Casts the local precommit once prevotes reach quorum. Returns true
    /// when the local vote itself completes the precommit quorum.
    fn cast_precommit(
        &self,
        inner: &mut RoundState,
        vals: &ValidatorSet,
        outgoing: &mut Outgoing,
    ) -> bool {
        let Some(keypair) = &self.local else {
            return false;
        };
        let addr = keypair.address();
        if !vals.is_active(&addr) {
            return false;
        }
        let Some(block_hash) = inner.proposed_block.as_ref().map(Block::hash) else {
            return false;
        };
        let already = inner
            .precommits
            .as_ref()
            .map(|s| s.contains(&addr))
            .unwrap_or(true);
        if already {
            return false;
        }
        let vote = Vote::signed(inner.height, inner.round, VoteKind::Precommit, block_hash, keypair);
        let power = vals.voting_power(&addr);
        let total = vals.total_voting_power();
        match inner.precommits.as_mut() {
            Some(set) => {
                set.add(vote.clone(), power);
                outgoing.votes.push(vote);
                set.has_quorum(total)
            }
            None => false,
        }
    }

    /// Commit path: quorum certificate assembly, quorum-checked
    /// re-validation, atomic ledger write, height advancement. Runs inside
    /// the round lock; the batch write is the designed serialization point.
    fn commit(&self, inner: &mut RoundState) -> Option<Block> {
        inner.state = ConsensusState::Committing;
        let Some(mut block) = inner.proposed_block.clone() else {
            inner.state = ConsensusState::Voting;
            return None;
        };
        block.commit_signatures = inner
            .precommits
            .as_ref()
            .map(VoteSet::commit_signatures)
            .unwrap_or_default();

        let mut vals = self.validators.write().unwrap();
        if let Err(err) = self.ledger.validate_block(&block, true, &vals) {
            error!(%err, height = block.height(), "quorum re-validation failed");
            inner.state = ConsensusState::Voting;
            return None;
        }
        if let Err(err) = self.ledger.add_block(&block, &mut vals) {
            // Resource failure: abandon this height's commit, let the
            // timeout path retry.
            error!(%err, height = block.height(), "commit failed");
            inner.state = ConsensusState::Voting;
            return None;
        }
        drop(vals);

        self.purge_committed(&block);
        inner.clear_round();
        inner.consecutive_timeouts = 0;
        inner.height = block.height() + 1;
        inner.round = 0;
        inner.state = ConsensusState::Idle;
        info!(
            height = block.height(),
            hash = %block.hash(),
            certificates = block.commit_signatures.len(),
            "block committed"
        );
        Some(block)
    }

    /// Commits a block delivered by p2p (flood or pull sync). Returns true
    /// when the ledger advanced.
    pub fn commit_external_block(&self, block: Block) -> Result<bool, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let expected = self.ledger.tip().map(|(h, _)| h + 1).unwrap_or(0);
        if block.height() != expected {
            debug!(
                height = block.height(),
                expected, "ignoring out-of-sequence block"
            );
            return Ok(false);
        }
        let mut vals = self.validators.write().unwrap();
        // Non-solo blocks past genesis must carry their quorum certificate.
        let expect_quorum = block.height() > 0 && vals.active_count() > 0;
        self.ledger.validate_block(&block, expect_quorum, &vals)?;
        self.ledger.add_block(&block, &mut vals)?;
        drop(vals);
        self.purge_committed(&block);

        if block.height() >= inner.height {
            inner.clear_round();
            inner.consecutive_timeouts = 0;
            inner.height = block.height() + 1;
            inner.round = 0;
            inner.state = ConsensusState::Idle;
        }
        info!(height = block.height(), hash = %block.hash(), "synced block committed");
        Ok(true)
    }

    // ---- round timer -----------------------------------------------------

    fn arm_timer(self: &Arc<Self>, inner: &mut RoundState) {
        if let Some(old) = inner.timer.take() {
            old.abort();
        }
        let engine = Arc::clone(self);
        let height = inner.height;
        let round = inner.round;
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ROUND_TIMEOUT_MS)).await;
            engine.on_round_timeout(height, round);
        }));
    }

    /// Round timeout: discard the round, rotate the proposer, escalate to
    /// peer sync after repeated silence. Timeouts never commit.
    fn on_round_timeout(self: &Arc<Self>, height: u64, round: u32) {
        let outgoing = {
            let mut inner = self.inner.lock().unwrap();
            if inner.height != height || inner.round != round {
                return;
            }
            inner.consecutive_timeouts += 1;
            warn!(
                height,
                round,
                consecutive = inner.consecutive_timeouts,
                "round timed out"
            );
            inner.clear_round();
            inner.round += 1;
            inner.state = ConsensusState::Idle;

            let vals = self.validators.read().unwrap();
            let mut outgoing = if select_proposer(&vals, inner.height, inner.round)
                == self.local_address()
            {
                self.propose(&mut inner, &vals)
            } else {
                inner.prevotes = Some(VoteSet::new(inner.height, inner.round, VoteKind::Prevote));
                inner.precommits =
                    Some(VoteSet::new(inner.height, inner.round, VoteKind::Precommit));
                inner.state = ConsensusState::Voting;
                self.arm_timer(&mut inner);
                Outgoing::default()
            };
            if inner.consecutive_timeouts >= SYNC_AFTER_TIMEOUTS {
                outgoing.request_sync = true;
            }
            outgoing
        };
        self.flush(outgoing);
    }

    // ---- helpers ---------------------------------------------------------

    fn purge_committed(&self, block: &Block) {
        let ids: Vec<Hash> = block.transactions.iter().map(|tx| tx.id).collect();
        self.mempool.purge(&ids);
    }

    /// Sends everything gathered during a critical section. Runs with the
    /// round lock released.
    fn flush(&self, outgoing: Outgoing) {
        let outbound = self.outbound.read().unwrap().clone();
        if let Some(out) = &outbound {
            if let Some((height, round, block)) = &outgoing.proposal {
                out.broadcast_proposal(*height, *round, block);
            }
            for vote in &outgoing.votes {
                out.broadcast_vote(vote);
            }
            if outgoing.request_sync {
                out.request_sync();
            }
        }
        if let Some(block) = &outgoing.committed {
            if let Some(hook) = self.on_commit.read().unwrap().as_ref() {
                hook(block);
            }
        }
    }
}
