//! Per-peer rate limiting.
//!
//! A token bucket bounds overall throughput; exceeding it earns a 60 s
//! ban. Request-heavy types carry additional sliding-window caps whose
//! exceedance drops the message without banning.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::p2p::message::MessageType;

pub const RATE_PER_SEC: f64 = 100.0;
pub const BURST: f64 = 200.0;
pub const BAN_DURATION: Duration = Duration::from_secs(60);

/// Per-type caps per second.
fn type_cap(kind: MessageType) -> Option<usize> {
    match kind {
        MessageType::GetBlocks => Some(5),
        MessageType::NewTx => Some(50),
        MessageType::Proposal => Some(10),
        MessageType::Vote => Some(50),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Per-type window exceeded; drop without banning.
    Drop,
    /// Bucket exhausted or an earlier ban still active.
    Banned,
}

struct PeerLimiter {
    tokens: f64,
    refilled_at: Instant,
    banned_until: Option<Instant>,
    windows: HashMap<MessageType, VecDeque<Instant>>,
}

impl PeerLimiter {
    fn new(now: Instant) -> Self {
        Self {
            tokens: BURST,
            refilled_at: now,
            banned_until: None,
            windows: HashMap::new(),
        }
    }

    fn check(&mut self, kind: MessageType, now: Instant) -> Verdict {
        if let Some(until) = self.banned_until {
            if now < until {
                return Verdict::Banned;
            }
            self.banned_until = None;
            self.tokens = BURST;
            self.refilled_at = now;
        }

        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * RATE_PER_SEC).min(BURST);
        self.refilled_at = now;
        if self.tokens < 1.0 {
            self.banned_until = Some(now + BAN_DURATION);
            return Verdict::Banned;
        }
        self.tokens -= 1.0;

        if let Some(cap) = type_cap(kind) {
            let window = self.windows.entry(kind).or_default();
            while let Some(front) = window.front() {
                if now.duration_since(*front) > Duration::from_secs(1) {
                    window.pop_front();
                } else {
                    break;
                }
            }
            if window.len() >= cap {
                return Verdict::Drop;
            }
            window.push_back(now);
        }
        Verdict::Allow
    }
}

#[derive(Default)]
pub struct RateLimiter {
    peers: Mutex<HashMap<String, PeerLimiter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, peer_id: &str, kind: MessageType) -> Verdict {
        self.check_at(peer_id, kind, Instant::now())
    }

    fn check_at(&self, peer_id: &str, kind: MessageType, now: Instant) -> Verdict {
        let mut peers = self.peers.lock().unwrap();
        peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerLimiter::new(now))
            .check(kind, now)
    }

    pub fn is_banned(&self, peer_id: &str) -> bool {
        let peers = self.peers.lock().unwrap();
        peers
            .get(peer_id)
            .and_then(|p| p.banned_until)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    /// Drops all state for a disconnected peer.
    pub fn forget(&self, peer_id: &str) {
        self.peers.lock().unwrap().remove(peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_ban() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..(BURST as usize) {
            assert_eq!(limiter.check_at("p", MessageType::Ping, t0), Verdict::Allow);
        }
        // Bucket drained with no time elapsed: next message bans.
        assert_eq!(limiter.check_at("p", MessageType::Ping, t0), Verdict::Banned);
        assert_eq!(limiter.check_at("p", MessageType::Ping, t0), Verdict::Banned);
    }

    #[test]
    fn ban_expires() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..=(BURST as usize) {
            limiter.check_at("p", MessageType::Ping, t0);
        }
        let after = t0 + BAN_DURATION + Duration::from_secs(1);
        assert_eq!(
            limiter.check_at("p", MessageType::Ping, after),
            Verdict::Allow
        );
    }

    #[test]
    fn get_blocks_capped_per_second() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..5 {
            assert_eq!(
                limiter.check_at("p", MessageType::GetBlocks, t0),
                Verdict::Allow
            );
        }
        assert_eq!(
            limiter.check_at("p", MessageType::GetBlocks, t0),
            Verdict::Drop
        );
        // The window slides: a second later the cap frees up.
        let later = t0 + Duration::from_secs(2);
        assert_eq!(
            limiter.check_at("p", MessageType::GetBlocks, later),
            Verdict::Allow
        );
    }

    #[test]
    fn caps_are_per_peer() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..5 {
            limiter.check_at("a", MessageType::GetBlocks, t0);
        }
        assert_eq!(
            limiter.check_at("b", MessageType::GetBlocks, t0),
            Verdict::Allow
        );
    }
}
