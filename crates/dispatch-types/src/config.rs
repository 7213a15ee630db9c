// Configuration structs for the engine and the TCP transport.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{DispatchError, Result};
use crate::wire::{Rank, MAX_MSG_SIZE};

// ── Engine ────────────────────────────────────────────────────────────────────

/// How the progress engine (and a draining `disable`) waits when idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    /// Busy-poll with a spin-loop hint. Lowest dispatch latency, one core pinned.
    Spin,
    /// Yield the OS thread after an iteration that made no progress.
    Yield,
    /// Sleep while idle, doubling from 1µs up to `max_sleep`; reset on progress.
    Backoff { max_sleep: Duration },
}

/// What the engine does when a transport primitive, a trampoline or a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Log the fault and abort the process.
    Abort,
    /// Stop the engine and surface the error from `disable()`.
    Report,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll: PollStrategy,
    pub fault_policy: FaultPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll: PollStrategy::Spin,
            fault_policy: FaultPolicy::Abort,
        }
    }
}

impl EngineConfig {
    /// Defaults, overridden by `DISPATCH_POLL` (`spin` | `yield` | `backoff`)
    /// and `DISPATCH_FAULT_POLICY` (`abort` | `report`).
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(poll) = std::env::var("DISPATCH_POLL") {
            cfg.poll = parse_poll(&poll)?;
        }
        if let Ok(policy) = std::env::var("DISPATCH_FAULT_POLICY") {
            cfg.fault_policy = parse_fault_policy(&policy)?;
        }
        Ok(cfg)
    }
}

pub fn parse_poll(s: &str) -> Result<PollStrategy> {
    match s.trim().to_ascii_lowercase().as_str() {
        "spin"    => Ok(PollStrategy::Spin),
        "yield"   => Ok(PollStrategy::Yield),
        "backoff" => Ok(PollStrategy::Backoff { max_sleep: Duration::from_micros(200) }),
        other     => Err(DispatchError::Config(format!("unknown poll strategy {other:?}"))),
    }
}

pub fn parse_fault_policy(s: &str) -> Result<FaultPolicy> {
    match s.trim().to_ascii_lowercase().as_str() {
        "abort"  => Ok(FaultPolicy::Abort),
        "report" => Ok(FaultPolicy::Report),
        other    => Err(DispatchError::Config(format!("unknown fault policy {other:?}"))),
    }
}

// ── Networking ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// This process's rank; its listener binds `peers[rank]`.
    pub rank: Rank,
    /// Listen address of every rank, indexed by rank.
    pub peers: Vec<SocketAddr>,
    /// How long to keep redialing peers that are not up yet.
    pub connect_timeout: Duration,
    /// Frames larger than this are rejected as corrupt.
    /// Default: 4 KiB, comfortably above one enqueue message plus framing.
    pub max_frame_bytes: usize,
}

impl NetConfig {
    pub fn new(rank: Rank, peers: Vec<SocketAddr>) -> Self {
        Self {
            rank,
            peers,
            connect_timeout: Duration::from_secs(30),
            max_frame_bytes: 4096,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(DispatchError::Config("peer list is empty".into()));
        }
        if self.rank >= self.peers.len() {
            return Err(DispatchError::InvalidRank {
                rank: self.rank,
                size: self.peers.len(),
            });
        }
        if self.max_frame_bytes < MAX_MSG_SIZE {
            return Err(DispatchError::Config(format!(
                "max_frame_bytes {} cannot hold a {MAX_MSG_SIZE}-byte task",
                self.max_frame_bytes
            )));
        }
        Ok(())
    }
}
