//! The point-to-point substrate the progress engine runs on.
//!
//! Mirrors the handful of primitives the engine needs from a cluster
//! interconnect: rank/size queries, posted receives that are polled with
//! [`Transport::test`], blocking sends, cancellation and a collective barrier.

use dispatch_types::{Rank, Tag};

use crate::error::{NetError, Result};
use crate::mailbox::Mailbox;

// ── Threading ────────────────────────────────────────────────────────────────

/// Concurrency a transport tolerates across threads of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threading {
    /// Only one thread at a time may call into the transport.
    Serialized,
    /// One thread may post/test/cancel receives while another issues collectives.
    Multiple,
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

// ── Receive requests ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Active,
    Complete,
}

/// A posted receive for any source on one tag.
///
/// Completes at most once; after [`Transport::test`] hands out a message the
/// request is inactive and a fresh one must be posted.
#[derive(Debug)]
pub struct RecvRequest {
    tag: Tag,
    capacity: usize,
    state: RequestState,
}

impl RecvRequest {
    pub fn new(tag: Tag, capacity: usize) -> Self {
        Self {
            tag,
            capacity,
            state: RequestState::Active,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_active(&self) -> bool {
        self.state == RequestState::Active
    }

    /// Match this request against the head of `mailbox`'s queue for its tag.
    pub(crate) fn complete_from(&mut self, mailbox: &Mailbox) -> Result<Option<Envelope>> {
        if !self.is_active() {
            return Err(NetError::RequestInactive { tag: self.tag });
        }
        let Some(envelope) = mailbox.try_take(self.tag)? else {
            return Ok(None);
        };
        self.state = RequestState::Complete;
        if envelope.payload.len() > self.capacity {
            return Err(NetError::Truncated {
                tag: self.tag,
                len: envelope.payload.len(),
                capacity: self.capacity,
            });
        }
        Ok(Some(envelope))
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

pub trait Transport: Send + Sync + 'static {
    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    fn threading(&self) -> Threading {
        Threading::Multiple
    }

    /// Post a non-blocking receive for any source on `tag`.
    fn post_recv(&self, tag: Tag, capacity: usize) -> Result<RecvRequest>;

    /// Non-blocking completion test. `Some` exactly once per request.
    fn test(&self, request: &mut RecvRequest) -> Result<Option<Envelope>>;

    /// Blocking send; returns once `payload` is handed to the interconnect.
    fn send(&self, dest: Rank, tag: Tag, payload: &[u8]) -> Result<()>;

    /// Withdraw a posted receive. Unmatched messages stay queued.
    fn cancel(&self, request: RecvRequest) -> Result<()>;

    /// Collective: returns once every rank of the group has entered.
    fn barrier(&self) -> Result<()>;
}

pub(crate) fn check_rank(rank: Rank, size: usize) -> Result<()> {
    if rank >= size {
        return Err(NetError::InvalidRank { rank, size });
    }
    Ok(())
}
