// Ranks, tags and the fixed sizes every rank agrees on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a process within its group, in `[0, size)`.
pub type Rank = usize;

/// Fixed size of every enqueue message and of every [`TaskBuffer`](crate::TaskBuffer).
pub const MAX_MSG_SIZE: usize = 512;

/// Width of the trampoline id that prefixes every task buffer.
pub const TRAMPOLINE_ID_BYTES: usize = 4;

/// Largest argument blob a single task can carry.
pub const MAX_ARGS_SIZE: usize = MAX_MSG_SIZE - TRAMPOLINE_ID_BYTES;

// ── Tags ──────────────────────────────────────────────────────────────────────

/// Message tag. Delivery is FIFO per (source, destination, tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(pub u32);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TAG_ENQUEUE         => write!(f, "enqueue"),
            TAG_DECREMENT       => write!(f, "decrement"),
            TAG_BARRIER         => write!(f, "barrier"),
            TAG_BARRIER_RELEASE => write!(f, "barrier-release"),
            Tag(other)          => write!(f, "tag#{other}"),
        }
    }
}

/// Full-size task messages.
pub const TAG_ENQUEUE: Tag = Tag(1024);
/// Zero-length completion notices sent back to a task's originator.
pub const TAG_DECREMENT: Tag = Tag(2048);
/// Reserved for transport-internal barrier arrivals.
pub const TAG_BARRIER: Tag = Tag(4096);
/// Reserved for transport-internal barrier releases.
pub const TAG_BARRIER_RELEASE: Tag = Tag(4097);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_budget_leaves_room_for_trampoline_id() {
        assert_eq!(MAX_ARGS_SIZE + TRAMPOLINE_ID_BYTES, MAX_MSG_SIZE);
    }

    #[test]
    fn tags_are_distinct_and_named() {
        let tags = [TAG_ENQUEUE, TAG_DECREMENT, TAG_BARRIER, TAG_BARRIER_RELEASE];
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(TAG_DECREMENT.to_string(), "decrement");
        assert_eq!(Tag(7).to_string(), "tag#7");
    }
}
