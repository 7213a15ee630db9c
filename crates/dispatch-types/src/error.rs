// Caller-contract errors shared by every dispatch crate.

use crate::task::TrampolineId;
use crate::wire::Rank;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    // ── Submission contract ───────────────────────────────────────────────

    #[error("task payload too large: {len} bytes of arguments + {header} byte trampoline id exceeds {max}")]
    PayloadTooLarge { len: usize, header: usize, max: usize },

    #[error("target rank {rank} out of range for group of size {size}")]
    InvalidRank { rank: Rank, size: usize },

    #[error("invalid session transition: {from} → {to}")]
    InvalidTransition { from: String, to: String },

    // ── Trampolines ───────────────────────────────────────────────────────

    #[error("no trampoline registered for {0}")]
    UnknownTrampoline(TrampolineId),

    #[error("trampoline {id} already registered (name {name:?})")]
    DuplicateTrampoline { id: TrampolineId, name: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed task message: {0}")]
    MalformedTask(String),

    // ── Transport preconditions ───────────────────────────────────────────

    #[error("transport does not allow concurrent engine and caller threads")]
    ThreadingUnsupported,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
