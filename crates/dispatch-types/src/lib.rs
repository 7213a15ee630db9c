//! `dispatch-types` — vocabulary shared by every dispatch crate.
//!
//! Ranks and tags, the fixed wire sizes, the owned [`TaskBuffer`] that carries
//! one task through the queues and over the wire, the caller-contract error
//! type, and the configuration structs.

pub mod config;
pub mod error;
pub mod task;
pub mod wire;

pub use config::{EngineConfig, FaultPolicy, NetConfig, PollStrategy};
pub use error::DispatchError;
pub use task::{TaskBuffer, TrampolineId};
pub use wire::{
    Rank, Tag, MAX_ARGS_SIZE, MAX_MSG_SIZE, TAG_BARRIER, TAG_BARRIER_RELEASE, TAG_DECREMENT,
    TAG_ENQUEUE, TRAMPOLINE_ID_BYTES,
};
