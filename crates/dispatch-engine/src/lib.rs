//! `dispatch-engine` — fire-and-forget remote task dispatch for a fixed group
//! of ranks.
//!
//! Any rank may ask any other rank (itself included) to run a task. The caller
//! gets no handle and no result; the only completion guarantee is collective:
//! [`Dispatcher::disable`] returns on every rank only once every task submitted
//! anywhere in the group has run exactly once.
//!
//! # Architecture
//!
//! ```text
//!  app threads ──submit──▶ ┌──────────┐   TAG_ENQUEUE   ┌──────────┐
//!                          │ outbound │ ──────────────▶ │ inbound  │ ─▶ trampoline
//!   (self target) ───────▶ │ inbound  │                 │  queue   │
//!                          └──────────┘ ◀────────────── └──────────┘
//!                            counter − 1   TAG_DECREMENT
//! ```
//!
//! Each process runs one progress-engine thread that moves
//! tasks between the queues and the [`Transport`](dispatch_net::Transport).

pub mod counter;
pub mod dispatcher;
mod engine;
pub mod error;
pub mod queue;
pub mod registry;
pub mod session;
pub mod stats;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use counter::CompletionCounter;
pub use dispatcher::{Dispatcher, DrainReport, Submitter};
pub use error::{EngineError, Result};
pub use queue::{QueuePair, Task, TaskQueue};
pub use registry::{encode_args, RemoteTask, TaskContext, TaskKey, TaskRegistry};
pub use session::{Session, SessionState};
pub use stats::{EngineStats, StatsSnapshot};
