//! `dispatch-net` — the point-to-point substrate under the progress engine.
//!
//! The engine only ever talks to a [`Transport`]. Two implementations ship here:
//!
//! - [`LocalFabric`] / [`LocalTransport`] — every rank in one process, one
//!   thread per rank. Used by tests and the node binary's `local` mode.
//! - [`TcpTransport`] — one rank per process over a full mesh of TCP streams,
//!   framed as `[u32 BE length][bincode Frame]` (see [`codec`]).
//!
//! Both deliver into a per-rank [`Mailbox`] with one FIFO per tag, which gives
//! in-order delivery for every (source, destination, tag) triple.

pub mod codec;
pub mod error;
pub mod local;
pub mod mailbox;
pub mod tcp;
pub mod transport;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use error::{NetError, Result};
pub use local::{LocalFabric, LocalTransport};
pub use mailbox::Mailbox;
pub use tcp::TcpTransport;
pub use transport::{Envelope, RecvRequest, Threading, Transport};
