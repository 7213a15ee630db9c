use std::io;
use std::net::SocketAddr;

use dispatch_types::{DispatchError, Rank, Tag};

/// Transport faults. The engine treats every one of these as fatal.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("rank {rank} out of range for group of size {size}")]
    InvalidRank { rank: Rank, size: usize },

    #[error("{len}-byte message on {tag} exceeds posted receive capacity {capacity}")]
    Truncated { tag: Tag, len: usize, capacity: usize },

    #[error("receive request on {tag} is not active")]
    RequestInactive { tag: Tag },

    #[error("connection to rank {rank} lost: {reason}")]
    Disconnected { rank: Rank, reason: String },

    #[error("blocking transport call made from inside an async runtime")]
    AsyncContext,

    #[error("dialing rank {rank} at {addr} timed out")]
    ConnectTimeout { rank: Rank, addr: SocketAddr },

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("frame error: {0}")]
    Frame(String),

    #[error(transparent)]
    Config(#[from] DispatchError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, NetError>;
