use dispatch_net::NetError;
use dispatch_types::{DispatchError, Rank, TrampolineId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("transport fault: {0}")]
    Net(#[from] NetError),

    #[error("task {task:?} ({trampoline}) from rank {origin} panicked: {message}")]
    TaskPanicked {
        /// Registered handler name.
        task: String,
        origin: Rank,
        trampoline: TrampolineId,
        message: String,
    },

    #[error("completion counter underflow: decrement with no task outstanding")]
    CounterUnderflow,

    #[error("failed to start progress thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("progress engine stopped: {0}")]
    EngineStopped(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, EngineError>;
