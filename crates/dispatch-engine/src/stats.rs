use std::sync::atomic::{AtomicU64, Ordering};

/// Live message and execution counters for one dispatcher.
#[derive(Debug, Default)]
pub struct EngineStats {
    submitted_local: AtomicU64,
    submitted_remote: AtomicU64,
    enqueue_sent: AtomicU64,
    enqueue_received: AtomicU64,
    decrement_sent: AtomicU64,
    decrement_received: AtomicU64,
    executed_local: AtomicU64,
    executed_remote: AtomicU64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl EngineStats {
    bump! {
        submitted_local_inc    => submitted_local,
        submitted_remote_inc   => submitted_remote,
        enqueue_sent_inc       => enqueue_sent,
        enqueue_received_inc   => enqueue_received,
        decrement_sent_inc     => decrement_sent,
        decrement_received_inc => decrement_received,
        executed_local_inc     => executed_local,
        executed_remote_inc    => executed_remote,
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted_local: self.submitted_local.load(Ordering::Relaxed),
            submitted_remote: self.submitted_remote.load(Ordering::Relaxed),
            enqueue_sent: self.enqueue_sent.load(Ordering::Relaxed),
            enqueue_received: self.enqueue_received.load(Ordering::Relaxed),
            decrement_sent: self.decrement_sent.load(Ordering::Relaxed),
            decrement_received: self.decrement_received.load(Ordering::Relaxed),
            executed_local: self.executed_local.load(Ordering::Relaxed),
            executed_remote: self.executed_remote.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Self-targeted submits (fast path, never touch the network).
    pub submitted_local: u64,
    pub submitted_remote: u64,
    pub enqueue_sent: u64,
    pub enqueue_received: u64,
    pub decrement_sent: u64,
    pub decrement_received: u64,
    /// Tasks run here that this process submitted.
    pub executed_local: u64,
    /// Tasks run here on behalf of a peer.
    pub executed_remote: u64,
}

impl StatsSnapshot {
    pub fn messages_sent(&self) -> u64 {
        self.enqueue_sent + self.decrement_sent
    }

    pub fn executed(&self) -> u64 {
        self.executed_local + self.executed_remote
    }
}

impl std::ops::Add for StatsSnapshot {
    type Output = Self;

    fn add(self, o: Self) -> Self {
        Self {
            submitted_local: self.submitted_local + o.submitted_local,
            submitted_remote: self.submitted_remote + o.submitted_remote,
            enqueue_sent: self.enqueue_sent + o.enqueue_sent,
            enqueue_received: self.enqueue_received + o.enqueue_received,
            decrement_sent: self.decrement_sent + o.decrement_sent,
            decrement_received: self.decrement_received + o.decrement_received,
            executed_local: self.executed_local + o.executed_local,
            executed_remote: self.executed_remote + o.executed_remote,
        }
    }
}

impl std::iter::Sum for StatsSnapshot {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |a, b| a + b)
    }
}
