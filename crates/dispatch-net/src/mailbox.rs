//! Per-rank arrival queues, one FIFO per tag.
//!
//! Every transport delivers into a [`Mailbox`]; posted receives are matched
//! against it lazily on `test`. Messages that arrive before a receive is posted
//! simply wait in their queue, so nothing is lost between a completion and the
//! repost that follows it.

use std::collections::{HashMap, VecDeque};

use dispatch_types::{Rank, Tag};
use parking_lot::{Condvar, Mutex};

use crate::error::{NetError, Result};
use crate::transport::Envelope;

#[derive(Default)]
struct Inner {
    queues: HashMap<Tag, VecDeque<Envelope>>,
    /// First fatal fault seen by a background reader, if any.
    poisoned: Option<(Rank, String)>,
}

#[derive(Default)]
pub struct Mailbox {
    inner: Mutex<Inner>,
    arrived: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, envelope: Envelope) {
        let mut inner = self.inner.lock();
        inner
            .queues
            .entry(envelope.tag)
            .or_default()
            .push_back(envelope);
        drop(inner);
        self.arrived.notify_all();
    }

    /// Pop the oldest message on `tag`, if any.
    pub fn try_take(&self, tag: Tag) -> Result<Option<Envelope>> {
        let mut inner = self.inner.lock();
        if let Some(envelope) = inner.queues.get_mut(&tag).and_then(VecDeque::pop_front) {
            return Ok(Some(envelope));
        }
        match &inner.poisoned {
            Some((rank, reason)) => Err(disconnected(*rank, reason)),
            None => Ok(None),
        }
    }

    /// Block until a message on `tag` arrives.
    pub fn take_blocking(&self, tag: Tag) -> Result<Envelope> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(envelope) = inner.queues.get_mut(&tag).and_then(VecDeque::pop_front) {
                return Ok(envelope);
            }
            if let Some((rank, reason)) = &inner.poisoned {
                return Err(disconnected(*rank, reason));
            }
            self.arrived.wait(&mut inner);
        }
    }

    pub fn pending(&self, tag: Tag) -> usize {
        self.inner.lock().queues.get(&tag).map_or(0, VecDeque::len)
    }

    /// Record a fault from `rank`'s connection; waiters and later takes fail.
    pub fn poison(&self, rank: Rank, reason: String) {
        let mut inner = self.inner.lock();
        if inner.poisoned.is_none() {
            inner.poisoned = Some((rank, reason));
        }
        drop(inner);
        self.arrived.notify_all();
    }
}

fn disconnected(rank: Rank, reason: &str) -> NetError {
    NetError::Disconnected {
        rank,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dispatch_types::{TAG_DECREMENT, TAG_ENQUEUE};

    use super::*;

    fn env(source: usize, tag: Tag, byte: u8) -> Envelope {
        Envelope { source, tag, payload: vec![byte] }
    }

    #[test]
    fn fifo_per_tag() {
        let mb = Mailbox::new();
        mb.push(env(1, TAG_ENQUEUE, 1));
        mb.push(env(2, TAG_DECREMENT, 9));
        mb.push(env(1, TAG_ENQUEUE, 2));

        assert_eq!(mb.pending(TAG_ENQUEUE), 2);
        assert_eq!(mb.try_take(TAG_ENQUEUE).unwrap().unwrap().payload, vec![1]);
        assert_eq!(mb.try_take(TAG_ENQUEUE).unwrap().unwrap().payload, vec![2]);
        assert!(mb.try_take(TAG_ENQUEUE).unwrap().is_none());
        assert_eq!(mb.pending(TAG_DECREMENT), 1);
    }

    #[test]
    fn take_blocking_wakes_on_push() {
        let mb = Arc::new(Mailbox::new());
        let waiter = {
            let mb = mb.clone();
            std::thread::spawn(move || mb.take_blocking(TAG_DECREMENT))
        };
        std::thread::sleep(Duration::from_millis(20));
        mb.push(env(3, TAG_DECREMENT, 0));

        let got = waiter.join().unwrap().unwrap();
        assert_eq!(got.source, 3);
    }

    #[test]
    fn poison_fails_waiters_but_drains_queued_first() {
        let mb = Mailbox::new();
        mb.push(env(0, TAG_ENQUEUE, 5));
        mb.poison(4, "reset by peer".into());

        assert!(mb.try_take(TAG_ENQUEUE).unwrap().is_some());
        match mb.try_take(TAG_ENQUEUE) {
            Err(NetError::Disconnected { rank, reason }) => {
                assert_eq!(rank, 4);
                assert_eq!(reason, "reset by peer");
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert!(mb.take_blocking(TAG_DECREMENT).is_err());
    }
}
