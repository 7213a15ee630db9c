//! In-process group: every rank is a [`LocalTransport`] sharing one fabric.
//!
//! Used by the test suite and the `local` mode of the node binary. Ranks are
//! expected to live on separate threads, exactly as separate processes would.

use std::collections::HashMap;
use std::sync::{Arc, Barrier};

use dispatch_types::{Rank, Tag};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::transport::{check_rank, Envelope, RecvRequest, Transport};

struct Fabric {
    mailboxes: Vec<Mailbox>,
    barrier: Barrier,
    /// `(source, tag) → messages sent`
    sent: Mutex<HashMap<(Rank, Tag), u64>>,
}

pub struct LocalFabric;

impl LocalFabric {
    /// Build a group of `size` connected ranks, indexed by rank.
    pub fn bootstrap(size: usize) -> Vec<LocalTransport> {
        let fabric = Arc::new(Fabric {
            mailboxes: (0..size).map(|_| Mailbox::new()).collect(),
            barrier: Barrier::new(size),
            sent: Mutex::new(HashMap::new()),
        });
        (0..size)
            .map(|rank| LocalTransport {
                rank,
                fabric: fabric.clone(),
            })
            .collect()
    }
}

pub struct LocalTransport {
    rank: Rank,
    fabric: Arc<Fabric>,
}

impl LocalTransport {
    /// Messages on `tag` sent by any rank of the group so far.
    pub fn messages_sent(&self, tag: Tag) -> u64 {
        self.fabric
            .sent
            .lock()
            .iter()
            .filter(|((_, t), _)| *t == tag)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Messages on `tag` sent by `source` so far.
    pub fn messages_sent_by(&self, source: Rank, tag: Tag) -> u64 {
        self.fabric
            .sent
            .lock()
            .get(&(source, tag))
            .copied()
            .unwrap_or(0)
    }

    /// Messages on `tag` waiting in this rank's mailbox.
    pub fn pending(&self, tag: Tag) -> usize {
        self.fabric.mailboxes[self.rank].pending(tag)
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.mailboxes.len()
    }

    fn post_recv(&self, tag: Tag, capacity: usize) -> Result<RecvRequest> {
        Ok(RecvRequest::new(tag, capacity))
    }

    fn test(&self, request: &mut RecvRequest) -> Result<Option<Envelope>> {
        request.complete_from(&self.fabric.mailboxes[self.rank])
    }

    fn send(&self, dest: Rank, tag: Tag, payload: &[u8]) -> Result<()> {
        check_rank(dest, self.size())?;
        trace!(from = self.rank, to = dest, %tag, bytes = payload.len(), "local send");
        *self.fabric.sent.lock().entry((self.rank, tag)).or_insert(0) += 1;
        self.fabric.mailboxes[dest].push(Envelope {
            source: self.rank,
            tag,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn cancel(&self, _request: RecvRequest) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.fabric.barrier.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use dispatch_types::{TAG_DECREMENT, TAG_ENQUEUE};

    use super::*;
    use crate::error::NetError;

    #[test]
    fn bootstrap_assigns_ranks() {
        let group = LocalFabric::bootstrap(3);
        for (i, t) in group.iter().enumerate() {
            assert_eq!(t.rank(), i);
            assert_eq!(t.size(), 3);
        }
    }

    #[test]
    fn send_then_test_delivers_with_source() {
        let group = LocalFabric::bootstrap(2);
        group[0].send(1, TAG_ENQUEUE, b"task").unwrap();

        let mut req = group[1].post_recv(TAG_ENQUEUE, 16).unwrap();
        let env = group[1].test(&mut req).unwrap().unwrap();
        assert_eq!(env.source, 0);
        assert_eq!(env.payload, b"task");

        assert_eq!(group[0].messages_sent(TAG_ENQUEUE), 1);
        assert_eq!(group[1].messages_sent_by(0, TAG_ENQUEUE), 1);
        assert_eq!(group[1].messages_sent(TAG_DECREMENT), 0);
    }

    #[test]
    fn per_pair_order_is_preserved() {
        let group = LocalFabric::bootstrap(2);
        for i in 0..10u8 {
            group[0].send(1, TAG_ENQUEUE, &[i]).unwrap();
        }
        for i in 0..10u8 {
            let mut req = group[1].post_recv(TAG_ENQUEUE, 1).unwrap();
            assert_eq!(group[1].test(&mut req).unwrap().unwrap().payload, vec![i]);
        }
    }

    #[test]
    fn send_to_unknown_rank_fails() {
        let group = LocalFabric::bootstrap(2);
        assert!(matches!(
            group[0].send(5, TAG_ENQUEUE, &[]),
            Err(NetError::InvalidRank { rank: 5, size: 2 })
        ));
    }

    #[test]
    fn cancel_leaves_unmatched_messages_queued() {
        let group = LocalFabric::bootstrap(2);
        let req = group[1].post_recv(TAG_DECREMENT, 0).unwrap();
        group[1].cancel(req).unwrap();
        group[0].send(1, TAG_DECREMENT, &[]).unwrap();
        assert_eq!(group[1].pending(TAG_DECREMENT), 1);
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let group = LocalFabric::bootstrap(4);
        let handles: Vec<_> = group
            .into_iter()
            .map(|t| thread::spawn(move || t.barrier()))
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
    }
}
