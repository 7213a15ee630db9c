//! Lifecycle controller and submit front-end.
//!
//! A [`Dispatcher`] exists between a collective [`enable`](Dispatcher::enable)
//! and a collective [`disable`](Dispatcher::disable). In between, any thread
//! may submit through it or through a cloned [`Submitter`].

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use dispatch_net::{Threading, Transport};
use dispatch_types::{DispatchError, EngineConfig, Rank, TrampolineId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{self, EngineReport, Idler, Shared};
use crate::error::{EngineError, Result};
use crate::registry::{encode_args, RemoteTask, TaskKey, TaskRegistry};
use crate::session::SessionState;
use crate::stats::StatsSnapshot;

/// Returned by a clean [`Dispatcher::disable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub stats: StatsSnapshot,
    /// Tasks still queued when the engine stopped. Zero after a clean drain.
    pub discarded: usize,
}

pub struct Dispatcher<T: Transport> {
    shared: Arc<Shared<T>>,
    engine: Option<JoinHandle<EngineReport>>,
}

impl<T: Transport> Dispatcher<T> {
    /// Collective: every rank of the group must call this once.
    ///
    /// Returns after the engine thread has posted its receives and the whole
    /// group has passed a barrier, so no rank can submit before its peers are
    /// able to receive.
    ///
    /// Blocks the calling thread. From async code, call it (and `disable`)
    /// inside `spawn_blocking`; a transport that drives its own runtime, such
    /// as `TcpTransport`, refuses to run on a runtime thread.
    pub fn enable(transport: T, registry: TaskRegistry, config: EngineConfig) -> Result<Self> {
        if transport.threading() != Threading::Multiple {
            return Err(DispatchError::ThreadingUnsupported.into());
        }
        let shared = Arc::new(Shared::new(transport, registry, config));
        let (rank, size) = (shared.rank, shared.size);

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let handle = engine::spawn(shared.clone(), ready_tx)?;
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(EngineError::EngineStopped("engine thread exited before it was ready".into()));
            }
        }

        let dispatcher = Self { shared, engine: Some(handle) };
        dispatcher.shared.transport.barrier()?;
        info!(
            rank,
            size,
            handlers = dispatcher.shared.registry.len(),
            "dispatch enabled"
        );
        Ok(dispatcher)
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn rank(&self) -> Rank {
        self.shared.rank
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Tasks this process submitted that have not been confirmed executed.
    pub fn pending(&self) -> usize {
        self.shared.counter.get()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.shared.session.state()
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    /// A cloneable handle for submitting from other threads.
    pub fn submitter(&self) -> Submitter<T> {
        Submitter { shared: self.shared.clone() }
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Run `task` on `target`. The task type must be registered on every rank.
    pub fn submit<R: RemoteTask>(&self, target: Rank, task: &R) -> Result<()> {
        submit_typed(&self.shared, target, TaskKey::<R>::new(R::NAME).id(), task)
    }

    /// Run the handler named by `key` on `target` with `args`.
    pub fn submit_with<A: Serialize>(&self, target: Rank, key: TaskKey<A>, args: &A) -> Result<()> {
        submit_typed(&self.shared, target, key.id(), args)
    }

    /// Untyped form: `args` must already be encoded the way the handler decodes.
    pub fn submit_raw(&self, target: Rank, id: TrampolineId, args: &[u8]) -> Result<()> {
        self.shared.submit_raw(target, id, args)
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Collective: wait until every task this rank submitted has run, agree
    /// with the rest of the group, then stop the engine.
    ///
    /// Under `FaultPolicy::Report` an engine fault ends the wait early and is
    /// returned here; the group barrier is skipped in that case.
    pub fn disable(mut self) -> Result<DrainReport> {
        let shared = self.shared.clone();
        shared.session.begin_drain()?;
        debug!(rank = shared.rank, pending = shared.counter.get(), "draining");

        let mut idler = Idler::new(shared.config.poll);
        loop {
            if shared.faulted.load(Ordering::Acquire) {
                self.stop();
                let err = shared
                    .take_fault()
                    .unwrap_or_else(|| EngineError::EngineStopped("fault already taken".into()));
                return Err(err);
            }
            if shared.counter.is_zero() {
                break;
            }
            if self.engine.as_ref().is_some_and(|h| h.is_finished()) {
                self.stop();
                return Err(EngineError::EngineStopped(
                    "engine exited with tasks outstanding".into(),
                ));
            }
            idler.idle();
        }

        // Zero here only means this rank is done; peers may still be sending.
        shared.transport.barrier()?;

        let report = self.stop();
        if let Some(err) = shared.take_fault() {
            return Err(err);
        }
        let stats = shared.stats.snapshot();
        info!(
            rank = shared.rank,
            enqueue_sent = stats.enqueue_sent,
            decrement_sent = stats.decrement_sent,
            executed = stats.executed(),
            discarded = report.discarded,
            "dispatch disabled"
        );
        Ok(DrainReport { stats, discarded: report.discarded })
    }

    /// Raise the shutdown flag and join the engine thread.
    fn stop(&mut self) -> EngineReport {
        self.shared.shutdown.store(true, Ordering::Release);
        let report = match self.engine.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                warn!(rank = self.shared.rank, "progress engine thread panicked");
                EngineReport::default()
            }
            None => EngineReport::default(),
        };
        self.shared.session.finish();
        report
    }
}

impl<T: Transport> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        if self.engine.is_some() {
            warn!(
                rank = self.shared.rank,
                pending = self.shared.counter.get(),
                "dispatcher dropped without disable; stopping engine"
            );
            self.stop();
        }
    }
}

// ── Submitter ────────────────────────────────────────────────────────────────

/// Submit-only handle, cheap to clone and send to worker threads.
pub struct Submitter<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Submitter<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Transport> Submitter<T> {
    pub fn rank(&self) -> Rank {
        self.shared.rank
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn submit<R: RemoteTask>(&self, target: Rank, task: &R) -> Result<()> {
        submit_typed(&self.shared, target, TaskKey::<R>::new(R::NAME).id(), task)
    }

    pub fn submit_with<A: Serialize>(&self, target: Rank, key: TaskKey<A>, args: &A) -> Result<()> {
        submit_typed(&self.shared, target, key.id(), args)
    }

    pub fn submit_raw(&self, target: Rank, id: TrampolineId, args: &[u8]) -> Result<()> {
        self.shared.submit_raw(target, id, args)
    }
}

fn submit_typed<T: Transport, A: Serialize + ?Sized>(
    shared: &Shared<T>,
    target: Rank,
    id: TrampolineId,
    args: &A,
) -> Result<()> {
    let bytes = encode_args(args)?;
    shared.submit_raw(target, id, &bytes)
}
