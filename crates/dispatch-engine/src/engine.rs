//! The progress engine: one OS thread per process that moves tasks between the
//! queues and the transport.
//!
//! Every iteration is non-blocking apart from a single outbound send, and
//! always runs the same four steps in the same order:
//!
//! ```text
//!   1. test task receive      → inbound queue, repost
//!   2. test decrement receive → counter − 1, repost
//!   3. pop one outbound task  → send(TAG_ENQUEUE)
//!   4. pop one inbound task   → run trampoline → counter − 1 | send(TAG_DECREMENT)
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dispatch_net::{RecvRequest, Transport};
use dispatch_types::{
    DispatchError, EngineConfig, FaultPolicy, PollStrategy, Rank, TaskBuffer, TrampolineId,
    MAX_MSG_SIZE, TAG_DECREMENT, TAG_ENQUEUE,
};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::counter::CompletionCounter;
use crate::error::{EngineError, Result};
use crate::queue::{QueuePair, Task};
use crate::registry::{TaskContext, TaskRegistry};
use crate::session::Session;
use crate::stats::EngineStats;

// ── Shared context ───────────────────────────────────────────────────────────

/// Everything the submit path and the engine thread both touch.
pub(crate) struct Shared<T> {
    pub(crate) transport: T,
    pub(crate) registry: TaskRegistry,
    pub(crate) config: EngineConfig,
    pub(crate) rank: Rank,
    pub(crate) size: usize,
    pub(crate) queues: QueuePair,
    pub(crate) counter: CompletionCounter,
    pub(crate) stats: EngineStats,
    pub(crate) session: Session,
    pub(crate) shutdown: AtomicBool,
    /// Set once the engine has stopped on a fault under `FaultPolicy::Report`.
    pub(crate) faulted: AtomicBool,
    pub(crate) fault: Mutex<Option<EngineError>>,
}

impl<T: Transport> Shared<T> {
    pub(crate) fn new(transport: T, registry: TaskRegistry, config: EngineConfig) -> Self {
        Self {
            rank: transport.rank(),
            size: transport.size(),
            transport,
            registry,
            config,
            queues: QueuePair::new(),
            counter: CompletionCounter::new(),
            stats: EngineStats::default(),
            session: Session::new(),
            shutdown: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    /// Route a packed task: self-targeted tasks skip the network entirely.
    pub(crate) fn submit_raw(&self, target: Rank, id: TrampolineId, args: &[u8]) -> Result<()> {
        if target >= self.size {
            return Err(DispatchError::InvalidRank { rank: target, size: self.size }.into());
        }
        if !self.registry.contains(id) {
            return Err(DispatchError::UnknownTrampoline(id).into());
        }
        let buffer = TaskBuffer::pack(id, args)?;

        // Count first so a concurrent drain cannot observe zero while this
        // task is between the state check and the queue.
        self.counter.increment();
        if let Err(e) = self.session.ensure_enabled() {
            self.counter.rollback();
            return Err(e.into());
        }

        if target == self.rank {
            self.stats.submitted_local_inc();
            self.queues.inbound.push(Task { rank: self.rank, buffer });
        } else {
            self.stats.submitted_remote_inc();
            self.queues.outbound.push(Task { rank: target, buffer });
        }
        trace!(rank = self.rank, target, trampoline = %id, "task submitted");
        Ok(())
    }

    /// Log `err`, then abort or record it as the fault policy says. Only the
    /// first recorded fault is kept.
    pub(crate) fn report_fault(&self, err: EngineError) {
        error!(rank = self.rank, error = %err, "progress engine fault");
        match self.config.fault_policy {
            FaultPolicy::Abort => std::process::abort(),
            FaultPolicy::Report => {
                let mut slot = self.fault.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
                self.faulted.store(true, Ordering::Release);
            }
        }
    }

    pub(crate) fn take_fault(&self) -> Option<EngineError> {
        self.fault.lock().take()
    }
}

// ── Idle cadence ─────────────────────────────────────────────────────────────

const BACKOFF_START: Duration = Duration::from_micros(1);

/// Applies a [`PollStrategy`] between iterations that made no progress.
pub(crate) struct Idler {
    strategy: PollStrategy,
    sleep: Duration,
}

impl Idler {
    pub(crate) fn new(strategy: PollStrategy) -> Self {
        Self { strategy, sleep: BACKOFF_START }
    }

    pub(crate) fn reset(&mut self) {
        self.sleep = BACKOFF_START;
    }

    pub(crate) fn idle(&mut self) {
        match self.strategy {
            PollStrategy::Spin => std::hint::spin_loop(),
            PollStrategy::Yield => thread::yield_now(),
            PollStrategy::Backoff { max_sleep } => {
                thread::sleep(self.sleep);
                self.sleep = (self.sleep * 2).min(max_sleep);
            }
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// What the engine thread hands back when it exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EngineReport {
    /// Tasks left in either queue at shutdown and dropped unexecuted.
    pub(crate) discarded: usize,
}

pub(crate) struct ProgressEngine<T: Transport> {
    shared: Arc<Shared<T>>,
    task_req: RecvRequest,
    decrement_req: RecvRequest,
}

impl<T: Transport> ProgressEngine<T> {
    /// Post the two standing receives.
    pub(crate) fn start(shared: Arc<Shared<T>>) -> Result<Self> {
        let task_req = shared.transport.post_recv(TAG_ENQUEUE, MAX_MSG_SIZE)?;
        let decrement_req = shared.transport.post_recv(TAG_DECREMENT, 0)?;
        debug!(rank = shared.rank, "progress engine receives posted");
        Ok(Self { shared, task_req, decrement_req })
    }

    /// One iteration of the four steps. Returns whether anything happened.
    pub(crate) fn turn(&mut self) -> Result<bool> {
        let shared = &*self.shared;
        let transport = &shared.transport;
        let mut progressed = false;

        // 1. Task arrival
        if let Some(env) = transport.test(&mut self.task_req)? {
            self.task_req = transport.post_recv(TAG_ENQUEUE, MAX_MSG_SIZE)?;
            let buffer = TaskBuffer::from_wire(&env.payload)?;
            trace!(rank = shared.rank, source = env.source, "task arrived");
            shared.stats.enqueue_received_inc();
            shared.queues.inbound.push(Task { rank: env.source, buffer });
            progressed = true;
        }

        // 2. Completion notice
        if let Some(env) = transport.test(&mut self.decrement_req)? {
            self.decrement_req = transport.post_recv(TAG_DECREMENT, 0)?;
            let left = shared.counter.decrement()?;
            trace!(rank = shared.rank, source = env.source, outstanding = left, "completion notice");
            shared.stats.decrement_received_inc();
            progressed = true;
        }

        // 3. One outbound send
        if let Some(task) = shared.queues.outbound.pop() {
            transport.send(task.rank, TAG_ENQUEUE, task.buffer.as_bytes())?;
            shared.stats.enqueue_sent_inc();
            progressed = true;
        }

        // 4. One local execution
        if let Some(task) = shared.queues.inbound.pop() {
            self.execute(task)?;
            progressed = true;
        }

        Ok(progressed)
    }

    fn execute(&self, task: Task) -> Result<()> {
        let shared = &*self.shared;
        let ctx = TaskContext {
            rank: shared.rank,
            size: shared.size,
            origin: task.rank,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            shared.registry.invoke(&task.buffer, &ctx)
        }));
        match outcome {
            Ok(result) => result?,
            Err(payload) => {
                let trampoline = task.buffer.trampoline_id();
                return Err(EngineError::TaskPanicked {
                    task: shared.registry.name_of(trampoline).unwrap_or("?").to_string(),
                    origin: task.rank,
                    trampoline,
                    message: panic_message(payload.as_ref()),
                });
            }
        }

        if task.rank == shared.rank {
            shared.stats.executed_local_inc();
            shared.counter.decrement()?;
        } else {
            shared.stats.executed_remote_inc();
            shared.transport.send(task.rank, TAG_DECREMENT, &[])?;
            shared.stats.decrement_sent_inc();
        }
        Ok(())
    }

    /// Spin through [`turn`](Self::turn) until the shutdown flag is raised or
    /// a fault stops the loop.
    pub(crate) fn run(mut self) -> EngineReport {
        let mut idler = Idler::new(self.shared.config.poll);
        while !self.shared.shutdown.load(Ordering::Acquire) {
            match self.turn() {
                Ok(true) => idler.reset(),
                Ok(false) => idler.idle(),
                Err(e) => {
                    self.shared.report_fault(e);
                    break;
                }
            }
        }
        self.finish()
    }

    /// Withdraw the standing receives and drop whatever is still queued.
    ///
    /// A failed cancel is a fault like any other transport failure.
    pub(crate) fn finish(self) -> EngineReport {
        let shared = &*self.shared;
        let mut cancel_failure = None;
        for req in [self.task_req, self.decrement_req] {
            if let Err(e) = shared.transport.cancel(req) {
                cancel_failure = cancel_failure.or(Some(e));
            }
        }
        if let Some(e) = cancel_failure {
            shared.report_fault(e.into());
        }
        let discarded = shared.queues.inbound.discard() + shared.queues.outbound.discard();
        if discarded > 0 {
            warn!(rank = shared.rank, discarded, "tasks discarded at shutdown");
        }
        debug!(rank = shared.rank, "progress engine stopped");
        EngineReport { discarded }
    }
}

/// Start the engine thread. `ready` fires once both receives are posted, or
/// carries the error that prevented it.
pub(crate) fn spawn<T: Transport>(
    shared: Arc<Shared<T>>,
    ready: SyncSender<Result<()>>,
) -> Result<JoinHandle<EngineReport>> {
    let name = format!("dispatch-progress-{}", shared.rank);
    let handle = thread::Builder::new().name(name).spawn(move || {
        match ProgressEngine::start(shared) {
            Ok(engine) => {
                let _ = ready.send(Ok(()));
                engine.run()
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                EngineReport::default()
            }
        }
    })?;
    Ok(handle)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use dispatch_net::{LocalFabric, LocalTransport};

    use super::*;
    use crate::registry::encode_args;

    static RAN: AtomicUsize = AtomicUsize::new(0);

    fn registry() -> TaskRegistry {
        let mut reg = TaskRegistry::new();
        reg.register_fn("engine-test.count", |n: usize, _| {
            RAN.fetch_add(n, Ordering::SeqCst);
        })
        .unwrap();
        reg.register_fn("engine-test.boom", |_: (), _| panic!("boom")).unwrap();
        reg
    }

    fn report_config() -> EngineConfig {
        EngineConfig { poll: PollStrategy::Yield, fault_policy: FaultPolicy::Report }
    }

    fn pair() -> (Arc<Shared<LocalTransport>>, Arc<Shared<LocalTransport>>) {
        let mut ranks = LocalFabric::bootstrap(2).into_iter();
        let a = ranks.next().unwrap();
        let b = ranks.next().unwrap();
        (
            Arc::new(Shared::new(a, registry(), report_config())),
            Arc::new(Shared::new(b, registry(), report_config())),
        )
    }

    #[test]
    fn remote_task_round_trip_by_hand() {
        let (s0, s1) = pair();
        let mut e0 = ProgressEngine::start(s0.clone()).unwrap();
        let mut e1 = ProgressEngine::start(s1.clone()).unwrap();

        let id = TrampolineId::from_name("engine-test.count");
        s0.submit_raw(1, id, &encode_args(&5usize).unwrap()).unwrap();
        assert_eq!(s0.counter.get(), 1);
        assert_eq!(s0.queues.outbound.len(), 1);

        // rank 0: step 3 ships the task
        assert!(e0.turn().unwrap());
        assert_eq!(s0.transport.messages_sent(TAG_ENQUEUE), 1);

        // rank 1: step 1 receives it, step 4 runs it and answers
        let before = RAN.load(Ordering::SeqCst);
        assert!(e1.turn().unwrap());
        assert!(RAN.load(Ordering::SeqCst) >= before + 5);
        assert_eq!(s1.transport.messages_sent_by(1, TAG_DECREMENT), 1);

        // rank 0: step 2 retires it
        assert!(e0.turn().unwrap());
        assert!(s0.counter.is_zero());
        assert!(!e0.turn().unwrap());

        let snap = s1.stats.snapshot();
        assert_eq!(snap.enqueue_received, 1);
        assert_eq!(snap.executed_remote, 1);
        assert_eq!(e0.finish(), EngineReport { discarded: 0 });
        e1.finish();
    }

    #[test]
    fn self_task_never_touches_transport() {
        let (s0, _s1) = pair();
        let mut e0 = ProgressEngine::start(s0.clone()).unwrap();

        let id = TrampolineId::from_name("engine-test.count");
        s0.submit_raw(0, id, &encode_args(&1usize).unwrap()).unwrap();
        assert!(e0.turn().unwrap());

        assert!(s0.counter.is_zero());
        assert_eq!(s0.transport.messages_sent(TAG_ENQUEUE), 0);
        assert_eq!(s0.transport.messages_sent(TAG_DECREMENT), 0);
        assert_eq!(s0.stats.snapshot().executed_local, 1);
    }

    #[test]
    fn panicking_task_is_a_typed_fault() {
        let (s0, _s1) = pair();
        let mut e0 = ProgressEngine::start(s0.clone()).unwrap();

        let id = TrampolineId::from_name("engine-test.boom");
        s0.submit_raw(0, id, &encode_args(&()).unwrap()).unwrap();
        match e0.turn() {
            Err(EngineError::TaskPanicked { task, origin, trampoline, message }) => {
                assert_eq!(task, "engine-test.boom");
                assert_eq!(origin, 0);
                assert_eq!(trampoline, id);
                assert_eq!(message, "boom");
            }
            other => panic!("expected TaskPanicked, got {other:?}"),
        }
    }

    #[test]
    fn unknown_trampoline_on_arrival_is_a_fault() {
        let (s0, s1) = pair();
        let mut e1 = ProgressEngine::start(s1.clone()).unwrap();

        let stray = TaskBuffer::pack(TrampolineId(0xdead_beef), &[]).unwrap();
        s0.transport.send(1, TAG_ENQUEUE, stray.as_bytes()).unwrap();

        assert!(matches!(
            e1.turn(),
            Err(EngineError::Dispatch(DispatchError::UnknownTrampoline(TrampolineId(0xdead_beef))))
        ));
    }

    #[test]
    fn stray_completion_notice_underflows() {
        let (s0, s1) = pair();
        let mut e0 = ProgressEngine::start(s0.clone()).unwrap();
        s1.transport.send(0, TAG_DECREMENT, &[]).unwrap();
        assert!(matches!(e0.turn(), Err(EngineError::CounterUnderflow)));
    }

    #[test]
    fn finish_discards_queued_tasks() {
        let (s0, _s1) = pair();
        let e0 = ProgressEngine::start(s0.clone()).unwrap();
        let id = TrampolineId::from_name("engine-test.count");
        s0.submit_raw(1, id, &encode_args(&1usize).unwrap()).unwrap();
        s0.submit_raw(0, id, &encode_args(&1usize).unwrap()).unwrap();

        assert_eq!(e0.finish().discarded, 2);
        assert!(s0.queues.inbound.is_empty());
        assert!(s0.queues.outbound.is_empty());
    }

    #[test]
    fn submit_rejected_by_draining_session_leaves_no_trace() {
        let (s0, _s1) = pair();
        let id = TrampolineId::from_name("engine-test.count");
        let args = encode_args(&1usize).unwrap();
        s0.submit_raw(1, id, &args).unwrap();
        s0.submit_raw(0, id, &args).unwrap();

        s0.session.begin_drain().unwrap();
        for target in [0, 1] {
            let err = s0.submit_raw(target, id, &args).unwrap_err();
            assert!(matches!(
                err,
                EngineError::Dispatch(DispatchError::InvalidTransition { .. })
            ));
        }

        assert_eq!(s0.counter.get(), 2);
        assert_eq!(s0.queues.inbound.len(), 1);
        assert_eq!(s0.queues.outbound.len(), 1);
        assert_eq!(s0.stats.snapshot().submitted_local, 1);
        assert_eq!(s0.stats.snapshot().submitted_remote, 1);
    }

    #[test]
    fn fault_under_report_policy_is_recorded() {
        let (s0, s1) = pair();
        let e0 = ProgressEngine::start(s0.clone()).unwrap();
        s1.transport.send(0, TAG_DECREMENT, &[]).unwrap();

        e0.run();
        assert!(s0.faulted.load(Ordering::Acquire));
        assert!(matches!(s0.take_fault(), Some(EngineError::CounterUnderflow)));
    }

    #[test]
    fn backoff_sleep_is_capped() {
        let mut idler = Idler::new(PollStrategy::Backoff { max_sleep: Duration::from_micros(4) });
        for _ in 0..5 {
            idler.idle();
        }
        assert_eq!(idler.sleep, Duration::from_micros(4));
        idler.reset();
        assert_eq!(idler.sleep, BACKOFF_START);
    }
}
