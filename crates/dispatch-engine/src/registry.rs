//! Trampoline registry: how a task's bytes turn back into a call.
//!
//! Each registered handler gets one monomorphized trampoline that decodes its
//! argument type from the task buffer and invokes the handler. The table is
//! keyed by [`TrampolineId`], which is derived from the handler's name, so
//! every rank that registers the same names agrees on the ids.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use dispatch_types::{DispatchError, Rank, TaskBuffer, TrampolineId};
use serde::de::DeserializeOwned;
use serde::Serialize;

// ── Context ──────────────────────────────────────────────────────────────────

/// Where a task is running and who sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    /// Rank executing the task.
    pub rank: Rank,
    /// Group size.
    pub size: usize,
    /// Rank that submitted the task.
    pub origin: Rank,
}

// ── Remote tasks ─────────────────────────────────────────────────────────────

/// A unit of work whose captured state travels with it.
///
/// ```
/// use dispatch_engine::{RemoteTask, TaskContext};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Add(i32, i32);
///
/// impl RemoteTask for Add {
///     const NAME: &'static str = "example::add";
///     fn run(self, ctx: &TaskContext) {
///         println!("[rank {}] {} + {} = {}", ctx.rank, self.0, self.1, self.0 + self.1);
///     }
/// }
/// ```
pub trait RemoteTask: Serialize + DeserializeOwned + Send + 'static {
    /// Registry name; must be unique among the tasks a binary registers.
    const NAME: &'static str;

    fn run(self, ctx: &TaskContext);
}

// ── Task keys ────────────────────────────────────────────────────────────────

/// Typed handle on a handler registered with [`TaskRegistry::register_fn`].
pub struct TaskKey<A> {
    id: TrampolineId,
    _args: PhantomData<fn(A)>,
}

impl<A> TaskKey<A> {
    /// Key for the handler registered under `name`.
    pub const fn new(name: &str) -> Self {
        Self::from_id(TrampolineId::from_name(name))
    }

    const fn from_id(id: TrampolineId) -> Self {
        Self {
            id,
            _args: PhantomData,
        }
    }

    pub fn id(&self) -> TrampolineId {
        self.id
    }
}

impl<A> Clone for TaskKey<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for TaskKey<A> {}

impl<A> fmt::Debug for TaskKey<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskKey").field(&self.id).finish()
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

type Trampoline = Box<dyn Fn(&[u8], &TaskContext) -> Result<(), DispatchError> + Send + Sync>;

struct Entry {
    name: String,
    trampoline: Trampoline,
}

#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<TrampolineId, Entry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a [`RemoteTask`] type under its `NAME`.
    pub fn register<T: RemoteTask>(&mut self) -> Result<TaskKey<T>, DispatchError> {
        self.register_fn(T::NAME, |task: T, ctx| task.run(ctx))
    }

    /// Register a handler taking a deserializable argument value.
    pub fn register_fn<A, F>(&mut self, name: &str, handler: F) -> Result<TaskKey<A>, DispatchError>
    where
        A: DeserializeOwned + 'static,
        F: Fn(A, &TaskContext) + Send + Sync + 'static,
    {
        let id = TrampolineId::from_name(name);
        if let Some(existing) = self.entries.get(&id) {
            return Err(DispatchError::DuplicateTrampoline {
                id,
                name: existing.name.clone(),
            });
        }

        let trampoline: Trampoline = Box::new(move |bytes, ctx| {
            let args: A = decode_args(bytes)?;
            handler(args, ctx);
            Ok(())
        });
        self.entries.insert(
            id,
            Entry {
                name: name.to_string(),
                trampoline,
            },
        );
        Ok(TaskKey::from_id(id))
    }

    pub fn contains(&self, id: TrampolineId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn name_of(&self, id: TrampolineId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode and run the task held in `buffer`.
    pub(crate) fn invoke(&self, buffer: &TaskBuffer, ctx: &TaskContext) -> Result<(), DispatchError> {
        let id = buffer.trampoline_id();
        let entry = self
            .entries
            .get(&id)
            .ok_or(DispatchError::UnknownTrampoline(id))?;
        (entry.trampoline)(buffer.args(), ctx)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.values().map(|e| e.name.as_str()))
            .finish()
    }
}

// ── Argument codec ───────────────────────────────────────────────────────────

/// Serialize task arguments with the same bincode config trampolines decode with.
pub fn encode_args<A: Serialize + ?Sized>(args: &A) -> Result<Vec<u8>, DispatchError> {
    bincode::serde::encode_to_vec(args, bincode::config::standard())
        .map_err(|e| DispatchError::Serialization(e.to_string()))
}

/// Decode from the front of `bytes`; trailing padding is ignored.
fn decode_args<A: DeserializeOwned>(bytes: &[u8]) -> Result<A, DispatchError> {
    let (args, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| DispatchError::Serialization(e.to_string()))?;
    Ok(args)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;

    const CTX: TaskContext = TaskContext { rank: 1, size: 2, origin: 0 };

    fn buffer_for<A: Serialize>(key: TaskKey<A>, args: &A) -> TaskBuffer {
        TaskBuffer::pack(key.id(), &encode_args(args).unwrap()).unwrap()
    }

    #[test]
    fn register_fn_round_trips_arguments() {
        let total = Arc::new(AtomicI64::new(0));
        let mut reg = TaskRegistry::new();
        let sink = total.clone();
        let key = reg
            .register_fn("sum", move |(x, y): (i64, i64), ctx| {
                assert_eq!(ctx.origin, 0);
                sink.fetch_add(x + y, Ordering::SeqCst);
            })
            .unwrap();

        reg.invoke(&buffer_for(key, &(3, 4)), &CTX).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 7);
        assert_eq!(reg.name_of(key.id()), Some("sum"));
    }

    #[test]
    fn key_from_name_matches_registered_key() {
        let mut reg = TaskRegistry::new();
        let key = reg.register_fn("noop", |_: (), _| {}).unwrap();
        const NOOP: TaskKey<()> = TaskKey::new("noop");
        assert_eq!(key.id(), NOOP.id());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = TaskRegistry::new();
        reg.register_fn("dup", |_: (), _| {}).unwrap();
        let err = reg.register_fn("dup", |_: u8, _| {}).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateTrampoline { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unknown_trampoline_is_an_error() {
        let reg = TaskRegistry::new();
        let buf = TaskBuffer::pack(TrampolineId(99), &[]).unwrap();
        assert_eq!(
            reg.invoke(&buf, &CTX).unwrap_err(),
            DispatchError::UnknownTrampoline(TrampolineId(99))
        );
    }

    #[test]
    fn remote_task_runs_through_its_trampoline() {
        static SEEN: AtomicI64 = AtomicI64::new(0);

        #[derive(Serialize, Deserialize)]
        struct Bump(i64);
        impl RemoteTask for Bump {
            const NAME: &'static str = "test::bump";
            fn run(self, _ctx: &TaskContext) {
                SEEN.fetch_add(self.0, Ordering::SeqCst);
            }
        }

        let mut reg = TaskRegistry::new();
        let key = reg.register::<Bump>().unwrap();
        reg.invoke(&buffer_for(key, &Bump(5)), &CTX).unwrap();
        assert_eq!(SEEN.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn garbage_arguments_fail_to_decode() {
        let mut reg = TaskRegistry::new();
        let key = reg.register_fn("text", |_: String, _| {}).unwrap();
        // Varint length prefix claiming 65535 bytes; the buffer holds ~500.
        let buf = TaskBuffer::pack(key.id(), &[0xFB, 0xFF, 0xFF]).unwrap();
        assert!(matches!(
            reg.invoke(&buf, &CTX),
            Err(DispatchError::Serialization(_))
        ));
    }
}
