// Fixed-size task buffers and the trampoline ids that prefix them.
//
// Layout: [trampoline id: u32 LE][argument bytes][zero padding] — always
// MAX_MSG_SIZE bytes, so a buffer can be shipped as-is in an enqueue message.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::wire::{MAX_ARGS_SIZE, MAX_MSG_SIZE, TRAMPOLINE_ID_BYTES};

// ── Trampoline Id ─────────────────────────────────────────────────────────────

/// Identifies the handler that knows how to decode and run a task's arguments.
///
/// Derived from the handler's registered name with 32-bit FNV-1a, so every rank
/// running the same binary computes the same id without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrampolineId(pub u32);

impl TrampolineId {
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash: u32 = 0x811c_9dc5;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(0x0100_0193);
            i += 1;
        }
        Self(hash)
    }

    pub fn to_le_bytes(self) -> [u8; TRAMPOLINE_ID_BYTES] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for TrampolineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trampoline 0x{:08x}", self.0)
    }
}

// ── Task Buffer ───────────────────────────────────────────────────────────────

/// Owned, fixed-capacity byte buffer carrying one task.
///
/// Moves between queues by value; never shared between two owners.
pub struct TaskBuffer(Box<[u8; MAX_MSG_SIZE]>);

impl TaskBuffer {
    /// Pack a trampoline id and its argument blob.
    ///
    /// Fails with [`DispatchError::PayloadTooLarge`] when the blob does not fit
    /// behind the id; nothing is allocated in that case.
    pub fn pack(id: TrampolineId, args: &[u8]) -> Result<Self> {
        if args.len() > MAX_ARGS_SIZE {
            return Err(DispatchError::PayloadTooLarge {
                len: args.len(),
                header: TRAMPOLINE_ID_BYTES,
                max: MAX_MSG_SIZE,
            });
        }
        let mut buf = Box::new([0u8; MAX_MSG_SIZE]);
        buf[..TRAMPOLINE_ID_BYTES].copy_from_slice(&id.to_le_bytes());
        buf[TRAMPOLINE_ID_BYTES..TRAMPOLINE_ID_BYTES + args.len()].copy_from_slice(args);
        Ok(Self(buf))
    }

    /// Copy an arrived enqueue payload into a fresh buffer.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TRAMPOLINE_ID_BYTES || bytes.len() > MAX_MSG_SIZE {
            return Err(DispatchError::MalformedTask(format!(
                "enqueue payload of {} bytes (expected {}..={})",
                bytes.len(),
                TRAMPOLINE_ID_BYTES,
                MAX_MSG_SIZE
            )));
        }
        let mut buf = Box::new([0u8; MAX_MSG_SIZE]);
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn trampoline_id(&self) -> TrampolineId {
        let mut id = [0u8; TRAMPOLINE_ID_BYTES];
        id.copy_from_slice(&self.0[..TRAMPOLINE_ID_BYTES]);
        TrampolineId(u32::from_le_bytes(id))
    }

    /// Argument region, including trailing padding the decoder ignores.
    pub fn args(&self) -> &[u8] {
        &self.0[TRAMPOLINE_ID_BYTES..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for TaskBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuffer")
            .field("trampoline", &self.trampoline_id())
            .finish_non_exhaustive()
    }
}
