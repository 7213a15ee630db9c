use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use dispatch_types::DispatchError;

// ── Session State Machine ────────────────────────────────────────────────────

/// Enabled → Draining → Disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Engine running; submits accepted.
    Enabled = 0,
    /// `disable()` in progress; submits rejected, engine still running.
    Draining = 1,
    /// Engine stopped.
    Disabled = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Enabled,
            1 => Self::Draining,
            _ => Self::Disabled,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled  => write!(f, "Enabled"),
            Self::Draining => write!(f, "Draining"),
            Self::Disabled => write!(f, "Disabled"),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Lock-free session state shared by submitters and the lifecycle controller.
#[derive(Debug)]
pub struct Session(AtomicU8);

impl Session {
    /// A session starts `Enabled`: it only exists once the engine is up.
    pub fn new() -> Self {
        Self(AtomicU8::new(SessionState::Enabled as u8))
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Fails unless submits are currently accepted.
    pub fn ensure_enabled(&self) -> Result<(), DispatchError> {
        match self.state() {
            SessionState::Enabled => Ok(()),
            other => Err(DispatchError::InvalidTransition {
                from: other.to_string(),
                to: "submit".into(),
            }),
        }
    }

    /// Transition `Enabled → Draining`.
    pub fn begin_drain(&self) -> Result<(), DispatchError> {
        self.0
            .compare_exchange(
                SessionState::Enabled as u8,
                SessionState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|cur| DispatchError::InvalidTransition {
                from: SessionState::from_u8(cur).to_string(),
                to: SessionState::Draining.to_string(),
            })
    }

    /// Mark the session finished. Valid from any state.
    pub fn finish(&self) {
        self.0.store(SessionState::Disabled as u8, Ordering::Release);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
