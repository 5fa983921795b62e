//! Single-slot blocking channel: `slot` is present or empty, and a
//! put/take transition wakes *all* matching waiters — the scheduler picks
//! which of them actually runs next.

use crate::ids::ThreadId;
use crate::value::Value;

#[derive(Debug, Default)]
pub struct SVar {
    slot: Option<Value>,
    waiting_full: Vec<ThreadId>,
    waiting_empty: Vec<ThreadId>,
}

impl SVar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slot.is_some()
    }

    /// Threads parked waiting for the slot to become full (readers/takers).
    pub fn take_full_waiters(&mut self) -> Vec<ThreadId> {
        std::mem::take(&mut self.waiting_full)
    }

    /// Threads parked waiting for the slot to become empty (putters).
    pub fn take_empty_waiters(&mut self) -> Vec<ThreadId> {
        std::mem::take(&mut self.waiting_empty)
    }

    pub fn park_on_full(&mut self, thread: ThreadId) {
        self.waiting_full.push(thread);
    }

    pub fn park_on_empty(&mut self, thread: ThreadId) {
        self.waiting_empty.push(thread);
    }

    /// Fills the slot. Caller must have checked `!is_full()`.
    pub fn put(&mut self, value: Value) {
        debug_assert!(self.slot.is_none(), "PutVar into a full SVar");
        self.slot = Some(value);
    }

    /// Empties the slot, returning what was in it. Caller must have
    /// checked `is_full()`.
    pub fn take(&mut self) -> Value {
        self.slot.take().expect("TakeVar/ReadVar from an empty SVar")
    }

    /// Peeks the slot without consuming it (`ReadVar`).
    #[must_use]
    pub fn peek(&self) -> Option<&Value> {
        self.slot.as_ref()
    }
}
