//! Adapter to an external STM interpreter. The STM sub-interpreter itself
//! is out of scope here — treated strictly as a black box exposing
//! `run_transaction -> StmOutcome`. This module is the adapter plus one
//! trivial in-memory backend good enough to exercise the bridge and the
//! blocking/wakeup semantics (an STM commit wakes every thread whose
//! `OnStm(touched)` intersects the transaction's write-set).

use std::collections::HashSet;
use std::fmt;

use crate::ids::StmVarId;
use crate::value::Value;

/// What a transaction body returns once run against a backend. The body
/// itself decides whether it succeeded, needs to retry, or raised.
pub enum StmResult {
    Success(Value),
    Retry,
    Exception(Value),
}

/// What the bridge hands back to the stepper after running a transaction.
pub enum StmOutcome {
    Success {
        read: HashSet<StmVarId>,
        write: HashSet<StmVarId>,
        value: Value,
    },
    Retry {
        touched: HashSet<StmVarId>,
    },
    Exception(Value),
}

/// Everything a transaction body may do to the STM backend while it runs.
/// Each call is recorded so the bridge can compute read/write sets
/// without the backend needing to know about dependency analysis.
pub trait StmBackend: fmt::Debug {
    fn new_tvar(&mut self, initial: Value) -> StmVarId;
    fn read_tvar(&mut self, var: StmVarId) -> Value;
    fn write_tvar(&mut self, var: StmVarId, value: Value);
}

/// Runs `body` against `backend`, turning its `StmResult` plus the
/// backend's recorded touched-set into a full `StmOutcome`. This is the
/// entire "bridge": the backend remains free to implement read/write
/// tracking however it likes.
pub fn run_transaction(backend: &mut dyn StmBackend, body: &dyn Fn(&mut dyn StmBackend) -> StmResult) -> StmOutcome {
    let mut tracker = TrackingBackend::new(backend);
    let result = body(&mut tracker);
    let (read, write) = tracker.into_touched();

    match result {
        StmResult::Success(value) => StmOutcome::Success { read, write, value },
        StmResult::Retry => {
            let touched = read.union(&write).copied().collect();
            StmOutcome::Retry { touched }
        }
        StmResult::Exception(value) => StmOutcome::Exception(value),
    }
}

/// Wraps any `StmBackend` to additionally record which variables were
/// read vs written during one transaction body's execution.
struct TrackingBackend<'a> {
    inner: &'a mut dyn StmBackend,
    read: HashSet<StmVarId>,
    write: HashSet<StmVarId>,
}

impl<'a> TrackingBackend<'a> {
    fn new(inner: &'a mut dyn StmBackend) -> Self {
        Self {
            inner,
            read: HashSet::new(),
            write: HashSet::new(),
        }
    }

    fn into_touched(self) -> (HashSet<StmVarId>, HashSet<StmVarId>) {
        (self.read, self.write)
    }
}

impl fmt::Debug for TrackingBackend<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingBackend").finish()
    }
}

impl StmBackend for TrackingBackend<'_> {
    fn new_tvar(&mut self, initial: Value) -> StmVarId {
        self.inner.new_tvar(initial)
    }

    fn read_tvar(&mut self, var: StmVarId) -> Value {
        self.read.insert(var);
        self.inner.read_tvar(var)
    }

    fn write_tvar(&mut self, var: StmVarId, value: Value) {
        self.write.insert(var);
        self.inner.write_tvar(var, value);
    }
}

/// A minimal in-memory STM backend: variables are plain slots, no nesting,
/// no isolation beyond what the single-threaded interpreter already gives
/// us for free. Good enough to drive the bridge in tests; a production
/// STM implementation is explicitly out of scope.
#[derive(Debug, Default)]
pub struct InMemoryStm {
    vars: Vec<Value>,
    next_id: u64,
}

impl InMemoryStm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StmBackend for InMemoryStm {
    fn new_tvar(&mut self, initial: Value) -> StmVarId {
        let id = StmVarId(self.next_id);
        self.next_id += 1;
        self.vars.push(initial);
        id
    }

    fn read_tvar(&mut self, var: StmVarId) -> Value {
        self.vars[var.get() as usize].clone()
    }

    fn write_tvar(&mut self, var: StmVarId, value: Value) {
        self.vars[var.get() as usize] = value;
    }
}
