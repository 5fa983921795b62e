//! The `World`: `{ threads, buffers, id-source }`, fully describing an
//! in-progress execution. Owned and mutated in place by the
//! single-stepper only; no internal locking, since the interpreter is
//! single-threaded cooperative.

use std::collections::HashMap;

use crate::action::Action;
use crate::ids::{IdSource, RefId, ThreadId, VarId};
use crate::memory::{BufferKey, MemType, Ref, WriteBuffers};
use crate::stm::InMemoryStm;
use crate::stm::StmBackend;
use crate::svar::SVar;
use crate::thread::{Thread, ThreadTable};
use crate::value::Value;

pub struct World {
    pub threads: ThreadTable,
    pub svars: HashMap<VarId, SVar>,
    pub refs: HashMap<RefId, Ref>,
    pub buffers: WriteBuffers,
    pub stm: Box<dyn StmBackend>,
    pub ids: IdSource,
    pub mem_type: MemType,
    pub terminated: bool,
    pub result: Option<Value>,
}

impl World {
    /// Starts a fresh world with thread 0 running `entry`.
    #[must_use]
    pub fn new(mem_type: MemType, entry: Action) -> Self {
        Self::with_stm(mem_type, entry, Box::new(InMemoryStm::new()))
    }

    #[must_use]
    pub fn with_stm(mem_type: MemType, entry: Action, stm: Box<dyn StmBackend>) -> Self {
        let mut ids = IdSource::new();
        let main = ids.fresh_thread();
        debug_assert_eq!(main, ThreadId::MAIN);

        let mut threads = ThreadTable::new();
        threads.insert(main, Thread::new(entry));

        Self {
            threads,
            svars: HashMap::new(),
            refs: HashMap::new(),
            buffers: WriteBuffers::new(),
            stm,
            ids,
            mem_type,
            terminated: false,
            result: None,
        }
    }

    /// Every thread, user or commit pseudo-thread, eligible to be chosen
    /// next: not blocked, and (for pseudo-threads) still has a pending
    /// write.
    pub fn runnable(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.threads.runnable().collect();
        ids.extend(self.buffers.pseudo_threads().map(|(t, _)| t));
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn is_commit_pseudo_thread(&self, id: ThreadId) -> bool {
        id.is_commit_pseudo_thread()
    }

    /// The ref targeted by a `Commit` action naming `key`.
    #[must_use]
    pub fn head_ref_of(&self, key: &BufferKey) -> RefId {
        self.buffers
            .head_ref(key)
            .expect("Commit scheduled for an empty or unknown buffer key")
    }

    /// Globally deadlocked: no thread at all is runnable.
    #[must_use]
    pub fn is_globally_deadlocked(&self) -> bool {
        self.runnable().is_empty()
    }
}
