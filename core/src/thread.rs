//! Thread table: per-thread pending action, block reason, handler
//! stack, masking state and known-variable set, plus the invariant that a
//! blocked thread is never runnable.

use std::collections::{BTreeMap, HashSet};

use crate::action::{Action, Handler, MaskingLevel};
use crate::ids::{KnownId, StmVarId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    OnSVarFull(crate::ids::VarId),
    OnSVarEmpty(crate::ids::VarId),
    OnStm,
    OnMask(ThreadId),
}

pub struct Thread {
    pub continuation: Action,
    pub blocked_on: Option<BlockReason>,
    pub handlers: Vec<Handler>,
    pub masking: MaskingLevel,
    pub known: HashSet<KnownId>,
    pub fully_known: bool,
    pub stm_touched: HashSet<StmVarId>,
}

impl Thread {
    #[must_use]
    pub fn new(entry: Action) -> Self {
        Self {
            continuation: entry,
            blocked_on: None,
            handlers: Vec::new(),
            masking: MaskingLevel::Unmasked,
            known: HashSet::new(),
            fully_known: false,
            stm_touched: HashSet::new(),
        }
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked_on.is_some()
    }

    #[must_use]
    pub fn is_interruptible(&self) -> bool {
        match self.masking {
            MaskingLevel::Unmasked => true,
            MaskingLevel::MaskedInterruptible => self.is_blocked(),
            MaskingLevel::MaskedUninterruptible => false,
        }
    }
}

/// `ThreadId -> Thread`. A `BTreeMap` so iteration order (used when
/// building the runnable set) is deterministic and id-ordered, which
/// keeps commit pseudo-threads (negative ids) sorted ahead of user
/// threads for free.
#[derive(Default)]
pub struct ThreadTable(BTreeMap<ThreadId, Thread>);

impl ThreadTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ThreadId, thread: Thread) {
        self.0.insert(id, thread);
    }

    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        self.0.remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.0.get(&id)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.0.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ThreadId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &Thread)> {
        self.0.iter().map(|(id, t)| (*id, t))
    }

    /// Every existing, non-blocked thread.
    pub fn runnable(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.0.iter().filter(|(_, t)| !t.is_blocked()).map(|(id, _)| *id)
    }

    #[must_use]
    pub fn all_fully_known(&self) -> bool {
        self.0.values().all(|t| t.fully_known)
    }

    /// Wakes every thread blocked on a reason for which `matches` returns
    /// true, returning their ids. Used for SVar put/take/read wakeups and
    /// STM commit wakeups: wakes *all* matching waiters, leaving the
    /// scheduler to pick which one actually runs next.
    pub fn wake_matching(&mut self, matches: impl Fn(ThreadId, &Thread) -> bool) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        for (id, thread) in &mut self.0 {
            if thread.is_blocked() && matches(*id, thread) {
                thread.blocked_on = None;
                woken.push(*id);
            }
        }
        woken
    }
}
