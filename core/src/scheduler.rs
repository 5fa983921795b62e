//! The pluggable scheduling extension point: given the previous decision
//! and the current runnable set with each thread's lookahead, choose who
//! runs next. The campaign driver always wraps a [`PrefixScheduler`]
//! around whatever fallback a caller configures, so a chosen prefix
//! replays deterministically before any freer exploration begins.

use crate::action::Lookahead;
use crate::ids::ThreadId;

/// Picking a thread outside the given runnable set is a contract
/// violation the driver turns into `Failure::InternalError`; it is never
/// validated inside the trait itself since a `Scheduler` is untrusted
/// extension code, not part of the interpreter's own invariants.
pub trait Scheduler {
    fn choose(&mut self, prior: Option<(ThreadId, Lookahead)>, runnable: &[(ThreadId, Lookahead)]) -> ThreadId;
}

/// The simplest fallback: cycles through the runnable set in ascending
/// thread-id order, starting just after whichever thread ran last.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last: Option<ThreadId>,
}

impl RoundRobin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn choose(&mut self, _prior: Option<(ThreadId, Lookahead)>, runnable: &[(ThreadId, Lookahead)]) -> ThreadId {
        let chosen = match self.last {
            Some(last) => runnable
                .iter()
                .map(|(t, _)| *t)
                .find(|t| *t > last)
                .unwrap_or_else(|| runnable.iter().map(|(t, _)| *t).min().expect("runnable is non-empty")),
            None => runnable.iter().map(|(t, _)| *t).min().expect("runnable is non-empty"),
        };
        self.last = Some(chosen);
        chosen
    }
}

/// Forces a precomputed prefix of thread choices, one per call, then
/// delegates every subsequent decision to `fallback`. This is how the
/// BPOR driver replays the prefix `next()` extracted from the tree before
/// handing control back to free exploration under the preemption bound.
pub struct PrefixScheduler<S> {
    prefix: std::vec::IntoIter<ThreadId>,
    fallback: S,
}

impl<S: Scheduler> PrefixScheduler<S> {
    #[must_use]
    pub fn new(prefix: Vec<ThreadId>, fallback: S) -> Self {
        Self {
            prefix: prefix.into_iter(),
            fallback,
        }
    }
}

impl<S: Scheduler> Scheduler for PrefixScheduler<S> {
    fn choose(&mut self, prior: Option<(ThreadId, Lookahead)>, runnable: &[(ThreadId, Lookahead)]) -> ThreadId {
        match self.prefix.next() {
            Some(forced) => forced,
            None => self.fallback.choose(prior, runnable),
        }
    }
}
