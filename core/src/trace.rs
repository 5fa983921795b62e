//! The recorded history of one complete execution: which thread ran at
//! each step, what it did (in dependency-oracle form), and what else was
//! runnable at that point. The BPOR tree walks a `Trace` to grow itself
//! and to find new backtrack points; it never needs anything richer than
//! this.

use crate::action::Lookahead;
use crate::ids::ThreadId;

/// How the scheduler chose the thread that ran at a given step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Start(ThreadId),
    Continue,
    SwitchTo(ThreadId),
    Commit,
}

/// One step of an execution: the decision that selected `thread`, the
/// simplified action it actually performed, and every other thread that
/// was runnable (with its own lookahead) at the moment of the choice —
/// the raw material `findBacktrack` needs to propose alternative
/// schedules without re-running anything.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub decision: Decision,
    pub thread: ThreadId,
    pub action: Lookahead,
    pub runnable: Vec<(ThreadId, Lookahead)>,
}

pub type Trace = Vec<Step>;
