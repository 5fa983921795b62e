//! The bounded partial-order-reduction tree: one node per decision point,
//! tracking which alternative threads still need exploring (`todo`),
//! which have already been explored (`done`), which are known redundant
//! (`sleep`), and which are known to have no effect (`ignore`).
//!
//! `BporNode`s live for exactly one test campaign; a fresh tree is built
//! for every call to the driver's campaign runner.

use std::collections::BTreeMap;

use crate::action::Lookahead;
use crate::ids::ThreadId;
use crate::trace::{Step, Trace};

#[derive(Debug, Default)]
pub struct BporNode {
    pub runnable: std::collections::BTreeSet<ThreadId>,
    pub todo: BTreeMap<ThreadId, bool>,
    pub ignore: std::collections::BTreeSet<ThreadId>,
    pub done: BTreeMap<ThreadId, BporNode>,
    pub sleep: BTreeMap<ThreadId, Lookahead>,
    pub taken: BTreeMap<ThreadId, Lookahead>,
    pub action_at_node: Option<Lookahead>,
}

impl BporNode {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    fn child(action: Lookahead) -> Self {
        Self {
            action_at_node: Some(action),
            ..Self::default()
        }
    }

    /// `todo ∩ keys(done) = ∅`, checked recursively. A violation is a bug
    /// in `grow`/`todo`, not something a program under test can trigger.
    pub fn check_invariants(&self) {
        for tid in self.todo.keys() {
            debug_assert!(!self.done.contains_key(tid), "thread {tid} is both todo and done at the same node");
        }
        for child in self.done.values() {
            child.check_invariants();
        }
    }
}

/// Extracts the longest prefix of already-taken decisions followed by
/// exactly one todo decision, deepest point first; ties are broken by
/// maximum preemption count, with commit pseudo-threads deferred unless
/// they are the only option at that depth. `None` means every todo is
/// empty everywhere: the campaign is complete.
#[must_use]
pub fn next(root: &BporNode) -> Option<(Vec<ThreadId>, bool)> {
    struct Candidate {
        path: Vec<ThreadId>,
        thread: ThreadId,
        conservative: bool,
        depth: usize,
        preemptions: usize,
    }

    fn collect(node: &BporNode, path: &mut Vec<ThreadId>, last: Option<ThreadId>, preemptions: usize, out: &mut Vec<Candidate>) {
        for (&tid, &conservative) in &node.todo {
            out.push(Candidate {
                path: path.clone(),
                thread: tid,
                conservative,
                depth: path.len(),
                preemptions,
            });
        }
        for (&tid, child) in &node.done {
            let preempted = last.is_some_and(|l| l != tid && node.runnable.contains(&l));
            path.push(tid);
            collect(child, path, Some(tid), preemptions + usize::from(preempted), out);
            path.pop();
        }
    }

    let mut candidates = Vec::new();
    collect(root, &mut Vec::new(), None, 0, &mut candidates);

    candidates.sort_by(|a, b| {
        b.depth
            .cmp(&a.depth)
            .then(a.thread.is_commit_pseudo_thread().cmp(&b.thread.is_commit_pseudo_thread()))
            .then(b.preemptions.cmp(&a.preemptions))
    });

    candidates.into_iter().next().map(|c| {
        let mut prefix = c.path;
        prefix.push(c.thread);
        (prefix, c.conservative)
    })
}

/// Threads `trace` down the tree: descends into matching `done` children,
/// and creates a fresh subtree the first time a step diverges from what
/// has already been explored, seeding the new subtree's sleep set from
/// the parent's `sleep ∪ taken` with anything dependent on the step just
/// taken filtered out.
pub fn grow(root: &mut BporNode, trace: &Trace, dependent: impl Fn(ThreadId, Lookahead, ThreadId, Lookahead) -> bool) {
    let mut node = root;
    for step in trace {
        if node.runnable.is_empty() {
            node.runnable = step.runnable.iter().map(|(t, _)| *t).chain(std::iter::once(step.thread)).collect();
        }

        if node.done.contains_key(&step.thread) {
            node = node.done.get_mut(&step.thread).unwrap();
            continue;
        }

        node.todo.remove(&step.thread);

        let mut child_sleep = BTreeMap::new();
        for (&tid, &action) in node.sleep.iter().chain(node.taken.iter()) {
            if tid != step.thread && !dependent(tid, action, step.thread, step.action) {
                child_sleep.insert(tid, action);
            }
        }

        node.taken.insert(step.thread, step.action);
        let mut fresh = BporNode::child(step.action);
        fresh.sleep = child_sleep;
        node.done.insert(step.thread, fresh);
        node = node.done.get_mut(&step.thread).unwrap();
    }
}

/// A candidate backtracking point: install thread `thread` as a todo at
/// the node reached after `depth` decisions (i.e. the node at which
/// `trace[depth]` was actually decided).
pub struct BacktrackCandidate {
    pub depth: usize,
    pub thread: ThreadId,
    pub conservative: bool,
}

/// For each step where a runnable-but-not-chosen thread `u` is observed,
/// walks backward for the nearest earlier step whose action is dependent
/// with `u`'s lookahead and proposes installing `u` there. A thread with
/// no dependent predecessor anywhere gets a conservative candidate at the
/// very start of the trace, so it is still eventually explored.
#[must_use]
pub fn find_backtrack(trace: &Trace, dependent: impl Fn(ThreadId, Lookahead, ThreadId, Lookahead) -> bool) -> Vec<BacktrackCandidate> {
    let mut out = Vec::new();
    for (i, step) in trace.iter().enumerate() {
        for &(u, lookahead) in &step.runnable {
            let mut found = false;
            for j in (0..i).rev() {
                if trace[j].thread != u && dependent(trace[j].thread, trace[j].action, u, lookahead) {
                    out.push(BacktrackCandidate {
                        depth: j,
                        thread: u,
                        conservative: false,
                    });
                    found = true;
                    break;
                }
            }
            if !found {
                out.push(BacktrackCandidate {
                    depth: 0,
                    thread: u,
                    conservative: true,
                });
            }
        }
    }
    out
}

fn preemption_count_upto(trace: &[Step], upto: usize) -> usize {
    let mut count = 0;
    let mut last: Option<ThreadId> = None;
    for step in &trace[..upto] {
        if let Some(l) = last
            && l != step.thread
            && step.runnable.iter().any(|(t, _)| *t == l)
        {
            count += 1;
        }
        last = Some(step.thread);
    }
    count
}

/// Installs each candidate into `tree[candidate.depth].todo` subject to
/// the preemption bound, sleep-set membership, and whether the thread is
/// already `done` or known-`ignore`d at that node.
pub fn todo(root: &mut BporNode, trace: &Trace, candidates: &[BacktrackCandidate], preemption_bound: usize) {
    for candidate in candidates {
        let node = node_at_mut(root, trace, candidate.depth);

        if node.done.contains_key(&candidate.thread) {
            continue;
        }
        if node.ignore.contains(&candidate.thread) {
            continue;
        }
        if !candidate.conservative && node.sleep.contains_key(&candidate.thread) {
            continue;
        }
        if !candidate.conservative {
            let base = preemption_count_upto(trace, candidate.depth);
            let extra = usize::from(candidate.depth > 0 && trace[candidate.depth - 1].thread != candidate.thread);
            if base + extra > preemption_bound {
                continue;
            }
        }

        node.todo.entry(candidate.thread).or_insert(candidate.conservative);
    }
}

fn node_at_mut<'a>(root: &'a mut BporNode, trace: &Trace, depth: usize) -> &'a mut BporNode {
    let mut node = root;
    for step in &trace[..depth] {
        node = node.done.get_mut(&step.thread).expect("grow(tree, trace) must run before todo(tree, trace, ..)");
    }
    node
}

/// If every todo at a node is a commit pseudo-thread and every already
/// explored child subtree has no remaining todo of its own, the
/// remaining commit todos are redundant (every schedule that takes them
/// eventually commits via some other path) and can be cleared.
pub fn prune_commits(node: &mut BporNode) {
    for child in node.done.values_mut() {
        prune_commits(child);
    }

    let all_commits = !node.todo.is_empty() && node.todo.keys().all(|t| t.is_commit_pseudo_thread());
    if all_commits && node.done.values().all(subtree_exhausted) {
        node.todo.clear();
    }
}

fn subtree_exhausted(node: &BporNode) -> bool {
    node.todo.is_empty() && node.done.values().all(subtree_exhausted)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::action::ActionType;

    fn never_dependent(_: ThreadId, _: Lookahead, _: ThreadId, _: Lookahead) -> bool {
        false
    }

    fn la() -> Lookahead {
        ActionType::Lift
    }

    #[test]
    fn next_on_empty_tree_is_none() {
        assert!(next(&BporNode::root()).is_none());
    }

    #[test]
    fn next_picks_the_only_root_todo() {
        let mut root = BporNode::root();
        root.todo.insert(ThreadId(0), false);
        let (prefix, conservative) = next(&root).unwrap();
        assert_eq!(prefix, vec![ThreadId(0)]);
        assert!(!conservative);
    }

    #[test]
    fn grow_installs_done_child_and_clears_todo() {
        let mut root = BporNode::root();
        root.todo.insert(ThreadId(0), false);
        let trace = vec![Step {
            decision: crate::trace::Decision::Start(ThreadId(0)),
            thread: ThreadId(0),
            action: la(),
            runnable: vec![],
        }];
        grow(&mut root, &trace, never_dependent);
        assert!(root.todo.is_empty());
        assert!(root.done.contains_key(&ThreadId(0)));
    }

    #[test]
    fn find_backtrack_is_conservative_when_nothing_is_dependent() {
        let trace = vec![Step {
            decision: crate::trace::Decision::Start(ThreadId(0)),
            thread: ThreadId(0),
            action: la(),
            runnable: vec![(ThreadId(1), la())],
        }];
        let candidates = find_backtrack(&trace, never_dependent);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].conservative);
        assert_eq!(candidates[0].thread, ThreadId(1));
    }

    #[test]
    fn prune_commits_clears_redundant_commit_only_todo() {
        let mut root = BporNode::root();
        root.todo.insert(ThreadId(-1), false);
        prune_commits(&mut root);
        assert!(root.todo.is_empty());
    }
}
