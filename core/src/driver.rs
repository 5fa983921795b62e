//! The campaign driver: the control loop tying the BPOR tree, the
//! single-stepper and a scheduler together. `run_test` repeatedly asks
//! the tree for the next prefix to replay, runs it to completion under
//! the configured preemption bound, feeds the resulting trace back into
//! the tree, and stops once the tree has no remaining todo.

use tracing::debug;

use crate::action::{Action, ActionType, Lookahead};
use crate::bpor::{self, BporNode};
use crate::debug as invariants;
use crate::dependency;
use crate::error::Failure;
use crate::ids::{KnownId, ThreadId};
use crate::memory::MemType;
use crate::scheduler::{PrefixScheduler, RoundRobin, Scheduler};
use crate::stepper;
use crate::thread::BlockReason;
use crate::trace::{Decision, Step, Trace};
use crate::value::Value;
use crate::world::World;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum preemption count a non-conservative schedule may accrue.
    pub preemption_bound: usize,
    pub mem_type: MemType,
    /// Upper bound on how many executions a campaign will run; `None`
    /// means "run until the BPOR tree is exhausted".
    pub execution_cap: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preemption_bound: 2,
            mem_type: MemType::SequentialConsistency,
            execution_cap: None,
        }
    }
}

/// One complete replay: the trace it produced and how it ended.
#[derive(Debug)]
pub struct Execution {
    pub trace: Trace,
    pub result: Result<Option<Value>, Failure>,
}

/// Runs one systematic-testing campaign against `entry`, called fresh for
/// every execution since an `Action` chain cannot be replayed in place.
pub fn run_test(config: &Config, entry: impl Fn() -> Action) -> Vec<Execution> {
    let mut tree = BporNode::root();
    let mut executions = Vec::new();

    loop {
        if config.execution_cap.is_some_and(|cap| executions.len() >= cap) {
            debug!(executions = executions.len(), "execution cap reached, stopping campaign");
            break;
        }
        let Some((prefix, conservative)) = bpor::next(&tree) else {
            debug!(executions = executions.len(), "BPOR tree exhausted");
            break;
        };
        debug!(?prefix, conservative, "replaying prefix");

        let (trace, result) = run_one(config, &entry, prefix);

        let dependent = |t1: ThreadId, a1: Lookahead, t2: ThreadId, a2: Lookahead| dependency::dependent(config.mem_type, t1, a1, t2, a2);
        bpor::grow(&mut tree, &trace, dependent);
        let candidates = bpor::find_backtrack(&trace, dependent);
        bpor::todo(&mut tree, &trace, &candidates, config.preemption_bound);
        bpor::prune_commits(&mut tree);
        invariants::assert_bpor_properties(&tree);

        executions.push(Execution { trace, result });
    }

    executions
}

fn run_one(config: &Config, entry: &impl Fn() -> Action, prefix: Vec<ThreadId>) -> (Trace, Result<Option<Value>, Failure>) {
    let mut world = World::new(config.mem_type, entry());
    let mut scheduler = PrefixScheduler::new(prefix, RoundRobin::new());
    let mut trace = Vec::new();
    let mut prior: Option<(ThreadId, Lookahead)> = None;

    let result = loop {
        if world.terminated {
            break Ok(world.result.clone());
        }
        if let Some(id) = local_deadlock(&world) {
            break Err(Failure::Deadlock(id));
        }

        let runnable_ids = world.runnable();
        if runnable_ids.is_empty() {
            break terminal_outcome(&world);
        }

        let runnable: Vec<(ThreadId, Lookahead)> = runnable_ids.iter().map(|&tid| (tid, lookahead_of(&world, tid))).collect();
        let chosen = scheduler.choose(prior, &runnable);
        if !runnable_ids.contains(&chosen) {
            break Err(Failure::InternalError(format!("scheduler chose non-runnable thread {chosen}")));
        }

        let others: Vec<(ThreadId, Lookahead)> = runnable.iter().copied().filter(|(t, _)| *t != chosen).collect();
        let action = match stepper::step(&mut world, chosen) {
            Ok(action) => action,
            Err(failure) => break Err(failure),
        };
        invariants::assert_world_properties(&world);

        let decision = if world.is_commit_pseudo_thread(chosen) {
            Decision::Commit
        } else {
            match prior {
                None => Decision::Start(chosen),
                Some((t, _)) if t == chosen => Decision::Continue,
                Some(_) => Decision::SwitchTo(chosen),
            }
        };
        trace.push(Step {
            decision,
            thread: chosen,
            action,
            runnable: others,
        });
        prior = Some((chosen, action));
    };

    (trace, result)
}

fn lookahead_of(world: &World, tid: ThreadId) -> Lookahead {
    if let Some((_, key)) = world.buffers.pseudo_threads().find(|(t, _)| *t == tid) {
        return ActionType::SynchronisedCommit(world.head_ref_of(&key));
    }
    world.threads.get(tid).expect("runnable thread must exist").continuation.action_type(world)
}

/// Globally deadlocked: nothing at all is runnable. STM deadlock is
/// distinguished from a plain deadlock only by thread 0's own block
/// reason — a transaction stuck elsewhere while thread 0 deadlocks on an
/// `SVar` is still a plain `Deadlock(0)`.
fn terminal_outcome(world: &World) -> Result<Option<Value>, Failure> {
    if world.threads.iter().next().is_none() {
        return Ok(None);
    }
    if matches!(world.threads.get(ThreadId::MAIN).and_then(|t| t.blocked_on), Some(BlockReason::OnStm)) {
        return Err(Failure::StmDeadlock(ThreadId::MAIN));
    }
    let id = world
        .threads
        .iter()
        .find(|(_, t)| t.is_blocked())
        .map(|(id, _)| id)
        .expect("empty runnable set with surviving threads implies at least one is blocked");
    Err(Failure::Deadlock(id))
}

/// Thread 0 blocked on an `SVar` that every thread still able to touch it
/// is also blocked on is a deadlock even if an unrelated thread elsewhere
/// is still runnable and would otherwise loop forever. Only trusted once
/// every thread has raised `AllKnown`, since until then a thread's
/// `known` set may be missing ids it will reference later.
fn local_deadlock(world: &World) -> Option<ThreadId> {
    if !world.threads.all_fully_known() {
        return None;
    }
    let main = world.threads.get(ThreadId::MAIN)?;
    let implicated = match main.blocked_on? {
        BlockReason::OnSVarFull(v) | BlockReason::OnSVarEmpty(v) => KnownId::Var(v),
        BlockReason::OnStm | BlockReason::OnMask(_) => return None,
    };
    let stuck = world
        .threads
        .iter()
        .filter(|(id, t)| *id != ThreadId::MAIN && t.known.contains(&implicated))
        .all(|(_, t)| t.is_blocked());
    stuck.then_some(ThreadId::MAIN)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::action::ActionResult;
    use crate::value::Value;

    fn boxed_cont(f: impl FnOnce(ActionResult) -> Action + 'static) -> crate::action::Cont {
        Box::new(f)
    }

    #[test]
    fn single_thread_program_produces_one_execution() {
        let config = Config::default();
        let executions = run_test(&config, || Action::Return(Value::new(7i32)));
        assert_eq!(executions.len(), 1);
        let result = executions[0].result.as_ref().unwrap();
        assert_eq!(result.as_ref().unwrap().downcast_ref::<i32>(), Some(&7));
    }

    #[test]
    fn two_racing_writes_explore_more_than_one_schedule() {
        let config = Config {
            preemption_bound: 1,
            ..Config::default()
        };
        let entry = || {
            Action::NewRef(
                Value::new(0i32),
                boxed_cont(|r| {
                    let ActionResult::RefId(r) = r else { unreachable!() };
                    Action::Fork {
                        body: Box::new(move || Action::WriteRef(r, Value::new(1i32), boxed_cont(|_| Action::Stop))),
                        cont: boxed_cont(move |_| {
                            Action::Fork {
                                body: Box::new(move || Action::WriteRef(r, Value::new(2i32), boxed_cont(|_| Action::Stop))),
                                cont: boxed_cont(move |_| {
                                    Action::ReadRef(
                                        r,
                                        boxed_cont(|result| {
                                            let ActionResult::Value(_) = result else { unreachable!() };
                                            Action::Return(Value::new(()))
                                        }),
                                    )
                                }),
                            }
                        }),
                    }
                }),
            )
        };

        let executions = run_test(&config, entry);
        assert!(executions.len() > 1, "a racing ref read should be explored under more than one schedule");
        assert!(executions.iter().all(|e| e.result.is_ok()));
    }

    /// Thread 0 deadlocked on an `SVar` nobody ever puts to, alongside an
    /// unrelated thread retrying a transaction that nothing ever commits,
    /// must report `Deadlock(0)`, not `StmDeadlock` — `BTreeMap` iteration
    /// order must not let the other thread's `OnStm` block win.
    #[test]
    fn stm_block_on_another_thread_does_not_shadow_thread_zeros_own_deadlock() {
        use crate::stm::StmResult;

        let entry = || {
            Action::NewVar(boxed_cont(|r| {
                let ActionResult::VarId(v) = r else { unreachable!() };
                Action::Fork {
                    body: Box::new(|| Action::Atomic(Box::new(|_| StmResult::Retry), boxed_cont(|_| Action::Stop))),
                    cont: boxed_cont(move |_| Action::TakeVar(v, boxed_cont(|_| Action::Stop))),
                }
            }))
        };

        let executions = run_test(&Config::default(), entry);
        assert!(!executions.is_empty());
        assert!(executions.iter().all(|e| matches!(e.result, Err(Failure::Deadlock(id)) if id == ThreadId::MAIN)));
    }

    /// Thread 0 blocked on an `SVar` that an unrelated thread never raised
    /// `KnowsAbout` for must still classify as `Deadlock(0)` once both
    /// threads have raised `AllKnown` — the unrelated thread's own
    /// `known` set is irrelevant to whether thread 0 is stuck.
    #[test]
    fn local_deadlock_ignores_a_thread_that_never_references_the_blocked_svar() {
        let entry = || {
            Action::NewVar(boxed_cont(|r| {
                let ActionResult::VarId(v) = r else { unreachable!() };
                Action::KnowsAbout(
                    crate::ids::KnownId::Var(v),
                    boxed_cont(move |_| {
                        Action::AllKnown(boxed_cont(move |_| {
                            Action::Fork {
                                body: Box::new(|| {
                                    Action::AllKnown(boxed_cont(|_| Action::Yield(boxed_cont(|_| Action::Stop))))
                                }),
                                cont: boxed_cont(move |_| Action::TakeVar(v, boxed_cont(|_| Action::Stop))),
                            }
                        }))
                    }),
                )
            }))
        };

        let executions = run_test(&Config::default(), entry);
        assert!(!executions.is_empty());
        assert!(executions.iter().all(|e| matches!(e.result, Err(Failure::Deadlock(id)) if id == ThreadId::MAIN)));
    }
}
