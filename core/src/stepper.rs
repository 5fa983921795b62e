//! The single-stepper: advances exactly one chosen thread by exactly one
//! primitive action. Nothing else in the interpreter mutates a `World`.
//! Everything between two primitive actions is assumed to run to
//! completion without yielding, so there is never a suspension point to
//! model inside a single call to [`step`].

use std::mem;

use crate::action::{Action, ActionResult, ActionType, CasTicket};
use crate::error::Failure;
use crate::ids::{ThreadId, VarId};
use crate::stm::{run_transaction, StmOutcome};
use crate::thread::BlockReason;
use crate::value::Value;
use crate::world::World;

/// Advances `thread` by one primitive action, returning the simplified
/// form of whatever it did (for trace-building) or the failure the
/// program/scheduler triggered.
///
/// `thread` must be in `world.runnable()`; passing a blocked, unknown, or
/// already-terminated thread is a scheduler-contract violation and comes
/// back as [`Failure::InternalError`] rather than a panic, since the
/// scheduler is untrusted external code.
pub fn step(world: &mut World, thread: ThreadId) -> Result<ActionType, Failure> {
    if world.is_commit_pseudo_thread(thread) {
        return step_commit(world, thread);
    }

    let Some(t) = world.threads.get(thread) else {
        return Err(Failure::InternalError(format!("scheduler chose non-existent thread {thread}")));
    };
    if t.is_blocked() {
        return Err(Failure::InternalError(format!("scheduler chose blocked thread {thread}")));
    }

    let action = mem::replace(&mut world.threads.get_mut(thread).unwrap().continuation, Action::Stop);
    let action_type = action.action_type(world);
    execute(world, thread, action)?;
    Ok(action_type)
}

fn step_commit(world: &mut World, thread: ThreadId) -> Result<ActionType, Failure> {
    let key = world
        .buffers
        .pseudo_threads()
        .find(|(t, _)| *t == thread)
        .map(|(_, k)| k)
        .ok_or_else(|| Failure::InternalError(format!("scheduler chose unknown commit pseudo-thread {thread}")))?;
    let reference = world.head_ref_of(&key);
    world.buffers.commit_one(&key, &mut world.refs);
    Ok(ActionType::SynchronisedCommit(reference))
}

#[allow(clippy::too_many_lines)]
fn execute(world: &mut World, thread: ThreadId, action: Action) -> Result<(), Failure> {
    match action {
        Action::Fork { body, cont } => {
            let entry = body();
            let id = world.ids.fresh_thread();
            world.threads.insert(id, crate::thread::Thread::new(entry));
            resume(world, thread, cont, ActionResult::ThreadId(id));
        }
        Action::MyThreadId(cont) => resume(world, thread, cont, ActionResult::ThreadId(thread)),
        Action::Yield(cont) => resume(world, thread, cont, ActionResult::Unit),
        Action::Stop => {
            world.threads.remove(thread);
            recheck_mask_waiters(world, thread);
        }
        Action::Return(value) => {
            world.threads.remove(thread);
            if thread == ThreadId::MAIN {
                world.terminated = true;
                world.result = Some(value);
            }
            recheck_mask_waiters(world, thread);
        }

        Action::NewVar(cont) => {
            let id = world.ids.fresh_var();
            world.svars.insert(id, crate::svar::SVar::new());
            resume(world, thread, cont, ActionResult::VarId(id));
        }
        Action::PutVar(v, val, cont) => {
            if world.svars[&v].is_full() {
                world.svars.get_mut(&v).unwrap().park_on_empty(thread);
                block(world, thread, Action::PutVar(v, val, cont), BlockReason::OnSVarEmpty(v));
            } else {
                world.svars.get_mut(&v).unwrap().put(val);
                wake_full_waiters(world, v);
                resume(world, thread, cont, ActionResult::Unit);
            }
        }
        Action::TryPutVar(v, val, cont) => {
            if world.svars[&v].is_full() {
                resume(world, thread, cont, ActionResult::Bool(false));
            } else {
                world.svars.get_mut(&v).unwrap().put(val);
                wake_full_waiters(world, v);
                resume(world, thread, cont, ActionResult::Bool(true));
            }
        }
        Action::ReadVar(v, cont) => {
            if world.svars[&v].is_full() {
                let value = world.svars[&v].peek().unwrap().clone();
                resume(world, thread, cont, ActionResult::Value(value));
            } else {
                world.svars.get_mut(&v).unwrap().park_on_full(thread);
                block(world, thread, Action::ReadVar(v, cont), BlockReason::OnSVarFull(v));
            }
        }
        Action::TakeVar(v, cont) => {
            if world.svars[&v].is_full() {
                let value = world.svars.get_mut(&v).unwrap().take();
                wake_empty_waiters(world, v);
                resume(world, thread, cont, ActionResult::Value(value));
            } else {
                world.svars.get_mut(&v).unwrap().park_on_full(thread);
                block(world, thread, Action::TakeVar(v, cont), BlockReason::OnSVarFull(v));
            }
        }
        Action::TryTakeVar(v, cont) => {
            if world.svars[&v].is_full() {
                let value = world.svars.get_mut(&v).unwrap().take();
                wake_empty_waiters(world, v);
                resume(world, thread, cont, ActionResult::Maybe(Some(value)));
            } else {
                resume(world, thread, cont, ActionResult::Maybe(None));
            }
        }

        Action::NewRef(init, cont) => {
            let id = world.ids.fresh_ref();
            world.refs.insert(id, crate::memory::Ref::new(init));
            resume(world, thread, cont, ActionResult::RefId(id));
        }
        Action::ReadRef(r, cont) => {
            let value = world
                .buffers
                .thread_buffer_has(world.mem_type, thread, r)
                .cloned()
                .unwrap_or_else(|| world.refs[&r].global.clone());
            resume(world, thread, cont, ActionResult::Value(value));
        }
        Action::WriteRef(r, val, cont) => {
            if world.mem_type == crate::memory::MemType::SequentialConsistency {
                world.refs.get_mut(&r).unwrap().set(val);
            } else {
                world.buffers.push(&mut world.ids, world.mem_type, thread, r, val);
            }
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::ModifyRef(r, f, cont) => {
            world.buffers.flush_ref(world.mem_type, r, &mut world.refs);
            let next = f(&world.refs[&r].global);
            world.refs.get_mut(&r).unwrap().set(next);
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::Commit(_) => unreachable!("Commit only ever runs as a pseudo-thread, via step_commit"),
        Action::ReadForCas(r, cont) => {
            world.buffers.flush_ref(world.mem_type, r, &mut world.refs);
            let ticket = CasTicket {
                ref_id: r,
                commit_count: world.refs[&r].commit_count,
            };
            resume(world, thread, cont, ActionResult::CasTicket(ticket));
        }
        Action::CasRef(r, ticket, new_value, cont) => {
            world.buffers.flush_ref(world.mem_type, r, &mut world.refs);
            let success = world.refs[&r].commit_count == ticket.commit_count;
            if success {
                world.refs.get_mut(&r).unwrap().set(new_value);
            }
            resume(world, thread, cont, ActionResult::Bool(success));
        }
        Action::CasRef2(r1, r2, t1, t2, v1, v2, cont) => {
            world.buffers.flush_ref(world.mem_type, r1, &mut world.refs);
            world.buffers.flush_ref(world.mem_type, r2, &mut world.refs);
            let success = world.refs[&r1].commit_count == t1.commit_count && world.refs[&r2].commit_count == t2.commit_count;
            if success {
                world.refs.get_mut(&r1).unwrap().set(v1);
                world.refs.get_mut(&r2).unwrap().set(v2);
            }
            resume(world, thread, cont, ActionResult::Bool(success));
        }
        Action::AtomicModifyRefCas(r, f, cont) => {
            world.buffers.flush_ref(world.mem_type, r, &mut world.refs);
            let (result, next) = f(&world.refs[&r].global);
            world.refs.get_mut(&r).unwrap().set(next);
            resume(world, thread, cont, ActionResult::Value(result));
        }

        Action::StoreLoadBarrier(cont) | Action::WriteBarrier(cont) => {
            world.buffers.flush_thread(thread, &mut world.refs);
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::LoadLoadBarrier(cont) => resume(world, thread, cont, ActionResult::Unit),

        Action::Atomic(tx, cont) => match run_transaction(world.stm.as_mut(), tx.as_ref()) {
            StmOutcome::Success { write, value, .. } => {
                wake_stm(world, &write);
                resume(world, thread, cont, ActionResult::Value(value));
            }
            StmOutcome::Retry { touched } => {
                let t = world.threads.get_mut(thread).unwrap();
                t.stm_touched = touched;
                block(world, thread, Action::Atomic(tx, cont), BlockReason::OnStm);
            }
            StmOutcome::Exception(exc) => throw(world, thread, exc)?,
        },

        Action::Throw(exc) => throw(world, thread, exc)?,
        Action::ThrowTo(target, exc, cont) => {
            let interruptible = world.threads.get(target).is_none_or(|t| t.is_interruptible());
            if interruptible {
                throw(world, target, exc)?;
                recheck_mask_waiters(world, target);
                resume(world, thread, cont, ActionResult::Unit);
            } else {
                block(world, thread, Action::ThrowTo(target, exc, cont), BlockReason::OnMask(target));
            }
        }
        Action::Catching { handler, cont } => {
            world.threads.get_mut(thread).unwrap().handlers.push(handler);
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::PopCatching(cont) => {
            world.threads.get_mut(thread).unwrap().handlers.pop();
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::Masking(level, cont) => {
            world.threads.get_mut(thread).unwrap().masking = level;
            recheck_mask_waiters(world, thread);
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::ResetMask(level, cont) => {
            world.threads.get_mut(thread).unwrap().masking = level;
            recheck_mask_waiters(world, thread);
            resume(world, thread, cont, ActionResult::Unit);
        }

        Action::KnowsAbout(id, cont) => {
            world.threads.get_mut(thread).unwrap().known.insert(id);
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::Forgets(id, cont) => {
            world.threads.get_mut(thread).unwrap().known.remove(&id);
            resume(world, thread, cont, ActionResult::Unit);
        }
        Action::AllKnown(cont) => {
            world.threads.get_mut(thread).unwrap().fully_known = true;
            resume(world, thread, cont, ActionResult::Unit);
        }

        Action::Lift(io, cont) => {
            let value = io();
            resume(world, thread, cont, ActionResult::Value(value));
        }
        Action::Prim(io, cont) => {
            io();
            resume(world, thread, cont, ActionResult::Unit);
        }
    }
    Ok(())
}

fn resume(world: &mut World, thread: ThreadId, cont: crate::action::Cont, result: ActionResult) {
    world.threads.get_mut(thread).unwrap().continuation = cont(result);
}

fn block(world: &mut World, thread: ThreadId, pending: Action, reason: BlockReason) {
    let t = world.threads.get_mut(thread).unwrap();
    t.continuation = pending;
    t.blocked_on = Some(reason);
    // Blocking can itself make `thread` interruptible (MaskedInterruptible
    // is only interruptible while blocked), so anyone parked sending it a
    // ThrowTo may now be able to proceed.
    recheck_mask_waiters(world, thread);
}

/// Wakes exactly the threads parked on `v`'s own full-waiters queue
/// (readers/takers), draining it.
fn wake_full_waiters(world: &mut World, v: VarId) {
    let waiters = world.svars.get_mut(&v).unwrap().take_full_waiters();
    world.threads.wake_matching(|id, _| waiters.contains(&id));
}

/// Wakes exactly the threads parked on `v`'s own empty-waiters queue
/// (putters), draining it.
fn wake_empty_waiters(world: &mut World, v: VarId) {
    let waiters = world.svars.get_mut(&v).unwrap().take_empty_waiters();
    world.threads.wake_matching(|id, _| waiters.contains(&id));
}

fn wake_stm(world: &mut World, written: &std::collections::HashSet<crate::ids::StmVarId>) {
    world
        .threads
        .wake_matching(|_, t| matches!(t.blocked_on, Some(BlockReason::OnStm)) && !t.stm_touched.is_disjoint(written));
}

/// Re-checks whether anyone is blocked sending a `ThrowTo` to `target` and
/// wakes them if `target` just became interruptible, either because its
/// masking level changed or because it just blocked on something else
/// (which makes `MaskedInterruptible` interruptible).
fn recheck_mask_waiters(world: &mut World, target: ThreadId) {
    let interruptible = world.threads.get(target).is_none_or(|t| t.is_interruptible());
    if interruptible {
        world
            .threads
            .wake_matching(|_, t| matches!(t.blocked_on, Some(BlockReason::OnMask(tid)) if tid == target));
    }
}

fn throw(world: &mut World, thread: ThreadId, exc: Value) -> Result<(), Failure> {
    let Some(t) = world.threads.get_mut(thread) else {
        return Ok(());
    };
    while let Some(handler) = t.handlers.pop() {
        if (handler.matches)(&exc) {
            t.continuation = (handler.handle)(exc);
            return Ok(());
        }
    }
    world.threads.remove(thread);
    recheck_mask_waiters(world, thread);
    if thread == ThreadId::MAIN {
        world.terminated = true;
        return Err(Failure::UncaughtException(thread, format!("{exc:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn boxed_cont(f: impl FnOnce(ActionResult) -> Action + 'static) -> crate::action::Cont {
        Box::new(f)
    }

    #[test]
    fn yield_is_a_no_op_suspension_point() {
        let mut world = World::new(crate::memory::MemType::SequentialConsistency, Action::Yield(boxed_cont(|_| Action::Stop)));
        let kind = step(&mut world, ThreadId::MAIN).unwrap();
        assert_eq!(kind, ActionType::UnsynchronisedOther);
        assert!(world.threads.contains(ThreadId::MAIN));
    }

    #[test]
    fn stop_removes_the_thread() {
        let mut world = World::new(crate::memory::MemType::SequentialConsistency, Action::Stop);
        step(&mut world, ThreadId::MAIN).unwrap();
        assert!(!world.threads.contains(ThreadId::MAIN));
        assert!(world.is_globally_deadlocked());
    }

    #[test]
    fn put_then_take_round_trips_a_value() {
        let entry = Action::NewVar(boxed_cont(|r| {
            let ActionResult::VarId(v) = r else { unreachable!() };
            Action::PutVar(
                v,
                Value::new(42i32),
                boxed_cont(move |_| {
                    Action::TakeVar(
                        v,
                        boxed_cont(|r| {
                            let ActionResult::Value(val) = r else { unreachable!() };
                            assert_eq!(val.downcast_ref::<i32>(), Some(&42));
                            Action::Stop
                        }),
                    )
                }),
            )
        }));
        let mut world = World::new(crate::memory::MemType::SequentialConsistency, entry);
        while world.threads.contains(ThreadId::MAIN) {
            step(&mut world, ThreadId::MAIN).unwrap();
        }
    }

    #[test]
    fn take_on_empty_svar_blocks() {
        let entry = Action::NewVar(boxed_cont(|r| {
            let ActionResult::VarId(v) = r else { unreachable!() };
            Action::TakeVar(v, boxed_cont(|_| Action::Stop))
        }));
        let mut world = World::new(crate::memory::MemType::SequentialConsistency, entry);
        step(&mut world, ThreadId::MAIN).unwrap();
        step(&mut world, ThreadId::MAIN).unwrap();
        assert!(world.threads.get(ThreadId::MAIN).unwrap().is_blocked());
        assert!(world.is_globally_deadlocked());
    }

    #[test]
    fn cas_fails_after_a_concurrent_commit() {
        let entry = Action::NewRef(
            Value::new(0i32),
            boxed_cont(|r| {
                let ActionResult::RefId(rid) = r else { unreachable!() };
                Action::ReadForCas(
                    rid,
                    boxed_cont(move |r| {
                        let ActionResult::CasTicket(ticket) = r else { unreachable!() };
                        Action::CasRef(
                            rid,
                            ticket,
                            Value::new(2i32),
                            boxed_cont(|r| {
                                let ActionResult::Bool(ok) = r else { unreachable!() };
                                assert!(!ok, "CAS should fail once the ticket's commit count is stale");
                                Action::Stop
                            }),
                        )
                    }),
                )
            }),
        );
        let mut world = World::new(crate::memory::MemType::SequentialConsistency, entry);
        step(&mut world, ThreadId::MAIN).unwrap(); // NewRef
        step(&mut world, ThreadId::MAIN).unwrap(); // ReadForCas
        let r = crate::ids::RefId(0);
        world.refs.get_mut(&r).unwrap().set(Value::new(1i32));
        step(&mut world, ThreadId::MAIN).unwrap(); // CasRef, now stale
    }
}
