//! Debug-only invariant checks for the world and the BPOR tree. These
//! exist to catch bugs in this crate, never to validate a program under
//! test — so every assertion here is a bug in the interpreter, not the
//! program, if it ever fires.

use crate::bpor::BporNode;
use crate::thread::BlockReason;
use crate::world::World;

pub fn assert_world_properties(world: &World) {
    if !cfg!(debug_assertions) {
        return;
    }

    assert_no_runnable_thread_is_blocked(world);
    assert_svar_waiters_are_consistent(world);
}

fn assert_no_runnable_thread_is_blocked(world: &World) {
    for (id, thread) in world.threads.iter() {
        assert!(
            !(world.runnable().contains(&id) && thread.is_blocked()),
            "thread {id} is in the runnable set while blocked"
        );
    }
}

/// A thread blocked `OnSVarFull`/`OnSVarEmpty` only makes sense for an
/// `SVar` that currently disagrees with the wait it's parked on (full
/// waiters wait for an empty slot to fill, empty waiters wait for a full
/// slot to drain).
fn assert_svar_waiters_are_consistent(world: &World) {
    for (id, thread) in world.threads.iter() {
        match thread.blocked_on {
            Some(BlockReason::OnSVarFull(v)) => {
                assert!(
                    !world.svars[&v].is_full(),
                    "thread {id} is blocked waiting for svar {v:?} to fill, but it's already full"
                );
            }
            Some(BlockReason::OnSVarEmpty(v)) => {
                assert!(
                    world.svars[&v].is_full(),
                    "thread {id} is blocked waiting for svar {v:?} to empty, but it's already empty"
                );
            }
            _ => {}
        }
    }
}

pub fn assert_bpor_properties(root: &BporNode) {
    if !cfg!(debug_assertions) {
        return;
    }
    root.check_invariants();
}
