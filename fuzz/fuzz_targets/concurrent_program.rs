#![no_main]

use arbitrary::Arbitrary;
use bpor_core::action::{Action, ActionResult};
use bpor_core::driver::{self, Config};
use bpor_core::error::Failure;
use bpor_core::memory::MemType;
use bpor_core::value::Value;
use libfuzzer_sys::fuzz_target;

/// A bounded concurrent program, generated directly from fuzzer input
/// rather than through any intermediate AST: each variant round-trips a
/// byte through a fresh `SVar` or `Ref` so building it never needs to
/// thread ids between sibling operations.
#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Yield,
    SvarRoundTrip(u8),
    RefRoundTrip(u8),
    Fork(Vec<Op>),
}

const MAX_FORK_DEPTH: usize = 4;

fn build(ops: &[Op], depth: usize) -> Action {
    let Some((op, rest)) = ops.split_first() else {
        return Action::Stop;
    };
    let rest = rest.to_vec();

    match op {
        Op::Yield => Action::Yield(Box::new(move |_| build(&rest, depth))),
        Op::SvarRoundTrip(byte) => {
            let byte = *byte;
            Action::NewVar(Box::new(move |r| {
                let ActionResult::VarId(v) = r else { unreachable!() };
                Action::PutVar(
                    v,
                    Value::new(byte),
                    Box::new(move |_| Action::TakeVar(v, Box::new(move |_| build(&rest, depth)))),
                )
            }))
        }
        Op::RefRoundTrip(byte) => {
            let byte = *byte;
            Action::NewRef(
                Value::new(0u8),
                Box::new(move |r| {
                    let ActionResult::RefId(reference) = r else { unreachable!() };
                    Action::WriteRef(
                        reference,
                        Value::new(byte),
                        Box::new(move |_| Action::ReadRef(reference, Box::new(move |_| build(&rest, depth)))),
                    )
                }),
            )
        }
        Op::Fork(body) => {
            if depth >= MAX_FORK_DEPTH {
                build(&rest, depth)
            } else {
                let body = body.clone();
                Action::Fork {
                    body: Box::new(move || build(&body, depth + 1)),
                    cont: Box::new(move |_| build(&rest, depth)),
                }
            }
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let config = Config {
        preemption_bound: 2,
        mem_type: MemType::SequentialConsistency,
        execution_cap: Some(200),
    };

    for execution in driver::run_test(&config, || build(&ops, 0)) {
        assert!(
            !matches!(execution.result, Err(Failure::InternalError(_))),
            "scheduler contract violation: {:?}",
            execution.result
        );
    }
});
