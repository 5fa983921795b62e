//! Error handling: three classes of failure. Program-level
//! failures and scheduler-contract violations both flow through
//! `Failure`; implementation-invariant violations are asserted loudly and
//! panic instead (they are bugs in this crate, never in the program
//! under test).

use thiserror::Error;

use crate::ids::ThreadId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("deadlock: thread {0} and every thread that could still unblock it are blocked")]
    Deadlock(ThreadId),
    #[error("STM deadlock: thread {0} is blocked in a transaction with no runnable thread remaining")]
    StmDeadlock(ThreadId),
    #[error("uncaught exception on thread {0}: {1}")]
    UncaughtException(ThreadId, String),
    #[error("internal error: {0}")]
    InternalError(String),
}
