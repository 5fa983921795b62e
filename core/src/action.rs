//! The action algebra: the closed set of primitives a program under
//! test may suspend on, each carrying a continuation mapping the
//! operation's result back to the next `Action`. This is the
//! continuation-passing program representation described in the design
//! notes: the interpreter owns the heap of closures, and "stepping a
//! thread" invokes one closure and stores its returned `Action` back into
//! the thread.

use std::fmt;

use crate::ids::{KnownId, RefId, ThreadId, VarId};
use crate::memory::BufferKey;
use crate::stm::StmResult;
use crate::value::Value;
use crate::world::World;

/// What `ReadForCas` hands back: a snapshot of a ref's commit count at the
/// time it was read, later presented back to `CasRef`/`CasRef2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasTicket {
    pub(crate) ref_id: RefId,
    pub(crate) commit_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskingLevel {
    Unmasked,
    MaskedInterruptible,
    MaskedUninterruptible,
}

/// An exception handler frame: `matches` decides whether this frame
/// catches a given exception, `handle` is invoked with it if so.
pub struct Handler {
    pub matches: Box<dyn Fn(&Value) -> bool>,
    pub handle: Box<dyn FnOnce(Value) -> Action>,
}

/// What an `Action`'s continuation is called with once the single-stepper
/// has performed the primitive the `Action` described.
pub enum ActionResult {
    Unit,
    Bool(bool),
    ThreadId(ThreadId),
    VarId(VarId),
    RefId(RefId),
    Value(Value),
    Maybe(Option<Value>),
    CasTicket(CasTicket),
}

pub type Cont = Box<dyn FnOnce(ActionResult) -> Action>;

/// One primitive the program may invoke, plus (for non-terminal variants)
/// the continuation producing the next `Action` from this one's result.
pub enum Action {
    Fork {
        body: Box<dyn FnOnce() -> Action>,
        cont: Cont,
    },
    MyThreadId(Cont),
    Yield(Cont),
    Stop,
    Return(Value),

    NewVar(Cont),
    PutVar(VarId, Value, Cont),
    TryPutVar(VarId, Value, Cont),
    ReadVar(VarId, Cont),
    TakeVar(VarId, Cont),
    TryTakeVar(VarId, Cont),

    NewRef(Value, Cont),
    ReadRef(RefId, Cont),
    WriteRef(RefId, Value, Cont),
    ModifyRef(RefId, Box<dyn FnOnce(&Value) -> Value>, Cont),
    /// Injected by the driver only; never requested by the program itself.
    Commit(BufferKey),
    ReadForCas(RefId, Cont),
    CasRef(RefId, CasTicket, Value, Cont),
    #[allow(clippy::type_complexity)]
    CasRef2(RefId, RefId, CasTicket, CasTicket, Value, Value, Cont),
    AtomicModifyRefCas(RefId, Box<dyn FnOnce(&Value) -> (Value, Value)>, Cont),

    StoreLoadBarrier(Cont),
    LoadLoadBarrier(Cont),
    WriteBarrier(Cont),

    /// `Fn`, not `FnOnce`: a retried-on-conflict transaction is re-run from
    /// scratch with the same body every time it wakes up, rather than
    /// requiring the interpreter to replay a consumed closure. The body
    /// reports only its own outcome; `run_transaction` is what turns that
    /// into a full `StmOutcome` with read/write sets attached.
    Atomic(Box<dyn Fn(&mut dyn crate::stm::StmBackend) -> StmResult>, Cont),

    Throw(Value),
    ThrowTo(ThreadId, Value, Cont),
    Catching {
        handler: Handler,
        cont: Cont,
    },
    PopCatching(Cont),
    Masking(MaskingLevel, Cont),
    ResetMask(MaskingLevel, Cont),

    KnowsAbout(KnownId, Cont),
    Forgets(KnownId, Cont),
    AllKnown(Cont),

    Lift(Box<dyn FnOnce() -> Value>, Cont),
    Prim(Box<dyn FnOnce()>, Cont),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Action {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Action::Fork { .. } => "Fork",
            Action::MyThreadId(_) => "MyThreadId",
            Action::Yield(_) => "Yield",
            Action::Stop => "Stop",
            Action::Return(_) => "Return",
            Action::NewVar(_) => "NewVar",
            Action::PutVar(..) => "PutVar",
            Action::TryPutVar(..) => "TryPutVar",
            Action::ReadVar(..) => "ReadVar",
            Action::TakeVar(..) => "TakeVar",
            Action::TryTakeVar(..) => "TryTakeVar",
            Action::NewRef(..) => "NewRef",
            Action::ReadRef(..) => "ReadRef",
            Action::WriteRef(..) => "WriteRef",
            Action::ModifyRef(..) => "ModifyRef",
            Action::Commit(_) => "Commit",
            Action::ReadForCas(..) => "ReadForCas",
            Action::CasRef(..) => "CasRef",
            Action::CasRef2(..) => "CasRef2",
            Action::AtomicModifyRefCas(..) => "AtomicModifyRefCas",
            Action::StoreLoadBarrier(_) => "StoreLoadBarrier",
            Action::LoadLoadBarrier(_) => "LoadLoadBarrier",
            Action::WriteBarrier(_) => "WriteBarrier",
            Action::Atomic(..) => "Atomic",
            Action::Throw(_) => "Throw",
            Action::ThrowTo(..) => "ThrowTo",
            Action::Catching { .. } => "Catching",
            Action::PopCatching(_) => "PopCatching",
            Action::Masking(..) => "Masking",
            Action::ResetMask(..) => "ResetMask",
            Action::KnowsAbout(..) => "KnowsAbout",
            Action::Forgets(..) => "Forgets",
            Action::AllKnown(_) => "AllKnown",
            Action::Lift(..) => "Lift",
            Action::Prim(..) => "Prim",
        }
    }

    /// Whether this action can ever block the owning thread. Used by the
    /// thread table to decide whether a thread with this pending action
    /// belongs in the runnable set.
    #[must_use]
    pub fn can_block(&self) -> bool {
        matches!(
            self,
            Action::PutVar(..)
                | Action::ReadVar(..)
                | Action::TakeVar(..)
                | Action::Atomic(..)
                | Action::ThrowTo(..)
        )
    }

    /// The simplified form used by the dependency oracle, a.k.a.
    /// the action's "lookahead". Since every `Thread` stores its next
    /// `Action` directly, lookahead never requires speculative execution
    /// — it is simply this function applied to that stored action.
    #[must_use]
    pub fn action_type(&self, world: &World) -> ActionType {
        use Action::{
            AllKnown, Atomic, AtomicModifyRefCas, CasRef, CasRef2, Catching, Commit, Forgets,
            Fork, KnowsAbout, Lift, LoadLoadBarrier, Masking, ModifyRef, MyThreadId, NewRef,
            NewVar, PopCatching, Prim, PutVar, ReadForCas, ReadRef, ReadVar, ResetMask, Return,
            Stop, StoreLoadBarrier, TakeVar, Throw, ThrowTo, TryPutVar, TryTakeVar, WriteBarrier,
            WriteRef, Yield,
        };
        match self {
            Lift(..) => ActionType::Lift,
            Prim(..) => ActionType::Prim,
            Atomic(..) => ActionType::Stm,
            ThrowTo(target, ..) => ActionType::ThrowTo(*target),
            PutVar(v, ..) | TryPutVar(v, ..) => ActionType::SynchronisedWrite(*v),
            ReadVar(v, _) | TakeVar(v, _) | TryTakeVar(v, _) => ActionType::SynchronisedRead(*v),
            ReadRef(r, _) => ActionType::UnsynchronisedRead(*r),
            WriteRef(r, ..) => ActionType::UnsynchronisedWrite(*r),
            ModifyRef(r, ..) | ReadForCas(r, _) | CasRef(r, ..) | AtomicModifyRefCas(r, ..) => {
                ActionType::SynchronisedModify(*r)
            }
            CasRef2(r1, r2, ..) => ActionType::SynchronisedModify2(*r1, *r2),
            Commit(key) => ActionType::SynchronisedCommit(world.head_ref_of(key)),
            StoreLoadBarrier(_) | WriteBarrier(_) => ActionType::SynchronisedOther,
            LoadLoadBarrier(_)
            | Fork { .. }
            | MyThreadId(_)
            | Yield(_)
            | Stop
            | Return(_)
            | NewVar(_)
            | NewRef(..)
            | Throw(_)
            | Catching { .. }
            | PopCatching(_)
            | Masking(..)
            | ResetMask(..)
            | KnowsAbout(..)
            | Forgets(..)
            | AllKnown(_) => ActionType::UnsynchronisedOther,
        }
    }
}

/// The simplification of an `Action` used by the dependency oracle; also
/// doubles as a thread's `Lookahead`, since a thread's pending
/// action is always known without executing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Lift,
    Prim,
    Stm,
    ThrowTo(ThreadId),
    UnsynchronisedRead(RefId),
    UnsynchronisedWrite(RefId),
    SynchronisedModify(RefId),
    SynchronisedModify2(RefId, RefId),
    SynchronisedCommit(RefId),
    SynchronisedRead(VarId),
    SynchronisedWrite(VarId),
    SynchronisedOther,
    UnsynchronisedOther,
}

pub type Lookahead = ActionType;
