//! The memory subsystem: a `Ref` is a mutable cell whose writes are
//! either applied immediately (SC) or buffered per-thread (TSO) / per
//! (thread, ref) (PSO) until a commit or barrier drains them.

use std::collections::{HashMap, VecDeque};

use crate::ids::{IdSource, RefId, ThreadId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    SequentialConsistency,
    TotalStoreOrder,
    PartialStoreOrder,
}

/// Identifies one FIFO of buffered writes: under TSO, one per writing
/// thread (covering every ref that thread writes); under PSO, one per
/// (writing thread, ref) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKey {
    Thread(ThreadId),
    ThreadRef(ThreadId, RefId),
}

impl BufferKey {
    fn for_write(mem: MemType, thread: ThreadId, reference: RefId) -> Self {
        match mem {
            MemType::SequentialConsistency => {
                unreachable!("SC never buffers writes")
            }
            MemType::TotalStoreOrder => BufferKey::Thread(thread),
            MemType::PartialStoreOrder => BufferKey::ThreadRef(thread, reference),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    reference: RefId,
    value: Value,
}

#[derive(Debug)]
pub struct Ref {
    pub global: Value,
    pub commit_count: u64,
}

impl Ref {
    #[must_use]
    pub fn new(initial: Value) -> Self {
        Self {
            global: initial,
            commit_count: 0,
        }
    }

    /// Applies a write that is visible immediately (SC writes, `ModifyRef`,
    /// successful CAS), bumping the commit count any outstanding CAS ticket
    /// is compared against.
    pub fn set(&mut self, value: Value) {
        self.global = value;
        self.commit_count += 1;
    }
}

/// All outstanding per-thread / per-(thread, ref) write queues, plus the
/// commit pseudo-thread id minted for each queue while it is non-empty.
#[derive(Debug, Default)]
pub struct WriteBuffers {
    queues: HashMap<BufferKey, VecDeque<PendingWrite>>,
    pseudo_threads: HashMap<BufferKey, ThreadId>,
}

impl WriteBuffers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a buffered write, minting a fresh commit pseudo-thread if
    /// this is the first write for the key since it last drained empty.
    pub fn push(
        &mut self,
        ids: &mut IdSource,
        mem: MemType,
        thread: ThreadId,
        reference: RefId,
        value: Value,
    ) {
        let key = BufferKey::for_write(mem, thread, reference);
        let queue = self.queues.entry(key).or_default();
        if queue.is_empty() {
            self.pseudo_threads.insert(key, ids.fresh_commit_pseudo_thread());
        }
        queue.push_back(PendingWrite { reference, value });
    }

    /// Currently outstanding commit pseudo-threads, for the runnable set.
    pub fn pseudo_threads(&self) -> impl Iterator<Item = (ThreadId, BufferKey)> + '_ {
        self.pseudo_threads.iter().map(|(k, t)| (*t, *k))
    }

    /// The ref targeted by the oldest entry of `key`'s queue; used to
    /// label a `Commit` action as `SynchronisedCommit(r)` for the
    /// dependency oracle without popping anything.
    #[must_use]
    pub fn head_ref(&self, key: &BufferKey) -> Option<RefId> {
        self.queues.get(key).and_then(|q| q.front()).map(|w| w.reference)
    }

    #[must_use]
    pub fn thread_buffer_has(&self, mem: MemType, thread: ThreadId, reference: RefId) -> Option<&Value> {
        let key = BufferKey::for_write(mem, thread, reference);
        self.queues
            .get(&key)
            .and_then(|q| q.iter().rev().find(|w| w.reference == reference))
            .map(|w| &w.value)
    }

    /// Whether *any* thread currently has a buffered write to `reference`.
    #[must_use]
    pub fn any_pending_for(&self, reference: RefId) -> bool {
        self.queues
            .values()
            .any(|q| q.iter().any(|w| w.reference == reference))
    }

    /// Pops and applies the oldest write of `key`'s queue to `refs`.
    /// `key` must currently head a non-empty queue (the BPOR tree only
    /// ever schedules `Commit` for outstanding pseudo-threads).
    pub fn commit_one(&mut self, key: &BufferKey, refs: &mut HashMap<RefId, Ref>) {
        let queue = self.queues.get_mut(key).expect("commit of unknown buffer key");
        let write = queue.pop_front().expect("commit of empty buffer");
        apply(refs, write);
        self.gc(key);
    }

    /// Drains every buffered write belonging to `thread`, across every ref
    /// it has written, in FIFO order per queue. Used by `StoreLoadBarrier`
    /// / `WriteBarrier` ("drains everything").
    pub fn flush_thread(&mut self, thread: ThreadId, refs: &mut HashMap<RefId, Ref>) {
        let keys: Vec<BufferKey> = self
            .queues
            .keys()
            .copied()
            .filter(|k| matches!(k,
                BufferKey::Thread(t) | BufferKey::ThreadRef(t, _) if *t == thread))
            .collect();
        for key in keys {
            self.drain_all(&key, refs);
        }
    }

    /// Flushes whatever is necessary so that `reference`'s global value is
    /// fully up to date: under PSO, just the per-(thread, ref) queues for
    /// `reference`; under TSO, each thread's shared queue up to and
    /// including its last write to `reference` (earlier writes to other
    /// refs in the same queue must commit first to preserve program
    /// order).
    pub fn flush_ref(&mut self, mem: MemType, reference: RefId, refs: &mut HashMap<RefId, Ref>) {
        match mem {
            MemType::SequentialConsistency => {}
            MemType::PartialStoreOrder => {
                let keys: Vec<BufferKey> = self
                    .queues
                    .keys()
                    .copied()
                    .filter(|k| matches!(k, BufferKey::ThreadRef(_, r) if *r == reference))
                    .collect();
                for key in keys {
                    self.drain_all(&key, refs);
                }
            }
            MemType::TotalStoreOrder => {
                let keys: Vec<BufferKey> = self
                    .queues
                    .keys()
                    .copied()
                    .filter(|k| matches!(k, BufferKey::Thread(_)))
                    .collect();
                for key in keys {
                    self.drain_up_to_last_match(&key, reference, refs);
                }
            }
        }
    }

    fn drain_all(&mut self, key: &BufferKey, refs: &mut HashMap<RefId, Ref>) {
        if let Some(queue) = self.queues.get_mut(key) {
            while let Some(write) = queue.pop_front() {
                apply(refs, write);
            }
        }
        self.gc(key);
    }

    fn drain_up_to_last_match(&mut self, key: &BufferKey, reference: RefId, refs: &mut HashMap<RefId, Ref>) {
        let Some(queue) = self.queues.get_mut(key) else {
            return;
        };
        let Some(last_match) = queue.iter().rposition(|w| w.reference == reference) else {
            return;
        };
        for _ in 0..=last_match {
            let write = queue.pop_front().expect("rposition found an index in range");
            apply(refs, write);
        }
        self.gc(key);
    }

    fn gc(&mut self, key: &BufferKey) {
        if self.queues.get(key).is_some_and(VecDeque::is_empty) {
            self.queues.remove(key);
            self.pseudo_threads.remove(key);
        }
    }
}

fn apply(refs: &mut HashMap<RefId, Ref>, write: PendingWrite) {
    refs.get_mut(&write.reference).expect("write to unknown ref").set(write.value);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn val(n: i32) -> Value {
        Value::new(n)
    }

    #[test]
    fn sc_never_mints_pseudo_threads() {
        let buffers = WriteBuffers::new();
        assert_eq!(buffers.pseudo_threads().count(), 0);
    }

    #[test]
    fn tso_buffers_writes_per_thread_across_refs() {
        let mut ids = IdSource::new();
        let mut buffers = WriteBuffers::new();
        let mut refs = HashMap::new();
        let r1 = ids.fresh_ref();
        let r2 = ids.fresh_ref();
        refs.insert(r1, Ref::new(val(0)));
        refs.insert(r2, Ref::new(val(0)));
        let t = ThreadId(1);

        buffers.push(&mut ids, MemType::TotalStoreOrder, t, r1, val(1));
        buffers.push(&mut ids, MemType::TotalStoreOrder, t, r2, val(2));

        assert_eq!(buffers.pseudo_threads().count(), 1);
        assert_eq!(
            buffers.thread_buffer_has(MemType::TotalStoreOrder, t, r1).unwrap().downcast_ref::<i32>(),
            Some(&1)
        );

        buffers.flush_thread(t, &mut refs);
        assert_eq!(refs[&r1].global.downcast_ref::<i32>(), Some(&1));
        assert_eq!(refs[&r2].global.downcast_ref::<i32>(), Some(&2));
        assert_eq!(buffers.pseudo_threads().count(), 0);
    }

    #[test]
    fn pso_buffers_writes_per_thread_and_ref() {
        let mut ids = IdSource::new();
        let mut buffers = WriteBuffers::new();
        let mut refs = HashMap::new();
        let r1 = ids.fresh_ref();
        refs.insert(r1, Ref::new(val(0)));
        let t1 = ThreadId(1);
        let t2 = ThreadId(2);

        buffers.push(&mut ids, MemType::PartialStoreOrder, t1, r1, val(1));
        buffers.push(&mut ids, MemType::PartialStoreOrder, t2, r1, val(2));

        assert_eq!(buffers.pseudo_threads().count(), 2);
    }

    #[test]
    fn commit_one_drains_oldest_and_applies() {
        let mut ids = IdSource::new();
        let mut buffers = WriteBuffers::new();
        let mut refs = HashMap::new();
        let r = ids.fresh_ref();
        refs.insert(r, Ref::new(val(0)));
        let t = ThreadId(1);
        buffers.push(&mut ids, MemType::TotalStoreOrder, t, r, val(9));
        let key = BufferKey::Thread(t);

        buffers.commit_one(&key, &mut refs);

        assert_eq!(refs[&r].global.downcast_ref::<i32>(), Some(&9));
        assert_eq!(refs[&r].commit_count, 1);
        assert_eq!(buffers.pseudo_threads().count(), 0);
    }
}
