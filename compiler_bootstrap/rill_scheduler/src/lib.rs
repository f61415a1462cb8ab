//! Coroutine ready queue, suspension and resumption (spec §4.8).
//!
//! Scheduling model: single-threaded, cooperative. The scheduler owns no
//! thread of its own; the host drives progress by alternating external
//! I/O with [`Scheduler::run_ready`].

use std::collections::VecDeque;

use hashbrown::HashMap;
use rill_common::{RillError, RillResult};
use rill_memory::object::{Coroutine, CoroutineState};
use rill_memory::Value;

/// A one-shot capability handed to a native async function: firing it
/// resumes the coroutine that is waiting on it (spec §4.8, glossary
/// "Resume token"). Firing the same token twice is an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResumeTokenId(u64);

impl ResumeTokenId {
    /// The raw id handed to a `NativeAsyncFn` (`rill_memory::object::NativeAsyncFn`),
    /// which can't depend on this crate's opaque type across the FFI-ish
    /// boundary between "start the native" and "fire it back from host
    /// callback code".
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstructs a token from its raw id, e.g. inside a host callback
    /// that only has the `u64` it was handed at suspension time.
    pub fn from_raw(id: u64) -> ResumeTokenId {
        ResumeTokenId(id)
    }
}

struct PendingToken {
    coroutine: Value,
    fired: bool,
}

/// The ready queue plus the table of outstanding resume tokens. Exactly
/// one `Scheduler` exists per VM instance (spec §5: "a single host
/// thread owns one VM instance").
pub struct Scheduler {
    ready: VecDeque<Value>,
    tokens: HashMap<ResumeTokenId, PendingToken>,
    next_token: u64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler { ready: VecDeque::new(), tokens: HashMap::new(), next_token: 1 }
    }

    /// Enqueues a coroutine that is newly created or has just been fired
    /// back to readiness. Panics (a programmer bug, not a runtime panic)
    /// if `coroutine` is already `Ready`, preserving the invariant that a
    /// `Ready` coroutine appears in the queue exactly once.
    pub fn enqueue(&mut self, coroutine: Value) {
        let co = unsafe { Coroutine::from_value(coroutine) };
        debug_assert!(
            !matches!(co.state.get(), CoroutineState::Ready),
            "coroutine already in the ready queue"
        );
        co.state.set(CoroutineState::Ready);
        self.ready.push_back(coroutine);
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Pops the head of the ready queue and marks it `Running`. Returns
    /// `None` if the queue is empty. The caller (the interpreter's
    /// `run_ready` driver) is responsible for actually executing it and
    /// for calling [`Scheduler::enqueue`]/marking it `Done`/`Waiting`
    /// according to how execution ends.
    pub fn pop_ready(&mut self) -> Option<Value> {
        let coroutine = self.ready.pop_front()?;
        let co = unsafe { Coroutine::from_value(coroutine) };
        co.state.set(CoroutineState::Running);
        Some(coroutine)
    }

    /// Marks `coroutine` `Waiting` and mints a fresh, unfired resume
    /// token for it (spec §4.8 "Suspension points").
    pub fn suspend(&mut self, coroutine: Value) -> ResumeTokenId {
        let co = unsafe { Coroutine::from_value(coroutine) };
        co.state.set(CoroutineState::Waiting);
        let id = ResumeTokenId(self.next_token);
        self.next_token += 1;
        self.tokens.insert(id, PendingToken { coroutine, fired: false });
        id
    }

    /// Fires `token`, writing `value` into the waiting coroutine's
    /// resume slot and pushing it back onto the ready queue. Firing an
    /// already-fired or unknown token is an error (spec §4.8: "Firing the
    /// same token twice is an error").
    pub fn fire(&mut self, token: ResumeTokenId, value: Value) -> RillResult<()> {
        let entry = self
            .tokens
            .get_mut(&token)
            .ok_or_else(|| RillError::runtime_error("resume token is unknown to this scheduler"))?;
        if entry.fired {
            return Err(RillError::runtime_error("resume token fired more than once"));
        }
        entry.fired = true;
        let coroutine = entry.coroutine;
        let co = unsafe { Coroutine::from_value(coroutine) };
        co.resume_value.set(value);
        self.enqueue(coroutine);
        Ok(())
    }

    /// Current queue length, for diagnostics and tests.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Every value the ready queue and pending-token table hold live;
    /// part of the GC root set (a coroutine must not be collected while
    /// it is scheduled or awaiting resumption).
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.ready.iter().copied().chain(self.tokens.values().map(|t| t.coroutine))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_memory::object::{Header, ObjectKind};
    use rill_memory::Context;
    use std::cell::Cell;

    fn make_coroutine(ctx: &mut Context) -> Value {
        let ptr = ctx.heap.allocate(Coroutine {
            header: Header::new(ObjectKind::Coroutine, std::mem::size_of::<Coroutine>() as u32),
            name: None,
            function: Value::NULL,
            stack: Value::NULL,
            state: Cell::new(CoroutineState::Ready),
            result: Cell::new(Value::UNDEFINED),
            failed: Cell::new(false),
            resume_value: Cell::new(Value::UNDEFINED),
        });
        let v = unsafe { Value::from_heap_ptr(ptr) };
        unsafe { Coroutine::from_value(v) }.state.set(CoroutineState::Done);
        v
    }

    #[test]
    fn ready_queue_is_fifo() {
        let mut ctx = Context::new();
        let mut sched = Scheduler::new();
        let a = make_coroutine(&mut ctx);
        let b = make_coroutine(&mut ctx);
        sched.enqueue(a);
        sched.enqueue(b);
        assert_eq!(sched.pop_ready(), Some(a));
        assert_eq!(sched.pop_ready(), Some(b));
        assert_eq!(sched.pop_ready(), None);
    }

    #[test]
    fn suspend_then_fire_reenqueues() {
        let mut ctx = Context::new();
        let mut sched = Scheduler::new();
        let co = make_coroutine(&mut ctx);
        sched.enqueue(co);
        sched.pop_ready();
        let token = sched.suspend(co);
        assert!(!sched.has_ready());
        sched.fire(token, Value::small_int(42).unwrap()).unwrap();
        assert!(sched.has_ready());
        let resumed = sched.pop_ready().unwrap();
        assert_eq!(resumed, co);
        let value = unsafe { Coroutine::from_value(resumed) }.resume_value.get();
        assert_eq!(value.as_small_int(), Some(42));
    }

    #[test]
    fn firing_twice_is_an_error() {
        let mut ctx = Context::new();
        let mut sched = Scheduler::new();
        let co = make_coroutine(&mut ctx);
        sched.enqueue(co);
        sched.pop_ready();
        let token = sched.suspend(co);
        sched.fire(token, Value::NULL).unwrap();
        assert!(sched.fire(token, Value::NULL).is_err());
    }
}
