// Scheduler
//
// A single global FIFO ready queue and the dispatcher around it. Only one
// thread is Running per CPU and the Running thread is never in the queue.
//
// `schedule` is the only way into user mode: it retires the current thread
// according to its state (Running threads go back on the queue, Blocked
// and Exited ones fall out), pops the next head, loads its page-table
// root and trap-returns into its saved registers. With an empty queue the
// CPU halts with interrupts enabled until any wake-up and retries.
//
// Preemption is driven by the timer vector: the IRQ path lands in
// `schedule`, which requeues the interrupted thread before picking the
// next head. Blocking primitives mark the caller Blocked, optionally file
// a tick deadline here, and then call `schedule` at a well-defined point.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch;
use crate::event::EventHub;
use crate::sync::IrqSpinlock;
use crate::thread::{self, Thread, ThreadId, ThreadState};

struct Sleeper {
    deadline: u64,
    hub: Arc<EventHub>,
}

struct SchedulerInner {
    ready: VecDeque<Arc<Thread>>,
    current: Option<Arc<Thread>>,
    sleepers: BTreeMap<u64, Sleeper>,
}

pub struct Scheduler {
    inner: IrqSpinlock<SchedulerInner>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            inner: IrqSpinlock::new(SchedulerInner {
                ready: VecDeque::new(),
                current: None,
                sleepers: BTreeMap::new(),
            }),
        }
    }

    /// Marks a thread Ready and appends it to the queue.
    pub fn enqueue(&self, thread: Arc<Thread>) {
        thread.set_state(ThreadState::Ready);
        self.inner.lock().ready.push_back(thread);
    }

    pub fn current(&self) -> Option<Arc<Thread>> {
        self.inner.lock().current.clone()
    }

    /// Retires the current thread per its state and promotes the queue
    /// head to Running. Returns the chosen thread, or nothing while the
    /// queue is empty.
    pub fn rotate(&self) -> Option<Arc<Thread>> {
        let mut inner = self.inner.lock();

        if let Some(previous) = inner.current.take() {
            match previous.state() {
                ThreadState::Running => {
                    previous.set_state(ThreadState::Ready);
                    inner.ready.push_back(previous);
                }
                // Blocked threads are reachable through their hub records,
                // Exited ones through nothing; both leave the dispatcher.
                ThreadState::Ready | ThreadState::Blocked | ThreadState::Exited => {}
            }
        }

        let next = inner.ready.pop_front()?;
        next.set_state(ThreadState::Running);
        inner.current = Some(next.clone());
        thread::set_active_context(next.context_ptr());
        Some(next)
    }

    /// Wakes a Blocked thread. Pending deadline bookkeeping is dropped as
    /// a side effect.
    pub fn unblock(&self, id: ThreadId) -> bool {
        let target = match thread::lookup(id) {
            Some(thread) => thread,
            None => return false,
        };

        let mut inner = self.inner.lock();
        inner.sleepers.remove(&id.raw());
        if target.state() != ThreadState::Blocked {
            return false;
        }
        target.set_state(ThreadState::Ready);
        inner.ready.push_back(target);
        true
    }

    /// Transitions the current thread to Blocked, optionally filing a
    /// wake-up deadline tied to the hub it is parked on.
    pub fn block_current(&self, deadline: Option<(u64, Arc<EventHub>)>) {
        let mut inner = self.inner.lock();
        let current = inner
            .current
            .clone()
            .expect("blocking without a current thread");
        current.set_state(ThreadState::Blocked);
        if let Some((deadline, hub)) = deadline {
            inner
                .sleepers
                .insert(current.id().raw(), Sleeper { deadline, hub });
        }
    }

    pub fn cancel_sleep(&self, id: ThreadId) {
        self.inner.lock().sleepers.remove(&id.raw());
    }

    /// Collects the sleepers whose deadlines have passed.
    fn take_expired(&self, now: u64) -> Vec<(ThreadId, Arc<EventHub>)> {
        let mut inner = self.inner.lock();
        let expired: Vec<u64> = inner
            .sleepers
            .iter()
            .filter(|(_, sleeper)| sleeper.deadline <= now)
            .map(|(&id, _)| id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                inner
                    .sleepers
                    .remove(&id)
                    .map(|sleeper| (ThreadId::from_raw(id), sleeper.hub))
            })
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.inner.lock().ready.len()
    }
}

static SCHEDULER: Scheduler = Scheduler::new();

pub fn scheduler() -> &'static Scheduler {
    &SCHEDULER
}

pub fn enqueue(thread: Arc<Thread>) {
    SCHEDULER.enqueue(thread);
}

pub fn current_thread() -> Option<Arc<Thread>> {
    SCHEDULER.current()
}

pub fn unblock(id: ThreadId) -> bool {
    SCHEDULER.unblock(id)
}

pub fn block_current(deadline: Option<(u64, Arc<EventHub>)>) {
    SCHEDULER.block_current(deadline);
}

pub fn cancel_sleep(id: ThreadId) {
    SCHEDULER.cancel_sleep(id);
}

/// Timer-tick sweep: every expired waiter still parked on its hub gets an
/// empty, successful wait completion.
pub fn wake_expired(now: u64) {
    for (id, hub) in SCHEDULER.take_expired(now) {
        if let Some(record) = hub.take_waiter(id) {
            crate::syscall::finish_wait(record, &[]);
        }
    }
}

/// The dispatcher. Never returns: either trap-returns into the chosen
/// thread or halts until an interrupt produces one.
pub fn schedule() -> ! {
    loop {
        if let Some(next) = SCHEDULER.rotate() {
            unsafe {
                let root = next.address_space().page_root();
                if arch::read_cr3() != root {
                    arch::write_cr3(root);
                }
                thread::enter_user(next.context_ptr());
            }
        }

        // Nothing runnable: wait interrupt-enabled for any wake-up. The
        // next trap re-enters the dispatcher on a fresh stack.
        arch::enable_irqs();
        arch::halt();
        arch::disable_irqs();
    }
}

/// Retires the calling thread for good and hands the CPU away.
pub fn exit_current() -> ! {
    if let Some(current) = SCHEDULER.current() {
        current.set_state(ThreadState::Exited);
        thread::unregister(current.id());
    }
    schedule();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::addrspace::AddressSpace;
    use crate::mm::paging::PageSpace;
    use crate::universe::Universe;

    fn make_thread() -> Arc<Thread> {
        Thread::new(
            0x1000,
            0,
            0x8000,
            Universe::new(),
            AddressSpace::new(PageSpace::from_root(0)),
        )
    }

    #[test]
    fn rotation_is_fifo_round_robin() {
        let sched = Scheduler::new();
        let a = make_thread();
        let b = make_thread();
        let c = make_thread();
        sched.enqueue(a.clone());
        sched.enqueue(b.clone());
        sched.enqueue(c.clone());

        assert_eq!(sched.rotate().unwrap().id(), a.id());
        assert_eq!(a.state(), ThreadState::Running);

        // The preempted head goes to the back before the next pick.
        assert_eq!(sched.rotate().unwrap().id(), b.id());
        assert_eq!(a.state(), ThreadState::Ready);
        assert_eq!(sched.rotate().unwrap().id(), c.id());
        assert_eq!(sched.rotate().unwrap().id(), a.id());
    }

    #[test]
    fn running_thread_is_not_queued() {
        let sched = Scheduler::new();
        let a = make_thread();
        sched.enqueue(a.clone());
        let running = sched.rotate().unwrap();
        assert_eq!(running.id(), a.id());
        assert_eq!(sched.ready_count(), 0);
    }

    #[test]
    fn blocked_threads_leave_the_rotation() {
        let sched = Scheduler::new();
        let a = make_thread();
        let b = make_thread();
        thread::register(a.clone());
        sched.enqueue(a.clone());
        sched.enqueue(b.clone());

        sched.rotate().unwrap();
        sched.block_current(None);
        assert_eq!(sched.rotate().unwrap().id(), b.id());
        assert_eq!(sched.ready_count(), 0);

        // Unblocking puts the thread back at the tail.
        assert!(sched.unblock(a.id()));
        assert_eq!(sched.ready_count(), 1);
        assert_eq!(a.state(), ThreadState::Ready);
        thread::unregister(a.id());
    }

    #[test]
    fn unblock_ignores_threads_that_are_not_blocked() {
        let sched = Scheduler::new();
        let a = make_thread();
        thread::register(a.clone());
        sched.enqueue(a.clone());
        assert!(!sched.unblock(a.id()));
        thread::unregister(a.id());
    }

    #[test]
    fn expired_sleepers_are_collected_once() {
        let sched = Scheduler::new();
        let a = make_thread();
        let hub = EventHub::new();
        thread::register(a.clone());
        sched.enqueue(a.clone());
        sched.rotate().unwrap();
        sched.block_current(Some((10, hub.clone())));

        assert!(sched.take_expired(9).is_empty());
        let expired = sched.take_expired(10);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, a.id());
        assert!(sched.take_expired(10).is_empty());
        thread::unregister(a.id());
    }
}
