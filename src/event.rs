// Event Hubs
//
// Asynchronous completion notification. Submitting an operation records a
// `SubmitInfo`; when the operation finishes, the kernel posts an `Event`
// carrying that info plus status and payload onto the hub's FIFO. Threads
// drain hubs with `WaitForEvents` and block (state Blocked) while a hub is
// empty.
//
// The kernel never calls user code: it only posts events that user waiters
// drain. Post order equals delivery order.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::sync::IrqSpinlock;
use crate::syscall::HelError;
use crate::thread::ThreadId;
use crate::uaccess::UserPtr;
use crate::universe::Handle;

static NEXT_ASYNC_ID: AtomicI64 = AtomicI64::new(1);

/// Issues a globally unique, strictly increasing async id. Ids correlate a
/// submitted request with its completion and are never reused within a
/// boot.
pub fn alloc_async_id() -> i64 {
    NEXT_ASYNC_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    pub async_id: i64,
    pub submit_function: u64,
    pub submit_object: u64,
}

impl SubmitInfo {
    pub const fn new(async_id: i64, submit_function: u64, submit_object: u64) -> Self {
        Self {
            async_id,
            submit_function,
            submit_object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RecvString,
    Accept,
    Connect,
    IrqFired,
}

/// One completion, queued on a hub until a waiter drains it. Unused
/// payload fields stay zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub error: HelError,
    pub info: SubmitInfo,
    pub length: usize,
    pub msg_request: i64,
    pub msg_seq: i64,
    pub handle: Handle,
}

impl Event {
    pub fn new(kind: EventKind, error: HelError, info: SubmitInfo) -> Self {
        Self {
            kind,
            error,
            info,
            length: 0,
            msg_request: 0,
            msg_seq: 0,
            handle: Handle::NULL,
        }
    }

    pub fn with_string(mut self, length: usize, msg_request: i64, msg_seq: i64) -> Self {
        self.length = length;
        self.msg_request = msg_request;
        self.msg_seq = msg_seq;
        self
    }

    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = handle;
        self
    }
}

/// A thread parked in `WaitForEvents`, together with where its drained
/// events go once the hub becomes non-empty.
#[derive(Debug, Clone, Copy)]
pub struct WaitRecord {
    pub thread: ThreadId,
    pub buffer: UserPtr,
    pub capacity: usize,
}

struct HubInner {
    events: VecDeque<Event>,
    waiters: VecDeque<WaitRecord>,
}

/// FIFO of completion events with blocked-waiter bookkeeping.
pub struct EventHub {
    inner: IrqSpinlock<HubInner>,
}

impl EventHub {
    pub fn new() -> Arc<EventHub> {
        Arc::new(EventHub {
            inner: IrqSpinlock::new(HubInner {
                events: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        })
    }

    /// Appends an event and, if a thread is parked on the hub, completes
    /// its wait with everything queued so far.
    pub fn post(&self, event: Event) {
        let completion = {
            let mut inner = self.inner.lock();
            inner.events.push_back(event);
            match inner.waiters.pop_front() {
                Some(record) => {
                    let drained = Self::drain_locked(&mut inner, record.capacity);
                    Some((record, drained))
                }
                None => None,
            }
        };

        if let Some((record, events)) = completion {
            crate::syscall::finish_wait(record, &events);
        }
    }

    fn drain_locked(inner: &mut HubInner, max: usize) -> Vec<Event> {
        let count = inner.events.len().min(max);
        inner.events.drain(..count).collect()
    }

    /// Takes up to `max` queued events, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Event> {
        let mut inner = self.inner.lock();
        Self::drain_locked(&mut inner, max)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    /// Parks a waiter, unless events are already queued; in that case they
    /// are returned immediately and nothing is recorded.
    pub fn wait_or_park(&self, record: WaitRecord) -> Option<Vec<Event>> {
        let mut inner = self.inner.lock();
        if !inner.events.is_empty() {
            return Some(Self::drain_locked(&mut inner, record.capacity));
        }
        inner.waiters.push_back(record);
        None
    }

    /// Removes the wait record of `thread`, if it is still parked. Used by
    /// the timeout path, which races against `post`.
    pub fn take_waiter(&self, thread: ThreadId) -> Option<WaitRecord> {
        let mut inner = self.inner.lock();
        let position = inner.waiters.iter().position(|w| w.thread == thread)?;
        inner.waiters.remove(position)
    }

    /// Evicts every parked waiter; the hub is going away.
    pub fn take_all_waiters(&self) -> Vec<WaitRecord> {
        let mut inner = self.inner.lock();
        inner.waiters.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: i64) -> SubmitInfo {
        SubmitInfo::new(id, 0, 0)
    }

    #[test]
    fn async_ids_are_strictly_increasing() {
        let first = alloc_async_id();
        let second = alloc_async_id();
        let third = alloc_async_id();
        assert!(first < second && second < third);
    }

    #[test]
    fn async_ids_unique_under_concurrency() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..100).map(|_| alloc_async_id()).collect::<Vec<_>>()))
            .collect();

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let count = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), count);
    }

    #[test]
    fn events_drain_in_post_order() {
        let hub = EventHub::new();
        for id in 1..=4 {
            hub.post(Event::new(EventKind::RecvString, HelError::Ok, info(id)));
        }

        let drained = hub.drain(16);
        let ids: Vec<i64> = drained.iter().map(|e| e.info.async_id).collect();
        assert_eq!(ids, alloc::vec![1, 2, 3, 4]);
        assert!(hub.is_empty());
    }

    #[test]
    fn drain_respects_capacity() {
        let hub = EventHub::new();
        for id in 1..=4 {
            hub.post(Event::new(EventKind::RecvString, HelError::Ok, info(id)));
        }

        assert_eq!(hub.drain(3).len(), 3);
        assert_eq!(hub.drain(3).len(), 1);
    }

    #[test]
    fn wait_or_park_returns_ready_events() {
        let hub = EventHub::new();
        hub.post(Event::new(EventKind::RecvString, HelError::Ok, info(9)));

        let record = WaitRecord {
            thread: ThreadId::from_raw(1),
            buffer: UserPtr::new(0),
            capacity: 4,
        };
        let ready = hub.wait_or_park(record).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].info.async_id, 9);
    }

    #[test]
    fn parked_waiter_can_be_taken_back() {
        let hub = EventHub::new();
        let record = WaitRecord {
            thread: ThreadId::from_raw(7),
            buffer: UserPtr::new(0),
            capacity: 1,
        };
        assert!(hub.wait_or_park(record).is_none());
        assert!(hub.take_waiter(ThreadId::from_raw(7)).is_some());
        assert!(hub.take_waiter(ThreadId::from_raw(7)).is_none());
    }
}
