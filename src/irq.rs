// IRQ Relays and the Timer
//
// A static relay per interrupt vector fans one hardware fire out to every
// event hub that subscribed since the last fire. Delivery is exactly once
// per fire and the waiter list is cleared afterwards; re-arming is an
// explicit fresh subscription.
//
// Vector 0 is the periodic timer. Its handler advances the global tick
// counter and wakes threads whose wait deadlines have passed before the
// scheduler takes over.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::event::{Event, EventHub, EventKind, SubmitInfo};
use crate::sync::IrqSpinlock;
use crate::syscall::HelError;

pub const RELAY_COUNT: usize = 256;
pub const TIMER_VECTOR: u8 = 0;

pub const TIMER_HZ: u64 = 100;
pub const MS_PER_TICK: u64 = 1000 / TIMER_HZ;
pub const NS_PER_TICK: u64 = 1_000_000_000 / TIMER_HZ;

/// Publisher for a single vector: a fire posts one OK event to each
/// subscribed hub, then forgets them all.
pub struct IrqRelay {
    subscribers: IrqSpinlock<Vec<(Arc<EventHub>, SubmitInfo)>>,
}

impl IrqRelay {
    pub const fn new() -> Self {
        Self {
            subscribers: IrqSpinlock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, hub: Arc<EventHub>, info: SubmitInfo) {
        self.subscribers.lock().push((hub, info));
    }

    pub fn fire(&self) {
        let waiters: Vec<(Arc<EventHub>, SubmitInfo)> =
            self.subscribers.lock().drain(..).collect();
        for (hub, info) in waiters {
            hub.post(Event::new(EventKind::IrqFired, HelError::Ok, info));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

static RELAYS: [IrqRelay; RELAY_COUNT] = [const { IrqRelay::new() }; RELAY_COUNT];

pub fn relay(vector: u8) -> &'static IrqRelay {
    &RELAYS[vector as usize]
}

pub fn subscribe(vector: u8, hub: Arc<EventHub>, info: SubmitInfo) {
    relay(vector).subscribe(hub, info);
}

pub fn fire(vector: u8) {
    relay(vector).fire();
}

static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Converts a wait timeout into an absolute tick deadline. Negative means
/// wait indefinitely; zero is the caller's problem (poll) and never gets
/// here.
pub fn deadline_for(timeout_ns: i64, now: u64) -> Option<u64> {
    if timeout_ns < 0 {
        return None;
    }
    let ticks = (timeout_ns as u64).div_ceil(NS_PER_TICK).max(1);
    Some(now + ticks)
}

/// Timer-vector bookkeeping, run from the IRQ entry path before the
/// scheduler is invoked.
pub fn handle_timer_tick() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    crate::sched::wake_expired(now);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: i64) -> SubmitInfo {
        SubmitInfo::new(id, 0, 0)
    }

    #[test]
    fn fire_posts_once_per_subscriber_then_clears() {
        let relay = IrqRelay::new();
        let first = EventHub::new();
        let second = EventHub::new();
        relay.subscribe(first.clone(), info(42));
        relay.subscribe(second.clone(), info(43));

        relay.fire();
        assert_eq!(first.drain(4).len(), 1);
        assert_eq!(second.drain(4).len(), 1);
        assert_eq!(relay.subscriber_count(), 0);

        // A second fire without re-arming delivers nothing.
        relay.fire();
        assert!(first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn fired_event_carries_the_submit_info() {
        let relay = IrqRelay::new();
        let hub = EventHub::new();
        relay.subscribe(hub.clone(), SubmitInfo::new(42, 7, 9));

        relay.fire();
        let events = hub.drain(1);
        assert_eq!(events[0].info.async_id, 42);
        assert_eq!(events[0].info.submit_function, 7);
        assert_eq!(events[0].info.submit_object, 9);
        assert_eq!(events[0].error, HelError::Ok);
        assert_eq!(events[0].kind, EventKind::IrqFired);
    }

    #[test]
    fn deadline_conversion() {
        assert_eq!(deadline_for(-1, 100), None);
        // One millisecond rounds up to a full tick.
        assert_eq!(deadline_for(1_000_000, 100), Some(101));
        assert_eq!(deadline_for(25_000_000, 100), Some(103));
        assert_eq!(deadline_for(0, 100), Some(101));
    }
}
