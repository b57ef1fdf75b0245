// Universe (Capability Table)
//
// A `Universe` is the per-process mapping from opaque handles to
// descriptors. Descriptors are the kernel-side capabilities: their variant
// determines which operations a handle admits, and each one exclusively
// owns a shared reference to the underlying object.
//
// Handle rules:
// - Handles are process-local, unforgeable integers
// - 0 is the null handle and is never issued
// - Numbering starts at 1 and is strictly monotonic; a freed value is
//   never reissued
//
// An `AnyDescriptor`'s variant never changes after construction; moves
// transfer ownership, not identity. Closing a handle detaches the entry
// and drops its reference, which releases the underlying object when the
// last owner goes away.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::ipc::{BiDirectionPipe, Server};
use crate::event::EventHub;
use crate::mm::addrspace::Memory;
use crate::sync::IrqSpinlock;
use crate::thread::Thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub const fn from_raw(value: u64) -> Self {
        Handle(value)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl core::fmt::Display for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "handle:{}", self.0)
    }
}

#[derive(Clone)]
pub struct MemoryAccessDescriptor {
    pub memory: Arc<Memory>,
}

/// Reads from the pipe's first channel, writes to the second.
#[derive(Clone)]
pub struct BiDirectionFirstDescriptor {
    pub pipe: Arc<BiDirectionPipe>,
}

/// Reads from the pipe's second channel, writes to the first.
#[derive(Clone)]
pub struct BiDirectionSecondDescriptor {
    pub pipe: Arc<BiDirectionPipe>,
}

#[derive(Clone)]
pub struct ServerDescriptor {
    pub server: Arc<Server>,
}

#[derive(Clone)]
pub struct ClientDescriptor {
    pub server: Arc<Server>,
}

#[derive(Clone)]
pub struct EventHubDescriptor {
    pub hub: Arc<EventHub>,
}

#[derive(Clone)]
pub struct IrqDescriptor {
    pub vector: u8,
}

#[derive(Clone)]
pub struct IoDescriptor {
    pub ports: Vec<u16>,
}

#[derive(Clone)]
pub struct ThreadDescriptor {
    pub thread: Arc<Thread>,
}

/// The tagged sum of every capability kind. Adding a kind means extending
/// this enum, its constructor sites and the syscall dispatcher arms.
#[derive(Clone)]
pub enum AnyDescriptor {
    MemoryAccess(MemoryAccessDescriptor),
    BiDirectionFirst(BiDirectionFirstDescriptor),
    BiDirectionSecond(BiDirectionSecondDescriptor),
    Server(ServerDescriptor),
    Client(ClientDescriptor),
    EventHub(EventHubDescriptor),
    Irq(IrqDescriptor),
    Io(IoDescriptor),
    Thread(ThreadDescriptor),
}

impl AnyDescriptor {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AnyDescriptor::MemoryAccess(_) => "memory-access",
            AnyDescriptor::BiDirectionFirst(_) => "bidir-first",
            AnyDescriptor::BiDirectionSecond(_) => "bidir-second",
            AnyDescriptor::Server(_) => "server",
            AnyDescriptor::Client(_) => "client",
            AnyDescriptor::EventHub(_) => "event-hub",
            AnyDescriptor::Irq(_) => "irq",
            AnyDescriptor::Io(_) => "io",
            AnyDescriptor::Thread(_) => "thread",
        }
    }
}

struct UniverseInner {
    descriptors: BTreeMap<u64, AnyDescriptor>,
    next_handle: u64,
}

/// Per-process handle table. Shared-owned by the threads of the process.
pub struct Universe {
    inner: IrqSpinlock<UniverseInner>,
}

impl Universe {
    pub fn new() -> Arc<Universe> {
        Arc::new(Universe {
            inner: IrqSpinlock::new(UniverseInner {
                descriptors: BTreeMap::new(),
                next_handle: 1,
            }),
        })
    }

    /// Inserts a descriptor at the next handle and returns it.
    pub fn attach(&self, descriptor: AnyDescriptor) -> Handle {
        let mut inner = self.inner.lock();
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.descriptors.insert(handle, descriptor);
        Handle::from_raw(handle)
    }

    /// Looks a handle up. The returned descriptor shares ownership of the
    /// underlying object with the table entry.
    pub fn get(&self, handle: Handle) -> Option<AnyDescriptor> {
        self.inner.lock().descriptors.get(&handle.raw()).cloned()
    }

    /// Removes a handle and returns its descriptor. The handle value is
    /// retired for good.
    pub fn detach(&self, handle: Handle) -> Option<AnyDescriptor> {
        self.inner.lock().descriptors.remove(&handle.raw())
    }

    pub fn descriptor_count(&self) -> usize {
        self.inner.lock().descriptors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn irq_descriptor(vector: u8) -> AnyDescriptor {
        AnyDescriptor::Irq(IrqDescriptor { vector })
    }

    #[test]
    fn handles_start_at_one_and_increase() {
        let universe = Universe::new();
        let first = universe.attach(irq_descriptor(1));
        let second = universe.attach(irq_descriptor(2));
        assert_eq!(first.raw(), 1);
        assert_eq!(second.raw(), 2);
        assert!(!first.is_null());
    }

    #[test]
    fn get_resolves_live_handles_only() {
        let universe = Universe::new();
        let handle = universe.attach(irq_descriptor(5));

        match universe.get(handle) {
            Some(AnyDescriptor::Irq(descriptor)) => assert_eq!(descriptor.vector, 5),
            _ => panic!("expected an irq descriptor"),
        }

        assert!(universe.get(Handle::from_raw(99)).is_none());
        assert!(universe.get(Handle::NULL).is_none());
    }

    #[test]
    fn detach_removes_and_returns() {
        let universe = Universe::new();
        let handle = universe.attach(irq_descriptor(3));
        assert!(universe.detach(handle).is_some());
        assert!(universe.get(handle).is_none());
        assert!(universe.detach(handle).is_none());
    }

    #[test]
    fn freed_handles_are_never_reissued() {
        let universe = Universe::new();
        let mut issued = alloc::vec::Vec::new();
        for vector in 0..10u8 {
            issued.push(universe.attach(irq_descriptor(vector)));
        }

        // Close the odd-indexed ones, then attach once more.
        for (index, handle) in issued.iter().enumerate() {
            if index % 2 == 1 {
                universe.detach(*handle);
            }
        }
        let fresh = universe.attach(irq_descriptor(42));
        assert!(issued.iter().all(|h| fresh.raw() > h.raw()));
    }

    #[test]
    fn variants_keep_their_identity() {
        let universe = Universe::new();
        let handle = universe.attach(AnyDescriptor::Io(IoDescriptor {
            ports: alloc::vec![0x60, 0x64],
        }));
        let descriptor = universe.get(handle).unwrap();
        assert_eq!(descriptor.kind_name(), "io");
    }
}
