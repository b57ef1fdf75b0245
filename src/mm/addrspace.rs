// Memory Objects and Address Spaces
//
// `Memory` is a kernel-owned sequence of physical 4 KiB frames, shared by
// descriptors and mappings; the frames go back to the physical allocator
// when the last owner drops. `AddressSpace` pairs a user page space with an
// ordered set of `Mapping`s keyed by base address.
//
// `allocate` finds a hole in the user area and records it; `allocate_at`
// fails on any overlap. Installing a `Memory` into a mapping maps every
// page user-read/write through the page space, and rolls all installed
// leaves back if any single step fails, so a mapping is either complete or
// absent.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch;
use crate::sync::IrqSpinlock;

use super::paging::{PageError, PageFlags, PageSpace};
use super::{physical, PhysicalAddr, PAGE_SIZE};

// User-area window the hole search covers. The init image sits below the
// search base, installed with `allocate_at`.
pub const USER_AREA_BASE: usize = 0x1_0000_0000;
pub const USER_AREA_END: usize = 0x0000_7FFF_FFFF_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpaceError {
    NoMemory,
    InvalidRegion,
    Overlap,
    NoSuchMapping,
}

impl core::fmt::Display for AddressSpaceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AddressSpaceError::NoMemory => write!(f, "Out of memory"),
            AddressSpaceError::InvalidRegion => write!(f, "Invalid region"),
            AddressSpaceError::Overlap => write!(f, "Region overlaps an existing mapping"),
            AddressSpaceError::NoSuchMapping => write!(f, "No mapping at this address"),
        }
    }
}

/// An owned sequence of physical frames exposed to user space via
/// mappings. Frames acquired through `resize` are returned on drop; frames
/// recorded with `add_page` belong to the boot image and are not.
#[derive(Debug)]
pub struct Memory {
    pages: IrqSpinlock<Vec<PhysicalAddr>>,
    owns_frames: bool,
}

impl Memory {
    pub fn new() -> Arc<Memory> {
        Arc::new(Memory {
            pages: IrqSpinlock::new(Vec::new()),
            owns_frames: true,
        })
    }

    /// A memory object over frames someone else owns (the initial-module
    /// trampoline).
    pub fn new_borrowed() -> Arc<Memory> {
        Arc::new(Memory {
            pages: IrqSpinlock::new(Vec::new()),
            owns_frames: false,
        })
    }

    /// Grows the object until it covers `length` bytes, rounded up to
    /// whole pages.
    pub fn resize(&self, length: usize) -> Result<(), AddressSpaceError> {
        let target = super::align_up(length) / PAGE_SIZE;
        let mut pages = self.pages.lock();
        while pages.len() < target {
            let frame = physical::allocate(PAGE_SIZE).ok_or(AddressSpaceError::NoMemory)?;
            pages.push(frame);
        }
        Ok(())
    }

    /// Appends a caller-provided frame.
    pub fn add_page(&self, frame: PhysicalAddr) {
        self.pages.lock().push(frame);
    }

    pub fn get_page(&self, index: usize) -> Option<PhysicalAddr> {
        self.pages.lock().get(index).copied()
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn length(&self) -> usize {
        self.page_count() * PAGE_SIZE
    }

    /// Zero-fills every frame through the identity window.
    ///
    /// # Safety
    /// The frames must not be mapped writable anywhere the caller is not
    /// prepared to see cleared.
    pub unsafe fn zero_fill(&self) {
        let pages = self.pages.lock();
        for &frame in pages.iter() {
            super::zero_frame(frame);
        }
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if !self.owns_frames {
            return;
        }
        let pages = self.pages.lock();
        for &frame in pages.iter() {
            physical::free(frame, PAGE_SIZE);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Hole,
    Memory,
}

/// A half-open virtual range `[base, base + size)` within one address
/// space.
#[derive(Debug)]
pub struct Mapping {
    pub base: usize,
    pub size: usize,
    pub kind: MappingKind,
    pub memory: Option<Arc<Memory>>,
}

struct AddressSpaceInner {
    mappings: BTreeMap<usize, Mapping>,
}

/// A user page table plus its mapping list. Shared-owned by the threads
/// that run in it.
pub struct AddressSpace {
    page_space: PageSpace,
    inner: IrqSpinlock<AddressSpaceInner>,
}

impl AddressSpace {
    pub fn new(page_space: PageSpace) -> Arc<AddressSpace> {
        Arc::new(AddressSpace {
            page_space,
            inner: IrqSpinlock::new(AddressSpaceInner {
                mappings: BTreeMap::new(),
            }),
        })
    }

    pub fn page_root(&self) -> PhysicalAddr {
        self.page_space.root()
    }

    /// Finds a hole of `size` bytes in the user area and records it.
    /// Returns the base address of the new mapping.
    pub fn allocate(&self, size: usize) -> Result<usize, AddressSpaceError> {
        let size = super::align_up(size);
        if size == 0 {
            return Err(AddressSpaceError::InvalidRegion);
        }

        let mut inner = self.inner.lock();
        let mut candidate = USER_AREA_BASE;
        for mapping in inner.mappings.values() {
            if mapping.base >= candidate + size {
                break;
            }
            let end = mapping.base + mapping.size;
            if end > candidate {
                candidate = end;
            }
        }
        if candidate + size > USER_AREA_END {
            return Err(AddressSpaceError::NoMemory);
        }

        inner.mappings.insert(
            candidate,
            Mapping {
                base: candidate,
                size,
                kind: MappingKind::Hole,
                memory: None,
            },
        );
        Ok(candidate)
    }

    /// Records a hole at a caller-chosen address; fails if any existing
    /// mapping overlaps the range.
    pub fn allocate_at(&self, addr: usize, size: usize) -> Result<usize, AddressSpaceError> {
        let size = super::align_up(size);
        if size == 0 || !super::is_page_aligned(addr) {
            return Err(AddressSpaceError::InvalidRegion);
        }
        let end = addr.checked_add(size).ok_or(AddressSpaceError::InvalidRegion)?;
        if end > USER_AREA_END {
            return Err(AddressSpaceError::InvalidRegion);
        }

        let mut inner = self.inner.lock();
        for mapping in inner.mappings.values() {
            let mapping_end = mapping.base + mapping.size;
            if addr < mapping_end && mapping.base < end {
                return Err(AddressSpaceError::Overlap);
            }
        }

        inner.mappings.insert(
            addr,
            Mapping {
                base: addr,
                size,
                kind: MappingKind::Hole,
                memory: None,
            },
        );
        Ok(addr)
    }

    /// Installs a single user-read/write leaf, forwarding to the page
    /// space.
    pub fn map_single_4k(&self, virt: usize, phys: PhysicalAddr) -> Result<(), PageError> {
        self.page_space
            .map_single_4k(virt, phys, PageFlags::user_rw())
    }

    /// Binds `memory` to the hole at `base`: every virtual page of the
    /// mapping ends up pointing at the memory's frame at the matching
    /// offset, user-read/write. Rolls back fully on partial failure.
    pub fn install_memory(
        &self,
        base: usize,
        memory: Arc<Memory>,
    ) -> Result<(), AddressSpaceError> {
        let size = {
            let inner = self.inner.lock();
            let mapping = inner
                .mappings
                .get(&base)
                .ok_or(AddressSpaceError::NoSuchMapping)?;
            if mapping.kind != MappingKind::Hole {
                return Err(AddressSpaceError::Overlap);
            }
            mapping.size
        };

        if memory.length() < size {
            return Err(AddressSpaceError::InvalidRegion);
        }

        for index in 0..size / PAGE_SIZE {
            let frame = memory.get_page(index).ok_or(AddressSpaceError::InvalidRegion)?;
            if let Err(error) = self.map_single_4k(base + index * PAGE_SIZE, frame) {
                // Tear down what is already installed and report the
                // failure; interior tables stay for future mappings.
                for installed in 0..index {
                    let _ = self.page_space.unmap_single_4k(base + installed * PAGE_SIZE);
                }
                arch::invalidate_tlb();
                return Err(match error {
                    PageError::NoMemory => AddressSpaceError::NoMemory,
                    _ => AddressSpaceError::Overlap,
                });
            }
        }
        arch::invalidate_tlb();

        let mut inner = self.inner.lock();
        if let Some(mapping) = inner.mappings.get_mut(&base) {
            mapping.kind = MappingKind::Memory;
            mapping.memory = Some(memory);
        }
        Ok(())
    }

    /// Drops a mapping record that never got memory installed. Used to
    /// roll a failed multi-step map back to a clean slate.
    pub fn remove_hole(&self, base: usize) -> Result<(), AddressSpaceError> {
        let mut inner = self.inner.lock();
        match inner.mappings.get(&base).map(|mapping| mapping.kind) {
            Some(MappingKind::Hole) => {
                inner.mappings.remove(&base);
                Ok(())
            }
            Some(MappingKind::Memory) => Err(AddressSpaceError::Overlap),
            None => Err(AddressSpaceError::NoSuchMapping),
        }
    }

    pub fn mapping_count(&self) -> usize {
        self.inner.lock().mappings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> Arc<AddressSpace> {
        AddressSpace::new(PageSpace::from_root(0))
    }

    #[test]
    fn allocate_returns_distinct_holes() {
        let space = space();
        let a = space.allocate(PAGE_SIZE).unwrap();
        let b = space.allocate(3 * PAGE_SIZE).unwrap();
        assert!(a + PAGE_SIZE <= b || b + 3 * PAGE_SIZE <= a);
        assert_eq!(space.mapping_count(), 2);
    }

    #[test]
    fn allocate_fills_gaps_in_base_order() {
        let space = space();
        let first = space.allocate(2 * PAGE_SIZE).unwrap();
        assert_eq!(first, USER_AREA_BASE);
        let second = space.allocate(PAGE_SIZE).unwrap();
        assert_eq!(second, USER_AREA_BASE + 2 * PAGE_SIZE);
    }

    #[test]
    fn allocate_at_rejects_overlap() {
        let space = space();
        space.allocate_at(0x4000_0000, 4 * PAGE_SIZE).unwrap();
        let err = space.allocate_at(0x4000_0000 + PAGE_SIZE, PAGE_SIZE);
        assert_eq!(err, Err(AddressSpaceError::Overlap));
        let before = space.allocate_at(0x4000_0000 - PAGE_SIZE, PAGE_SIZE);
        assert_eq!(before, Ok(0x4000_0000 - PAGE_SIZE));
    }

    #[test]
    fn allocate_avoids_pinned_regions() {
        let space = space();
        space
            .allocate_at(USER_AREA_BASE + PAGE_SIZE, PAGE_SIZE)
            .unwrap();
        let hole = space.allocate(2 * PAGE_SIZE).unwrap();
        assert!(hole >= USER_AREA_BASE + 2 * PAGE_SIZE);
    }

    #[test]
    fn allocate_rounds_to_pages() {
        let space = space();
        let a = space.allocate(1).unwrap();
        let b = space.allocate(1).unwrap();
        assert_eq!(b - a, PAGE_SIZE);
    }

    #[test]
    fn memory_pages_are_distinct_and_aligned() {
        crate::mm::physical::ensure_test_chunk();
        let memory = Memory::new();
        memory.resize(3 * PAGE_SIZE + 1).unwrap();
        assert_eq!(memory.page_count(), 4);
        assert_eq!(memory.length(), 4 * PAGE_SIZE);

        let mut seen = alloc::vec::Vec::new();
        for index in 0..memory.page_count() {
            let frame = memory.get_page(index).unwrap();
            assert_eq!(frame % PAGE_SIZE as u64, 0);
            assert!(!seen.contains(&frame));
            seen.push(frame);
        }
        assert!(memory.get_page(4).is_none());
    }
}
