// Kernel Heap Allocator
//
// `GlobalAlloc` facade over the kernel virtual window: every allocation is
// rounded up to whole pages, reserved and backed through `kvirt::map`, and
// fully released again on dealloc. Simple, page-granular and free of
// internal fragmentation bookkeeping.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::log_info;

use super::{align_up, kvirt, PAGE_SIZE};

static BYTES_LIVE: AtomicUsize = AtomicUsize::new(0);

pub struct KernelAllocator;

pub fn init() {
    log_info!("heap", "Kernel heap active over the virtual window");
}

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            return null_mut();
        }

        let length = align_up(layout.size().max(1));
        match kvirt::map(length) {
            Some(addr) => {
                BYTES_LIVE.fetch_add(length, Ordering::Relaxed);
                addr as *mut u8
            }
            None => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let length = align_up(layout.size().max(1));
        kvirt::unmap(ptr as usize, length);
        BYTES_LIVE.fetch_sub(length, Ordering::Relaxed);
    }
}

#[allow(dead_code)]
pub fn bytes_live() -> usize {
    BYTES_LIVE.load(Ordering::Relaxed)
}
