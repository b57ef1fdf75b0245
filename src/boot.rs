// Boot Path
//
// Eir hands over one physical address pointing at a handoff record: the
// bootstrap physical range the kernel may own, plus an array of module
// descriptors. Module 0 is the init executable (ET_DYN, loaded at
// 0x4000_0000); module 1 is an opaque program image handed to init as a
// memory-access handle in its argument register.
//
// `thor_main` brings the subsystems up in strict order, builds the init
// universe, address space, stack and thread, and enters the dispatcher.
// The trap, IRQ and fault entry points the assembly stubs call also live
// here.

use alloc::sync::Arc;
use core::sync::atomic::AtomicU64;

use crate::mm::addrspace::{AddressSpace, Memory};
use crate::mm::paging;
use crate::mm::{self, phys_to_virt, PhysicalAddr, PAGE_SIZE};
use crate::thread::{self, Thread};
use crate::universe::{AnyDescriptor, MemoryAccessDescriptor, Universe};
use crate::{arch, irq, log_info, sched, serial};

const LOG_ORIGIN: &str = "boot";

/// Base the position-independent init image is loaded at.
const INIT_LOAD_BASE: usize = 0x4000_0000;

/// User stack handed to the init thread.
const INIT_STACK_SIZE: usize = 0x20_0000;

/// Kernel stack the trap stubs switch to on entry.
const KERNEL_STACK_SIZE: usize = 0x4000;

/// Handoff record Eir leaves in memory, reachable over the identity
/// window.
#[repr(C)]
pub struct EirInfo {
    pub bootstrap_physical: u64,
    pub bootstrap_length: u64,
    pub num_modules: u64,
    pub module_info: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct EirModule {
    pub physical_base: u64,
    pub length: u64,
}

// Minimal ELF64 view, just enough to walk the init image's load segments.
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ET_DYN: u16 = 3;
const PT_LOAD: u32 = 1;

#[repr(C)]
#[allow(dead_code)]
struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[allow(dead_code)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

/// Stack top the entry stubs load on every trap from user mode.
#[no_mangle]
pub static THOR_RT_KERNEL_STACK_TOP: AtomicU64 = AtomicU64::new(0);

/// Maps the init image into the given address space and returns its entry
/// address. The image stays pristine; every load segment is copied into
/// fresh kernel-owned frames.
unsafe fn load_init_image(
    space: &Arc<AddressSpace>,
    image_base: PhysicalAddr,
) -> usize {
    let image = phys_to_virt(image_base) as *const u8;
    let ehdr = &*(image as *const Elf64Ehdr);
    assert!(ehdr.e_ident[..4] == ELF_MAGIC, "init module is not an ELF image");
    assert!(ehdr.e_type == ET_DYN, "init module must be relocatable");

    for segment in 0..ehdr.e_phnum as usize {
        let phdr = &*(image.add(ehdr.e_phoff as usize + segment * ehdr.e_phentsize as usize)
            as *const Elf64Phdr);
        if phdr.p_type != PT_LOAD || phdr.p_memsz == 0 {
            continue;
        }

        let bottom_page = phdr.p_vaddr as usize / PAGE_SIZE;
        let top = phdr.p_vaddr as usize + phdr.p_memsz as usize;
        let num_pages = top.div_ceil(PAGE_SIZE) - bottom_page;

        let base = space
            .allocate_at(INIT_LOAD_BASE + bottom_page * PAGE_SIZE, num_pages * PAGE_SIZE)
            .expect("init segments overlap");

        let memory = Memory::new();
        memory
            .resize(num_pages * PAGE_SIZE)
            .expect("no frames for the init image");
        memory.zero_fill();

        // Copy the file contents frame by frame, honoring the segment's
        // offset within its first page.
        let mut copied = 0usize;
        while copied < phdr.p_filesz as usize {
            let virt = phdr.p_vaddr as usize + copied;
            let page = virt / PAGE_SIZE - bottom_page;
            let page_offset = virt % PAGE_SIZE;
            let chunk = (PAGE_SIZE - page_offset).min(phdr.p_filesz as usize - copied);

            let frame = memory.get_page(page).expect("segment page out of range");
            core::ptr::copy_nonoverlapping(
                image.add(phdr.p_offset as usize + copied),
                phys_to_virt(frame).add(page_offset),
                chunk,
            );
            copied += chunk;
        }

        space
            .install_memory(base, memory)
            .expect("failed to map an init segment");
    }
    arch::invalidate_tlb();

    INIT_LOAD_BASE + ehdr.e_entry as usize
}

/// Kernel entry, reached from the boot stub with the physical address of
/// the Eir handoff record. Never returns; ends in the dispatcher.
#[no_mangle]
pub unsafe extern "C" fn thor_main(info_paddr: u64) -> ! {
    serial::init();
    crate::log::init();
    log_info!(LOG_ORIGIN, "Starting Thor");

    let info = &*(phys_to_virt(info_paddr) as *const EirInfo);
    log_info!(
        LOG_ORIGIN,
        "Bootstrap memory at {:#x}, length {} KiB",
        info.bootstrap_physical,
        info.bootstrap_length / 1024
    );

    mm::init(info.bootstrap_physical, info.bootstrap_length as usize);

    let kernel_stack = mm::kvirt::map(KERNEL_STACK_SIZE).expect("no kernel stack");
    THOR_RT_KERNEL_STACK_TOP.store(
        (kernel_stack + KERNEL_STACK_SIZE) as u64,
        core::sync::atomic::Ordering::Release,
    );

    // The init process gets a page space sharing the kernel half and an
    // empty user half.
    let user_space = paging::kernel_space()
        .clone()
        .expect("no frames for the init page space");
    user_space.switch_to();
    arch::invalidate_tlb();

    let universe = Universe::new();
    let address_space = AddressSpace::new(user_space);

    assert!(info.num_modules >= 2, "boot requires init and program modules");
    let modules = core::slice::from_raw_parts(
        phys_to_virt(info.module_info) as *const EirModule,
        info.num_modules as usize,
    );

    let entry = load_init_image(&address_space, modules[0].physical_base);
    log_info!(LOG_ORIGIN, "Init image loaded, entry at {:#x}", entry);

    let stack_memory = Memory::new();
    stack_memory
        .resize(INIT_STACK_SIZE)
        .expect("no frames for the init stack");
    stack_memory.zero_fill();
    let stack_base = address_space
        .allocate(INIT_STACK_SIZE)
        .expect("no room for the init stack");
    address_space
        .install_memory(stack_base, stack_memory)
        .expect("failed to map the init stack");

    // Module 1 rides along as init's first capability.
    let program_memory = Memory::new_borrowed();
    let mut offset = 0;
    while offset < modules[1].length {
        program_memory.add_page(modules[1].physical_base + offset);
        offset += PAGE_SIZE as u64;
    }
    let program_handle = universe.attach(AnyDescriptor::MemoryAccess(MemoryAccessDescriptor {
        memory: program_memory,
    }));

    let init_thread = Thread::new(
        entry as u64,
        program_handle.raw(),
        (stack_base + INIT_STACK_SIZE) as u64,
        universe,
        address_space,
    );
    thread::register(init_thread.clone());
    sched::enqueue(init_thread);

    log_info!(LOG_ORIGIN, "Handing over to the dispatcher");
    sched::schedule();
}

/// Hardware-interrupt entry, reached from the IRQ stubs after the
/// interrupted context is saved. Vector 0 is the timer and drives
/// preemption; every other vector fully returns to the interrupted
/// context after the relay fires.
#[no_mangle]
pub extern "C" fn thor_irq(vector: u64) -> ! {
    let vector = vector as u8;
    arch::acknowledge_irq(vector);
    irq::fire(vector);

    if vector == irq::TIMER_VECTOR {
        irq::handle_timer_tick();
        sched::schedule();
    }

    unsafe { thread::enter_user(thread::active_context()) }
}

fn halt_forever() -> ! {
    arch::disable_irqs();
    loop {
        arch::halt();
    }
}

/// Double faults leave nothing to trust; log and stop the CPU.
#[no_mangle]
pub extern "C" fn thor_double_fault() -> ! {
    crate::log_panic!("fault", "Double fault");
    halt_forever();
}

/// A page fault in kernel code is always a kernel bug.
#[no_mangle]
pub extern "C" fn thor_kernel_page_fault(address: u64, fault_ip: u64, error: u64) -> ! {
    crate::log_panic!(
        "fault",
        "Kernel page fault at {:#x}, faulting ip {:#x}, error {:#x}",
        address,
        fault_ip,
        error
    );
    halt_forever();
}

/// User page faults are fatal in this iteration: there is no demand
/// paging to satisfy them.
#[no_mangle]
pub extern "C" fn thor_user_page_fault(address: u64, error: u64) -> ! {
    let fault_ip = crate::sync::without_irqs(|| unsafe {
        let context = thread::active_context();
        if context.is_null() {
            0
        } else {
            (*context).rip
        }
    });
    crate::log_panic!(
        "fault",
        "User page fault at {:#x}, faulting ip {:#x}, error {:#x}",
        address,
        fault_ip,
        error
    );
    halt_forever();
}
