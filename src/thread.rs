// Thread Control Blocks
//
// A thread is the schedulable entity: its saved register state, shared
// references to the Universe and AddressSpace it runs in, and a state
// machine {Ready, Running, Blocked, Exited}. State transitions happen only
// inside the scheduler and the blocking primitives.
//
// The saved `CpuContext` doubles as the trap-frame area: the assembly
// entry stubs save the interrupted user state into the context published
// through `THOR_RT_ACTIVE_CONTEXT`, and `enter_user` resumes from it. The
// layout below is part of that stub contract. Syscall result words travel
// back in rdi, rsi and rdx.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::mm::addrspace::AddressSpace;
use crate::sync::IrqSpinlock;
use crate::universe::Universe;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x1B;
pub const USER_DATA_SELECTOR: u16 = 0x23;

const RFLAGS_INTERRUPTS_ENABLED: u64 = 1 << 9;
const RFLAGS_IOPL_RING3: u64 = 3 << 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ThreadId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(value: u64) -> Self {
        ThreadId(value)
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full architectural register snapshot. `#[repr(C)]` with this exact
/// field order; the entry stubs and `thor_rt_enter_user` address fields by
/// offset.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u16,
    pub ss: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub cr3: u64,
}

impl CpuContext {
    pub const fn zero() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            rsp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
            cr3: 0,
        }
    }

    /// Ring-3 entry state: instruction pointer at `entry`, the argument in
    /// the first argument register, stack pointer at `stack`, interrupts
    /// on.
    pub fn new_user(entry: u64, argument: u64, stack: u64, page_root: u64) -> Self {
        let mut context = Self::zero();
        context.rip = entry;
        context.rdi = argument;
        context.rsp = stack;
        context.rflags = RFLAGS_INTERRUPTS_ENABLED;
        context.cs = USER_CODE_SELECTOR;
        context.ss = USER_DATA_SELECTOR;
        context.ds = USER_DATA_SELECTOR;
        context.es = USER_DATA_SELECTOR;
        context.fs = USER_DATA_SELECTOR;
        context.gs = USER_DATA_SELECTOR;
        context.cr3 = page_root;
        context
    }
}

// The context is written from trap entry (IRQs off, single CPU) and read
// by the scheduler under the same discipline, which is what makes the
// unguarded cell sound.
struct ContextCell(UnsafeCell<CpuContext>);

unsafe impl Sync for ContextCell {}

/// A schedulable entity sharing its process's Universe and AddressSpace.
pub struct Thread {
    id: ThreadId,
    state: IrqSpinlock<ThreadState>,
    context: ContextCell,
    universe: Arc<Universe>,
    address_space: Arc<AddressSpace>,
}

impl Thread {
    pub fn new(
        entry: u64,
        argument: u64,
        stack: u64,
        universe: Arc<Universe>,
        address_space: Arc<AddressSpace>,
    ) -> Arc<Thread> {
        let context = CpuContext::new_user(entry, argument, stack, address_space.page_root());
        Arc::new(Thread {
            id: ThreadId::new(),
            state: IrqSpinlock::new(ThreadState::Ready),
            context: ContextCell(UnsafeCell::new(context)),
            universe,
            address_space,
        })
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.address_space
    }

    pub fn context_ptr(&self) -> *mut CpuContext {
        self.context.0.get()
    }

    /// Stores syscall result words into the saved register state, so they
    /// materialize when the thread resumes in user mode.
    pub fn set_syscall_result(&self, w0: u64, w1: u64, w2: u64) {
        crate::sync::without_irqs(|| unsafe {
            let context = &mut *self.context_ptr();
            context.rdi = w0;
            context.rsi = w1;
            context.rdx = w2;
        });
    }

    /// Grants ring-3 port access by raising IOPL in the saved flags.
    pub fn enable_io(&self) {
        crate::sync::without_irqs(|| unsafe {
            (*self.context_ptr()).rflags |= RFLAGS_IOPL_RING3;
        });
    }
}

// Global thread registry, so wakeups can resolve a ThreadId back to its
// control block.
static THREADS: IrqSpinlock<BTreeMap<u64, Arc<Thread>>> = IrqSpinlock::new(BTreeMap::new());

pub fn register(thread: Arc<Thread>) {
    THREADS.lock().insert(thread.id().raw(), thread);
}

pub fn lookup(id: ThreadId) -> Option<Arc<Thread>> {
    THREADS.lock().get(&id.raw()).cloned()
}

pub fn unregister(id: ThreadId) -> Option<Arc<Thread>> {
    THREADS.lock().remove(&id.raw())
}

/// Context area the trap stubs save into and restore from; the scheduler
/// repoints it at the running thread.
#[no_mangle]
pub static THOR_RT_ACTIVE_CONTEXT: AtomicPtr<CpuContext> =
    AtomicPtr::new(core::ptr::null_mut());

pub fn set_active_context(context: *mut CpuContext) {
    THOR_RT_ACTIVE_CONTEXT.store(context, Ordering::Release);
}

pub fn active_context() -> *mut CpuContext {
    THOR_RT_ACTIVE_CONTEXT.load(Ordering::Acquire)
}

#[cfg(all(target_arch = "x86_64", not(test)))]
core::arch::global_asm!(
    // Restores a full CpuContext (pointer in rdi) and drops to its ring
    // through iretq. Field offsets match the #[repr(C)] layout above.
    r#"
    .global thor_rt_enter_user
    thor_rt_enter_user:
        mov ax, [rdi + 148]
        mov ds, ax
        mov ax, [rdi + 150]
        mov es, ax

        movzx rax, word ptr [rdi + 146]
        push rax
        push qword ptr [rdi + 56]
        push qword ptr [rdi + 136]
        movzx rax, word ptr [rdi + 144]
        push rax
        push qword ptr [rdi + 128]

        mov rax, [rdi + 0]
        mov rbx, [rdi + 8]
        mov rcx, [rdi + 16]
        mov rdx, [rdi + 24]
        mov rsi, [rdi + 32]
        mov rbp, [rdi + 48]
        mov r8,  [rdi + 64]
        mov r9,  [rdi + 72]
        mov r10, [rdi + 80]
        mov r11, [rdi + 88]
        mov r12, [rdi + 96]
        mov r13, [rdi + 104]
        mov r14, [rdi + 112]
        mov r15, [rdi + 120]
        mov rdi, [rdi + 40]
        iretq
    "#
);

#[cfg(all(target_arch = "x86_64", not(test)))]
extern "C" {
    fn thor_rt_enter_user(context: *const CpuContext) -> !;
}

/// Trap-returns into the given saved state. Never returns; the next entry
/// into the kernel is a trap from that context.
pub unsafe fn enter_user(context: *const CpuContext) -> ! {
    #[cfg(all(target_arch = "x86_64", not(test)))]
    {
        thor_rt_enter_user(context)
    }

    #[cfg(not(all(target_arch = "x86_64", not(test))))]
    {
        let _ = context;
        unreachable!("trap return needs the x86_64 entry stubs");
    }
}
