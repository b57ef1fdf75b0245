// Hel Syscall Interface
//
// The boundary between user threads and the kernel objects they hold
// handles to. The entry stub saves the trapping thread's registers into
// the active context and calls `thor_syscall` with the call index and up
// to nine word-sized arguments; the dispatcher resolves handle arguments
// through the current thread's universe, performs the operation and
// returns one to three result words by writing them into the saved state
// and trap-returning.
//
// User-originated errors never panic the kernel: bad handles, wrong
// descriptor kinds, out-of-range vectors and unbackable buffers all come
// back as error words. An unknown call index is a kernel bug upstream of
// this table and is fatal.
//
// Asynchronous calls (`SubmitRecvString`, `SubmitAccept`, `SubmitConnect`,
// `SubmitWaitForIrq`) return as soon as the submission is parked; the
// completion arrives later through the nominated event hub. A caller may
// pass 0 as its async id to have the kernel assign a fresh one.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::event::{alloc_async_id, Event, EventHub, EventKind, SubmitInfo, WaitRecord};
use crate::ipc::{BiDirectionPipe, Server, CHANNEL_FIRST, CHANNEL_SECOND};
use crate::mm::addrspace::{AddressSpaceError, Memory};
use crate::sched;
use crate::thread::{self, Thread};
use crate::uaccess::{self, UserPtr};
use crate::universe::{
    AnyDescriptor, BiDirectionFirstDescriptor, BiDirectionSecondDescriptor, ClientDescriptor,
    EventHubDescriptor, Handle, IoDescriptor, IrqDescriptor, MemoryAccessDescriptor,
    ServerDescriptor, ThreadDescriptor, Universe,
};
use crate::{irq, log_debug, log_info};

const LOG_ORIGIN: &str = "hel";

pub const CALL_LOG: u64 = 1;
pub const CALL_PANIC: u64 = 2;
pub const CALL_CLOSE_DESCRIPTOR: u64 = 3;
pub const CALL_ALLOCATE_MEMORY: u64 = 4;
pub const CALL_MAP_MEMORY: u64 = 5;
pub const CALL_MEMORY_INFO: u64 = 6;
pub const CALL_CREATE_THREAD: u64 = 7;
pub const CALL_EXIT_THIS_THREAD: u64 = 8;
pub const CALL_CREATE_EVENT_HUB: u64 = 9;
pub const CALL_WAIT_FOR_EVENTS: u64 = 10;
pub const CALL_CREATE_BI_DIRECTION_PIPE: u64 = 11;
pub const CALL_SEND_STRING: u64 = 12;
pub const CALL_SUBMIT_RECV_STRING: u64 = 13;
pub const CALL_CREATE_SERVER: u64 = 14;
pub const CALL_SUBMIT_ACCEPT: u64 = 15;
pub const CALL_SUBMIT_CONNECT: u64 = 16;
pub const CALL_ACCESS_IRQ: u64 = 17;
pub const CALL_SUBMIT_WAIT_FOR_IRQ: u64 = 18;
pub const CALL_ACCESS_IO: u64 = 19;
pub const CALL_ENABLE_IO: u64 = 20;

/// User-visible error taxonomy, returned as the first result word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum HelError {
    Ok = 0,
    IllegalSyscall = 1,
    IllegalHandle = 2,
    NoSuchObject = 3,
    NoMemory = 4,
    BufferTooSmall = 5,
    BadDescriptor = 6,
    Timeout = 7,
    Dismissed = 8,
    Fault = 9,
}

impl HelError {
    pub const fn word(self) -> u64 {
        self as u64
    }
}

impl core::fmt::Display for HelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HelError::Ok => write!(f, "Ok"),
            HelError::IllegalSyscall => write!(f, "Illegal syscall"),
            HelError::IllegalHandle => write!(f, "Illegal handle"),
            HelError::NoSuchObject => write!(f, "No such object"),
            HelError::NoMemory => write!(f, "Out of memory"),
            HelError::BufferTooSmall => write!(f, "Buffer too small"),
            HelError::BadDescriptor => write!(f, "Bad descriptor"),
            HelError::Timeout => write!(f, "Timed out"),
            HelError::Dismissed => write!(f, "Dismissed"),
            HelError::Fault => write!(f, "Fault"),
        }
    }
}

pub const EVENT_NONE: u64 = 0;
pub const EVENT_RECV_STRING: u64 = 1;
pub const EVENT_ACCEPT: u64 = 2;
pub const EVENT_CONNECT: u64 = 3;
pub const EVENT_IRQ: u64 = 4;

/// Wire layout of one completion event as delivered to user space.
/// Unused fields are zero.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HelEvent {
    pub kind: u64,
    pub error: u64,
    pub async_id: i64,
    pub submit_function: u64,
    pub submit_object: u64,
    pub length: u64,
    pub msg_request: i64,
    pub msg_seq: i64,
    pub handle: u64,
}

impl HelEvent {
    pub const fn zeroed() -> HelEvent {
        HelEvent {
            kind: EVENT_NONE,
            error: 0,
            async_id: 0,
            submit_function: 0,
            submit_object: 0,
            length: 0,
            msg_request: 0,
            msg_seq: 0,
            handle: 0,
        }
    }

    fn from_event(event: &Event) -> HelEvent {
        HelEvent {
            kind: match event.kind {
                EventKind::RecvString => EVENT_RECV_STRING,
                EventKind::Accept => EVENT_ACCEPT,
                EventKind::Connect => EVENT_CONNECT,
                EventKind::IrqFired => EVENT_IRQ,
            },
            error: event.error.word(),
            async_id: event.info.async_id,
            submit_function: event.info.submit_function,
            submit_object: event.info.submit_object,
            length: event.length as u64,
            msg_request: event.msg_request,
            msg_seq: event.msg_seq,
            handle: event.handle.raw(),
        }
    }
}

fn current_thread() -> Result<Arc<Thread>, HelError> {
    sched::current_thread().ok_or(HelError::IllegalSyscall)
}

fn current_universe() -> Result<Arc<Universe>, HelError> {
    Ok(current_thread()?.universe().clone())
}

fn get_descriptor(handle: Handle) -> Result<AnyDescriptor, HelError> {
    current_universe()?
        .get(handle)
        .ok_or(HelError::IllegalHandle)
}

fn get_hub(handle: Handle) -> Result<Arc<EventHub>, HelError> {
    match get_descriptor(handle)? {
        AnyDescriptor::EventHub(EventHubDescriptor { hub }) => Ok(hub),
        _ => Err(HelError::BadDescriptor),
    }
}

/// Resolves a pipe-endpoint handle into the pipe plus the channels this
/// endpoint reads and writes. The first descriptor reads the first
/// channel and writes the second; the second mirrors.
fn get_pipe_endpoint(handle: Handle) -> Result<(Arc<BiDirectionPipe>, usize, usize), HelError> {
    match get_descriptor(handle)? {
        AnyDescriptor::BiDirectionFirst(BiDirectionFirstDescriptor { pipe }) => {
            Ok((pipe, CHANNEL_FIRST, CHANNEL_SECOND))
        }
        AnyDescriptor::BiDirectionSecond(BiDirectionSecondDescriptor { pipe }) => {
            Ok((pipe, CHANNEL_SECOND, CHANNEL_FIRST))
        }
        _ => Err(HelError::BadDescriptor),
    }
}

fn submit_info(async_id: i64, submit_function: u64, submit_object: u64) -> SubmitInfo {
    let async_id = if async_id == 0 {
        alloc_async_id()
    } else {
        async_id
    };
    SubmitInfo::new(async_id, submit_function, submit_object)
}

// --------------------------------------------------------
// Operations
// --------------------------------------------------------

pub fn hel_log(ptr: UserPtr, length: usize) -> HelError {
    const MAX_LOG_LENGTH: usize = 4096;
    if length > MAX_LOG_LENGTH {
        return HelError::BufferTooSmall;
    }

    let buffer = match uaccess::copy_from_user(ptr, length) {
        Ok(buffer) => buffer,
        Err(error) => return error,
    };

    if let Ok(text) = core::str::from_utf8(&buffer) {
        log_info!("user", "{}", text);
    } else {
        log_info!("user", "{} bytes of non-utf8 output", length);
    }
    HelError::Ok
}

pub fn hel_close_descriptor(handle: Handle) -> HelError {
    let universe = match current_universe() {
        Ok(universe) => universe,
        Err(error) => return error,
    };
    let descriptor = match universe.detach(handle) {
        Some(descriptor) => descriptor,
        None => return HelError::IllegalHandle,
    };

    // Submissions still parked behind the closed endpoint fail with
    // Dismissed completions.
    match descriptor {
        AnyDescriptor::BiDirectionFirst(BiDirectionFirstDescriptor { pipe }) => {
            pipe.dismiss_channel(CHANNEL_FIRST);
        }
        AnyDescriptor::BiDirectionSecond(BiDirectionSecondDescriptor { pipe }) => {
            pipe.dismiss_channel(CHANNEL_SECOND);
        }
        AnyDescriptor::Server(ServerDescriptor { server }) => {
            server.dismiss_accepts();
        }
        AnyDescriptor::Client(ClientDescriptor { server }) => {
            server.dismiss_connects();
        }
        AnyDescriptor::EventHub(EventHubDescriptor { hub }) => {
            for record in hub.take_all_waiters() {
                finish_wait_status(record, HelError::Dismissed, &[]);
            }
        }
        _ => {}
    }
    HelError::Ok
}

pub fn hel_allocate_memory(size: usize) -> Result<Handle, HelError> {
    let memory = Memory::new();
    memory.resize(size).map_err(|_| HelError::NoMemory)?;
    unsafe {
        // Fresh user memory must not leak previous frame contents.
        memory.zero_fill();
    }
    Ok(current_universe()?.attach(AnyDescriptor::MemoryAccess(MemoryAccessDescriptor { memory })))
}

pub fn hel_map_memory(handle: Handle, address: usize, size: usize) -> Result<usize, HelError> {
    let memory = match get_descriptor(handle)? {
        AnyDescriptor::MemoryAccess(MemoryAccessDescriptor { memory }) => memory,
        _ => return Err(HelError::BadDescriptor),
    };

    let space = current_thread()?.address_space().clone();
    let base = if address == 0 {
        space.allocate(size)
    } else {
        space.allocate_at(address, size)
    }
    .map_err(map_address_space_error)?;

    if let Err(error) = space.install_memory(base, memory) {
        let _ = space.remove_hole(base);
        return Err(map_address_space_error(error));
    }
    Ok(base)
}

fn map_address_space_error(error: AddressSpaceError) -> HelError {
    match error {
        AddressSpaceError::NoMemory => HelError::NoMemory,
        AddressSpaceError::InvalidRegion
        | AddressSpaceError::Overlap
        | AddressSpaceError::NoSuchMapping => HelError::Fault,
    }
}

pub fn hel_memory_info(handle: Handle) -> Result<usize, HelError> {
    match get_descriptor(handle)? {
        AnyDescriptor::MemoryAccess(MemoryAccessDescriptor { memory }) => Ok(memory.length()),
        _ => Err(HelError::BadDescriptor),
    }
}

pub fn hel_create_thread(entry: u64, argument: u64, stack: u64) -> Result<Handle, HelError> {
    let current = current_thread()?;
    let thread = Thread::new(
        entry,
        argument,
        stack,
        current.universe().clone(),
        current.address_space().clone(),
    );
    thread::register(thread.clone());
    sched::enqueue(thread.clone());
    Ok(current.universe().attach(AnyDescriptor::Thread(ThreadDescriptor { thread })))
}

pub fn hel_create_event_hub() -> Result<Handle, HelError> {
    let hub = EventHub::new();
    Ok(current_universe()?.attach(AnyDescriptor::EventHub(EventHubDescriptor { hub })))
}

/// What the dispatcher should do after `hel_wait_for_events`: either the
/// results are already written and the call returns, or the thread has
/// been parked and the dispatcher must hand the CPU away.
pub enum WaitOutcome {
    Ready(usize),
    Parked,
}

pub fn hel_wait_for_events(
    hub_handle: Handle,
    buffer: UserPtr,
    capacity: usize,
    timeout_ns: i64,
) -> Result<WaitOutcome, HelError> {
    let hub = get_hub(hub_handle)?;

    // A zero timeout polls: drain whatever is there and return.
    if timeout_ns == 0 {
        let events = hub.drain(capacity);
        let count = write_events(buffer, &events)?;
        return Ok(WaitOutcome::Ready(count));
    }

    let current = current_thread()?;
    let record = WaitRecord {
        thread: current.id(),
        buffer,
        capacity,
    };

    match hub.wait_or_park(record) {
        Some(events) => {
            let count = write_events(buffer, &events)?;
            Ok(WaitOutcome::Ready(count))
        }
        None => {
            let deadline = irq::deadline_for(timeout_ns, irq::ticks());
            sched::block_current(deadline.map(|deadline| (deadline, hub.clone())));
            Ok(WaitOutcome::Parked)
        }
    }
}

fn write_events(buffer: UserPtr, events: &[Event]) -> Result<usize, HelError> {
    let mut offset = 0usize;
    for event in events {
        let wire = HelEvent::from_event(event);
        uaccess::write_user(buffer.byte_offset(offset), &wire)?;
        offset += core::mem::size_of::<HelEvent>();
    }
    Ok(events.len())
}

/// Completes a parked `WaitForEvents`: marshals the drained events into
/// the waiter's buffer, deposits the result words in its saved registers
/// and makes it runnable again. Called from event-hub posts and from the
/// timeout sweep; an expired wait completes successfully with zero events.
pub fn finish_wait(record: WaitRecord, events: &[Event]) {
    finish_wait_status(record, HelError::Ok, events);
}

pub fn finish_wait_status(record: WaitRecord, status: HelError, events: &[Event]) {
    let target = match thread::lookup(record.thread) {
        Some(thread) => thread,
        None => return,
    };

    let (word0, word1) = match write_events(record.buffer, events) {
        Ok(count) => (status.word(), count as u64),
        Err(error) => (error.word(), 0),
    };
    target.set_syscall_result(word0, word1, 0);
    sched::cancel_sleep(record.thread);
    sched::unblock(record.thread);
}

pub fn hel_create_bi_direction_pipe() -> Result<(Handle, Handle), HelError> {
    let universe = current_universe()?;
    let pipe = BiDirectionPipe::new();
    let first = universe.attach(AnyDescriptor::BiDirectionFirst(BiDirectionFirstDescriptor {
        pipe: pipe.clone(),
    }));
    let second = universe.attach(AnyDescriptor::BiDirectionSecond(
        BiDirectionSecondDescriptor { pipe },
    ));
    Ok((first, second))
}

pub fn hel_send_string(
    handle: Handle,
    buffer: UserPtr,
    length: usize,
    msg_request: i64,
    msg_seq: i64,
) -> HelError {
    let (pipe, _, write_channel) = match get_pipe_endpoint(handle) {
        Ok(endpoint) => endpoint,
        Err(error) => return error,
    };
    let payload = match uaccess::copy_from_user(buffer, length) {
        Ok(payload) => payload,
        Err(error) => return error,
    };

    match pipe.send_on(write_channel, &payload, msg_request, msg_seq) {
        Ok(()) => HelError::Ok,
        Err(error) => error,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn hel_submit_recv_string(
    handle: Handle,
    hub_handle: Handle,
    buffer: UserPtr,
    max_length: usize,
    filter_request: i64,
    filter_seq: i64,
    async_id: i64,
    submit_function: u64,
    submit_object: u64,
) -> HelError {
    let (pipe, read_channel, _) = match get_pipe_endpoint(handle) {
        Ok(endpoint) => endpoint,
        Err(error) => return error,
    };
    let hub = match get_hub(hub_handle) {
        Ok(hub) => hub,
        Err(error) => return error,
    };

    pipe.submit_recv_on(
        read_channel,
        hub,
        buffer,
        max_length,
        filter_request,
        filter_seq,
        submit_info(async_id, submit_function, submit_object),
    );
    HelError::Ok
}

pub fn hel_create_server() -> Result<(Handle, Handle), HelError> {
    let universe = current_universe()?;
    let server = Server::new();
    let server_handle = universe.attach(AnyDescriptor::Server(ServerDescriptor {
        server: server.clone(),
    }));
    let client_handle = universe.attach(AnyDescriptor::Client(ClientDescriptor { server }));
    Ok((server_handle, client_handle))
}

pub fn hel_submit_accept(
    handle: Handle,
    hub_handle: Handle,
    async_id: i64,
    submit_function: u64,
    submit_object: u64,
) -> HelError {
    let server = match get_descriptor(handle) {
        Ok(AnyDescriptor::Server(ServerDescriptor { server })) => server,
        Ok(_) => return HelError::BadDescriptor,
        Err(error) => return error,
    };
    let hub = match get_hub(hub_handle) {
        Ok(hub) => hub,
        Err(error) => return error,
    };
    let universe = match current_universe() {
        Ok(universe) => universe,
        Err(error) => return error,
    };

    server.submit_accept(universe, hub, submit_info(async_id, submit_function, submit_object));
    HelError::Ok
}

pub fn hel_submit_connect(
    handle: Handle,
    hub_handle: Handle,
    async_id: i64,
    submit_function: u64,
    submit_object: u64,
) -> HelError {
    let server = match get_descriptor(handle) {
        Ok(AnyDescriptor::Client(ClientDescriptor { server })) => server,
        Ok(_) => return HelError::BadDescriptor,
        Err(error) => return error,
    };
    let hub = match get_hub(hub_handle) {
        Ok(hub) => hub,
        Err(error) => return error,
    };
    let universe = match current_universe() {
        Ok(universe) => universe,
        Err(error) => return error,
    };

    server.submit_connect(universe, hub, submit_info(async_id, submit_function, submit_object));
    HelError::Ok
}

pub fn hel_access_irq(vector: u64) -> Result<Handle, HelError> {
    if vector >= irq::RELAY_COUNT as u64 {
        return Err(HelError::NoSuchObject);
    }
    Ok(current_universe()?.attach(AnyDescriptor::Irq(IrqDescriptor {
        vector: vector as u8,
    })))
}

pub fn hel_submit_wait_for_irq(
    handle: Handle,
    hub_handle: Handle,
    async_id: i64,
    submit_function: u64,
    submit_object: u64,
) -> HelError {
    let vector = match get_descriptor(handle) {
        Ok(AnyDescriptor::Irq(IrqDescriptor { vector })) => vector,
        Ok(_) => return HelError::BadDescriptor,
        Err(error) => return error,
    };
    let hub = match get_hub(hub_handle) {
        Ok(hub) => hub,
        Err(error) => return error,
    };

    irq::subscribe(vector, hub, submit_info(async_id, submit_function, submit_object));
    HelError::Ok
}

pub fn hel_access_io(port_array: UserPtr, count: usize) -> Result<Handle, HelError> {
    const MAX_PORTS: usize = 1024;
    if count > MAX_PORTS {
        return Err(HelError::NoMemory);
    }

    let raw = uaccess::copy_from_user(port_array, count * core::mem::size_of::<u64>())?;
    let mut ports = Vec::with_capacity(count);
    for chunk in raw.chunks_exact(core::mem::size_of::<u64>()) {
        let word = u64::from_ne_bytes(chunk.try_into().unwrap());
        if word > u16::MAX as u64 {
            return Err(HelError::NoSuchObject);
        }
        ports.push(word as u16);
    }

    Ok(current_universe()?.attach(AnyDescriptor::Io(IoDescriptor { ports })))
}

pub fn hel_enable_io(handle: Handle) -> HelError {
    match get_descriptor(handle) {
        Ok(AnyDescriptor::Io(_)) => {}
        Ok(_) => return HelError::BadDescriptor,
        Err(error) => return error,
    }
    match current_thread() {
        Ok(current) => {
            current.enable_io();
            HelError::Ok
        }
        Err(error) => error,
    }
}

// --------------------------------------------------------
// Dispatch and trap return
// --------------------------------------------------------

fn resume_current() -> ! {
    unsafe { thread::enter_user(thread::active_context()) }
}

fn return_syscall1(word0: u64) -> ! {
    let current = sched::current_thread().expect("syscall return without a current thread");
    current.set_syscall_result(word0, 0, 0);
    resume_current();
}

fn return_syscall2(word0: u64, word1: u64) -> ! {
    let current = sched::current_thread().expect("syscall return without a current thread");
    current.set_syscall_result(word0, word1, 0);
    resume_current();
}

fn return_syscall3(word0: u64, word1: u64, word2: u64) -> ! {
    let current = sched::current_thread().expect("syscall return without a current thread");
    current.set_syscall_result(word0, word1, word2);
    resume_current();
}

fn return_result1(result: Result<usize, HelError>) -> ! {
    match result {
        Ok(value) => return_syscall2(HelError::Ok.word(), value as u64),
        Err(error) => return_syscall2(error.word(), 0),
    }
}

fn return_handle(result: Result<Handle, HelError>) -> ! {
    match result {
        Ok(handle) => return_syscall2(HelError::Ok.word(), handle.raw()),
        Err(error) => return_syscall2(error.word(), 0),
    }
}

fn return_handle_pair(result: Result<(Handle, Handle), HelError>) -> ! {
    match result {
        Ok((first, second)) => {
            return_syscall3(HelError::Ok.word(), first.raw(), second.raw())
        }
        Err(error) => return_syscall3(error.word(), 0, 0),
    }
}

/// The syscall entry point, reached from the assembly stub with the call
/// index and its raw arguments.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn thor_syscall(
    index: u64,
    arg0: u64,
    arg1: u64,
    arg2: u64,
    arg3: u64,
    arg4: u64,
    arg5: u64,
    arg6: u64,
    arg7: u64,
    arg8: u64,
) -> ! {
    log_debug!(LOG_ORIGIN, "Call {} ({:#x}, {:#x}, {:#x})", index, arg0, arg1, arg2);

    match index {
        CALL_LOG => {
            let error = hel_log(UserPtr::new(arg0), arg1 as usize);
            return_syscall1(error.word());
        }
        CALL_PANIC => {
            let _ = hel_log(UserPtr::new(arg0), arg1 as usize);
            panic!("user thread requested a kernel panic");
        }
        CALL_CLOSE_DESCRIPTOR => {
            let error = hel_close_descriptor(Handle::from_raw(arg0));
            return_syscall1(error.word());
        }
        CALL_ALLOCATE_MEMORY => return_handle(hel_allocate_memory(arg0 as usize)),
        CALL_MAP_MEMORY => return_result1(hel_map_memory(
            Handle::from_raw(arg0),
            arg1 as usize,
            arg2 as usize,
        )),
        CALL_MEMORY_INFO => return_result1(hel_memory_info(Handle::from_raw(arg0))),
        CALL_CREATE_THREAD => return_handle(hel_create_thread(arg0, arg1, arg2)),
        CALL_EXIT_THIS_THREAD => sched::exit_current(),
        CALL_CREATE_EVENT_HUB => return_handle(hel_create_event_hub()),
        CALL_WAIT_FOR_EVENTS => {
            match hel_wait_for_events(
                Handle::from_raw(arg0),
                UserPtr::new(arg1),
                arg2 as usize,
                arg3 as i64,
            ) {
                Ok(WaitOutcome::Ready(count)) => {
                    return_syscall2(HelError::Ok.word(), count as u64)
                }
                Ok(WaitOutcome::Parked) => sched::schedule(),
                Err(error) => return_syscall2(error.word(), 0),
            }
        }
        CALL_CREATE_BI_DIRECTION_PIPE => return_handle_pair(hel_create_bi_direction_pipe()),
        CALL_SEND_STRING => {
            let error = hel_send_string(
                Handle::from_raw(arg0),
                UserPtr::new(arg1),
                arg2 as usize,
                arg3 as i64,
                arg4 as i64,
            );
            return_syscall1(error.word());
        }
        CALL_SUBMIT_RECV_STRING => {
            let error = hel_submit_recv_string(
                Handle::from_raw(arg0),
                Handle::from_raw(arg1),
                UserPtr::new(arg2),
                arg3 as usize,
                arg4 as i64,
                arg5 as i64,
                arg6 as i64,
                arg7,
                arg8,
            );
            return_syscall1(error.word());
        }
        CALL_CREATE_SERVER => return_handle_pair(hel_create_server()),
        CALL_SUBMIT_ACCEPT => {
            let error = hel_submit_accept(
                Handle::from_raw(arg0),
                Handle::from_raw(arg1),
                arg2 as i64,
                arg3,
                arg4,
            );
            return_syscall1(error.word());
        }
        CALL_SUBMIT_CONNECT => {
            let error = hel_submit_connect(
                Handle::from_raw(arg0),
                Handle::from_raw(arg1),
                arg2 as i64,
                arg3,
                arg4,
            );
            return_syscall1(error.word());
        }
        CALL_ACCESS_IRQ => return_handle(hel_access_irq(arg0)),
        CALL_SUBMIT_WAIT_FOR_IRQ => {
            let error = hel_submit_wait_for_irq(
                Handle::from_raw(arg0),
                Handle::from_raw(arg1),
                arg2 as i64,
                arg3,
                arg4,
            );
            return_syscall1(error.word());
        }
        CALL_ACCESS_IO => return_handle(hel_access_io(UserPtr::new(arg0), arg1 as usize)),
        CALL_ENABLE_IO => {
            let error = hel_enable_io(Handle::from_raw(arg0));
            return_syscall1(error.word());
        }
        _ => panic!("illegal syscall index {}", index),
    }
}
