//! System-call parameter blocks and the thread-facing wrappers.
//!
//! A caller fills the parameter block for its operation on its own stack,
//! attaches it to its TCB, and executes the trap instruction. Results come
//! back through the block's `ret` slot, for a blocking call possibly long
//! after the trap entered the kernel.

use abi::{MsgBoxId, SoftVec, ThreadEntry, ThreadId};
use core::ptr;

use crate::interrupt::IntrHandler;
use crate::Kernel;

pub struct RunArgs {
    pub func: ThreadEntry,
    pub name: &'static str,
    pub priority: usize,
    pub stack_size: usize,
    pub argc: usize,
    pub argv: *const *const u8,
    pub ret: Option<ThreadId>,
}

pub struct WakeupArgs {
    pub id: ThreadId,
}

pub struct GetIdArgs {
    pub ret: Option<ThreadId>,
}

pub struct ChPriArgs {
    /// New priority; negative leaves the priority unchanged.
    pub priority: isize,
    pub ret: usize,
}

pub struct KmAllocArgs {
    pub size: usize,
    pub ret: *mut u8,
}

pub struct KmFreeArgs {
    pub p: *mut u8,
}

pub struct SendArgs {
    pub boxid: MsgBoxId,
    pub size: usize,
    pub p: *mut u8,
    pub ret: usize,
}

pub struct RecvArgs {
    pub boxid: MsgBoxId,
    /// Outputs, written when a message is delivered.
    pub size: usize,
    pub p: *mut u8,
    /// Sender of the delivered message. Undefined until the call completes:
    /// a receive that blocked gets this written by a later send.
    pub ret: Option<ThreadId>,
}

pub struct SetIntrArgs {
    pub vec: SoftVec,
    pub handler: IntrHandler,
}

/// The tagged parameter union attached to a TCB across a trap. The variant
/// selects the service routine.
pub enum Syscall {
    Run(RunArgs),
    Exit,
    Wait,
    Sleep,
    Wakeup(WakeupArgs),
    GetId(GetIdArgs),
    ChPri(ChPriArgs),
    KmAlloc(KmAllocArgs),
    KmFree(KmFreeArgs),
    Send(SendArgs),
    Recv(RecvArgs),
    SetIntr(SetIntrArgs),
}

#[inline]
fn trap(param: &mut Syscall) {
    // Safety: the block lives on this thread's stack for the duration of
    // the call; the kernel reads it through the TCB descriptor while the
    // thread is suspended.
    unsafe { crate::arch::syscall(param) }
}

/// Start a new thread. Returns `None` if no TCB slot is free.
pub fn run(
    func: ThreadEntry,
    name: &'static str,
    priority: usize,
    stack_size: usize,
    argc: usize,
    argv: *const *const u8,
) -> Option<ThreadId> {
    let mut param = Syscall::Run(RunArgs {
        func,
        name,
        priority,
        stack_size,
        argc,
        argv,
        ret: None,
    });
    trap(&mut param);
    match param {
        Syscall::Run(args) => args.ret,
        _ => None,
    }
}

/// Terminate the calling thread.
pub fn exit() -> ! {
    let mut param = Syscall::Exit;
    trap(&mut param);
    unreachable!()
}

/// Yield: go to the back of the caller's own ready queue.
pub fn wait() {
    trap(&mut Syscall::Wait);
}

/// Leave the ready queues until another thread calls [`wakeup`].
pub fn sleep() {
    trap(&mut Syscall::Sleep);
}

pub fn wakeup(id: ThreadId) {
    trap(&mut Syscall::Wakeup(WakeupArgs { id }));
}

pub fn getid() -> Option<ThreadId> {
    let mut param = Syscall::GetId(GetIdArgs { ret: None });
    trap(&mut param);
    match param {
        Syscall::GetId(args) => args.ret,
        _ => None,
    }
}

/// Change the caller's priority; returns the old one. Negative priorities
/// leave it unchanged.
pub fn chpri(priority: isize) -> usize {
    let mut param = Syscall::ChPri(ChPriArgs { priority, ret: 0 });
    trap(&mut param);
    match param {
        Syscall::ChPri(args) => args.ret,
        _ => 0,
    }
}

pub fn kmalloc(size: usize) -> *mut u8 {
    let mut param = Syscall::KmAlloc(KmAllocArgs {
        size,
        ret: ptr::null_mut(),
    });
    trap(&mut param);
    match param {
        Syscall::KmAlloc(args) => args.ret,
        _ => ptr::null_mut(),
    }
}

pub fn kmfree(p: *mut u8) {
    trap(&mut Syscall::KmFree(KmFreeArgs { p }));
}

/// Queue a message. If a receiver is blocked on the box it is handed the
/// head message and made ready before the caller resumes. Returns `size`.
pub fn send(boxid: MsgBoxId, size: usize, p: *mut u8) -> usize {
    let mut param = Syscall::Send(SendArgs {
        boxid,
        size,
        p,
        ret: 0,
    });
    trap(&mut param);
    match param {
        Syscall::Send(args) => args.ret,
        _ => 0,
    }
}

/// Receive from a box, blocking while it is empty. Returns the sender id
/// and the message's size and payload.
pub fn recv(boxid: MsgBoxId) -> (Option<ThreadId>, usize, *mut u8) {
    let mut param = Syscall::Recv(RecvArgs {
        boxid,
        size: 0,
        p: ptr::null_mut(),
        ret: None,
    });
    trap(&mut param);
    match param {
        Syscall::Recv(args) => (args.ret, args.size, args.p),
        _ => (None, 0, ptr::null_mut()),
    }
}

/// Register an OS-side interrupt handler for a software-vector slot.
pub fn setintr(vec: SoftVec, handler: IntrHandler) {
    trap(&mut Syscall::SetIntr(SetIntrArgs { vec, handler }));
}

// Service-call variants, for code that already runs between threads (driver
// interrupt handlers). They enter the kernel directly and never touch the
// ready queues on the way in.

pub fn srv_kmalloc(kern: &mut Kernel, size: usize) -> *mut u8 {
    let mut param = Syscall::KmAlloc(KmAllocArgs {
        size,
        ret: ptr::null_mut(),
    });
    kern.service(&mut param);
    match param {
        Syscall::KmAlloc(args) => args.ret,
        _ => ptr::null_mut(),
    }
}

pub fn srv_kmfree(kern: &mut Kernel, p: *mut u8) {
    kern.service(&mut Syscall::KmFree(KmFreeArgs { p }));
}

pub fn srv_send(kern: &mut Kernel, boxid: MsgBoxId, size: usize, p: *mut u8) -> usize {
    let mut param = Syscall::Send(SendArgs {
        boxid,
        size,
        p,
        ret: 0,
    });
    kern.service(&mut param);
    match param {
        Syscall::Send(args) => args.ret,
        _ => 0,
    }
}

pub fn srv_wakeup(kern: &mut Kernel, id: ThreadId) {
    kern.service(&mut Syscall::Wakeup(WakeupArgs { id }));
}
