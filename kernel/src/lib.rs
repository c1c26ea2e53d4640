#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(dead_code)]

pub mod arch;
pub mod consdrv;
pub mod console;
pub mod interrupt;
pub mod memory;
pub mod msgbox;
pub mod scheduler;
pub mod syscall;
pub mod tcb;

mod defmt_log;


use abi::{MsgBoxId, SoftVec, ThreadEntry, ThreadId, MSGBOX_COUNT, SOFTVEC_COUNT};
use core::mem;
use core::ptr::{self, NonNull};

use interrupt::{IntrHandler, SoftvecTable};
use memory::{FixedBlockAlloc, PoolCfg, DEFAULT_POOLS};
use msgbox::{MsgBox, MsgBuf};
use scheduler::{Scheduler, PRIORITY_COUNT};
use syscall::{RunArgs, Syscall};

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum KernelError {
    ArenaTooSmall,
    TooManyPools,
}

/// Bump carve-out over the statically reserved user-stack region. Stack
/// regions are assigned permanently; thread termination does not recycle
/// them, so the embedder bounds the number of thread lifetimes.
pub(crate) struct StackArena {
    next: usize,
    end: usize,
}

impl StackArena {
    fn new(region: &'static mut [u8]) -> Self {
        let skip = region.as_ptr().align_offset(8);
        let base = region.as_ptr() as usize;
        Self {
            next: base + skip.min(region.len()),
            end: (base + region.len()) & !7,
        }
    }

    /// Carve and zero a region, returning its top (stacks grow down).
    fn alloc(&mut self, size: usize) -> usize {
        let size = (size + 7) & !7;
        if self.end < self.next || self.end - self.next < size {
            sysdown();
        }
        // Safety: the carved range lies inside the region handed to `new`.
        unsafe { ptr::write_bytes(self.next as *mut u8, 0, size) };
        self.next += size;
        self.next
    }
}

/// The whole of the kernel's mutable state, created once at startup and
/// passed by reference through every entry. Mutual exclusion is the
/// platform's: single core, interrupts off inside the kernel.
pub struct Kernel {
    pub(crate) scheduler: Scheduler,
    pub(crate) mem: FixedBlockAlloc,
    pub(crate) boxes: [MsgBox; MSGBOX_COUNT],
    pub(crate) softvecs: SoftvecTable,
    pub(crate) handlers: [Option<IntrHandler>; SOFTVEC_COUNT],
    pub(crate) stacks: StackArena,
}

impl Kernel {
    pub fn new(
        heap: &'static mut [u8],
        stack_area: &'static mut [u8],
    ) -> Result<Self, KernelError> {
        Self::with_pools(heap, stack_area, &DEFAULT_POOLS)
    }

    pub fn with_pools(
        heap: &'static mut [u8],
        stack_area: &'static mut [u8],
        pools: &[PoolCfg],
    ) -> Result<Self, KernelError> {
        Ok(Self {
            scheduler: Scheduler::new(),
            mem: FixedBlockAlloc::new(heap, pools)?,
            boxes: core::array::from_fn(|_| MsgBox::new()),
            softvecs: SoftvecTable::new(),
            handlers: [None; SOFTVEC_COUNT],
            stacks: StackArena::new(stack_area),
        })
    }

    /// Boot: register the kernel's own trap handlers, create the initial
    /// thread in service mode, and dispatch it. Interrupts must still be
    /// globally disabled when this is called.
    pub fn start(
        &mut self,
        func: ThreadEntry,
        name: &'static str,
        priority: usize,
        stack_size: usize,
        argc: usize,
        argv: *const *const u8,
    ) -> ! {
        self.scheduler.current = None;
        self.thread_setintr(SoftVec::Syscall, syscall_intr);
        self.thread_setintr(SoftVec::SoftErr, softerr_intr);

        let mut param = Syscall::Run(RunArgs {
            func,
            name,
            priority,
            stack_size,
            argc,
            argv,
            ret: None,
        });
        self.service(&mut param);

        let sp = match self.scheduler.current_tcb() {
            Some(tcb) => tcb.context.sp,
            None => sysdown(),
        };
        // Safety: `sp` was seeded by `thread_run` with a full initial frame.
        unsafe { arch::dispatch(sp) }
    }

    /// Service-call entry: run an operation without touching the ready
    /// queues. The current-thread pointer is cleared so the queue
    /// primitives short-circuit; the scheduler re-resolves it at the next
    /// scheduling point.
    pub fn service(&mut self, param: &mut Syscall) {
        self.scheduler.current = None;
        self.dispatch(NonNull::from(param));
    }

    /// System-call path: the caller leaves its ready queue before the
    /// operation decides whether to put it back.
    fn syscall_proc(&mut self) {
        self.scheduler.getcurrent();
        let Some(tcb) = self.scheduler.current_tcb() else {
            return;
        };
        let Some(param) = tcb.syscall else {
            return;
        };
        self.dispatch(param);
    }

    fn dispatch(&mut self, mut param: NonNull<Syscall>) {
        // Safety: the block lives in the (suspended) caller's frame and
        // nothing else touches it while the kernel runs. `thread_recv`
        // re-derives the pointer from the TCB for its completion path, so
        // that arm drops this borrow before calling in.
        match unsafe { param.as_mut() } {
            Syscall::Run(args) => args.ret = self.thread_run(args),
            Syscall::Exit => self.thread_exit(),
            Syscall::Wait => self.thread_wait(),
            // stays detached until another thread wakes it
            Syscall::Sleep => {}
            Syscall::Wakeup(args) => self.thread_wakeup(args.id),
            Syscall::GetId(args) => args.ret = self.thread_getid(),
            Syscall::ChPri(args) => args.ret = self.thread_chpri(args.priority),
            Syscall::KmAlloc(args) => args.ret = self.thread_kmalloc(args.size),
            Syscall::KmFree(args) => self.thread_kmfree(args.p),
            Syscall::Send(args) => args.ret = self.thread_send(args.boxid, args.size, args.p),
            Syscall::Recv(args) => {
                let boxid = args.boxid;
                self.thread_recv(boxid);
            }
            Syscall::SetIntr(args) => self.thread_setintr(args.vec, args.handler),
        }
    }

    fn thread_run(&mut self, args: &RunArgs) -> Option<ThreadId> {
        let slot = self.scheduler.alloc_tcb();
        let Some(id) = slot.filter(|_| args.priority < PRIORITY_COUNT) else {
            // no slot (or nonsense priority); the caller still goes back on
            // its queue
            self.scheduler.putcurrent();
            return None;
        };

        let stack_top = self.stacks.alloc(args.stack_size);
        let tcb = &mut self.scheduler.tcbs[id.0];
        tcb.clear();
        tcb.set_name(args.name);
        tcb.priority = args.priority;
        tcb.stack = stack_top;
        tcb.init.func = Some(args.func);
        tcb.init.argc = args.argc;
        tcb.init.argv = args.argv;
        arch::init_tcb_stack(tcb, id);
        defmt::debug!("thread {} spawned at priority {}", id.0, args.priority);

        // the caller goes back first, then the new thread joins the tail of
        // its own priority's queue
        self.scheduler.putcurrent();
        self.scheduler.current = Some(id);
        self.scheduler.putcurrent();
        Some(id)
    }

    fn thread_exit(&mut self) {
        let Some(tcb) = self.scheduler.current_tcb() else {
            return;
        };
        console::puts(tcb.name.as_str());
        console::puts(" EXIT.\n");
        defmt::debug!("thread exit");
        tcb.clear();
    }

    fn thread_wait(&mut self) {
        // detached on the way in; reattaching lands at the tail
        self.scheduler.putcurrent();
    }

    fn thread_wakeup(&mut self, id: ThreadId) {
        self.scheduler.putcurrent();
        // link the target through the same flag-guarded primitive; the
        // scheduler re-resolves the current pointer right after
        self.scheduler.current = Some(id);
        self.scheduler.putcurrent();
    }

    fn thread_getid(&mut self) -> Option<ThreadId> {
        self.scheduler.putcurrent();
        self.scheduler.current
    }

    fn thread_chpri(&mut self, priority: isize) -> usize {
        let old = match self.scheduler.current_tcb() {
            Some(tcb) => {
                let old = tcb.priority;
                if (0..PRIORITY_COUNT as isize).contains(&priority) {
                    tcb.priority = priority as usize;
                }
                old
            }
            None => 0,
        };
        // reattach under the (possibly new) priority
        self.scheduler.putcurrent();
        old
    }

    fn thread_kmalloc(&mut self, size: usize) -> *mut u8 {
        self.scheduler.putcurrent();
        self.mem.alloc(size).as_ptr()
    }

    fn thread_kmfree(&mut self, p: *mut u8) {
        if let Some(p) = NonNull::new(p) {
            self.mem.free(p);
        }
        self.scheduler.putcurrent();
    }

    fn thread_send(&mut self, boxid: MsgBoxId, size: usize, p: *mut u8) -> usize {
        self.scheduler.putcurrent();
        self.sendmsg(boxid, size, p);
        // a blocked receiver takes delivery immediately and becomes ready
        if let Some(receiver) = self.boxes[boxid.index()].receiver {
            self.scheduler.current = Some(receiver);
            self.recvmsg(boxid);
            self.scheduler.putcurrent();
        }
        size
    }

    fn thread_recv(&mut self, boxid: MsgBoxId) {
        if self.boxes[boxid.index()].receiver.is_some() {
            // at most one outstanding receiver per box
            sysdown();
        }
        let Some(cur) = self.scheduler.current else {
            return;
        };
        self.boxes[boxid.index()].receiver = Some(cur);
        if !self.boxes[boxid.index()].is_empty() {
            self.recvmsg(boxid);
            self.scheduler.putcurrent();
        }
        // empty box: the caller stays off the queues; a later send
        // completes the call through the stored descriptor
    }

    fn thread_setintr(&mut self, vec: SoftVec, handler: IntrHandler) {
        // route the vector through the kernel's thread-mode entry, then
        // record the OS-side handler for it
        self.softvecs.set(vec, thread_intr);
        self.handlers[vec.index()] = Some(handler);
        self.scheduler.putcurrent();
        defmt::debug!("handler registered for vector {}", vec.index());
    }

    fn sendmsg(&mut self, boxid: MsgBoxId, size: usize, p: *mut u8) {
        let sender = self.scheduler.current;
        let buf = self.mem.alloc(mem::size_of::<MsgBuf>()).cast::<MsgBuf>();
        // Safety: a fresh allocator block, sized for a node by the line
        // above.
        unsafe {
            buf.as_ptr().write(MsgBuf {
                next: ptr::null_mut(),
                sender,
                size,
                payload: p,
            });
        }
        self.boxes[boxid.index()].push(buf.as_ptr());
    }

    /// Receive tail: deliver the head message to the registered receiver
    /// through its stored call descriptor, clear the registration, release
    /// the node.
    fn recvmsg(&mut self, boxid: MsgBoxId) {
        let mbox = &mut self.boxes[boxid.index()];
        let buf = mbox.pop();
        if buf.is_null() {
            return;
        }
        let receiver = mbox.receiver.take();
        // Safety: the node was just unlinked from the box FIFO and is live
        // until freed below.
        let (sender, size, payload) = unsafe { ((*buf).sender, (*buf).size, (*buf).payload) };
        if let Some(receiver) = receiver {
            if let Some(mut param) = self.scheduler.tcbs[receiver.0].syscall {
                // Safety: the receiver is suspended inside `recv`; its
                // parameter block outlives the suspension and no other
                // reference to it is live here.
                if let Syscall::Recv(args) = unsafe { param.as_mut() } {
                    args.size = size;
                    args.p = payload;
                    args.ret = sender;
                }
            }
        }
        // Safety: `buf` was detached above; nothing points at it any more.
        self.mem.free(unsafe { NonNull::new_unchecked(buf.cast()) });
    }
}

/// Thread-mode target of every software vector: bank the interrupted
/// thread's stack pointer, run the OS-side handler, reschedule, and hand
/// back the stack pointer to resume at.
fn thread_intr(kern: &mut Kernel, vec: SoftVec, sp: usize) -> usize {
    if let Some(tcb) = kern.scheduler.current_tcb() {
        tcb.context.sp = sp;
    }
    if let Some(handler) = kern.handlers[vec.index()] {
        handler(kern);
    }
    kern.scheduler.schedule();
    match kern.scheduler.current_tcb() {
        Some(tcb) => tcb.context.sp,
        None => sysdown(),
    }
}

fn syscall_intr(kern: &mut Kernel) {
    kern.syscall_proc();
}

/// Software-error trap: report the offender and kill it.
fn softerr_intr(kern: &mut Kernel) {
    if let Some(tcb) = kern.scheduler.current_tcb() {
        console::puts(tcb.name.as_str());
        console::puts(" DOWN.\n");
    }
    kern.scheduler.getcurrent();
    kern.thread_exit();
}

/// Unrecoverable kernel failure: report and halt.
pub fn sysdown() -> ! {
    defmt::error!("system down");
    console::puts("system error!\n");
    arch::halt()
}
