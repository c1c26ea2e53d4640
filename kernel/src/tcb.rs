use abi::{ThreadEntry, ThreadId};
use core::ptr::NonNull;
use enumflags2::{bitflags, BitFlags};
use heapless::String;

use crate::syscall::Syscall;

pub const THREAD_NAME_LEN: usize = 15;

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadFlag {
    /// Set iff the thread is linked into its priority's ready queue.
    Ready = 1,
}

/// Saved execution context. One word: the stack pointer at suspension.
/// Registers, program counter and status live on the thread's stack in the
/// interrupt-frame layout the arch module defines.
#[derive(Clone, Copy, Default)]
pub struct Context {
    pub sp: usize,
}

/// Parameters handed to the startup trampoline on first dispatch.
#[derive(Clone, Copy)]
pub(crate) struct InitParams {
    pub(crate) func: Option<ThreadEntry>,
    pub(crate) argc: usize,
    pub(crate) argv: *const *const u8,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            func: None,
            argc: 0,
            argv: core::ptr::null(),
        }
    }
}

pub struct Tcb {
    /// Ready-queue link.
    pub(crate) next: Option<ThreadId>,
    pub(crate) name: String<THREAD_NAME_LEN>,
    pub(crate) priority: usize,
    /// Top of this thread's stack region.
    pub(crate) stack: usize,
    pub(crate) flags: BitFlags<ThreadFlag>,
    pub(crate) init: InitParams,
    /// Descriptor of the system call in flight across the current trap.
    /// Points at a parameter block on the caller's stack; it stays valid
    /// while the caller is suspended and is where a blocking call's results
    /// are delivered.
    pub(crate) syscall: Option<NonNull<Syscall>>,
    pub(crate) context: Context,
}

impl Default for Tcb {
    fn default() -> Self {
        Self {
            next: None,
            name: String::new(),
            priority: 0,
            stack: 0,
            flags: BitFlags::default(),
            init: InitParams::default(),
            syscall: None,
            context: Context::default(),
        }
    }
}

impl Tcb {
    /// A slot is free iff no entry function is recorded.
    pub(crate) fn is_free(&self) -> bool {
        self.init.func.is_none()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.flags.contains(ThreadFlag::Ready)
    }

    /// Return the slot to the free pool.
    pub(crate) fn clear(&mut self) {
        *self = Tcb::default();
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        for c in name.chars() {
            if self.name.push(c).is_err() {
                break;
            }
        }
    }
}
