use abi::{SoftVec, SOFTVEC_COUNT};

use crate::Kernel;

/// OS-side interrupt handler. Registered through `setintr`, runs between
/// threads with the kernel borrowed, and may post messages or wake threads
/// through the service-call entry.
pub type IntrHandler = fn(&mut Kernel);

/// Target of a software-vector slot: receives the slot and the interrupted
/// thread's hardware-saved stack pointer, returns the stack pointer to
/// resume at.
pub(crate) type VecHandler = fn(&mut Kernel, SoftVec, usize) -> usize;

pub(crate) struct SoftvecTable {
    slots: [Option<VecHandler>; SOFTVEC_COUNT],
}

impl SoftvecTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [None; SOFTVEC_COUNT],
        }
    }

    pub(crate) fn set(&mut self, vec: SoftVec, handler: VecHandler) {
        self.slots[vec.index()] = Some(handler);
    }
}

/// Common entry point invoked by the low-level trap glue for every trap and
/// interrupt. A slot without a handler is a silent no-op: execution resumes
/// where it stopped.
pub fn interrupt(kern: &mut Kernel, vec: SoftVec, sp: usize) -> usize {
    match kern.softvecs.slots[vec.index()] {
        Some(handler) => handler(kern, vec, sp),
        None => sp,
    }
}
