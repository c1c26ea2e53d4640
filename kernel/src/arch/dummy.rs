//! Hosted stand-in for the platform layer. Console output and the serial
//! device are scriptable buffers, `halt` panics so fatal paths are
//! observable, and the trap instruction is a direct call into the kernel
//! entry.

use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex};

use abi::{SoftVec, ThreadId};
use core::mem;
use core::ptr::NonNull;

use crate::syscall::Syscall;
use crate::tcb::Tcb;
use crate::Kernel;

static mut KERNEL: Option<Kernel> = None;

/// Install `kern` as the instance the trap path resolves. Tests call this
/// repeatedly; the previous instance is dropped.
pub fn init_kernel(kern: Kernel) -> &'static mut Kernel {
    // Safety: hosted runner; callers serialize kernel-singleton use.
    unsafe {
        let slot = &mut *(&raw mut KERNEL);
        *slot = Some(kern);
        slot.as_mut().unwrap()
    }
}

/// Safety: only meaningful after `init_kernel`, and the caller must not
/// hold another live reference into the kernel.
pub unsafe fn kernel() -> *mut Kernel {
    match &mut *(&raw mut KERNEL) {
        Some(k) => k as *mut Kernel,
        None => core::ptr::null_mut(),
    }
}

/// Enter the kernel the way the trap instruction would: attach the
/// descriptor to the current TCB, then take the syscall vector.
pub(crate) unsafe fn syscall(param: &mut Syscall) {
    let kern = &mut *kernel();
    if let Some(tcb) = kern.scheduler.current_tcb() {
        tcb.syscall = Some(NonNull::from(&mut *param));
    }
    crate::interrupt::interrupt(kern, SoftVec::Syscall, 0);
}

pub(crate) unsafe fn dispatch(_sp: usize) -> ! {
    unimplemented!("thread dispatch is target-only")
}

pub fn halt() -> ! {
    panic!("system down");
}

pub fn intr_disable() {}
pub fn intr_enable() {}

pub fn log(_bytes: &[u8]) {}

// --- console capture -----------------------------------------------------

static CONSOLE: LazyLock<Mutex<Vec<u8>>> = LazyLock::new(|| Mutex::new(Vec::new()));

pub fn console_write(bytes: &[u8]) {
    CONSOLE.lock().unwrap().extend_from_slice(bytes);
}

pub fn take_console() -> Vec<u8> {
    mem::take(&mut *CONSOLE.lock().unwrap())
}

// --- initial stack frame -------------------------------------------------

/// Interrupt-return frame seeded onto a new thread's stack. Mirrors the
/// cortex-m layout word for word so frame construction is testable on the
/// host: the software-saved status word first, then the stacked registers.
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct InitialFrame {
    /// Interrupts start disabled iff the thread's priority is zero.
    pub primask: usize,
    pub r4_r11: [usize; 8],
    /// First argument of the startup trampoline: the thread's id.
    pub r0: usize,
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
    pub r12: usize,
    /// Return address: falls through into the exit trampoline.
    pub lr: usize,
    /// First dispatch begins at the startup trampoline.
    pub pc: usize,
    pub xpsr: usize,
}

/// Startup trampoline: run the thread's entry function, then exit.
pub extern "C" fn thread_startup(id: usize) -> ! {
    // Safety: runs on a freshly dispatched thread, after `init_kernel`.
    let tcb = unsafe { &(*kernel()).scheduler.tcbs[id] };
    if let Some(func) = tcb.init.func {
        func(tcb.init.argc, tcb.init.argv);
    }
    thread_end()
}

/// Exit trampoline: entered when the entry function returns.
pub extern "C" fn thread_end() -> ! {
    crate::syscall::exit()
}

pub(crate) fn init_tcb_stack(tcb: &mut Tcb, id: ThreadId) {
    let sp = tcb.stack - mem::size_of::<InitialFrame>();
    let frame = sp as *mut InitialFrame;
    // Safety: the region below `tcb.stack` was carved and zeroed for this
    // thread.
    unsafe {
        *frame = InitialFrame {
            primask: usize::from(tcb.priority == 0),
            r0: id.0,
            lr: thread_end as usize,
            pc: thread_startup as usize,
            ..InitialFrame::default()
        };
    }
    tcb.context.sp = sp;
}

// --- serial device double ------------------------------------------------

#[derive(Default)]
struct SerialSim {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    rx_intr: bool,
    tx_intr: bool,
}

static SERIAL: LazyLock<Mutex<Vec<SerialSim>>> =
    LazyLock::new(|| Mutex::new((0..2).map(|_| SerialSim::default()).collect()));

pub fn serial_init(index: usize) {
    SERIAL.lock().unwrap()[index] = SerialSim::default();
}

pub fn serial_send_byte(index: usize, b: u8) {
    SERIAL.lock().unwrap()[index].tx.push(b);
}

pub fn serial_recv_byte(index: usize) -> u8 {
    SERIAL.lock().unwrap()[index].rx.pop_front().unwrap_or(0)
}

pub fn serial_rx_ready(index: usize) -> bool {
    !SERIAL.lock().unwrap()[index].rx.is_empty()
}

pub fn serial_tx_ready(_index: usize) -> bool {
    true
}

pub fn serial_tx_intr_enabled(index: usize) -> bool {
    SERIAL.lock().unwrap()[index].tx_intr
}

pub fn serial_set_tx_intr(index: usize, on: bool) {
    SERIAL.lock().unwrap()[index].tx_intr = on;
}

pub fn serial_set_rx_intr(index: usize, on: bool) {
    SERIAL.lock().unwrap()[index].rx_intr = on;
}

/// Script bytes for the receive side.
pub fn serial_push_rx(index: usize, bytes: &[u8]) {
    SERIAL.lock().unwrap()[index].rx.extend(bytes);
}

/// Drain everything the transmit side wrote.
pub fn serial_take_tx(index: usize) -> Vec<u8> {
    mem::take(&mut SERIAL.lock().unwrap()[index].tx)
}
