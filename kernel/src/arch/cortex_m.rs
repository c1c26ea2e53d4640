//! ARMv7-M implementation of the platform layer.
//!
//! The kernel depends on exactly two operations here: "enter the kernel
//! with a vector slot and the interrupted stack pointer" (the naked trap
//! entries below) and "resume a thread at its saved stack pointer"
//! (`dispatch`, plus the tail of every trap entry). Threads run on the
//! process stack; the kernel runs on the main stack in handler mode.

use core::arch::{asm, naked_asm};
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

use abi::{SoftVec, ThreadId};

use crate::syscall::Syscall;
use crate::tcb::Tcb;
use crate::Kernel;

static KERNEL_INIT: AtomicBool = AtomicBool::new(false);
static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();

pub fn init_kernel(kern: Kernel) -> &'static mut Kernel {
    if KERNEL_INIT.swap(true, Ordering::SeqCst) {
        panic!("kernel already initialized");
    }
    log_init();
    // Safety: guarded by the flag above; traps are not yet routed here.
    unsafe { (*(&raw mut KERNEL)).write(kern) }
}

/// Safety: only valid after `init_kernel`; the caller must not hold
/// another live reference into the kernel.
pub unsafe fn kernel() -> *mut Kernel {
    (*(&raw mut KERNEL)).as_mut_ptr()
}

/// Execute the trap instruction with the call descriptor attached to the
/// current TCB.
pub(crate) unsafe fn syscall(param: &mut Syscall) {
    let kern = &mut *kernel();
    if let Some(tcb) = kern.scheduler.current_tcb() {
        tcb.syscall = Some(NonNull::from(&mut *param));
    }
    asm!("svc #0");
}

#[no_mangle]
extern "C" fn kern_entry(vec: u32, sp: u32) -> u32 {
    let vec = match vec {
        0 => SoftVec::SoftErr,
        1 => SoftVec::Syscall,
        _ => SoftVec::SerIntr,
    };
    // Safety: single core, and interrupts are masked in handler mode.
    let kern = unsafe { &mut *kernel() };
    crate::interrupt::interrupt(kern, vec, sp as usize) as u32
}

// Every vector funnels through the same sequence: stack the software-saved
// half below the hardware frame, enter the kernel, and unstack whatever
// thread the kernel picked.
macro_rules! trap_entry {
    ($name:ident, $slot:literal) => {
        #[allow(non_snake_case)]
        #[unsafe(naked)]
        #[no_mangle]
        pub unsafe extern "C" fn $name() {
            naked_asm!(
                "mrs r0, psp",
                "mrs r1, primask",
                "stmdb r0!, {{r1, r4-r11}}",
                "mov r1, r0",
                concat!("movs r0, #", $slot),
                "bl kern_entry",
                "ldmia r0!, {{r1, r4-r11}}",
                "msr primask, r1",
                "msr psp, r0",
                "ldr lr, ={exc_return}",
                "bx lr",
                exc_return = const EXC_RETURN,
            )
        }
    };
}

// thread mode, process stack, no FP state
const EXC_RETURN: u32 = 0xFFFF_FFFD;

trap_entry!(HardFault, 0);
trap_entry!(SVCall, 1);
trap_entry!(UART0_IRQ, 2);

/// Resume the first thread. Later switches all go through the exception
/// return path; this one unstacks the synthetic frame by hand.
pub(crate) unsafe fn dispatch(sp: usize) -> ! {
    asm!(
        "ldmia r0!, {{r2, r4-r11}}",
        "msr primask, r2",
        "ldr r2, [r0, #24]", // seeded pc: the startup trampoline
        "ldr r3, [r0]",      // seeded r0: the trampoline's argument
        "add r0, r0, #32",   // drop the rest of the hardware frame
        "msr psp, r0",
        "mrs r1, control",
        "orr r1, r1, #2",    // thread mode uses the process stack
        "msr control, r1",
        "isb",
        "mov r0, r3",
        "bx r2",
        in("r0") sp,
        options(noreturn),
    )
}

pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

pub fn intr_disable() {
    cortex_m::interrupt::disable();
}

pub fn intr_enable() {
    // Safety: paired with `intr_disable` around driver critical sections.
    unsafe { cortex_m::interrupt::enable() };
}

// --- initial stack frame -------------------------------------------------

/// Software-saved status word and registers, then the hardware exception
/// frame, exactly as the trap entries stack them.
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct InitialFrame {
    pub primask: u32,
    pub r4_r11: [u32; 8],
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

const INITIAL_XPSR: u32 = 1 << 24; // thumb state

pub extern "C" fn thread_startup(id: usize) -> ! {
    // Safety: runs on a freshly dispatched thread, after `init_kernel`.
    let tcb = unsafe { &(*kernel()).scheduler.tcbs[id] };
    if let Some(func) = tcb.init.func {
        func(tcb.init.argc, tcb.init.argv);
    }
    thread_end()
}

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
            primask: u32::from(tcb.priority == 0),
            r0: id.0 as u32,
            lr: thread_end as usize as u32 | 1,
            pc: thread_startup as usize as u32 | 1,
            xpsr: INITIAL_XPSR,
            ..InitialFrame::default()
        };
    }
    tcb.context.sp = sp;
}

// --- defmt sink ----------------------------------------------------------

static mut LOG_CHANNEL: Option<rtt_target::UpChannel> = None;

fn log_init() {
    let channels = rtt_target::rtt_init! {
        up: {
            0: {
                size: 1024,
                name: "defmt"
            }
        }
    };
    // Safety: runs once, before any log site.
    unsafe { *(&raw mut LOG_CHANNEL) = Some(channels.up.0) };
}

pub fn log(bytes: &[u8]) {
    // Safety: single core; log sites never nest.
    if let Some(ch) = unsafe { (*(&raw mut LOG_CHANNEL)).as_mut() } {
        ch.write(bytes);
    }
}

// --- serial device -------------------------------------------------------

// PL011-style register block of the board's UARTs.
const UART_BASE: [usize; 2] = [0x4000_C000, 0x4000_D000];
const UART_DR: usize = 0x00;
const UART_FR: usize = 0x18;
const UART_IMSC: usize = 0x38;
const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;
const IMSC_RXIM: u32 = 1 << 4;
const IMSC_TXIM: u32 = 1 << 5;

unsafe fn reg_read(index: usize, offset: usize) -> u32 {
    ptr::read_volatile((UART_BASE[index] + offset) as *const u32)
}

unsafe fn reg_write(index: usize, offset: usize, value: u32) {
    ptr::write_volatile((UART_BASE[index] + offset) as *mut u32, value);
}

pub fn serial_init(index: usize) {
    // the boot firmware has already set the line parameters; just quiesce
    // the interrupt mask
    unsafe { reg_write(index, UART_IMSC, 0) };
}

pub fn serial_send_byte(index: usize, b: u8) {
    // Safety: MMIO of a device this core owns.
    unsafe {
        while reg_read(index, UART_FR) & FR_TXFF != 0 {}
        reg_write(index, UART_DR, b as u32);
    }
}

pub fn serial_recv_byte(index: usize) -> u8 {
    // Safety: MMIO of a device this core owns.
    unsafe { reg_read(index, UART_DR) as u8 }
}

pub fn serial_rx_ready(index: usize) -> bool {
    // Safety: MMIO of a device this core owns.
    unsafe { reg_read(index, UART_FR) & FR_RXFE == 0 }
}

pub fn serial_tx_ready(index: usize) -> bool {
    // Safety: MMIO of a device this core owns.
    unsafe { reg_read(index, UART_FR) & FR_TXFF == 0 }
}

pub fn serial_tx_intr_enabled(index: usize) -> bool {
    // Safety: MMIO of a device this core owns.
    unsafe { reg_read(index, UART_IMSC) & IMSC_TXIM != 0 }
}

pub fn serial_set_tx_intr(index: usize, on: bool) {
    // Safety: MMIO of a device this core owns.
    unsafe {
        let imsc = reg_read(index, UART_IMSC);
        let imsc = if on { imsc | IMSC_TXIM } else { imsc & !IMSC_TXIM };
        reg_write(index, UART_IMSC, imsc);
    }
}

pub fn serial_set_rx_intr(index: usize, on: bool) {
    // Safety: MMIO of a device this core owns.
    unsafe {
        let imsc = reg_read(index, UART_IMSC);
        let imsc = if on { imsc | IMSC_RXIM } else { imsc & !IMSC_RXIM };
        reg_write(index, UART_IMSC, imsc);
    }
}

pub fn console_write(bytes: &[u8]) {
    for &b in bytes {
        if b == b'\n' {
            serial_send_byte(0, b'\r');
        }
        serial_send_byte(0, b);
    }
}
