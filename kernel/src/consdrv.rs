//! Console driver. A kernel thread owns the serial device and services
//! `use`/`write` commands from the output box; the receive and transmit
//! interrupts run between threads, echo input, and post completed lines to
//! the input box through service calls.

use abi::{MsgBoxId, SoftVec, ThreadId};
use core::cell::UnsafeCell;
use core::ptr;

use crate::{arch, syscall, Kernel};

pub const CONS_BUFFER_SIZE: usize = 24;
const DEVICE_COUNT: usize = 1;

/// Command bytes, the first payload byte after the device digit.
pub const CMD_USE: u8 = b'u';
pub const CMD_WRITE: u8 = b'w';

struct ConsReg {
    /// Thread using this console; unbound consoles are ignored.
    id: Option<ThreadId>,
    /// Serial device number.
    index: usize,
    send_buf: *mut u8,
    recv_buf: *mut u8,
    send_len: usize,
    recv_len: usize,
}

impl ConsReg {
    const fn new() -> Self {
        Self {
            id: None,
            index: 0,
            send_buf: ptr::null_mut(),
            recv_buf: ptr::null_mut(),
            send_len: 0,
            recv_len: 0,
        }
    }
}

struct Registers(UnsafeCell<[ConsReg; DEVICE_COUNT]>);

// Safety: single core; the interrupt side runs between threads and the
// thread side disables interrupts around shared-buffer access.
unsafe impl Sync for Registers {}

static CONSREG: Registers = Registers(UnsafeCell::new([ConsReg::new()]));

/// Safety: caller must be in interrupt context, or running with interrupts
/// disabled.
unsafe fn consreg(index: usize) -> &'static mut ConsReg {
    &mut (*CONSREG.0.get())[index]
}

pub(crate) fn consdrv_init() {
    for index in 0..DEVICE_COUNT {
        // Safety: runs before the driver binds the device.
        unsafe { *consreg(index) = ConsReg::new() };
    }
}

// The two functions below touch the send buffer from both interrupt and
// thread context and are not re-entrant; thread-side callers run them with
// interrupts disabled.

unsafe fn send_char(cons: &mut ConsReg) {
    arch::serial_send_byte(cons.index, *cons.send_buf);
    cons.send_len -= 1;
    // close the gap left by the head byte
    ptr::copy(cons.send_buf.add(1), cons.send_buf, cons.send_len);
}

unsafe fn send_string(cons: &mut ConsReg, s: *const u8, len: usize) {
    for i in 0..len {
        let c = *s.add(i);
        if c == b'\n' {
            *cons.send_buf.add(cons.send_len) = b'\r';
            cons.send_len += 1;
        }
        *cons.send_buf.add(cons.send_len) = c;
        cons.send_len += 1;
    }
    if cons.send_len > 0 && !arch::serial_tx_intr_enabled(cons.index) {
        // prime the first byte; the transmit interrupt drains the rest
        arch::serial_set_tx_intr(cons.index, true);
        send_char(cons);
    }
}

unsafe fn intr_proc(kern: &mut Kernel, cons: &mut ConsReg) {
    if arch::serial_rx_ready(cons.index) {
        let mut c = arch::serial_recv_byte(cons.index);
        if c == b'\r' {
            c = b'\n';
        }
        send_string(cons, &c, 1); // echo back
        if cons.id.is_some() {
            if c != b'\n' {
                *cons.recv_buf.add(cons.recv_len) = c;
                cons.recv_len += 1;
            } else {
                // a complete line: hand a copy to whoever reads the input
                // box
                let p = syscall::srv_kmalloc(kern, CONS_BUFFER_SIZE);
                ptr::copy_nonoverlapping(cons.recv_buf, p, cons.recv_len);
                syscall::srv_send(kern, MsgBoxId::ConsInput, cons.recv_len, p);
                cons.recv_len = 0;
            }
        }
    }

    if arch::serial_tx_ready(cons.index) {
        if cons.id.is_none() || cons.send_len == 0 {
            arch::serial_set_tx_intr(cons.index, false);
        } else {
            send_char(cons);
        }
    }
}

/// OS-side serial interrupt handler, registered by the driver thread.
pub fn consdrv_intr(kern: &mut Kernel) {
    for index in 0..DEVICE_COUNT {
        // Safety: interrupt context.
        let cons = unsafe { consreg(index) };
        if cons.id.is_none() {
            continue;
        }
        if arch::serial_rx_ready(cons.index) || arch::serial_tx_ready(cons.index) {
            // Safety: interrupt context.
            unsafe { intr_proc(kern, cons) };
        }
    }
}

/// Process one command from the output box. Runs in the driver thread.
pub(crate) fn consdrv_command(index: usize, id: Option<ThreadId>, size: usize, command: *const u8) {
    // Safety: the driver thread is the only thread-side user; interrupt
    // access to the shared send buffer is excluded where it matters.
    unsafe {
        let cons = consreg(index);
        match *command {
            CMD_USE => {
                cons.id = id;
                cons.index = (*command.add(1) - b'0') as usize;
                cons.send_buf = syscall::kmalloc(CONS_BUFFER_SIZE);
                cons.recv_buf = syscall::kmalloc(CONS_BUFFER_SIZE);
                cons.send_len = 0;
                cons.recv_len = 0;
                arch::serial_init(cons.index);
                arch::serial_set_rx_intr(cons.index, true);
            }
            CMD_WRITE => {
                // the transmit interrupt shares the send buffer
                arch::intr_disable();
                send_string(cons, command.add(1), size - 1);
                arch::intr_enable();
            }
            _ => {}
        }
    }
}

/// Driver thread entry: bind the serial interrupt, then serve commands
/// forever. Payload layout: device digit, command byte, data.
pub fn consdrv_main(_argc: usize, _argv: *const *const u8) -> i32 {
    consdrv_init();
    syscall::setintr(SoftVec::SerIntr, consdrv_intr);

    loop {
        let (id, size, p) = syscall::recv(MsgBoxId::ConsOutput);
        // Safety: the sender handed the payload over; it is ours to read
        // and free.
        unsafe {
            let index = (*p - b'0') as usize;
            consdrv_command(index, id, size - 1, p.add(1));
        }
        syscall::kmfree(p);
    }
}
