//! Polled console output for kernel-side messages. Driver-managed output
//! goes through the console driver's message boxes instead; this path is
//! for the kernel's own few lines (exit notices, the system-down report).

pub fn puts(s: &str) {
    crate::arch::console_write(s.as_bytes());
}
