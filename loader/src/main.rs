#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use loader::cli::Cli;
    use loader::elf::PhysMemory;
    use loader::serial::MmioSerial;

    /// Image staging area; the linker places it clear of the loader itself.
    #[link_section = ".loadbuf"]
    static mut LOAD_BUFFER: [u8; 0x10000] = [0; 0x10000];

    /// Entered from the reset stub with interrupts globally disabled; they
    /// stay that way for the loader's whole life, and the loaded kernel is
    /// entered the same way.
    #[no_mangle]
    pub extern "C" fn main() -> ! {
        let mut serial = MmioSerial::new(0);
        // Safety: single core, and `main` is entered exactly once.
        let buffer = unsafe { &mut *(&raw mut LOAD_BUFFER) };
        let mut cli = Cli::new(&mut serial, buffer);
        let mut mem = PhysMemory;
        cli.greet();
        loop {
            if let Some(entry) = cli.step(&mut mem) {
                // Safety: a validated image was just placed at its load
                // addresses; `entry` is its declared entry point.
                let start: extern "C" fn() -> ! =
                    unsafe { core::mem::transmute(entry as usize) };
                start();
            }
        }
    }

    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        loop {}
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // target-only program; hosted builds exercise the library through its
    // tests
}
