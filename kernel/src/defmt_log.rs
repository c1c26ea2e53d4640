use defmt::global_logger;

#[global_logger]
struct KernelLogger;

static mut ENCODER: defmt::Encoder = ::defmt::Encoder::new();

::defmt::timestamp!("{=u32:us}", 0);

// Safety: defmt::Logger requires that only one thread access the logger at
// once. The kernel is single threaded, so no guard is needed.
unsafe impl defmt::Logger for KernelLogger {
    fn acquire() {
        // Safety: single threaded, see above
        unsafe { (*(&raw mut ENCODER)).start_frame(|b| crate::arch::log(b)) };
    }

    unsafe fn flush() {}

    unsafe fn release() {
        (*(&raw mut ENCODER)).end_frame(|b| crate::arch::log(b));
    }

    unsafe fn write(bytes: &[u8]) {
        (*(&raw mut ENCODER)).write(bytes, |b| crate::arch::log(b));
    }
}
