#[cfg(all(feature = "cortex_m", target_arch = "arm"))]
pub mod cortex_m;
#[cfg(all(feature = "cortex_m", target_arch = "arm"))]
pub use self::cortex_m::*;

#[cfg(not(all(feature = "cortex_m", target_arch = "arm")))]
pub mod dummy;
#[cfg(not(all(feature = "cortex_m", target_arch = "arm")))]
pub use self::dummy::*;
