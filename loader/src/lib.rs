//! Second-stage boot loader: receives an executable image over the serial
//! link, validates it, places its segments, and hands control to its entry
//! point.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(dead_code)]

pub mod cli;
pub mod elf;
pub mod serial;
pub mod xmodem;

#[cfg(test)]
mod tests;
