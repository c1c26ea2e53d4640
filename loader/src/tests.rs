use byteorder::{BigEndian, ByteOrder};

use crate::cli::Cli;
use crate::elf::{self, ElfError, LoadMemory};
use crate::serial::ScriptSerial;
use crate::xmodem::{self, XmodemError, BLOCK_SIZE};

const SOH: u8 = 0x01;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;

/// A window of physical memory backed by a host buffer, pre-filled with a
/// marker so both copies and zero-fills are visible.
struct MockMemory {
    base: u32,
    bytes: Vec<u8>,
}

impl MockMemory {
    fn new(base: u32, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0xaa; len],
        }
    }
}

impl LoadMemory for MockMemory {
    fn copy(&mut self, phys: u32, data: &[u8]) {
        let o = (phys - self.base) as usize;
        self.bytes[o..o + data.len()].copy_from_slice(data);
    }

    fn zero(&mut self, phys: u32, len: u32) {
        let o = (phys - self.base) as usize;
        self.bytes[o..o + len as usize].fill(0);
    }
}

/// Minimal executable: one program header right after the ELF header, its
/// payload right after that, every byte of it `fill`.
fn build_elf(entry: u32, phys: u32, file_size: u32, memory_size: u32, fill: u8) -> Vec<u8> {
    const PHOFF: u32 = 52;
    const DATA_OFF: u32 = 84;
    let mut img = vec![0u8; (DATA_OFF + file_size) as usize];
    img[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    img[4] = 1; // ELF32
    img[5] = 2; // big endian
    img[6] = 1;
    BigEndian::write_u16(&mut img[16..], 2); // executable
    BigEndian::write_u16(&mut img[18..], 46); // H8/300
    BigEndian::write_u32(&mut img[20..], 1);
    BigEndian::write_u32(&mut img[24..], entry);
    BigEndian::write_u32(&mut img[28..], PHOFF);
    BigEndian::write_u16(&mut img[42..], 32);
    BigEndian::write_u16(&mut img[44..], 1);
    let p = PHOFF as usize;
    BigEndian::write_u32(&mut img[p..], 1); // loadable
    BigEndian::write_u32(&mut img[p + 4..], DATA_OFF);
    BigEndian::write_u32(&mut img[p + 8..], phys);
    BigEndian::write_u32(&mut img[p + 12..], phys);
    BigEndian::write_u32(&mut img[p + 16..], file_size);
    BigEndian::write_u32(&mut img[p + 20..], memory_size);
    for b in &mut img[DATA_OFF as usize..] {
        *b = fill;
    }
    img
}

fn frame(number: u8, data: &[u8], checksum_bias: u8) -> Vec<u8> {
    assert_eq!(data.len(), BLOCK_SIZE);
    let mut v = vec![SOH, number, !number];
    v.extend_from_slice(data);
    let checksum = data.iter().fold(0u8, |a, &b| a.wrapping_add(b));
    v.push(checksum.wrapping_add(checksum_bias));
    v
}

// --- elf -----------------------------------------------------------------

#[test]
fn load_copies_and_zero_fills_a_segment() {
    let img = build_elf(0x400100, 0x40_0000, 100, 200, 0x5a);
    let mut mem = MockMemory::new(0x40_0000, 300);
    let entry = elf::load(&img, &mut mem).unwrap();
    assert_eq!(entry, 0x400100);
    assert!(mem.bytes[..100].iter().all(|&b| b == 0x5a));
    assert!(mem.bytes[100..200].iter().all(|&b| b == 0));
    // past memory_size is untouched
    assert!(mem.bytes[200..].iter().all(|&b| b == 0xaa));
}

#[test]
fn load_skips_non_loadable_segments() {
    let mut img = build_elf(0x400100, 0x40_0000, 16, 16, 0x5a);
    BigEndian::write_u32(&mut img[52..], 6); // segment type: phdr table
    let mut mem = MockMemory::new(0x40_0000, 64);
    elf::load(&img, &mut mem).unwrap();
    assert!(mem.bytes.iter().all(|&b| b == 0xaa));
}

#[test]
fn header_validation_rejects_mismatches() {
    let good = build_elf(0x400100, 0x40_0000, 16, 16, 0);
    let cases: &[(&dyn Fn(&mut Vec<u8>), ElfError)] = &[
        (&|img| img[0] = 0x7e, ElfError::BadMagic),
        (&|img| img[4] = 2, ElfError::BadClass),
        (&|img| img[5] = 1, ElfError::BadEncoding),
        (&|img| img[6] = 2, ElfError::BadVersion),
        (&|img| BigEndian::write_u16(&mut img[16..], 3), ElfError::BadType),
        (&|img| BigEndian::write_u16(&mut img[18..], 40), ElfError::BadMachine),
        (&|img| BigEndian::write_u32(&mut img[20..], 2), ElfError::BadVersion),
    ];
    for (mutate, expected) in cases {
        let mut img = good.clone();
        mutate(&mut img);
        let mut mem = MockMemory::new(0x40_0000, 64);
        assert_eq!(elf::load(&img, &mut mem), Err(*expected));
    }
}

#[test]
fn h8_300h_images_are_accepted() {
    let mut img = build_elf(0x400100, 0x40_0000, 16, 16, 0x11);
    BigEndian::write_u16(&mut img[18..], 47);
    let mut mem = MockMemory::new(0x40_0000, 64);
    assert!(elf::load(&img, &mut mem).is_ok());
}

#[test]
fn truncated_images_are_rejected() {
    let img = build_elf(0x400100, 0x40_0000, 100, 100, 0x5a);
    let mut mem = MockMemory::new(0x40_0000, 300);
    assert_eq!(elf::load(&img[..90], &mut mem), Err(ElfError::Truncated));
}

// --- xmodem --------------------------------------------------------------

#[test]
fn xmodem_receives_two_blocks() {
    let data: Vec<u8> = (0..=255u8).collect();
    let mut script = Vec::new();
    script.extend(frame(1, &data[..128], 0));
    script.extend(frame(2, &data[128..], 0));
    script.push(EOT);
    let mut serial = ScriptSerial::new(&script);

    let mut buf = [0u8; 512];
    let n = xmodem::recv(&mut serial, &mut buf).unwrap();
    assert_eq!(n, 256);
    assert_eq!(&buf[..256], &data[..]);
    assert_eq!(serial.tx, [NAK, ACK, ACK, ACK]);
}

#[test]
fn xmodem_asks_again_after_a_bad_checksum() {
    let data = [0x42u8; BLOCK_SIZE];
    let mut script = Vec::new();
    script.extend(frame(1, &data, 1)); // garbled
    script.extend(frame(1, &data, 0)); // resent
    script.push(EOT);
    let mut serial = ScriptSerial::new(&script);

    let mut buf = [0u8; 256];
    let n = xmodem::recv(&mut serial, &mut buf).unwrap();
    assert_eq!(n, 128);
    assert_eq!(&buf[..128], &data[..]);
    assert_eq!(serial.tx, [NAK, NAK, ACK, ACK]);
}

#[test]
fn xmodem_cancel_reports_an_error() {
    let mut serial = ScriptSerial::new(&[CAN]);
    let mut buf = [0u8; 256];
    assert_eq!(
        xmodem::recv(&mut serial, &mut buf),
        Err(XmodemError::Canceled)
    );
}

#[test]
fn xmodem_wont_overrun_its_buffer() {
    let data = [0u8; BLOCK_SIZE];
    let mut script = Vec::new();
    script.extend(frame(1, &data, 0));
    script.extend(frame(2, &data, 0));
    let mut serial = ScriptSerial::new(&script);

    let mut buf = [0u8; 128];
    assert_eq!(
        xmodem::recv(&mut serial, &mut buf),
        Err(XmodemError::BufferOverflow)
    );
}

// --- cli -----------------------------------------------------------------

fn transcript(serial: &ScriptSerial) -> String {
    String::from_utf8_lossy(&serial.tx).into_owned()
}

#[test]
fn unknown_commands_are_reported() {
    let mut serial = ScriptSerial::new(b"reboot\n");
    let mut buffer = [0u8; 256];
    let mut cli = Cli::new(&mut serial, &mut buffer);
    let mut mem = MockMemory::new(0, 16);
    assert_eq!(cli.step(&mut mem), None);
    let out = transcript(&serial);
    assert!(out.contains("kzload> "), "transcript: {out:?}");
    assert!(out.contains("unknown."), "transcript: {out:?}");
}

#[test]
fn dump_without_an_image_says_so() {
    let mut serial = ScriptSerial::new(b"dump\n");
    let mut buffer = [0u8; 256];
    let mut cli = Cli::new(&mut serial, &mut buffer);
    let mut mem = MockMemory::new(0, 16);
    assert_eq!(cli.step(&mut mem), None);
    let out = transcript(&serial);
    assert!(out.contains("size: ffffffff"), "transcript: {out:?}");
    assert!(out.contains("no data."), "transcript: {out:?}");
}

#[test]
fn run_without_an_image_fails() {
    let mut serial = ScriptSerial::new(b"run\n");
    let mut buffer = [0u8; 256];
    let mut cli = Cli::new(&mut serial, &mut buffer);
    let mut mem = MockMemory::new(0, 16);
    assert_eq!(cli.step(&mut mem), None);
    assert!(transcript(&serial).contains("run error!"));
}

#[test]
fn load_then_run_end_to_end() {
    // a real transfer: the image arrives over xmodem, padded to full
    // blocks, then `run` places it and reports the entry point
    let img = build_elf(0x400100, 0x40_0000, 100, 200, 0x5a);
    let mut padded = img.clone();
    padded.resize(256, 0x1a);

    let mut script = Vec::new();
    script.extend(b"load\r");
    script.extend(frame(1, &padded[..128], 0));
    script.extend(frame(2, &padded[128..], 0));
    script.push(EOT);
    script.extend(b"run\r");
    let mut serial = ScriptSerial::new(&script);

    let mut buffer = [0u8; 512];
    let mut cli = Cli::new(&mut serial, &mut buffer);
    let mut mem = MockMemory::new(0x40_0000, 300);

    assert_eq!(cli.step(&mut mem), None);
    assert_eq!(cli.step(&mut mem), Some(0x400100));

    let out = transcript(&serial);
    assert!(out.contains("XMODEM receive succeeded."), "transcript: {out:?}");
    assert!(
        out.contains("starting from entry point: 400100"),
        "transcript: {out:?}"
    );
    assert!(mem.bytes[..100].iter().all(|&b| b == 0x5a));
    assert!(mem.bytes[100..200].iter().all(|&b| b == 0));
}

#[test]
fn dump_formats_rows_of_sixteen() {
    let img: Vec<u8> = (0..24u8).collect();
    let mut padded = img.clone();
    padded.resize(128, 0);

    let mut script = Vec::new();
    script.extend(b"load\r");
    script.extend(frame(1, &padded, 0));
    script.push(EOT);
    script.extend(b"dump\r");
    let mut serial = ScriptSerial::new(&script);

    let mut buffer = [0u8; 256];
    let mut cli = Cli::new(&mut serial, &mut buffer);
    let mut mem = MockMemory::new(0, 16);
    cli.step(&mut mem);
    cli.step(&mut mem);

    let out = transcript(&serial);
    assert!(out.contains("size: 80"), "transcript: {out:?}");
    assert!(
        out.contains("00 01 02 03 04 05 06 07  08 09 0a 0b 0c 0d 0e 0f\r\n"),
        "transcript: {out:?}"
    );
}
