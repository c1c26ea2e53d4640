//! ELF32 big-endian image validation and segment loading.

use byteorder::{BigEndian, ByteOrder};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ElfError {
    BadMagic,
    BadClass,
    BadEncoding,
    BadVersion,
    BadType,
    BadMachine,
    Truncated,
}

/// Where loaded segments land: raw physical memory on the target, an
/// inspectable buffer under test.
pub trait LoadMemory {
    fn copy(&mut self, phys: u32, data: &[u8]);
    fn zero(&mut self, phys: u32, len: u32);
}

pub struct PhysMemory;

impl LoadMemory for PhysMemory {
    fn copy(&mut self, phys: u32, data: &[u8]) {
        // Safety: segment addresses come from an image built against this
        // board's memory map; the link reserves the load region.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), phys as usize as *mut u8, data.len())
        };
    }

    fn zero(&mut self, phys: u32, len: u32) {
        // Safety: as above.
        unsafe { core::ptr::write_bytes(phys as usize as *mut u8, 0, len as usize) };
    }
}

const ET_EXEC: u16 = 2;
const EM_H8_300: u16 = 46;
const EM_H8_300H: u16 = 47;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

struct Header {
    entry: u32,
    phoff: u32,
    phentsize: u16,
    phnum: u16,
}

fn check(image: &[u8]) -> Result<Header, ElfError> {
    if image.len() < EHDR_SIZE {
        return Err(ElfError::Truncated);
    }
    if image[..4] != [0x7f, b'E', b'L', b'F'] {
        return Err(ElfError::BadMagic);
    }
    if image[4] != 1 {
        // ELF32
        return Err(ElfError::BadClass);
    }
    if image[5] != 2 {
        // big endian
        return Err(ElfError::BadEncoding);
    }
    if image[6] != 1 {
        return Err(ElfError::BadVersion);
    }
    if BigEndian::read_u16(&image[16..]) != ET_EXEC {
        return Err(ElfError::BadType);
    }
    let machine = BigEndian::read_u16(&image[18..]);
    if machine != EM_H8_300 && machine != EM_H8_300H {
        return Err(ElfError::BadMachine);
    }
    if BigEndian::read_u32(&image[20..]) != 1 {
        return Err(ElfError::BadVersion);
    }
    Ok(Header {
        entry: BigEndian::read_u32(&image[24..]),
        phoff: BigEndian::read_u32(&image[28..]),
        phentsize: BigEndian::read_u16(&image[42..]),
        phnum: BigEndian::read_u16(&image[44..]),
    })
}

fn load_program(image: &[u8], header: &Header, mem: &mut impl LoadMemory) -> Result<(), ElfError> {
    for i in 0..header.phnum as usize {
        let off = header.phoff as usize + i * header.phentsize as usize;
        let phdr = image.get(off..off + PHDR_SIZE).ok_or(ElfError::Truncated)?;
        if BigEndian::read_u32(phdr) != PT_LOAD {
            continue;
        }
        let offset = BigEndian::read_u32(&phdr[4..]) as usize;
        let phys = BigEndian::read_u32(&phdr[12..]);
        let file_size = BigEndian::read_u32(&phdr[16..]);
        let memory_size = BigEndian::read_u32(&phdr[20..]);
        let data = image
            .get(offset..offset + file_size as usize)
            .ok_or(ElfError::Truncated)?;
        mem.copy(phys, data);
        // data and BSS share the segment; the BSS tail has no bytes in the
        // file and is cleared here
        mem.zero(phys + file_size, memory_size.saturating_sub(file_size));
    }
    Ok(())
}

/// Validate `image`, place every loadable segment, and return the entry
/// address.
pub fn load(image: &[u8], mem: &mut impl LoadMemory) -> Result<u32, ElfError> {
    let header = check(image)?;
    load_program(image, &header, mem)?;
    Ok(header.entry)
}
