//! XMODEM receive, checksum variant. The sender is driven with NAK until
//! its first block, then each 128-byte block is acknowledged or asked for
//! again.

use crate::serial::Serial;

const SOH: u8 = 0x01;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;

pub const BLOCK_SIZE: usize = 128;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum XmodemError {
    Canceled,
    OutOfSync,
    BufferOverflow,
}

enum Block {
    Good,
    Garbled,
}

/// Receive a full image into `buf`. Blocks until the sender finishes or the
/// transfer dies; returns the received byte count.
pub fn recv<S: Serial>(serial: &mut S, buf: &mut [u8]) -> Result<usize, XmodemError> {
    let mut receiving = false;
    let mut size = 0usize;
    let mut block_number: u8 = 1;
    loop {
        if !receiving {
            // keep inviting the sender until its first block
            serial.send_byte(NAK);
        }
        match serial.recv_byte() {
            EOT => {
                serial.send_byte(ACK);
                return Ok(size);
            }
            CAN => return Err(XmodemError::Canceled),
            SOH => {
                receiving = true;
                if buf.len() - size < BLOCK_SIZE {
                    return Err(XmodemError::BufferOverflow);
                }
                match read_block(serial, block_number, &mut buf[size..size + BLOCK_SIZE]) {
                    Block::Good => {
                        serial.send_byte(ACK);
                        size += BLOCK_SIZE;
                        block_number = block_number.wrapping_add(1);
                    }
                    // the sender repeats the block after a NAK
                    Block::Garbled => serial.send_byte(NAK),
                }
            }
            _ if receiving => return Err(XmodemError::OutOfSync),
            // line noise before the first block
            _ => {}
        }
    }
}

fn read_block<S: Serial>(serial: &mut S, expected: u8, out: &mut [u8]) -> Block {
    let number = serial.recv_byte();
    let complement = serial.recv_byte();
    let mut checksum: u8 = 0;
    for slot in out.iter_mut() {
        let b = serial.recv_byte();
        *slot = b;
        checksum = checksum.wrapping_add(b);
    }
    let received = serial.recv_byte();
    if number != expected || complement != !expected || received != checksum {
        return Block::Garbled;
    }
    Block::Good
}
