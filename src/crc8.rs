//! CRC8 integrity check
//!
//! Standard CRC-8 (polynomial 0x07, init 0x00, MSB-first, no
//! reflection, no final xor) over the byte-aligned form of a message.
//! The payload envelope appends the digest as the trailing byte and
//! verifies it against everything before it.

use crate::bits::Message;

/// CRC8 generator polynomial
const CRC8_POLYNOMIAL: u8 = 0x07;

/// Pre-computed CRC8 lookup table
static CRC8_TABLE: [u8; 256] = generate_crc8_table();

/// Generate the CRC8 lookup table at compile time
const fn generate_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Compute the CRC8 digest of the given data
#[inline]
pub fn compute(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc = CRC8_TABLE[(crc ^ byte) as usize];
    }
    crc
}

/// Verify that the last byte of `data` is the CRC8 of everything before it
#[inline]
pub fn verify(data: &[u8]) -> bool {
    match data.split_last() {
        Some((&expected, prefix)) => compute(prefix) == expected,
        None => false,
    }
}

/// Compute the CRC8 of a message, normalizing it to bytes first
#[inline]
pub fn compute_message(message: &Message) -> u8 {
    compute(&message.to_bytes())
}

/// Verify the trailing CRC8 byte of a message in any of its forms
#[inline]
pub fn verify_message(message: &Message) -> bool {
    verify(&message.to_bytes())
}
