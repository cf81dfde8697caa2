//! Bit-string utilities and message forms
//!
//! Every codec in this crate reduces its output through [`BitString`]:
//! an MSB-first sequence of bits with no alignment requirement. The
//! [`truncate_bits`] primitive guarantees that a codec's output has
//! exactly the width it reports, and [`BitReader`] provides the
//! sequential consume protocol used to decode concatenated fields
//! without length markers.
//!
//! [`Message`] wraps a bit sequence in its three lossless forms:
//! binary text (`0b…`, one character per bit), hex text (`0x…`, four
//! bits per character) and raw bytes.

use core::fmt;

use crate::error::DecodeError;

/// A growable, MSB-first sequence of bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitString {
    bits: Vec<bool>,
}

impl BitString {
    /// Create an empty bit string
    #[inline]
    pub fn new() -> Self {
        Self { bits: Vec::new() }
    }

    /// Create an empty bit string with room for `capacity` bits
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bits: Vec::with_capacity(capacity),
        }
    }

    /// Number of bits
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// True if the bit string holds no bits
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Bit at position `index` (0 is the most significant)
    #[inline]
    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).copied()
    }

    /// Append a single bit
    #[inline]
    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Append the low `width` bits of `value`, most significant first
    pub fn push_uint(&mut self, value: u64, width: usize) {
        debug_assert!(width <= 64);
        for i in (0..width).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    /// Append all bits of another bit string
    #[inline]
    pub fn extend(&mut self, other: &BitString) {
        self.bits.extend_from_slice(&other.bits);
    }

    /// Append zero bits until the length is a multiple of 8
    pub fn pad_to_byte(&mut self) {
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
    }

    /// Copy of the bits in `start..end`
    pub fn slice(&self, start: usize, end: usize) -> BitString {
        BitString {
            bits: self.bits[start..end].to_vec(),
        }
    }

    /// Parse a binary-text form, with or without the `0b` prefix
    pub fn from_bin_str(text: &str) -> Result<Self, DecodeError> {
        let digits = text.strip_prefix("0b").unwrap_or(text);
        let mut bits = Vec::with_capacity(digits.len());
        for ch in digits.chars() {
            match ch {
                '0' => bits.push(false),
                '1' => bits.push(true),
                _ => {
                    return Err(DecodeError::InvalidMessage {
                        reason: format!("invalid binary digit '{ch}'"),
                    })
                }
            }
        }
        Ok(Self { bits })
    }

    /// Parse a hex-text form, with or without the `0x` prefix
    pub fn from_hex_str(text: &str) -> Result<Self, DecodeError> {
        let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
        let mut out = Self::with_capacity(digits.len() * 4);
        for ch in digits.chars() {
            let nibble = ch.to_digit(16).ok_or_else(|| DecodeError::InvalidMessage {
                reason: format!("invalid hex digit '{ch}'"),
            })?;
            out.push_uint(u64::from(nibble), 4);
        }
        Ok(out)
    }

    /// Build a bit string from raw bytes, MSB-first
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut out = Self::with_capacity(bytes.len() * 8);
        for &byte in bytes {
            out.push_uint(u64::from(byte), 8);
        }
        out
    }

    /// Binary-text form with `0b` prefix
    pub fn to_bin_string(&self) -> String {
        let mut out = String::with_capacity(self.bits.len() + 2);
        out.push_str("0b");
        for &bit in &self.bits {
            out.push(if bit { '1' } else { '0' });
        }
        out
    }

    /// Hex-text form with `0x` prefix.
    ///
    /// The bit sequence is interpreted as a big-endian integer and
    /// left-zero-padded to a whole number of nibbles, so a byte-aligned
    /// bit string converts without any length change.
    pub fn to_hex_string(&self) -> String {
        let nibbles = self.len().div_ceil(4);
        let aligned = truncate_bits(self, nibbles * 4);
        let mut out = String::with_capacity(nibbles + 2);
        out.push_str("0x");
        for chunk in aligned.bits.chunks(4) {
            let mut nibble = 0u32;
            for &bit in chunk {
                nibble = (nibble << 1) | u32::from(bit);
            }
            out.push(char::from_digit(nibble, 16).unwrap_or('0'));
        }
        out
    }

    /// Raw-byte form, left-zero-padded to a whole number of bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let bytes = self.len().div_ceil(8);
        let aligned = truncate_bits(self, bytes * 8);
        aligned
            .bits
            .chunks(8)
            .map(|chunk| {
                let mut byte = 0u8;
                for &bit in chunk {
                    byte = (byte << 1) | u8::from(bit);
                }
                byte
            })
            .collect()
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bin_string())
    }
}

/// Return exactly `width` bits: the low-order bits of the input,
/// left-zero-padded if the input is shorter.
///
/// This is total — there is no error condition — and idempotent for a
/// fixed width.
pub fn truncate_bits(bits: &BitString, width: usize) -> BitString {
    let len = bits.len();
    let mut out = BitString::with_capacity(width);
    if len >= width {
        out.bits.extend_from_slice(&bits.bits[len - width..]);
    } else {
        out.bits.resize(width - len, false);
        out.bits.extend_from_slice(&bits.bits);
    }
    out
}

/// Sequential bit cursor over a [`BitString`].
///
/// Cloning a reader is cheap and leaves the original position intact,
/// which is how data-dependent widths are measured without consuming.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bits: &'a BitString,
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader at the start of `bits`
    #[inline]
    pub fn new(bits: &'a BitString) -> Self {
        Self { bits, pos: 0 }
    }

    /// Current position in bits
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bits left to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bits.len() - self.pos
    }

    fn check(&self, width: usize) -> Result<(), DecodeError> {
        if self.remaining() < width {
            return Err(DecodeError::UnexpectedEof {
                needed: width,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Read `width` bits (at most 64) as an unsigned integer
    pub fn read_uint(&mut self, width: usize) -> Result<u64, DecodeError> {
        debug_assert!(width <= 64);
        self.check(width)?;
        let mut value = 0u64;
        for _ in 0..width {
            let bit = self.bits.bits[self.pos];
            self.pos += 1;
            value = (value << 1) | u64::from(bit);
        }
        Ok(value)
    }

    /// Read `width` bits as a bit string
    pub fn read_bits(&mut self, width: usize) -> Result<BitString, DecodeError> {
        self.check(width)?;
        let out = self.bits.slice(self.pos, self.pos + width);
        self.pos += width;
        Ok(out)
    }

    /// Advance `width` bits without materializing them
    pub fn skip(&mut self, width: usize) -> Result<(), DecodeError> {
        self.check(width)?;
        self.pos += width;
        Ok(())
    }
}

/// A complete message: a bit sequence with three lossless text/byte forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    bits: BitString,
}

impl Message {
    /// Wrap an already-built bit sequence
    #[inline]
    pub fn from_bits(bits: BitString) -> Self {
        Self { bits }
    }

    /// Parse the binary-text form (`0b…`)
    pub fn from_bin(text: &str) -> Result<Self, DecodeError> {
        Ok(Self {
            bits: BitString::from_bin_str(text)?,
        })
    }

    /// Parse the hex-text form (`0x…`)
    pub fn from_hex(text: &str) -> Result<Self, DecodeError> {
        Ok(Self {
            bits: BitString::from_hex_str(text)?,
        })
    }

    /// Wrap a raw byte buffer
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: BitString::from_bytes(bytes),
        }
    }

    /// Detect and parse a textual message form by its prefix
    pub fn auto(text: &str) -> Result<Self, DecodeError> {
        if text.starts_with("0b") {
            Self::from_bin(text)
        } else if text.starts_with("0x") || text.starts_with("0X") {
            Self::from_hex(text)
        } else {
            Err(DecodeError::UnknownFormat)
        }
    }

    /// The underlying bit sequence
    #[inline]
    pub fn bits(&self) -> &BitString {
        &self.bits
    }

    /// Message length in bits
    #[inline]
    pub fn len_bits(&self) -> usize {
        self.bits.len()
    }

    /// Binary-text form
    pub fn to_bin(&self) -> String {
        self.bits.to_bin_string()
    }

    /// Hex-text form
    pub fn to_hex(&self) -> String {
        self.bits.to_hex_string()
    }

    /// Raw-byte form
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }
}

impl core::str::FromStr for Message {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::auto(s)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_shortens_to_low_bits() {
        let bits = BitString::from_bin_str("0b110101").unwrap();
        assert_eq!(truncate_bits(&bits, 4).to_bin_string(), "0b0101");
    }

    #[test]
    fn test_truncate_pads_left() {
        let bits = BitString::from_bin_str("0b11").unwrap();
        assert_eq!(truncate_bits(&bits, 6).to_bin_string(), "0b000011");
    }

    #[test]
    fn test_truncate_idempotent() {
        let bits = BitString::from_bin_str("0b10011101").unwrap();
        let once = truncate_bits(&bits, 5);
        let twice = truncate_bits(&once, 5);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_push_and_read_uint_roundtrip() {
        let mut bits = BitString::new();
        bits.push_uint(0b101101, 6);
        bits.push_uint(3, 2);
        let mut reader = BitReader::new(&bits);
        assert_eq!(reader.read_uint(6).unwrap(), 0b101101);
        assert_eq!(reader.read_uint(2).unwrap(), 3);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_past_end() {
        let bits = BitString::from_bin_str("0b101").unwrap();
        let mut reader = BitReader::new(&bits);
        assert!(matches!(
            reader.read_uint(4),
            Err(DecodeError::UnexpectedEof {
                needed: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn test_hex_roundtrip() {
        let msg = Message::from_hex("0xfbef").unwrap();
        assert_eq!(msg.to_bin(), "0b1111101111101111");
        assert_eq!(msg.to_hex(), "0xfbef");
        assert_eq!(msg.to_bytes(), vec![0xfb, 0xef]);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let msg = Message::from_bytes(&[0xde, 0xad, 0x01]);
        assert_eq!(Message::from_bin(&msg.to_bin()).unwrap(), msg);
        assert_eq!(Message::from_hex(&msg.to_hex()).unwrap(), msg);
    }

    #[test]
    fn test_auto_detection() {
        assert!(Message::auto("0b1010").is_ok());
        assert!(Message::auto("0xA5").is_ok());
        assert!(matches!(
            Message::auto("error string"),
            Err(DecodeError::UnknownFormat)
        ));
    }

    #[test]
    fn test_pad_to_byte() {
        let mut bits = BitString::from_bin_str("0b10011").unwrap();
        bits.pad_to_byte();
        assert_eq!(bits.to_bin_string(), "0b10011000");
    }
}
