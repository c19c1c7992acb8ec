use bitvec::prelude::*;

use crate::error::{DemuxError, Result};

/// A bit-level reader for parsing binary data streams.
///
/// Implements the bit reading operations used by the H.264/H.265/H.266 and
/// AV1 syntax:
/// - Reading individual bits and fixed length numbers (MSB first)
/// - Exponential Golomb codes (ue(v), se(v))
/// - AV1 leb128, uvlc, ns(n) and su(n)
///
/// When created with [`BitReader::with_emulation_prevention`], a `0x03` byte
/// following two zero bytes is skipped transparently.
///
/// Example:
/// ```
/// use esdemux::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);   // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
    emulation_prevention: bool,
    zero_run: u8,
    skipped_bytes: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
            emulation_prevention: false,
            zero_run: 0,
            skipped_bytes: 0,
        }
    }

    /// Creates a reader that drops emulation prevention bytes (`00 00 03`)
    /// while reading a NAL unit payload.
    pub fn with_emulation_prevention(data: &'a [u8]) -> Self {
        BitReader {
            emulation_prevention: true,
            ..BitReader::new(data)
        }
    }

    /// Reads a single bit from the stream.
    /// Returns true for 1, false for 0.
    ///
    /// Returns error if end of data is reached.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(DemuxError::OutOfData);
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.next_byte();
        }

        Ok(bit == 1)
    }

    /// Alias of [`read_bit`](Self::read_bit) matching the `u(1)` flags of the syntax tables.
    pub fn read_flag(&mut self) -> Result<bool> {
        self.read_bit()
    }

    fn next_byte(&mut self) {
        if self.emulation_prevention {
            if self.data[self.byte_offset] == 0 {
                self.zero_run = self.zero_run.saturating_add(1);
            } else {
                self.zero_run = 0;
            }
        }
        self.byte_offset += 1;
        self.bit_offset = 0;

        if self.emulation_prevention
            && self.zero_run >= 2
            && self.byte_offset < self.data.len()
            && self.data[self.byte_offset] == 0x03
        {
            self.byte_offset += 1;
            self.zero_run = 0;
            self.skipped_bytes += 1;
        }
    }

    /// Reads n bits and returns them as a number.
    /// The bits are interpreted as big-endian.
    ///
    /// Returns error if n > 64 or end of data is reached.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(DemuxError::InvalidData(format!(
                "cannot read {} bits into a 64 bit value",
                n
            )));
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }

        Ok(value)
    }

    /// Reads `n <= 32` bits as a `u32`.
    pub fn read_u32(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(DemuxError::InvalidData(format!(
                "cannot read {} bits into a 32 bit value",
                n
            )));
        }
        Ok(self.read_bits(n)? as u32)
    }

    /// Reads `n <= 8` bits as a `u8`.
    pub fn read_u8(&mut self, n: u32) -> Result<u8> {
        if n > 8 {
            return Err(DemuxError::InvalidData(format!(
                "cannot read {} bits into an 8 bit value",
                n
            )));
        }
        Ok(self.read_bits(n)? as u8)
    }

    /// `ue(v)`. Values must fit a `u32`, so a prefix of more than 31 zero
    /// bits is rejected with [`DemuxError::InvalidData`].
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(DemuxError::InvalidData("invalid Exp-Golomb code".into()));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let info = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) + info - 1) as u32)
    }

    /// `se(v)`, mapped from the `ue(v)` code number as 1, -1, 2, -2, ...
    /// Fails like [`read_golomb`](Self::read_golomb) on an overlong prefix.
    pub fn read_signed_golomb(&mut self) -> Result<i32> {
        let k = self.read_golomb()? as i64;
        if k == 0 {
            return Ok(0);
        }

        let magnitude = (k + 1) >> 1;
        let value = if k & 1 == 1 { magnitude } else { -magnitude };
        Ok(value as i32)
    }

    /// Reads an AV1 `leb128()` value of at most 8 bytes.
    pub fn read_leb128(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..8 {
            let byte = self.read_bits(8)?;
            value |= (byte & 0x7f) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Ok(value)
    }

    /// Reads an AV1 `uvlc()` value.
    pub fn read_uvlc(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u32;
        while !self.read_bit()? {
            leading_zeros += 1;
        }
        if leading_zeros >= 32 {
            return Ok(u32::MAX);
        }
        let value = self.read_bits(leading_zeros)?;
        Ok((value + (1u64 << leading_zeros) - 1) as u32)
    }

    /// Reads an AV1 `ns(n)` non-symmetric unsigned value in `0..n`.
    pub fn read_ns(&mut self, n: u32) -> Result<u32> {
        if n <= 1 {
            return Ok(0);
        }
        let w = 32 - n.leading_zeros();
        let m = (1u64 << w) - n as u64;
        let v = self.read_bits(w - 1)?;
        if v < m {
            return Ok(v as u32);
        }
        let extra_bit = self.read_bits(1)?;
        Ok(((v << 1) - m + extra_bit) as u32)
    }

    /// Reads an AV1 `su(n)` signed value.
    pub fn read_su(&mut self, n: u32) -> Result<i64> {
        if n == 0 {
            return Ok(0);
        }
        let value = self.read_bits(n)? as i64;
        let sign_mask = 1i64 << (n - 1);
        if value & sign_mask != 0 {
            Ok(value - 2 * sign_mask)
        } else {
            Ok(value)
        }
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    /// Aligns reader to next byte boundary by skipping remaining bits in current byte.
    pub fn align_byte(&mut self) -> Result<()> {
        if self.bit_offset != 0 {
            if self.byte_offset >= self.data.len() {
                return Err(DemuxError::OutOfData);
            }
            self.next_byte();
        }
        Ok(())
    }

    /// Returns true if the reader sits on a byte boundary.
    pub fn byte_aligned(&self) -> bool {
        self.bit_offset == 0
    }

    /// Returns number of bits available to read.
    ///
    /// Emulation prevention bytes that were not reached yet are still counted.
    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }

    /// Number of bits consumed so far, counting skipped emulation prevention bytes.
    pub fn position(&self) -> usize {
        self.byte_offset * 8 + self.bit_offset as usize
    }

    /// Number of emulation prevention bytes dropped so far.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped_bytes
    }

    /// `more_rbsp_data()`: true while there is payload before the rbsp stop bit.
    pub fn more_rbsp_data(&self) -> bool {
        let Some(last) = self.data.iter().rposition(|&b| b != 0) else {
            return false;
        };
        let stop_bit = last * 8 + 7 - self.data[last].trailing_zeros() as usize;
        self.position() < stop_bit
    }
}

/// Writes bits MSB first. The inverse of [`BitReader`].
///
/// Used to serialize container configuration records and to build
/// synthetic bitstreams.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    /// Creates an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the `n` low bits of `value`
    pub fn write_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.bits.push(flag);
    }

    /// Writes an unsigned Exp-Golomb code
    pub fn write_golomb(&mut self, value: u32) {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros();
        self.write_bits(0, len - 1);
        self.write_bits(code, len);
    }

    /// Writes a signed Exp-Golomb code
    pub fn write_signed_golomb(&mut self, value: i32) {
        let value = value as i64;
        let k = if value > 0 { 2 * value - 1 } else { -2 * value };
        self.write_golomb(k as u32);
    }

    pub fn write_leb128(&mut self, mut value: u64) {
        loop {
            let mut byte = value & 0x7f;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.write_bits(byte, 8);
            if value == 0 {
                break;
            }
        }
    }

    /// Writes the rbsp stop bit and zero alignment bits.
    pub fn write_trailing_bits(&mut self) {
        self.write_flag(true);
        self.align_zero();
    }

    pub fn align_zero(&mut self) {
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    pub fn byte_aligned(&self) -> bool {
        self.bits.len() % 8 == 0
    }

    /// Pads with zero bits to a byte boundary and returns the bytes
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.align_zero();
        self.bits.into_vec()
    }
}

/// Removes emulation prevention bytes from a NAL unit payload.
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(byte);
    }
    out
}

/// Inserts emulation prevention bytes so the payload contains no start code.
pub fn escape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64);
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(byte);
    }
    out
}

#[cfg(test)]
mod test_utils {
    use super::BitWriter;

    /// Encodes a single value as exp-Golomb code (H.264 9.1).
    pub fn encode_golomb(value: u32) -> Vec<u8> {
        encode_multiple_golomb(&[value])
    }

    /// Encodes multiple values into a single byte array, handling bit packing.
    pub fn encode_multiple_golomb(values: &[u32]) -> Vec<u8> {
        let mut writer = BitWriter::new();
        for &value in values {
            writer.write_golomb(value);
        }
        writer.into_bytes()
    }
}
