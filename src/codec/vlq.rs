// Variable-length integers used by the UPS and BPS formats.
//
// Little-endian groups of 7 bits. The final byte has bit 7 set; every
// non-final byte is stored minus one, so each encoding is unique and
// `0x80` alone means zero. This is not LEB128.
//
// Decoding, per byte:
//   terminal (bit 7 set):  value += (byte & 0x7f) << shift, stop
//   otherwise:             value += (byte | 0x80) << shift, shift += 7

use thiserror::Error;

use super::cursor::Cursor;

/// Maximum encoded length of a `u64` (ceil(64/7) = 10).
pub const MAX_VLQ_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `num` into `buf`, returning the number of bytes written (1..=10).
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VLQ_LEN]) -> usize {
    let mut i = 0;
    loop {
        let low = (num & 0x7f) as u8;
        num >>= 7;
        if num == 0 {
            buf[i] = 0x80 | low;
            return i + 1;
        }
        buf[i] = low;
        num -= 1;
        i += 1;
    }
}

/// Encode `num` and append it to `out`.
pub fn write_u64(out: &mut Vec<u8>, num: u64) {
    let mut buf = [0u8; MAX_VLQ_LEN];
    let len = encode_u64(num, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

/// Fold a signed delta into the unsigned form: bit 0 is the sign
/// (1 = negative), the remaining bits the magnitude.
#[inline]
pub fn zigzag(delta: i64) -> u64 {
    (delta.unsigned_abs() << 1) | u64::from(delta < 0)
}

/// Inverse of [`zigzag`].
#[inline]
pub fn unzigzag(raw: u64) -> i64 {
    let magnitude = (raw >> 1) as i64;
    if raw & 1 != 0 { -magnitude } else { magnitude }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a `u64` from the start of `data`.
/// Returns `(value, bytes_consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VlqError> {
    let mut acc = Accumulator::default();
    for (i, &byte) in data.iter().enumerate() {
        if let Some(value) = acc.push(byte)? {
            return Ok((value, i + 1));
        }
    }
    Err(VlqError::Underflow)
}

/// Decode a `u64` from a cursor, advancing it past the integer.
///
/// Unlike the cursor's fixed-width reads this never pads with zeros: an
/// integer cut short by the end of the buffer is an error.
pub fn read_from(cursor: &mut Cursor<'_>) -> Result<u64, VlqError> {
    let (value, len) = read_u64(cursor.rest())?;
    cursor.skip(len);
    Ok(value)
}

/// Decode a signed delta from a cursor.
pub fn read_signed_from(cursor: &mut Cursor<'_>) -> Result<i64, VlqError> {
    read_from(cursor).map(unzigzag)
}

#[derive(Default)]
struct Accumulator {
    value: u64,
    shift: u32,
}

impl Accumulator {
    /// Feed one byte; `Some` once the terminal byte has been seen.
    #[inline]
    fn push(&mut self, byte: u8) -> Result<Option<u64>, VlqError> {
        let (part, done) = if byte & 0x80 != 0 {
            (u64::from(byte & 0x7f), true)
        } else {
            (u64::from(byte | 0x80), false)
        };
        if self.shift >= u64::BITS || part > (u64::MAX >> self.shift) {
            return Err(VlqError::Overflow);
        }
        self.value = self
            .value
            .checked_add(part << self.shift)
            .ok_or(VlqError::Overflow)?;
        if done {
            return Ok(Some(self.value));
        }
        self.shift += 7;
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Encoded byte length of `num`.
pub fn sizeof_u64(num: u64) -> usize {
    let mut buf = [0u8; MAX_VLQ_LEN];
    encode_u64(num, &mut buf)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VlqError {
    /// Not enough input bytes to complete the integer.
    #[error("variable-length integer is truncated")]
    Underflow,
    /// Value does not fit in 64 bits.
    #[error("variable-length integer overflows 64 bits")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
