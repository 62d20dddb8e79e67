//! Self-Delimiting Numeric Values.
//!
//! Big-endian groups of seven bits, every byte except the last has its high
//! bit set. Values are always written with the minimal number of bytes.

use crate::error::Error;
use crate::flags::StatusFlags;

/// Bytes needed to carry any `u64`.
pub const MAX_SDNV_LEN: usize = 10;

/// Bytes needed to carry any `u32`.
pub const MAX_SDNV32_LEN: usize = 5;

/// Number of bytes `value` occupies when encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Write `value` at `index`, returning the index just past it.
///
/// Fails with `SdnvOverflow` when the buffer has no room left; the buffer
/// past `index` is left untouched in that case.
pub fn write(
    buf: &mut [u8],
    index: usize,
    value: u64,
    flags: &mut StatusFlags,
) -> Result<usize, Error> {
    let len = encoded_len(value);
    if index + len > buf.len() {
        *flags |= StatusFlags::SDNV_OVERFLOW;
        return Err(Error::SdnvOverflow);
    }
    for i in 0..len {
        let shift = 7 * (len - 1 - i);
        let mut byte = ((value >> shift) & 0x7F) as u8;
        if i + 1 < len {
            byte |= 0x80;
        }
        buf[index + i] = byte;
    }
    Ok(index + len)
}

/// Read a value starting at `index`, returning it and the index past it.
pub fn read(buf: &[u8], index: usize, flags: &mut StatusFlags) -> Result<(u64, usize), Error> {
    let mut value: u64 = 0;
    let mut i = index;
    loop {
        let byte = match buf.get(i) {
            Some(b) => *b,
            None => {
                *flags |= StatusFlags::SDNV_INCOMPLETE;
                return Err(Error::SdnvIncomplete);
            }
        };
        if value > (u64::MAX >> 7) {
            *flags |= StatusFlags::SDNV_OVERFLOW;
            return Err(Error::SdnvOverflow);
        }
        value = (value << 7) | u64::from(byte & 0x7F);
        i += 1;
        if byte & 0x80 == 0 {
            return Ok((value, i));
        }
    }
}
