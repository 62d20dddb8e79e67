//! Aggregate custody signal records.
//!
//! ```text
//! +------+--------+-----------+----------+-----------+----------+-----+
//! | 0x40 | status | first cid | run      | gap       | run      | ... |
//! | u8   | u8     | sdnv      | sdnv     | sdnv      | sdnv     |     |
//! +------+--------+-----------+----------+-----------+----------+-----+
//! ```
//!
//! The first run acknowledges `run` ids starting at the first cid, each
//! following pair skips `gap` ids and acknowledges the next `run`.

use log::{debug, trace};

use crate::active_table::CustodyId;
use crate::error::Error;
use crate::flags::StatusFlags;
use crate::rbtree::{CidRange, RangeTree};
use crate::sdnv;

/// Administrative record type of an aggregate custody signal.
pub const ACS_REC_TYPE: u8 = 0x40;
/// Status bit reporting that custody was accepted.
pub const ACS_ACK_MASK: u8 = 0x80;

const HEADER_LEN: usize = 2;

/// Buffer size needed for a record carrying `max_fills` ranges.
pub fn record_capacity(max_fills: u32) -> usize {
    HEADER_LEN + sdnv::MAX_SDNV32_LEN * (1 + 2 * max_fills as usize)
}

/// Move up to `max_fills` of the smallest ranges out of `tree` into `rec`.
///
/// Returns the length of the record. The ranges written are gone from the
/// tree, which is drained without rebalancing: keep calling until the tree
/// is empty before touching it otherwise.
pub fn encode(
    tree: &mut RangeTree,
    max_fills: u32,
    rec: &mut [u8],
    flags: &mut StatusFlags,
) -> Result<usize, Error> {
    if rec.len() < record_capacity(max_fills) {
        return Err(Error::ParamError(format!(
            "record buffer of {} bytes cannot hold {} fills",
            rec.len(),
            max_fills
        )));
    }
    rec[0] = ACS_REC_TYPE;
    rec[1] = ACS_ACK_MASK;
    let mut index = HEADER_LEN;

    tree.iterate_first();
    let mut prev: Option<CidRange> = None;
    let mut fills = 0;
    while fills < max_fills {
        let range = match tree.iterate_next(true, false) {
            Some(range) => range,
            None => break,
        };
        index = match prev {
            None => sdnv::write(rec, index, u64::from(range.value), flags)?,
            Some(p) => {
                let gap = u64::from(range.value) - u64::from(p.upper()) - 1;
                sdnv::write(rec, index, gap, flags)?
            }
        };
        index = sdnv::write(rec, index, range.span(), flags)?;
        prev = Some(range);
        fills += 1;
    }
    trace!("encoded {} fills into {} bytes", fills, index);
    Ok(index)
}

/// Walk a received record and call `ack` for every acknowledged custody id.
///
/// Ids are only acknowledged when the record reports success. Processing
/// goes on after `ack` fails; the count of successful calls is returned, or
/// the first failure if there was one. A malformed tail stops processing
/// and is reported through `flags` and the result.
pub fn decode<F>(rec: &[u8], flags: &mut StatusFlags, mut ack: F) -> Result<u32, Error>
where
    F: FnMut(CustodyId) -> Result<(), Error>,
{
    if rec.len() < HEADER_LEN {
        *flags |= StatusFlags::SDNV_INCOMPLETE;
        return Err(Error::SdnvIncomplete);
    }
    if rec[0] != ACS_REC_TYPE {
        *flags |= StatusFlags::UNKNOWN_REC;
        return Err(Error::UnknownRecord(rec[0]));
    }
    let succeeded = rec[1] & ACS_ACK_MASK != 0;
    let (mut cid, mut index) = sdnv::read(rec, HEADER_LEN, flags)?;

    let id_space = u64::from(CustodyId::MAX) + 1;
    let mut acked = true;
    let mut count = 0;
    let mut first_err: Option<Error> = None;
    while index < rec.len() {
        let fill = match sdnv::read(rec, index, flags) {
            Ok((fill, next)) => {
                index = next;
                fill
            }
            Err(e) => {
                first_err.get_or_insert(e);
                break;
            }
        };
        let end = match cid.checked_add(fill) {
            Some(end) if end <= id_space => end,
            _ => {
                *flags |= StatusFlags::SDNV_OVERFLOW;
                first_err.get_or_insert(Error::SdnvOverflow);
                break;
            }
        };
        if acked && succeeded {
            for c in cid..end {
                match ack(c as CustodyId) {
                    Ok(()) => count += 1,
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        cid = end;
        acked = !acked;
    }
    debug!("aggregate custody signal acknowledged {} bundles", count);
    match first_err {
        Some(e) => Err(e),
        None => Ok(count),
    }
}
