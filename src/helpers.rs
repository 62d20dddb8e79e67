use core::num::ParseIntError;
use nanorand::{Rng, WyRand};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::active_table::CustodyId;

/// Seconds since the unix epoch, `0` if the clock is set before it.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn hexify(buf: &[u8]) -> String {
    let mut hexstr = String::new();
    for &b in buf {
        hexstr.push_str(&format!("{:02x?}", b));
    }
    hexstr
}

pub fn unhexify(s: &str) -> Result<Vec<u8>, ParseIntError> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..(i + 2).min(s.len())], 16))
        .collect()
}

/// `count` distinct custody ids below `bound` in random order.
///
/// Keeps drawing until enough distinct ids were found, so `count` must not
/// exceed `bound`.
pub fn rnd_cids(count: usize, bound: CustodyId) -> Vec<CustodyId> {
    let mut rng = WyRand::new();
    let count = count.min(bound as usize);
    let mut seen = std::collections::HashSet::with_capacity(count);
    let mut cids = Vec::with_capacity(count);
    while cids.len() < count {
        let cid = rng.generate_range(0..bound);
        if seen.insert(cid) {
            cids.push(cid);
        }
    }
    cids
}

/// Custody ids `0..count` with every `gap_every`th one left out, a typical
/// pattern of a lossy link.
pub fn lossy_cids(count: CustodyId, gap_every: CustodyId) -> Vec<CustodyId> {
    (0..count)
        .filter(|cid| gap_every == 0 || cid % gap_every != gap_every - 1)
        .collect()
}
