use log::{trace, warn};

use super::{check_capacity, ActiveBundle, ActiveTable, CustodyId};
use crate::error::Error;

/// Direct indexed table, one slot per custody id modulo the capacity.
///
/// Custody ids are handed out in increasing order and wrap around past
/// `u32::MAX`, so the live entry with the lowest id is found by walking
/// forward from `oldest_cid`. Only one id of each congruence class can be
/// tracked at a time.
#[derive(Debug, Clone)]
pub struct FixedSlotTable {
    slots: Vec<Option<ActiveBundle>>,
    oldest_cid: CustodyId,
    /// One past the highest custody id added so far.
    newest_cid: CustodyId,
    count: usize,
}

impl FixedSlotTable {
    pub fn new(capacity: usize) -> Result<FixedSlotTable, Error> {
        check_capacity(capacity)?;
        Ok(FixedSlotTable {
            slots: vec![None; capacity],
            oldest_cid: 0,
            newest_cid: 0,
            count: 0,
        })
    }

    fn slot(&self, cid: CustodyId) -> usize {
        cid as usize % self.slots.len()
    }
}

/// True if `a` comes before `b` once ids have wrapped.
fn precedes(a: CustodyId, b: CustodyId) -> bool {
    a != b && b.wrapping_sub(a) < CustodyId::MAX / 2
}

impl ActiveTable for FixedSlotTable {
    fn add(&mut self, bundle: ActiveBundle, overwrite: bool) -> Result<(), Error> {
        let i = self.slot(bundle.cid);
        match self.slots[i] {
            Some(existing) if !overwrite => {
                trace!("slot {} holds cid {}", i, existing.cid);
                return Err(Error::Duplicate);
            }
            Some(existing) => {
                if existing.cid != bundle.cid {
                    warn!("cid {} evicts cid {} from slot {}", bundle.cid, existing.cid, i);
                }
            }
            None => self.count += 1,
        }
        self.slots[i] = Some(bundle);

        if self.count == 1 || precedes(bundle.cid, self.oldest_cid) {
            self.oldest_cid = bundle.cid;
        }
        if self.count == 1 || !precedes(bundle.cid, self.newest_cid) {
            self.newest_cid = bundle.cid.wrapping_add(1);
        }
        Ok(())
    }

    fn next_oldest(&mut self) -> Result<ActiveBundle, Error> {
        if self.count == 0 {
            return Err(Error::NotFound);
        }
        while self.oldest_cid != self.newest_cid {
            if let Some(bundle) = self.slots[self.slot(self.oldest_cid)] {
                if bundle.cid == self.oldest_cid {
                    return Ok(bundle);
                }
            }
            self.oldest_cid = self.oldest_cid.wrapping_add(1);
        }
        Err(Error::NotFound)
    }

    fn remove(&mut self, cid: CustodyId) -> Result<ActiveBundle, Error> {
        let i = self.slot(cid);
        match self.slots[i] {
            Some(bundle) if bundle.cid == cid => {
                self.slots[i] = None;
                self.count -= 1;
                Ok(bundle)
            }
            _ => Err(Error::NotFound),
        }
    }

    fn available(&self, cid: CustodyId) -> bool {
        self.slots[self.slot(cid)].is_none()
    }

    fn count(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}
