use log::trace;

use super::{check_capacity, ActiveBundle, ActiveTable, CustodyId};
use crate::error::Error;

type Index = u32;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    bundle: Option<ActiveBundle>,
    /// Hash chain of entries sharing a home slot.
    next: Option<Index>,
    prev: Option<Index>,
    /// Time order list, `before` points to the entry added earlier.
    before: Option<Index>,
    after: Option<Index>,
}

/// Open addressing hash table with explicit collision chains and a time
/// ordered list of all entries.
///
/// The first entry of a chain always sits in its home slot. When an entry
/// arrives whose home slot is held by a member of another chain, that member
/// is moved to a free slot so the newcomer can head its own chain. Removing
/// from a chain moves the chain's tail into the hole.
#[derive(Debug, Clone)]
pub struct RobinHoodTable {
    slots: Vec<Slot>,
    count: usize,
    oldest: Option<Index>,
    newest: Option<Index>,
}

impl RobinHoodTable {
    pub fn new(capacity: usize) -> Result<RobinHoodTable, Error> {
        check_capacity(capacity)?;
        Ok(RobinHoodTable {
            slots: vec![Slot::default(); capacity],
            count: 0,
            oldest: None,
            newest: None,
        })
    }

    fn home(&self, cid: CustodyId) -> Index {
        (cid as usize % self.slots.len()) as Index
    }

    fn slot(&self, i: Index) -> &Slot {
        &self.slots[i as usize]
    }

    fn slot_mut(&mut self, i: Index) -> &mut Slot {
        &mut self.slots[i as usize]
    }

    /// Slot `i` heads the chain homed at `i`.
    fn heads_chain(&self, i: Index) -> bool {
        self.slot(i)
            .bundle
            .is_some_and(|b| self.home(b.cid) == i)
    }

    fn find(&self, cid: CustodyId) -> Option<Index> {
        let home = self.home(cid);
        if !self.heads_chain(home) {
            return None;
        }
        let mut cur = Some(home);
        while let Some(i) = cur {
            if self.slot(i).bundle.is_some_and(|b| b.cid == cid) {
                return Some(i);
            }
            cur = self.slot(i).next;
        }
        None
    }

    fn find_open(&self, home: Index) -> Option<Index> {
        let len = self.slots.len();
        (1..len)
            .map(|step| ((home as usize + step) % len) as Index)
            .find(|&j| self.slot(j).bundle.is_none())
    }

    fn push_newest(&mut self, i: Index) {
        let newest = self.newest;
        {
            let slot = self.slot_mut(i);
            slot.before = newest;
            slot.after = None;
        }
        match newest {
            Some(n) => self.slot_mut(n).after = Some(i),
            None => self.oldest = Some(i),
        }
        self.newest = Some(i);
    }

    fn unlink_time(&mut self, i: Index) {
        let Slot { before, after, .. } = *self.slot(i);
        match before {
            Some(b) => self.slot_mut(b).after = after,
            None => self.oldest = after,
        }
        match after {
            Some(a) => self.slot_mut(a).before = before,
            None => self.newest = before,
        }
        let slot = self.slot_mut(i);
        slot.before = None;
        slot.after = None;
    }

    /// Point the time list neighbours of the entry at `from` to `to`.
    fn retarget_time(&mut self, from: Index, to: Index) {
        let Slot { before, after, .. } = *self.slot(from);
        match before {
            Some(b) => self.slot_mut(b).after = Some(to),
            None => self.oldest = Some(to),
        }
        match after {
            Some(a) => self.slot_mut(a).before = Some(to),
            None => self.newest = Some(to),
        }
    }

    /// Move a displaced chain member from `from` into the free slot `to`.
    fn relocate(&mut self, from: Index, to: Index) {
        let moved = *self.slot(from);
        trace!("relocate slot {} to {}", from, to);
        if let Some(p) = moved.prev {
            self.slot_mut(p).next = Some(to);
        }
        if let Some(n) = moved.next {
            self.slot_mut(n).prev = Some(to);
        }
        self.retarget_time(from, to);
        *self.slot_mut(to) = moved;
        *self.slot_mut(from) = Slot::default();
    }

    fn place(&mut self, i: Index, bundle: ActiveBundle, prev: Option<Index>) {
        *self.slot_mut(i) = Slot {
            bundle: Some(bundle),
            prev,
            ..Slot::default()
        };
        self.push_newest(i);
        self.count += 1;
    }

    fn overwrite(&mut self, i: Index, bundle: ActiveBundle, overwrite: bool) -> Result<(), Error> {
        if !overwrite {
            return Err(Error::Duplicate);
        }
        self.slot_mut(i).bundle = Some(bundle);
        self.unlink_time(i);
        self.push_newest(i);
        Ok(())
    }
}

impl ActiveTable for RobinHoodTable {
    fn add(&mut self, bundle: ActiveBundle, overwrite: bool) -> Result<(), Error> {
        let home = self.home(bundle.cid);

        if self.slot(home).bundle.is_none() {
            self.place(home, bundle, None);
            return Ok(());
        }

        if self.heads_chain(home) {
            let mut tail = home;
            let mut cur = Some(home);
            while let Some(i) = cur {
                if self.slot(i).bundle.is_some_and(|b| b.cid == bundle.cid) {
                    return self.overwrite(i, bundle, overwrite);
                }
                tail = i;
                cur = self.slot(i).next;
            }
            let open = self.find_open(home).ok_or(Error::Full)?;
            self.slot_mut(tail).next = Some(open);
            self.place(open, bundle, Some(tail));
        } else {
            let open = self.find_open(home).ok_or(Error::Full)?;
            self.relocate(home, open);
            self.place(home, bundle, None);
        }
        Ok(())
    }

    fn next_oldest(&mut self) -> Result<ActiveBundle, Error> {
        self.oldest
            .and_then(|i| self.slot(i).bundle)
            .ok_or(Error::NotFound)
    }

    fn remove(&mut self, cid: CustodyId) -> Result<ActiveBundle, Error> {
        let i = self.find(cid).ok_or(Error::NotFound)?;
        let bundle = self.slot(i).bundle.ok_or(Error::NotFound)?;
        self.unlink_time(i);

        let mut tail = i;
        while let Some(n) = self.slot(tail).next {
            tail = n;
        }

        if tail == i {
            if let Some(p) = self.slot(i).prev {
                self.slot_mut(p).next = None;
            }
            *self.slot_mut(i) = Slot::default();
        } else {
            // keep the chain contiguous: the tail's entry fills the hole
            if let Some(p) = self.slot(tail).prev {
                self.slot_mut(p).next = None;
            }
            self.retarget_time(tail, i);
            let moved = *self.slot(tail);
            let slot = self.slot_mut(i);
            slot.bundle = moved.bundle;
            slot.before = moved.before;
            slot.after = moved.after;
            *self.slot_mut(tail) = Slot::default();
        }
        self.count -= 1;
        Ok(bundle)
    }

    fn available(&self, _cid: CustodyId) -> bool {
        self.count < self.slots.len()
    }

    fn count(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl RobinHoodTable {
    /// Entries of the chain homed at `home`, head first.
    pub fn chain(&self, home: u32) -> Vec<ActiveBundle> {
        let mut out = Vec::new();
        if (home as usize) >= self.slots.len() || !self.heads_chain(home) {
            return out;
        }
        let mut cur = Some(home);
        while let Some(i) = cur {
            out.extend(self.slot(i).bundle);
            cur = self.slot(i).next;
        }
        out
    }

    /// All entries, oldest first.
    pub fn time_order(&self) -> Vec<ActiveBundle> {
        let mut out = Vec::with_capacity(self.count);
        let mut cur = self.oldest;
        while let Some(i) = cur {
            out.extend(self.slot(i).bundle);
            cur = self.slot(i).after;
        }
        out
    }
}
