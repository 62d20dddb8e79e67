//! A custody transfer channel.
//!
//! Holds the custody tracker for custody accepted from peers and the table
//! of bundles sent to peers, and drives both from the application's calls.
//! Nothing here runs on its own: retransmissions and timed custody signals
//! happen inside [`Channel::load`] and [`Channel::check_custody`].
//!
//! # Locking
//!
//! The custody tracker and the active table each sit behind their own
//! mutex, and a thread never holds both. Every acquisition goes through
//! [`hold`], which checks the rule in debug builds.

use core::cell::Cell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::active_table::{self, ActiveBundle, ActiveTable, CustodyId};
use crate::config::{Attributes, WrapResponse};
use crate::custody::{CustodyTracker, Destination};
use crate::dacs;
use crate::dtntime::{Clock, DtnTime};
use crate::error::Error;
use crate::flags::StatusFlags;
use crate::storage::{BundleGenerator, Storage, StorageId};

const CUSTODY_LOCK: u8 = 0x01;
const ACTIVE_LOCK: u8 = 0x02;

thread_local! {
    static HELD_LOCKS: Cell<u8> = const { Cell::new(0) };
}

/// Guard that records which channel lock the current thread holds.
struct Held<'a, T> {
    guard: MutexGuard<'a, T>,
    lock: u8,
}

fn hold<T>(mutex: &Mutex<T>, lock: u8) -> Held<'_, T> {
    HELD_LOCKS.with(|held| {
        debug_assert_eq!(
            held.get(),
            0,
            "custody tracker and active table locks must never be held together"
        );
        held.set(held.get() | lock);
    });
    Held {
        guard: mutex.lock(),
        lock,
    }
}

impl<T> Drop for Held<'_, T> {
    fn drop(&mut self) {
        HELD_LOCKS.with(|held| held.set(held.get() & !self.lock));
    }
}

impl<T> Deref for Held<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Held<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

struct ActiveState {
    table: Box<dyn ActiveTable>,
    /// Custody id for the next bundle sent.
    current_cid: CustodyId,
}

impl ActiveState {
    /// Drop an entry the scheduler has just taken from the table.
    fn forget(&mut self, cid: CustodyId) {
        let removed = self.table.remove(cid);
        if let Err(e) = &removed {
            warn!("cid {} missing from the active table: {}", cid, e);
        }
        debug_assert!(removed.is_ok(), "cid {} was not active", cid);
    }
}

#[derive(Debug, Default)]
struct Counters {
    lost: AtomicU64,
    expired: AtomicU64,
    acknowledged: AtomicU64,
    transmitted: AtomicU64,
    retransmitted: AtomicU64,
    received: AtomicU64,
    generated: AtomicU64,
    received_dacs: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Channel statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Bundles given up on before being acknowledged.
    pub lost: u64,
    pub expired: u64,
    pub acknowledged: u64,
    pub transmitted: u64,
    pub retransmitted: u64,
    /// Custody requests accepted from peers.
    pub received: u64,
    /// Data bundles generated from stored payloads.
    pub generated: u64,
    pub generated_dacs: u64,
    pub received_dacs: u64,
    /// Bundles currently awaiting acknowledgment.
    pub active: u64,
}

/// A bundle ready for the convergence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBundle {
    pub sid: StorageId,
    /// Custody id to place in the bundle, `None` without custody transfer.
    pub cid: Option<CustodyId>,
    pub data: Vec<u8>,
}

pub struct Channel<S, G, C> {
    attributes: Attributes,
    storage: S,
    generator: G,
    clock: C,
    custody: Mutex<CustodyTracker>,
    active: Mutex<ActiveState>,
    slot_freed: Condvar,
    stats: Counters,
}

impl<S, G, C> Channel<S, G, C>
where
    S: Storage,
    G: BundleGenerator,
    C: Clock,
{
    /// Allocate the custody tree and the active table sized by `attributes`.
    pub fn open(attributes: Attributes, storage: S, generator: G, clock: C) -> Result<Self, Error> {
        attributes.validate()?;
        let tracker = CustodyTracker::new(
            attributes.max_gaps_per_dacs,
            attributes.max_fills_per_dacs,
        )?;
        let table = active_table::new_table(
            attributes.retransmit_order,
            attributes.active_table_size as usize,
        )?;
        debug!(
            "opened channel: {:?} retransmission, {} active slots, {} gaps per dacs",
            attributes.retransmit_order, attributes.active_table_size, attributes.max_gaps_per_dacs
        );
        Ok(Channel {
            attributes,
            storage,
            generator,
            clock,
            custody: Mutex::new(tracker),
            active: Mutex::new(ActiveState {
                table,
                current_cid: 0,
            }),
            slot_freed: Condvar::new(),
            stats: Counters::default(),
        })
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    pub fn storage(&self) -> &S {
        &self.storage
    }
    pub fn generator(&self) -> &G {
        &self.generator
    }
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn sysnow(&self, flags: &mut StatusFlags) -> Option<DtnTime> {
        match self.clock.now() {
            Ok(now) => Some(now),
            Err(e) => {
                trace!("timeouts disabled: {}", e);
                *flags |= StatusFlags::UNRELIABLE_TIME;
                None
            }
        }
    }

    /// Hand a payload to the generator to be bundled and stored.
    pub fn store(
        &self,
        payload: &[u8],
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<(), Error> {
        match self.generator.generate(false, payload, timeout) {
            Ok(()) => {
                bump(&self.stats.generated);
                Ok(())
            }
            Err(e) => {
                *flags |= StatusFlags::for_error(&e);
                Err(e)
            }
        }
    }

    /// Next bundle to transmit.
    ///
    /// Overdue bundles in the active table are retransmitted first, expired
    /// ones are dropped on the way. Then a stored bundle is dequeued; if it
    /// requests custody it gets the next custody id and enters the active
    /// table, otherwise it is relinquished as soon as it is handed out.
    pub fn load(&self, timeout: Duration, flags: &mut StatusFlags) -> Result<OutboundBundle, Error> {
        let now = self.sysnow(flags);

        if let Some(now) = now {
            let mut custody = hold(&self.custody, CUSTODY_LOCK);
            if let Err(e) = custody.tick(now, self.attributes.dacs_rate, &self.generator, timeout, flags)
            {
                warn!("timed custody signal failed: {}", e);
            }
        }

        {
            let mut active = hold(&self.active, ACTIVE_LOCK);
            if let Some(out) = self.retransmit_due(&mut active, now, timeout, flags) {
                return Ok(out);
            }
            if let Some(out) = self.make_room(&mut active, now, timeout, flags)? {
                return Ok(out);
            }
        }

        let bundle = loop {
            let stored = self.storage.dequeue(timeout)?;
            match now {
                Some(now) if stored.meta.is_expired(now) => {
                    debug!("sid {} expired in storage", stored.sid);
                    self.discard(stored.sid, flags);
                    bump(&self.stats.expired);
                }
                _ => break stored,
            }
        };

        if !bundle.meta.request_custody {
            if let Err(e) = self.storage.relinquish(bundle.sid) {
                warn!("failed to relinquish sid {}: {}", bundle.sid, e);
                *flags |= StatusFlags::STORE_FAILURE;
            }
            bump(&self.stats.transmitted);
            return Ok(OutboundBundle {
                sid: bundle.sid,
                cid: None,
                data: bundle.data,
            });
        }

        let cid = {
            let mut active = hold(&self.active, ACTIVE_LOCK);
            let cid = active.current_cid;
            let entry = ActiveBundle::new(bundle.sid, cid, now.unwrap_or_default());
            if let Err(e) = active.table.add(entry, false) {
                drop(active);
                warn!("no active slot for sid {} under cid {}: {}", bundle.sid, cid, e);
                *flags |= StatusFlags::ACTIVE_TABLE_WRAP | StatusFlags::DROPPED;
                self.discard(bundle.sid, flags);
                bump(&self.stats.lost);
                return Err(e);
            }
            active.current_cid = cid.wrapping_add(1);
            cid
        };
        bump(&self.stats.transmitted);
        trace!("transmitting sid {} as cid {}", bundle.sid, cid);
        Ok(OutboundBundle {
            sid: bundle.sid,
            cid: Some(cid),
            data: bundle.data,
        })
    }

    /// Retransmit the oldest bundle if its timeout has passed.
    fn retransmit_due(
        &self,
        active: &mut Held<'_, ActiveState>,
        now: Option<DtnTime>,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Option<OutboundBundle> {
        let now = now?;
        if self.attributes.timeout == 0 {
            return None;
        }
        loop {
            let oldest = active.table.next_oldest().ok()?;
            if now < oldest.retx.saturating_add(self.attributes.timeout) {
                return None;
            }
            if let Some(out) = self.retransmit(active, oldest, Some(now), timeout, flags) {
                return Some(out);
            }
        }
    }

    /// Apply the wrap response until the next custody id has a slot.
    fn make_room(
        &self,
        active: &mut Held<'_, ActiveState>,
        now: Option<DtnTime>,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<Option<OutboundBundle>, Error> {
        let deadline = Instant::now() + timeout;
        while !active.table.available(active.current_cid) {
            *flags |= StatusFlags::ACTIVE_TABLE_WRAP;
            match self.attributes.wrap_response {
                WrapResponse::Resend => {
                    let oldest = active.table.next_oldest()?;
                    if let Some(out) = self.retransmit(active, oldest, now, timeout, flags) {
                        return Ok(Some(out));
                    }
                }
                WrapResponse::Block => {
                    let waited = self.slot_freed.wait_until(&mut active.guard, deadline);
                    if waited.timed_out() && !active.table.available(active.current_cid) {
                        return Err(Error::Timeout);
                    }
                }
                WrapResponse::Drop => {
                    let oldest = active.table.next_oldest()?;
                    active.table.remove(oldest.cid)?;
                    warn!("dropping cid {} to make room", oldest.cid);
                    *flags |= StatusFlags::DROPPED;
                    self.discard(oldest.sid, flags);
                    bump(&self.stats.lost);
                }
            }
        }
        Ok(None)
    }

    /// Send `entry` again, or drop it if it expired or can't be retrieved.
    ///
    /// With `cid_reuse` the entry is re-added under its own custody id
    /// without being removed first. Otherwise it moves to a fresh id, unless
    /// the fresh id has no free slot, in which case it keeps its own.
    fn retransmit(
        &self,
        active: &mut Held<'_, ActiveState>,
        entry: ActiveBundle,
        now: Option<DtnTime>,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Option<OutboundBundle> {
        let stored = match self.storage.retrieve(entry.sid, timeout) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("lost sid {} (cid {}): {}", entry.sid, entry.cid, e);
                *flags |= StatusFlags::STORE_FAILURE | StatusFlags::DROPPED;
                active.forget(entry.cid);
                bump(&self.stats.lost);
                return None;
            }
        };
        if let Some(now) = now {
            if stored.meta.is_expired(now) {
                debug!("cid {} expired before acknowledgment", entry.cid);
                active.forget(entry.cid);
                self.discard(entry.sid, flags);
                bump(&self.stats.expired);
                return None;
            }
        }

        let retx = now.unwrap_or(entry.retx);
        let cid = if self.attributes.cid_reuse {
            entry.cid
        } else {
            active.forget(entry.cid);
            let fresh = active.current_cid;
            if active.table.available(fresh) {
                active.current_cid = fresh.wrapping_add(1);
                fresh
            } else {
                entry.cid
            }
        };
        if let Err(e) = active
            .table
            .add(ActiveBundle::new(entry.sid, cid, retx), true)
        {
            warn!("cid {} could not be re-added: {}", cid, e);
        }
        bump(&self.stats.retransmitted);
        trace!("retransmitting sid {} as cid {}", entry.sid, cid);
        Some(OutboundBundle {
            sid: entry.sid,
            cid: Some(cid),
            data: stored.data,
        })
    }

    fn discard(&self, sid: StorageId, flags: &mut StatusFlags) {
        if let Err(e) = self.storage.relinquish(sid) {
            warn!("failed to relinquish sid {}: {}", sid, e);
            *flags |= StatusFlags::STORE_FAILURE;
        }
    }

    /// Accept custody of `cid` for a bundle from `node`.`service`.
    pub fn receive_custody(
        &self,
        cid: CustodyId,
        node: u64,
        service: u64,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<(), Error> {
        let now = self.sysnow(flags);
        bump(&self.stats.received);
        let mut custody = hold(&self.custody, CUSTODY_LOCK);
        let now = now.unwrap_or_else(|| custody.last_flush());
        custody.receive(
            cid,
            Destination::new(node, service),
            now,
            &self.generator,
            timeout,
            flags,
        )
    }

    /// Send an aggregate custody signal if `dacs_rate` seconds went by.
    pub fn check_custody(&self, timeout: Duration, flags: &mut StatusFlags) -> Result<(), Error> {
        let now = match self.sysnow(flags) {
            Some(now) => now,
            None => return Ok(()),
        };
        let mut custody = hold(&self.custody, CUSTODY_LOCK);
        custody.tick(now, self.attributes.dacs_rate, &self.generator, timeout, flags)
    }

    /// Send everything collected so far, regardless of `dacs_rate`.
    pub fn flush_custody(&self, timeout: Duration, flags: &mut StatusFlags) -> Result<(), Error> {
        let now = self.sysnow(flags);
        let mut custody = hold(&self.custody, CUSTODY_LOCK);
        let now = now.unwrap_or_else(|| custody.last_flush());
        custody.flush(now, &self.generator, timeout, flags)
    }

    /// Release every bundle acknowledged by an aggregate custody signal.
    ///
    /// Returns how many active bundles were acknowledged. Ids that are not
    /// active are flagged with `UNKNOWN_CID` and skipped.
    pub fn process_dacs(
        &self,
        rec: &[u8],
        _timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<u32, Error> {
        bump(&self.stats.received_dacs);
        let mut acknowledged = 0;
        let mut ack_flags = StatusFlags::empty();
        let result = dacs::decode(rec, flags, |cid| {
            let removed = {
                let mut active = hold(&self.active, ACTIVE_LOCK);
                let removed = active.table.remove(cid);
                if removed.is_ok() {
                    self.slot_freed.notify_all();
                }
                removed
            };
            match removed {
                Ok(bundle) => {
                    if let Err(e) = self.storage.relinquish(bundle.sid) {
                        ack_flags |= StatusFlags::STORE_FAILURE;
                        return Err(e);
                    }
                    acknowledged += 1;
                    bump(&self.stats.acknowledged);
                    Ok(())
                }
                Err(_) => {
                    trace!("cid {} is not active", cid);
                    ack_flags |= StatusFlags::UNKNOWN_CID;
                    Ok(())
                }
            }
        });
        *flags |= ack_flags;
        result.map(|_| acknowledged)
    }

    /// Bundles awaiting acknowledgment.
    pub fn active_count(&self) -> usize {
        hold(&self.active, ACTIVE_LOCK).table.count()
    }

    pub fn stats(&self) -> Stats {
        let generated_dacs = hold(&self.custody, CUSTODY_LOCK).records_generated();
        let active = self.active_count() as u64;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Stats {
            lost: load(&self.stats.lost),
            expired: load(&self.stats.expired),
            acknowledged: load(&self.stats.acknowledged),
            transmitted: load(&self.stats.transmitted),
            retransmitted: load(&self.stats.retransmitted),
            received: load(&self.stats.received),
            generated: load(&self.stats.generated),
            generated_dacs,
            received_dacs: load(&self.stats.received_dacs),
            active,
        }
    }
}
