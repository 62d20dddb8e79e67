use core::fmt;
use core::time::Duration;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::active_table::CustodyId;
use crate::dacs;
use crate::dtntime::DtnTime;
use crate::error::Error;
use crate::flags::StatusFlags;
use crate::rbtree::RangeTree;
use crate::storage::BundleGenerator;

/// Node and service an aggregate custody signal is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub node: u64,
    pub service: u64,
}

impl Destination {
    pub fn new(node: u64, service: u64) -> Destination {
        Destination { node, service }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ipn:{}.{}", self.node, self.service)
    }
}

/// Collects the custody ids accepted on behalf of one destination and turns
/// them into aggregate custody signals.
///
/// Only one destination is tracked at a time. Custody accepted for another
/// destination first flushes whatever was collected so far.
#[derive(Debug, Clone)]
pub struct CustodyTracker {
    destination: Option<Destination>,
    tree: RangeTree,
    last_flush: DtnTime,
    record: Vec<u8>,
    /// The generator was prepared for `destination`.
    prebuilt: bool,
    max_fills_per_dacs: u32,
    records_generated: u64,
}

impl CustodyTracker {
    pub fn new(max_gaps_per_dacs: u32, max_fills_per_dacs: u32) -> Result<CustodyTracker, Error> {
        if max_fills_per_dacs == 0 {
            return Err(Error::ParamError(
                "max_fills_per_dacs must not be zero".to_string(),
            ));
        }
        Ok(CustodyTracker {
            destination: None,
            tree: RangeTree::new(max_gaps_per_dacs)?,
            last_flush: 0,
            record: vec![0; dacs::record_capacity(max_fills_per_dacs)],
            prebuilt: false,
            max_fills_per_dacs,
            records_generated: 0,
        })
    }

    pub fn destination(&self) -> Option<Destination> {
        self.destination
    }
    pub fn tree(&self) -> &RangeTree {
        &self.tree
    }
    pub fn last_flush(&self) -> DtnTime {
        self.last_flush
    }
    /// Aggregate custody signals handed to the generator successfully.
    pub fn records_generated(&self) -> u64 {
        self.records_generated
    }

    /// Accept custody of `cid` from `destination`.
    ///
    /// Ids seen before are accepted again and flagged with `DUPLICATES`. A
    /// full tree is flushed and the id retried; if the emptied tree still
    /// rejects it the tracker is broken and [`Error::FailedResponse`] is
    /// returned. Otherwise flush failures are reported after the id has been
    /// recorded.
    pub fn receive(
        &mut self,
        cid: CustodyId,
        destination: Destination,
        now: DtnTime,
        generator: &dyn BundleGenerator,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<(), Error> {
        let mut flushed = Ok(());
        if self.destination != Some(destination) {
            if !self.tree.is_empty() {
                flushed = self.flush(now, generator, timeout, flags);
            }
            debug!("tracking custody for {}", destination);
            self.destination = Some(destination);
            self.prebuilt = false;
        }
        self.accept(cid, now, generator, timeout, flags).and(flushed)
    }

    fn accept(
        &mut self,
        cid: CustodyId,
        now: DtnTime,
        generator: &dyn BundleGenerator,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<(), Error> {
        match self.tree.insert(cid) {
            Ok(()) => Ok(()),
            Err(Error::Duplicate) => {
                *flags |= StatusFlags::DUPLICATES;
                Ok(())
            }
            Err(Error::Full) => {
                *flags |= StatusFlags::RBTREE_FULL;
                let flushed = self.flush(now, generator, timeout, flags);
                match self.tree.insert(cid) {
                    Ok(()) => flushed,
                    Err(e) => {
                        error!("cid {} rejected by a flushed custody tree: {}", cid, e);
                        Err(Error::FailedResponse(format!(
                            "cid {} rejected after flush: {}",
                            cid, e
                        )))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Flush if at least `period` seconds went by since the last flush.
    /// A `period` of zero disables timed flushing.
    pub fn tick(
        &mut self,
        now: DtnTime,
        period: u64,
        generator: &dyn BundleGenerator,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<(), Error> {
        if period > 0 && now >= self.last_flush.saturating_add(period) && !self.tree.is_empty() {
            self.flush(now, generator, timeout, flags)
        } else {
            Ok(())
        }
    }

    /// Turn everything collected into aggregate custody signals.
    ///
    /// The tree is always drained completely. Every record is handed to the
    /// generator even if an earlier one failed; the first failure is
    /// returned.
    pub fn flush(
        &mut self,
        now: DtnTime,
        generator: &dyn BundleGenerator,
        timeout: Duration,
        flags: &mut StatusFlags,
    ) -> Result<(), Error> {
        let destination = match self.destination {
            Some(d) => d,
            None => return Ok(()),
        };
        let mut first_err: Option<Error> = None;

        if !self.prebuilt && !self.tree.is_empty() {
            match generator.prepare(&destination) {
                Ok(()) => self.prebuilt = true,
                Err(e) => {
                    warn!("failed to prepare custody signals for {}: {}", destination, e);
                    *flags |= StatusFlags::for_error(&e);
                    first_err.get_or_insert(e);
                }
            }
        }

        while !self.tree.is_empty() {
            let len = dacs::encode(
                &mut self.tree,
                self.max_fills_per_dacs,
                &mut self.record,
                flags,
            )?;
            match generator.generate(true, &self.record[..len], timeout) {
                Ok(()) => {
                    self.last_flush = now;
                    self.records_generated += 1;
                }
                Err(e) => {
                    warn!("failed to generate custody signal for {}: {}", destination, e);
                    *flags |= StatusFlags::for_error(&e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
