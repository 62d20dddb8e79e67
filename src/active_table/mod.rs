//! Bundles sent with a custody request and not yet acknowledged.
//!
//! Two policies exist behind the [`ActiveTable`] trait and one is picked per
//! channel when it is opened:
//!
//! - [`FixedSlotTable`] retransmits the smallest outstanding custody id,
//! - [`RobinHoodTable`] retransmits the bundle that has waited longest.

pub mod fixed_slot;
pub mod robin_hood;

pub use fixed_slot::FixedSlotTable;
pub use robin_hood::RobinHoodTable;

use serde::{Deserialize, Serialize};

use crate::dtntime::DtnTime;
use crate::error::Error;
use crate::storage::StorageId;

/// Custody id assigned to an outgoing bundle.
pub type CustodyId = u32;

/// A bundle awaiting acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveBundle {
    /// Storage handle of the stored bundle.
    pub sid: StorageId,
    pub cid: CustodyId,
    /// Time of the last (re)transmission.
    pub retx: DtnTime,
}

impl ActiveBundle {
    pub fn new(sid: StorageId, cid: CustodyId, retx: DtnTime) -> ActiveBundle {
        ActiveBundle { sid, cid, retx }
    }
}

/// Order in which outstanding bundles come up for retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetransmitOrder {
    /// Lowest custody id first, backed by [`FixedSlotTable`].
    SmallestCid,
    /// Earliest (re)transmission first, backed by [`RobinHoodTable`].
    #[default]
    OldestBundle,
}

pub trait ActiveTable: Send {
    /// Track `bundle`.
    ///
    /// With `overwrite` an entry already holding the bundle's slot is
    /// replaced; without it that case is reported as [`Error::Duplicate`].
    /// [`Error::Full`] means nothing can be added until an entry goes.
    fn add(&mut self, bundle: ActiveBundle, overwrite: bool) -> Result<(), Error>;

    /// The next bundle up for retransmission, left in the table.
    fn next_oldest(&mut self) -> Result<ActiveBundle, Error>;

    /// Stop tracking `cid` and hand back its entry.
    fn remove(&mut self, cid: CustodyId) -> Result<ActiveBundle, Error>;

    /// Whether a bundle with `cid` could be added right now.
    fn available(&self, cid: CustodyId) -> bool;

    fn count(&self) -> usize;

    fn capacity(&self) -> usize;
}

/// Allocate the table implementing `order`.
pub fn new_table(order: RetransmitOrder, capacity: usize) -> Result<Box<dyn ActiveTable>, Error> {
    Ok(match order {
        RetransmitOrder::SmallestCid => Box::new(FixedSlotTable::new(capacity)?),
        RetransmitOrder::OldestBundle => Box::new(RobinHoodTable::new(capacity)?),
    })
}

fn check_capacity(capacity: usize) -> Result<(), Error> {
    if capacity == 0 || capacity > u32::MAX as usize {
        return Err(Error::ParamError(format!(
            "active table size {} outside of 1..={}",
            capacity,
            u32::MAX
        )));
    }
    Ok(())
}
