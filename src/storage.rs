//! Interfaces to the collaborators that own bundle bytes.
//!
//! The custody layer never encodes bundles and never decides where they are
//! kept. It asks a [`BundleGenerator`] to turn payloads and aggregate custody
//! signals into bundles, and a [`Storage`] to hand stored bundles out and
//! drop them once custody has been acknowledged.

use core::time::Duration;
use log::trace;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::custody::Destination;
use crate::dtntime::DtnTime;
use crate::error::Error;

/// Handle of an object held by the storage service.
pub type StorageId = u64;

/// What the custody layer needs to know about a stored bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BundleMeta {
    /// Absolute expiration time, `0` never expires.
    pub expiration: DtnTime,
    pub request_custody: bool,
}

impl BundleMeta {
    pub fn is_expired(&self, now: DtnTime) -> bool {
        self.expiration != 0 && now >= self.expiration
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBundle {
    pub sid: StorageId,
    pub meta: BundleMeta,
    pub data: Vec<u8>,
}

pub trait Storage: Send + Sync {
    /// Queue a bundle for transmission.
    fn enqueue(&self, data: &[u8], meta: BundleMeta, timeout: Duration)
        -> Result<StorageId, Error>;
    /// Take the next queued bundle. It stays stored until relinquished.
    fn dequeue(&self, timeout: Duration) -> Result<StoredBundle, Error>;
    /// Fetch a bundle handed out earlier.
    fn retrieve(&self, sid: StorageId, timeout: Duration) -> Result<StoredBundle, Error>;
    /// Drop any working copy of the bundle but keep it stored.
    fn release(&self, sid: StorageId) -> Result<(), Error>;
    /// Delete the bundle for good.
    fn relinquish(&self, sid: StorageId) -> Result<(), Error>;
    /// Number of stored bundles.
    fn count(&self) -> usize;
}

pub trait BundleGenerator: Send + Sync {
    /// Called once before the first aggregate custody signal for
    /// `destination` is generated.
    fn prepare(&self, _destination: &Destination) -> Result<(), Error> {
        Ok(())
    }
    /// Build a bundle around `payload`. `is_record` marks an aggregate
    /// custody signal addressed to the destination last prepared.
    fn generate(&self, is_record: bool, payload: &[u8], timeout: Duration) -> Result<(), Error>;
}

impl<T: Storage + ?Sized> Storage for Arc<T> {
    fn enqueue(
        &self,
        data: &[u8],
        meta: BundleMeta,
        timeout: Duration,
    ) -> Result<StorageId, Error> {
        (**self).enqueue(data, meta, timeout)
    }
    fn dequeue(&self, timeout: Duration) -> Result<StoredBundle, Error> {
        (**self).dequeue(timeout)
    }
    fn retrieve(&self, sid: StorageId, timeout: Duration) -> Result<StoredBundle, Error> {
        (**self).retrieve(sid, timeout)
    }
    fn release(&self, sid: StorageId) -> Result<(), Error> {
        (**self).release(sid)
    }
    fn relinquish(&self, sid: StorageId) -> Result<(), Error> {
        (**self).relinquish(sid)
    }
    fn count(&self) -> usize {
        (**self).count()
    }
}

impl<T: BundleGenerator + ?Sized> BundleGenerator for Arc<T> {
    fn prepare(&self, destination: &Destination) -> Result<(), Error> {
        (**self).prepare(destination)
    }
    fn generate(&self, is_record: bool, payload: &[u8], timeout: Duration) -> Result<(), Error> {
        (**self).generate(is_record, payload, timeout)
    }
}

/******************************
 *
 * RAM storage
 *
 ******************************/

#[derive(Debug, Default)]
struct MemoryInner {
    next_sid: StorageId,
    queue: VecDeque<StorageId>,
    objects: HashMap<StorageId, StoredBundle>,
}

/// Storage keeping everything in memory, for tooling and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
    queued: Condvar,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        Default::default()
    }

    /// Number of bundles waiting to be dequeued.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl Storage for MemoryStorage {
    fn enqueue(
        &self,
        data: &[u8],
        meta: BundleMeta,
        _timeout: Duration,
    ) -> Result<StorageId, Error> {
        let mut inner = self.inner.lock();
        inner.next_sid += 1;
        let sid = inner.next_sid;
        inner.objects.insert(
            sid,
            StoredBundle {
                sid,
                meta,
                data: data.to_vec(),
            },
        );
        inner.queue.push_back(sid);
        trace!("stored sid {} ({} bytes)", sid, data.len());
        self.queued.notify_one();
        Ok(sid)
    }

    fn dequeue(&self, timeout: Duration) -> Result<StoredBundle, Error> {
        let mut inner = self.inner.lock();
        if inner.queue.is_empty() && !timeout.is_zero() {
            self.queued.wait_for(&mut inner, timeout);
        }
        while let Some(sid) = inner.queue.pop_front() {
            // skip bundles relinquished while still queued
            if let Some(bundle) = inner.objects.get(&sid) {
                return Ok(bundle.clone());
            }
        }
        Err(Error::Timeout)
    }

    fn retrieve(&self, sid: StorageId, _timeout: Duration) -> Result<StoredBundle, Error> {
        self.inner
            .lock()
            .objects
            .get(&sid)
            .cloned()
            .ok_or_else(|| Error::StoreFailure(format!("sid {} not stored", sid)))
    }

    fn release(&self, sid: StorageId) -> Result<(), Error> {
        if self.inner.lock().objects.contains_key(&sid) {
            Ok(())
        } else {
            Err(Error::StoreFailure(format!("sid {} not stored", sid)))
        }
    }

    fn relinquish(&self, sid: StorageId) -> Result<(), Error> {
        self.inner
            .lock()
            .objects
            .remove(&sid)
            .map(|_| ())
            .ok_or_else(|| Error::StoreFailure(format!("sid {} not stored", sid)))
    }

    fn count(&self) -> usize {
        self.inner.lock().objects.len()
    }
}
