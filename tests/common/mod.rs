#![allow(dead_code)]

use bplib::{BundleGenerator, BundleMeta, Destination, Error, MemoryStorage, Storage};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;

/// Generator that stores data bundles and keeps aggregate custody signals
/// for inspection.
#[derive(Debug, Default)]
pub struct TestGenerator {
    storage: Option<Arc<MemoryStorage>>,
    meta: BundleMeta,
    pub prepared: Mutex<Vec<Destination>>,
    pub records: Mutex<Vec<(Destination, Vec<u8>)>>,
    failing: AtomicBool,
}

impl TestGenerator {
    pub fn new() -> TestGenerator {
        Default::default()
    }

    pub fn storing(storage: Arc<MemoryStorage>, meta: BundleMeta) -> TestGenerator {
        TestGenerator {
            storage: Some(storage),
            meta,
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<Vec<u8>> {
        self.records.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

impl BundleGenerator for TestGenerator {
    fn prepare(&self, destination: &Destination) -> Result<(), Error> {
        self.prepared.lock().push(*destination);
        Ok(())
    }

    fn generate(&self, is_record: bool, payload: &[u8], timeout: Duration) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::StoreFailure("generator offline".to_string()));
        }
        if is_record {
            let destination = self
                .prepared
                .lock()
                .last()
                .copied()
                .ok_or_else(|| Error::FailedResponse("record before prepare".to_string()))?;
            self.records.lock().push((destination, payload.to_vec()));
            return Ok(());
        }
        match &self.storage {
            Some(storage) => storage.enqueue(payload, self.meta, timeout).map(|_| ()),
            None => Ok(()),
        }
    }
}
