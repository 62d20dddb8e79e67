use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use humantime::format_rfc3339;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::error::Error;

/// Seconds since 2000-01-01T00:00:00Z.
pub type DtnTime = u64;

pub const SECONDS1970_TO2K: u64 = 946_684_800;
pub const DTN_TIME_EPOCH: DtnTime = 0;

pub trait DtnTimeHelpers {
    fn unix(self) -> u64;
    fn string(self) -> String;
}

impl DtnTimeHelpers for DtnTime {
    /// Convert to unix timestamp.
    fn unix(self) -> u64 {
        self + SECONDS1970_TO2K
    }

    /// Convert to human readable rfc3339 compliant time string.
    fn string(self) -> String {
        let d = UNIX_EPOCH + Duration::from_secs(self + SECONDS1970_TO2K);
        format_rfc3339(d).to_string()
    }
}

/// Get current time as DtnTime timestamp.
///
/// A system clock set before the DTN epoch cannot be trusted and yields
/// [`Error::UnreliableTime`].
pub fn dtn_time_now() -> Result<DtnTime, Error> {
    crate::helpers::unix_timestamp()
        .checked_sub(SECONDS1970_TO2K)
        .ok_or(Error::UnreliableTime)
}

/// Source of the current time for a channel.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<DtnTime, Error>;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Result<DtnTime, Error> {
        (**self).now()
    }
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<DtnTime, Error> {
        dtn_time_now()
    }
}

/// A clock that only moves when told to.
///
/// # Example
/// ```
/// use bplib::dtntime::{Clock, ManualClock};
///
/// let clock = ManualClock::new(100);
/// clock.advance(5);
/// assert_eq!(clock.now().unwrap(), 105);
///
/// clock.set_reliable(false);
/// assert!(clock.now().is_err());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    reliable: AtomicBool,
}

impl ManualClock {
    pub fn new(start: DtnTime) -> ManualClock {
        ManualClock {
            now: AtomicU64::new(start),
            reliable: AtomicBool::new(true),
        }
    }
    pub fn set(&self, now: DtnTime) {
        self.now.store(now, Ordering::SeqCst);
    }
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
    pub fn set_reliable(&self, reliable: bool) {
        self.reliable.store(reliable, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<DtnTime, Error> {
        if self.reliable.load(Ordering::SeqCst) {
            Ok(self.now.load(Ordering::SeqCst))
        } else {
            Err(Error::UnreliableTime)
        }
    }
}
