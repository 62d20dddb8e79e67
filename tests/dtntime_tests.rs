use bplib::dtntime::{self, Clock, DtnTimeHelpers, ManualClock, SystemClock, SECONDS1970_TO2K};
use bplib::helpers::unix_timestamp;
use bplib::Error;

#[test]
fn test_dtn_time_conversion() {
    let epoch: dtntime::DtnTime = dtntime::DTN_TIME_EPOCH;
    assert_eq!(epoch.unix(), SECONDS1970_TO2K);
    assert_eq!(epoch.string(), "2000-01-01T00:00:00Z");
    assert_eq!(86_400u64.string(), "2000-01-02T00:00:00Z");
}

#[test]
fn test_system_clock() {
    let now = SystemClock.now().unwrap();
    let unix = unix_timestamp();
    assert!(now.unix() <= unix && unix - now.unix() <= 1);
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(10);
    assert_eq!(clock.now(), Ok(10));
    clock.advance(5);
    assert_eq!(clock.now(), Ok(15));
    clock.set(3);
    assert_eq!(clock.now(), Ok(3));
    clock.set_reliable(false);
    assert_eq!(clock.now(), Err(Error::UnreliableTime));
    clock.set_reliable(true);
    assert_eq!(clock.now(), Ok(3));
}
