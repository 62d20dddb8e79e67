mod common;

use bplib::dacs::{ACS_ACK_MASK, ACS_REC_TYPE};
use bplib::rbtree::CidRange;
use bplib::{CustodyTracker, Destination, Error, StatusFlags};
use common::TestGenerator;
use core::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(10);

fn dest(node: u64) -> Destination {
    Destination::new(node, 1)
}

#[test]
fn test_full_then_flush() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(2, 64).unwrap();
    let mut flags = StatusFlags::empty();

    tracker.receive(0, dest(5), 100, &generator, TIMEOUT, &mut flags).unwrap();
    tracker.receive(2, dest(5), 100, &generator, TIMEOUT, &mut flags).unwrap();
    assert!(generator.records().is_empty());
    assert!(tracker.tree().is_full());

    tracker.receive(4, dest(5), 101, &generator, TIMEOUT, &mut flags).unwrap();
    assert!(flags.contains(StatusFlags::RBTREE_FULL));
    assert_eq!(
        generator.records(),
        vec![vec![ACS_REC_TYPE, ACS_ACK_MASK, 0, 1, 1, 1]]
    );
    assert_eq!(tracker.tree().ranges(), vec![CidRange::single(4)]);
    assert_eq!(tracker.last_flush(), 101);
    assert_eq!(tracker.records_generated(), 1);
    assert_eq!(*generator.prepared.lock(), vec![dest(5)]);
}

#[test]
fn test_duplicates_are_accepted() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(4, 64).unwrap();
    let mut flags = StatusFlags::empty();
    tracker.receive(7, dest(1), 0, &generator, TIMEOUT, &mut flags).unwrap();
    assert!(flags.is_empty());
    tracker.receive(7, dest(1), 0, &generator, TIMEOUT, &mut flags).unwrap();
    assert!(flags.contains(StatusFlags::DUPLICATES));
    assert_eq!(tracker.tree().size(), 1);
}

#[test]
fn test_destination_switch_flushes() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(8, 64).unwrap();
    let mut flags = StatusFlags::empty();

    tracker.receive(1, dest(1), 10, &generator, TIMEOUT, &mut flags).unwrap();
    tracker.receive(2, dest(1), 10, &generator, TIMEOUT, &mut flags).unwrap();
    tracker.receive(9, dest(2), 11, &generator, TIMEOUT, &mut flags).unwrap();

    let records = generator.records.lock().clone();
    assert_eq!(
        records,
        vec![(dest(1), vec![ACS_REC_TYPE, ACS_ACK_MASK, 1, 2])]
    );
    assert_eq!(tracker.destination(), Some(dest(2)));
    assert_eq!(tracker.tree().ranges(), vec![CidRange::single(9)]);

    tracker.flush(12, &generator, TIMEOUT, &mut flags).unwrap();
    assert_eq!(*generator.prepared.lock(), vec![dest(1), dest(2)]);
    assert_eq!(generator.records.lock()[1].0, dest(2));
    assert!(tracker.tree().is_empty());
}

#[test]
fn test_prepare_once_per_destination() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(8, 64).unwrap();
    let mut flags = StatusFlags::empty();
    for now in 0..3 {
        tracker.receive(now as u32, dest(3), now, &generator, TIMEOUT, &mut flags).unwrap();
        tracker.flush(now, &generator, TIMEOUT, &mut flags).unwrap();
    }
    assert_eq!(generator.records().len(), 3);
    assert_eq!(generator.prepared.lock().len(), 1);
}

#[test]
fn test_tick_period() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(8, 64).unwrap();
    let mut flags = StatusFlags::empty();

    // nothing collected, nothing sent
    tracker.tick(100, 5, &generator, TIMEOUT, &mut flags).unwrap();
    assert!(generator.records().is_empty());

    tracker.receive(1, dest(1), 100, &generator, TIMEOUT, &mut flags).unwrap();
    tracker.tick(100, 5, &generator, TIMEOUT, &mut flags).unwrap();
    assert_eq!(generator.records().len(), 1);
    assert_eq!(tracker.last_flush(), 100);

    tracker.receive(2, dest(1), 101, &generator, TIMEOUT, &mut flags).unwrap();
    tracker.tick(104, 5, &generator, TIMEOUT, &mut flags).unwrap();
    assert_eq!(generator.records().len(), 1);
    tracker.tick(105, 5, &generator, TIMEOUT, &mut flags).unwrap();
    assert_eq!(generator.records().len(), 2);
}

#[test]
fn test_tick_disabled() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(8, 64).unwrap();
    let mut flags = StatusFlags::empty();
    tracker.receive(1, dest(1), 0, &generator, TIMEOUT, &mut flags).unwrap();
    tracker.tick(1_000_000, 0, &generator, TIMEOUT, &mut flags).unwrap();
    assert!(generator.records().is_empty());
}

#[test]
fn test_flush_splits_records() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(16, 2).unwrap();
    let mut flags = StatusFlags::empty();
    for cid in [0, 2, 4, 6, 8] {
        tracker.receive(cid, dest(1), 0, &generator, TIMEOUT, &mut flags).unwrap();
    }
    tracker.flush(1, &generator, TIMEOUT, &mut flags).unwrap();
    assert_eq!(
        generator.records(),
        vec![
            vec![ACS_REC_TYPE, ACS_ACK_MASK, 0, 1, 1, 1],
            vec![ACS_REC_TYPE, ACS_ACK_MASK, 4, 1, 1, 1],
            vec![ACS_REC_TYPE, ACS_ACK_MASK, 8, 1],
        ]
    );
    assert_eq!(tracker.records_generated(), 3);
}

#[test]
fn test_generator_failure_still_drains() {
    let generator = TestGenerator::new();
    let mut tracker = CustodyTracker::new(8, 1).unwrap();
    let mut flags = StatusFlags::empty();
    tracker.receive(1, dest(1), 0, &generator, TIMEOUT, &mut flags).unwrap();
    tracker.receive(3, dest(1), 0, &generator, TIMEOUT, &mut flags).unwrap();

    generator.set_failing(true);
    let result = tracker.flush(50, &generator, TIMEOUT, &mut flags);
    assert!(matches!(result, Err(Error::StoreFailure(_))));
    assert!(flags.contains(StatusFlags::STORE_FAILURE));
    assert!(tracker.tree().is_empty());
    assert_eq!(tracker.records_generated(), 0);
    assert_eq!(tracker.last_flush(), 0);
}

#[test]
fn test_bad_parameters() {
    assert!(matches!(
        CustodyTracker::new(0, 64),
        Err(Error::ParamError(_))
    ));
    assert!(matches!(
        CustodyTracker::new(8, 0),
        Err(Error::ParamError(_))
    ));
}
