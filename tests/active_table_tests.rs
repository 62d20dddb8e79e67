use bplib::active_table::{self, ActiveBundle, ActiveTable, RobinHoodTable};
use bplib::{CustodyId, Error, RetransmitOrder};
use test_case::test_case;

fn bundle(cid: CustodyId, retx: u64) -> ActiveBundle {
    ActiveBundle::new(0x1000 + u64::from(cid), cid, retx)
}

fn table(order: RetransmitOrder, capacity: usize) -> Box<dyn ActiveTable> {
    active_table::new_table(order, capacity).unwrap()
}

#[test_case(RetransmitOrder::SmallestCid ; "fixed slot")]
#[test_case(RetransmitOrder::OldestBundle ; "robin hood")]
fn test_add_remove(order: RetransmitOrder) {
    let mut t = table(order, 16);
    for cid in 0..10 {
        t.add(bundle(cid, 100), false).unwrap();
    }
    assert_eq!(t.count(), 10);
    let e = bundle(4, 100);
    assert_eq!(t.remove(4), Ok(e));
    assert_eq!(t.count(), 9);
    assert_eq!(t.remove(4), Err(Error::NotFound));
    assert_eq!(t.count(), 9);
}

#[test_case(RetransmitOrder::SmallestCid ; "fixed slot")]
#[test_case(RetransmitOrder::OldestBundle ; "robin hood")]
fn test_empty(order: RetransmitOrder) {
    let mut t = table(order, 4);
    assert_eq!(t.next_oldest(), Err(Error::NotFound));
    assert_eq!(t.remove(0), Err(Error::NotFound));
    assert!(t.available(0));
    assert_eq!(t.capacity(), 4);
}

#[test_case(RetransmitOrder::SmallestCid ; "fixed slot")]
#[test_case(RetransmitOrder::OldestBundle ; "robin hood")]
fn test_duplicate_needs_overwrite(order: RetransmitOrder) {
    let mut t = table(order, 8);
    t.add(bundle(3, 10), false).unwrap();
    assert_eq!(t.add(bundle(3, 20), false), Err(Error::Duplicate));
    t.add(bundle(3, 20), true).unwrap();
    assert_eq!(t.count(), 1);
    assert_eq!(t.next_oldest().unwrap().retx, 20);
}

#[test_case(RetransmitOrder::SmallestCid ; "fixed slot")]
#[test_case(RetransmitOrder::OldestBundle ; "robin hood")]
fn test_oldest_after_acknowledgments(order: RetransmitOrder) {
    let mut t = table(order, 8);
    for cid in 0..6 {
        t.add(bundle(cid, u64::from(cid)), false).unwrap();
    }
    for cid in [0, 1, 3] {
        t.remove(cid).unwrap();
    }
    assert_eq!(t.next_oldest().unwrap().cid, 2);
    t.remove(2).unwrap();
    assert_eq!(t.next_oldest().unwrap().cid, 4);
}

#[test]
fn test_fixed_slot_is_keyed_by_cid() {
    let mut t = table(RetransmitOrder::SmallestCid, 4);
    t.add(bundle(0, 50), false).unwrap();
    t.add(bundle(1, 10), false).unwrap();
    // lowest id first, regardless of transmission time
    assert_eq!(t.next_oldest().unwrap().cid, 0);
    assert!(!t.available(4));
    assert!(t.available(6));
}

#[test]
fn test_robin_hood_is_ordered_by_time() {
    let mut t = table(RetransmitOrder::OldestBundle, 8);
    for cid in 0..4 {
        t.add(bundle(cid, 100), false).unwrap();
    }
    // retransmitting 0 under its own id moves it to the back
    t.add(bundle(0, 110), true).unwrap();
    assert_eq!(t.next_oldest().unwrap().cid, 1);
    for cid in [1, 2, 3] {
        t.remove(cid).unwrap();
    }
    assert_eq!(t.next_oldest().unwrap(), bundle(0, 110));
}

#[test]
fn test_robin_hood_fills_every_slot() {
    let mut t = table(RetransmitOrder::OldestBundle, 4);
    // all share home slot 1
    for cid in [1, 5, 9, 13] {
        assert!(t.available(cid));
        t.add(bundle(cid, 0), false).unwrap();
    }
    assert!(!t.available(17));
    assert_eq!(t.add(bundle(17, 0), false), Err(Error::Full));
    t.remove(9).unwrap();
    t.add(bundle(17, 0), false).unwrap();
    assert_eq!(t.count(), 4);
}

#[test_case(3, 1 ; "three entries, second removed")]
#[test_case(5, 2 ; "five entries, middle removed")]
#[test_case(6, 4 ; "six entries, next to last removed")]
fn test_robin_hood_chain_middle_removal(k: u32, victim: usize) {
    let capacity = 16;
    let mut t = RobinHoodTable::new(capacity).unwrap();
    let cids: Vec<CustodyId> = (0..k).map(|i| 3 + i * capacity as u32).collect();
    for (i, &cid) in cids.iter().enumerate() {
        t.add(bundle(cid, i as u64), false).unwrap();
    }
    assert_eq!(t.chain(3).len(), k as usize);

    let removed = cids[victim];
    assert_eq!(t.remove(removed).unwrap().cid, removed);

    let remaining: Vec<CustodyId> = cids.iter().copied().filter(|&c| c != removed).collect();
    let mut chained: Vec<CustodyId> = t.chain(3).iter().map(|b| b.cid).collect();
    chained.sort_unstable();
    assert_eq!(chained, remaining);
    let order: Vec<CustodyId> = t.time_order().iter().map(|b| b.cid).collect();
    assert_eq!(order, remaining);
    assert_eq!(t.next_oldest().unwrap().cid, remaining[0]);
    for &cid in &remaining {
        assert_eq!(t.remove(cid).unwrap().cid, cid);
    }
    assert_eq!(t.count(), 0);
}

#[test]
fn test_robin_hood_interleaved_chains() {
    let mut t = RobinHoodTable::new(8).unwrap();
    // 1, 9 and 17 chain at slot 1 and spill into 2 and 3
    for cid in [1, 9, 17] {
        t.add(bundle(cid, 0), false).unwrap();
    }
    // 2 and 3 reclaim their home slots
    t.add(bundle(2, 0), false).unwrap();
    t.add(bundle(3, 0), false).unwrap();
    assert_eq!(t.chain(2), vec![bundle(2, 0)]);
    assert_eq!(t.chain(3), vec![bundle(3, 0)]);
    let chained: Vec<CustodyId> = t.chain(1).iter().map(|b| b.cid).collect();
    assert_eq!(chained, vec![1, 9, 17]);

    t.remove(1).unwrap();
    for cid in [9, 17, 2, 3] {
        assert_eq!(t.remove(cid).unwrap().cid, cid);
    }
    assert_eq!(t.next_oldest(), Err(Error::NotFound));
}

#[test]
fn test_bad_capacity() {
    for order in [RetransmitOrder::SmallestCid, RetransmitOrder::OldestBundle] {
        assert!(matches!(
            active_table::new_table(order, 0),
            Err(Error::ParamError(_))
        ));
    }
}
