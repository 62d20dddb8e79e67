#![no_main]
use bplib::rbtree::RangeTree;
use bplib::*;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut flags = StatusFlags::empty();
    let mut tree = RangeTree::new(64).unwrap();
    let _ = dacs::decode(data, &mut flags, |cid| match tree.insert(cid) {
        Ok(()) | Err(Error::Full) => Ok(()),
        Err(e) => Err(e),
    });
    tree.validate().unwrap();
});
