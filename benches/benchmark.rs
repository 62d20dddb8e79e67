#[macro_use]
extern crate criterion;

use criterion::black_box;
use criterion::Criterion;

use bplib::active_table::{self, ActiveBundle};
use bplib::helpers::{lossy_cids, rnd_cids};
use bplib::{dacs, RangeTree, RetransmitOrder, StatusFlags};

const MAX_FILLS: u32 = 64;

fn fill_tree(cids: &[u32], max_size: u32) -> RangeTree {
    let mut tree = RangeTree::new(max_size).unwrap();
    for &cid in cids {
        let _ = tree.insert(cid);
    }
    tree
}

fn drain(tree: &mut RangeTree, rec: &mut [u8]) -> usize {
    let mut flags = StatusFlags::empty();
    let mut total = 0;
    while !tree.is_empty() {
        total += dacs::encode(tree, MAX_FILLS, rec, &mut flags).unwrap();
    }
    total
}

fn criterion_benchmark_rbtree(c: &mut Criterion) {
    let sequential: Vec<u32> = (0..16384).collect();
    let random = rnd_cids(16384, 1 << 20);

    c.bench_function("rbtree insert sequential", |b| {
        b.iter(|| fill_tree(black_box(&sequential), 1024))
    });

    c.bench_function("rbtree insert random", |b| {
        b.iter(|| fill_tree(black_box(&random), 16384))
    });

    c.bench_function("rbtree insert and delete random", |b| {
        b.iter(|| {
            let mut tree = fill_tree(&random, 16384);
            for cid in random.iter().step_by(2) {
                let _ = tree.delete(*cid);
            }
            tree
        })
    });
}

fn criterion_benchmark_dacs(c: &mut Criterion) {
    let lossy = lossy_cids(16384, 16);
    let mut rec = vec![0; dacs::record_capacity(MAX_FILLS)];

    c.bench_function("dacs encode lossy", |b| {
        b.iter(|| {
            let mut tree = fill_tree(&lossy, 2048);
            drain(&mut tree, &mut rec)
        })
    });

    let mut tree = fill_tree(&lossy, 2048);
    let mut flags = StatusFlags::empty();
    let len = dacs::encode(&mut tree, MAX_FILLS, &mut rec, &mut flags).unwrap();
    let record = rec[..len].to_vec();

    c.bench_function("dacs decode", |b| {
        b.iter(|| {
            let mut flags = StatusFlags::empty();
            dacs::decode(black_box(&record), &mut flags, |cid| {
                black_box(cid);
                Ok(())
            })
        })
    });
}

fn criterion_benchmark_active_table(c: &mut Criterion) {
    for (name, order) in [
        ("fixed slot", RetransmitOrder::SmallestCid),
        ("robin hood", RetransmitOrder::OldestBundle),
    ] {
        c.bench_function(&format!("active table {} churn", name), |b| {
            b.iter(|| {
                let mut table = active_table::new_table(order, 4096).unwrap();
                for cid in 0..16384u32 {
                    if !table.available(cid) {
                        let oldest = table.next_oldest().unwrap();
                        table.remove(oldest.cid).unwrap();
                    }
                    table
                        .add(ActiveBundle::new(u64::from(cid), cid, u64::from(cid)), false)
                        .unwrap();
                }
                table.count()
            })
        });
    }
}

criterion_group!(
    benches,
    criterion_benchmark_rbtree,
    criterion_benchmark_dacs,
    criterion_benchmark_active_table
);
criterion_main!(benches);
