//! Custody transfer bookkeeping for the [DTN Bundle Protocol](https://tools.ietf.org/html/rfc5050)
//! with [aggregate custody signals](https://tools.ietf.org/html/draft-jenkins-aggregate-custody-signals-01).
//!
//! A [`Channel`] tracks both directions of custody transfer: the ids of
//! bundles received from peers are collected in a [`RangeTree`] and sent
//! back as aggregate custody signals, while bundles sent with a custody
//! request wait in an active table until a signal acknowledges them or they
//! are retransmitted.
//!
//! # Examples
//!
//! ```
//! use bplib::rbtree::{CidRange, RangeTree};
//! use bplib::{dacs, StatusFlags};
//!
//! let mut tree = RangeTree::new(8).unwrap();
//! for cid in [1, 2, 3, 7, 8] {
//!     tree.insert(cid).unwrap();
//! }
//! assert_eq!(tree.ranges(), vec![CidRange::new(1, 2), CidRange::new(7, 1)]);
//!
//! let mut flags = StatusFlags::empty();
//! let mut rec = vec![0; dacs::record_capacity(8)];
//! let len = dacs::encode(&mut tree, 8, &mut rec, &mut flags).unwrap();
//! assert_eq!(&rec[..len], &[0x40, 0x80, 1, 3, 3, 2]);
//! assert!(tree.is_empty());
//!
//! let mut acked = Vec::new();
//! let count = dacs::decode(&rec[..len], &mut flags, |cid| {
//!     acked.push(cid);
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(count, 5);
//! assert_eq!(acked, vec![1, 2, 3, 7, 8]);
//! ```
//!

#![forbid(unsafe_code)]

pub mod active_table;
pub mod channel;
pub mod config;
pub mod custody;
pub mod dacs;
pub mod dtntime;
pub mod error;
pub mod flags;
pub mod helpers;
pub mod rbtree;
pub mod sdnv;
pub mod storage;

pub use active_table::{ActiveBundle, ActiveTable, CustodyId, RetransmitOrder};
pub use channel::{Channel, OutboundBundle, Stats};
pub use config::{Attributes, WrapResponse};
pub use custody::{CustodyTracker, Destination};
pub use dtntime::{dtn_time_now, Clock, DtnTime, ManualClock, SystemClock};
pub use error::Error;
pub use flags::StatusFlags;
pub use helpers::{hexify, unhexify};
pub use rbtree::{CidRange, RangeTree};
pub use storage::{BundleGenerator, BundleMeta, MemoryStorage, Storage, StorageId, StoredBundle};
