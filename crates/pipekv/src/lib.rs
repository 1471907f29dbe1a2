//! pipekv - concurrent in-process key-value store.
//!
//! The store is a fixed array of buckets, each an ordered map behind its own
//! reader-writer lock, with a table-wide lock used as a quiesce barrier for
//! full traversals and snapshots. Batched operations acquire bucket locks in
//! a canonical order, which makes concurrent batches deadlock-free, and
//! publish per-key change notifications to subscribed sinks inside the
//! registry's critical section, which makes per-subscriber, per-key delivery
//! order equal commit order.
//!
//! # Lock order
//!
//! One total order: `global`, then bucket locks in ascending index (each
//! at most once per batch), then the registry lock. A bucket lock is only
//! ever taken while `global` is held at least shared; nothing acquires
//! `global` or a bucket lock while holding the registry lock. Both the
//! executor's notify path and subscription acceptance reach the registry
//! with store locks already held, so no cycle exists, and holding the
//! key's bucket shared across [`SubscriptionRegistry::subscribe`] is what
//! makes acceptance atomic against a concurrent delete.
//!
//! # Example
//!
//! ```
//! use pipekv::{BatchExecutor, Store, SubscriptionRegistry};
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::new());
//! let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&store), 8));
//! let exec = BatchExecutor::new(Arc::clone(&store), registry);
//!
//! exec.write_batch(&[("apple".into(), "red".into())]).unwrap();
//! let mut out = Vec::new();
//! exec.read_batch(&["apple".into()], &mut out).unwrap();
//! assert_eq!(out, b"[(apple,red)]\n");
//! ```

mod batch;
mod error;
mod registry;
mod sink;
mod snapshot;
mod store;

pub use batch::BatchExecutor;
pub use error::StoreError;
pub use registry::{SubscribeOutcome, SubscriberId, SubscriptionRegistry, UnsubscribeOutcome};
pub use sink::NotificationSink;
pub use snapshot::{write_listing, TableSnapshot};
pub use store::{bucket_index, Presence, Store, TABLE_BUCKETS};
