use crate::error::StoreError;
use crate::registry::SubscriptionRegistry;
use crate::store::{bucket_index, Bucket, Store};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::Arc;

/// Executes batched operations against the store with a canonical lock
/// order.
///
/// Every batch sorts its keys case-insensitively, takes the table lock
/// shared, then takes each referenced bucket lock exactly once in ascending
/// index order. Two concurrent batches therefore cannot deadlock, and a
/// full traversal (which takes the table lock exclusive) observes each
/// batch entirely or not at all.
pub struct BatchExecutor {
    store: Arc<Store>,
    registry: Arc<SubscriptionRegistry>,
}

/// Case-insensitive byte comparison, the batch ordering relation.
fn cmp_keys(a: &str, b: &str) -> std::cmp::Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

/// Indices of `keys` in sorted application order. The sort is stable, so
/// duplicate keys apply in input order.
fn application_order<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<usize> {
    let keys: Vec<&str> = keys.collect();
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&i, &j| cmp_keys(keys[i], keys[j]));
    order
}

/// Releases bucket guards in reverse acquisition order.
fn release_in_reverse<G>(mut guards: BTreeMap<usize, G>) {
    while guards.pop_last().is_some() {}
}

impl BatchExecutor {
    pub fn new(store: Arc<Store>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { store, registry }
    }

    #[inline]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[inline]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Applies every pair, then publishes one changed-record per committed
    /// pair to that key's current subscribers.
    ///
    /// The whole batch is validated before any lock is taken; a key with an
    /// invalid prefix rejects the batch.
    pub fn write_batch(&self, pairs: &[(String, String)]) -> Result<(), StoreError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let buckets = pairs
            .iter()
            .map(|(key, _)| bucket_index(key))
            .collect::<Result<Vec<_>, _>>()?;
        let order = application_order(pairs.iter().map(|(key, _)| key.as_str()));
        let referenced: BTreeSet<usize> = buckets.iter().copied().collect();

        let _global = self.store.global().read();
        let mut guards: BTreeMap<usize, RwLockWriteGuard<'_, Bucket>> = referenced
            .iter()
            .map(|&index| (index, self.store.bucket(index).write()))
            .collect();

        for i in order {
            let (key, value) = &pairs[i];
            let bucket = guards
                .get_mut(&buckets[i])
                .expect("every referenced bucket is locked");
            bucket.insert(key.clone(), value.clone());
            self.registry.notify_changed(key, value);
        }
        release_in_reverse(guards);
        Ok(())
    }

    /// Reads every key in sorted order, writing one bracketed sequence of
    /// `(key,value)` tuples; absent keys (and keys that hash nowhere)
    /// produce the `KVSERROR` form.
    pub fn read_batch(&self, keys: &[String], out: &mut impl Write) -> io::Result<()> {
        let order = application_order(keys.iter().map(String::as_str));
        let buckets: Vec<Option<usize>> =
            keys.iter().map(|key| bucket_index(key).ok()).collect();
        let referenced: BTreeSet<usize> = buckets.iter().flatten().copied().collect();

        let _global = self.store.global().read();
        let guards: BTreeMap<usize, RwLockReadGuard<'_, Bucket>> = referenced
            .iter()
            .map(|&index| (index, self.store.bucket(index).read()))
            .collect();

        write!(out, "[")?;
        for i in order {
            let key = &keys[i];
            let value = buckets[i].and_then(|index| guards[&index].get(key));
            match value {
                Some(value) => write!(out, "({key},{value})")?,
                None => write!(out, "({key},KVSERROR)")?,
            }
        }
        writeln!(out, "]")?;
        release_in_reverse(guards);
        Ok(())
    }

    /// Deletes every key in sorted order. For each removed entry the key's
    /// subscribers are drained and receive their deleted-record atomically.
    /// Missing keys are listed as `(key,KVSMISSING)` - the bracketed line
    /// appears only if at least one key was missing.
    pub fn delete_batch(&self, keys: &[String], out: &mut impl Write) -> io::Result<()> {
        let order = application_order(keys.iter().map(String::as_str));
        let buckets: Vec<Option<usize>> =
            keys.iter().map(|key| bucket_index(key).ok()).collect();
        let referenced: BTreeSet<usize> = buckets.iter().flatten().copied().collect();

        let _global = self.store.global().read();
        let mut guards: BTreeMap<usize, RwLockWriteGuard<'_, Bucket>> = referenced
            .iter()
            .map(|&index| (index, self.store.bucket(index).write()))
            .collect();

        let mut any_missing = false;
        for i in order {
            let key = &keys[i];
            let removed = buckets[i]
                .and_then(|index| guards.get_mut(&index))
                .is_some_and(|bucket| bucket.remove(key).is_some());
            if removed {
                self.registry.notify_deleted_and_drain(key);
            } else {
                if !any_missing {
                    write!(out, "[")?;
                    any_missing = true;
                }
                write!(out, "({key},KVSMISSING)")?;
            }
        }
        if any_missing {
            writeln!(out, "]")?;
        }
        release_in_reverse(guards);
        Ok(())
    }
}
