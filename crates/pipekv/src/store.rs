use crate::error::StoreError;
use crate::snapshot::TableSnapshot;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Number of buckets in the table.
///
/// The bucket of a key is decided by its first character: letters map to
/// their alphabet position, digits fold into the first ten slots. The
/// mapping is part of the snapshot format (it fixes traversal order), so it
/// is not a tuning knob.
pub const TABLE_BUCKETS: usize = 26;

pub(crate) type Bucket = BTreeMap<String, String>;

/// Returns the bucket index for `key`, or an error for keys whose first
/// character is neither an ASCII letter nor a digit.
pub fn bucket_index(key: &str) -> Result<usize, StoreError> {
    let first = key.bytes().next().ok_or(StoreError::EmptyKey)?;
    match first.to_ascii_lowercase() {
        b @ b'a'..=b'z' => Ok(usize::from(b - b'a')),
        b @ b'0'..=b'9' => Ok(usize::from(b - b'0')),
        _ => Err(StoreError::InvalidKeyPrefix {
            key: key.to_owned(),
        }),
    }
}

/// Whether a `put` created or overwrote the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Inserted,
    Replaced,
}

/// The sharded table.
///
/// Single-key operations hold `global` shared plus one bucket lock. Full
/// traversals ([`Store::for_each`], [`Store::clone_contents`]) hold `global`
/// exclusive, which quiesces every in-flight batch before the first bucket
/// is visited.
pub struct Store {
    global: RwLock<()>,
    buckets: [RwLock<Bucket>; TABLE_BUCKETS],
}

impl Store {
    pub fn new() -> Self {
        Self {
            global: RwLock::new(()),
            buckets: std::array::from_fn(|_| RwLock::new(Bucket::new())),
        }
    }

    /// The quiesce lock; batches hold it shared, traversals exclusive.
    #[inline]
    pub(crate) fn global(&self) -> &RwLock<()> {
        &self.global
    }

    #[inline]
    pub(crate) fn bucket(&self, index: usize) -> &RwLock<Bucket> {
        &self.buckets[index]
    }

    /// Looks up a single key.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let index = bucket_index(key)?;
        let _global = self.global.read();
        let bucket = self.buckets[index].read();
        Ok(bucket.get(key).cloned())
    }

    /// Inserts or replaces a single entry.
    pub fn put(&self, key: &str, value: &str) -> Result<Presence, StoreError> {
        let index = bucket_index(key)?;
        let _global = self.global.read();
        let mut bucket = self.buckets[index].write();
        match bucket.insert(key.to_owned(), value.to_owned()) {
            Some(_) => Ok(Presence::Replaced),
            None => Ok(Presence::Inserted),
        }
    }

    /// Removes a single entry; returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let index = bucket_index(key)?;
        let _global = self.global.read();
        let mut bucket = self.buckets[index].write();
        Ok(bucket.remove(key).is_some())
    }

    /// Returns whether `key` currently has an entry.
    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        self.contains_then(key, |exists| exists)
    }

    /// Runs `f` with the key's presence while still holding the key's
    /// bucket lock shared.
    ///
    /// This is how subscription acceptance stays atomic against a
    /// concurrent delete: the delete needs this bucket exclusively before
    /// it may drain the key's subscribers, so whatever `f` records under
    /// its own lock is ordered before the drain.
    ///
    /// `global` is taken recursively-shared so this path cannot queue
    /// behind a waiting `global` writer while a batch already holds
    /// `global` shared.
    pub fn contains_then<R>(&self, key: &str, f: impl FnOnce(bool) -> R) -> Result<R, StoreError> {
        let index = bucket_index(key)?;
        let _global = self.global.read_recursive();
        let bucket = self.buckets[index].read();
        Ok(f(bucket.contains_key(key)))
    }

    /// Visits every entry in bucket order under the exclusive table lock.
    ///
    /// No batch is partially visible: a concurrent batch either committed
    /// before the traversal started or begins after it ends.
    pub fn for_each(&self, mut visitor: impl FnMut(&str, &str)) {
        let _global = self.global.write();
        for bucket in &self.buckets {
            let bucket = bucket.read();
            for (key, value) in bucket.iter() {
                visitor(key, value);
            }
        }
    }

    /// Clones the whole table under the exclusive lock.
    ///
    /// This is the snapshot consistency point: the clone happens while all
    /// mutators are quiesced, and the caller streams it out afterwards
    /// holding no lock at all.
    pub fn clone_contents(&self) -> TableSnapshot {
        let mut entries = Vec::new();
        self.for_each(|key, value| entries.push((key.to_owned(), value.to_owned())));
        TableSnapshot::from_entries(entries)
    }

    /// Total number of entries; test and diagnostics helper.
    pub fn len(&self) -> usize {
        let mut n = 0;
        self.for_each(|_, _| n += 1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_folds_letters_and_digits() {
        assert_eq!(bucket_index("apple").unwrap(), 0);
        assert_eq!(bucket_index("Apple").unwrap(), 0);
        assert_eq!(bucket_index("zebra").unwrap(), 25);
        // Digits share the first ten letter slots.
        assert_eq!(bucket_index("0key").unwrap(), 0);
        assert_eq!(bucket_index("9key").unwrap(), 9);
    }

    #[test]
    fn bucket_index_rejects_other_prefixes() {
        assert!(matches!(
            bucket_index("_key"),
            Err(StoreError::InvalidKeyPrefix { .. })
        ));
        assert_eq!(bucket_index(""), Err(StoreError::EmptyKey));
    }

    #[test]
    fn put_get_remove_round_trip() {
        let store = Store::new();

        assert_eq!(store.put("apple", "red").unwrap(), Presence::Inserted);
        assert_eq!(store.put("apple", "green").unwrap(), Presence::Replaced);
        assert_eq!(store.get("apple").unwrap().as_deref(), Some("green"));

        assert!(store.remove("apple").unwrap());
        assert!(!store.remove("apple").unwrap());
        assert_eq!(store.get("apple").unwrap(), None);
    }

    #[test]
    fn contains_gates_on_live_entries() {
        let store = Store::new();
        store.put("banana", "1").unwrap();
        assert!(store.contains("banana").unwrap());
        store.remove("banana").unwrap();
        assert!(!store.contains("banana").unwrap());
    }

    #[test]
    fn for_each_visits_in_bucket_then_key_order() {
        let store = Store::new();
        store.put("banana", "1").unwrap();
        store.put("apple", "2").unwrap();
        store.put("avocado", "3").unwrap();

        let mut seen = Vec::new();
        store.for_each(|k, _| seen.push(k.to_owned()));
        assert_eq!(seen, ["apple", "avocado", "banana"]);
    }
}
