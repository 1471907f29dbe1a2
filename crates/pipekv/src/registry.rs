use crate::sink::NotificationSink;
use crate::store::Store;
use parking_lot::RwLock;
use pipekv_proto::Notification;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque identity of one subscriber (one client session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    /// This subscriber already holds a subscription for the key.
    Duplicate,
    /// No entry for the key at the moment the request was checked.
    KeyAbsent,
    /// The per-key subscriber list is full.
    QuotaExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Removed,
    NotSubscribed,
    KeyAbsent,
}

struct Subscriber {
    id: SubscriberId,
    sink: Arc<NotificationSink>,
}

/// Key-to-subscribers mapping behind a single reader-writer lock.
///
/// Contention here is low relative to the store, and every operation
/// touches at most one key's list. Notification delivery happens inside
/// this lock's critical section: two commits to the same key are already
/// serialized by the bucket lock, and delivering under the registry lock
/// keeps delivery order equal to commit order per subscriber while
/// excluding concurrent subscribe/drain.
pub struct SubscriptionRegistry {
    store: Arc<Store>,
    per_key_cap: usize,
    inner: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<Store>, per_key_cap: usize) -> Self {
        Self {
            store,
            per_key_cap,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `sink` for `key`.
    ///
    /// The whole check-and-record runs while the key's bucket lock is held
    /// shared (store locks before the registry lock, the same order the
    /// executor's notify path uses). A concurrent delete of the key needs
    /// that bucket exclusively before it drains subscribers, so it either
    /// runs entirely before this subscribe (which then sees the key absent)
    /// or entirely after (and delivers the deleted-record to the new
    /// subscriber too).
    pub fn subscribe(&self, key: &str, sink: Arc<NotificationSink>) -> SubscribeOutcome {
        self.store
            .contains_then(key, |exists| {
                let mut map = self.inner.write();
                if let Some(list) = map.get_mut(key) {
                    Self::evict_failed(list);
                    if list.iter().any(|s| s.id == sink.id()) {
                        return SubscribeOutcome::Duplicate;
                    }
                    if list.len() >= self.per_key_cap {
                        return SubscribeOutcome::QuotaExceeded;
                    }
                    list.push(Subscriber { id: sink.id(), sink });
                    return SubscribeOutcome::Subscribed;
                }
                if !exists {
                    return SubscribeOutcome::KeyAbsent;
                }
                map.insert(key.to_owned(), vec![Subscriber { id: sink.id(), sink }]);
                SubscribeOutcome::Subscribed
            })
            .unwrap_or(SubscribeOutcome::KeyAbsent)
    }

    pub fn unsubscribe(&self, key: &str, id: SubscriberId) -> UnsubscribeOutcome {
        let mut map = self.inner.write();
        let Some(list) = map.get_mut(key) else {
            return UnsubscribeOutcome::KeyAbsent;
        };
        Self::evict_failed(list);
        let before = list.len();
        list.retain(|s| s.id != id);
        if list.len() < before {
            UnsubscribeOutcome::Removed
        } else {
            UnsubscribeOutcome::NotSubscribed
        }
    }

    /// Delivers a changed-record to every current subscriber of `key`.
    ///
    /// Called by the write path after the entry committed, while the
    /// bucket lock is still held.
    pub fn notify_changed(&self, key: &str, value: &str) {
        let map = self.inner.read();
        if let Some(list) = map.get(key) {
            let notification = Notification::Changed {
                key: key.to_owned(),
                value: value.to_owned(),
            };
            for subscriber in list {
                subscriber.sink.send(&notification);
            }
        }
    }

    /// Removes the key's subscriber list and delivers one deleted-record to
    /// each member, in the same critical section.
    ///
    /// After this returns no subscriber that was registered at delete time
    /// can receive another notification for the key. Returns how many
    /// subscribers were notified.
    pub fn notify_deleted_and_drain(&self, key: &str) -> usize {
        let mut map = self.inner.write();
        let Some(list) = map.remove(key) else {
            return 0;
        };
        let notification = Notification::Deleted { key: key.to_owned() };
        let mut delivered = 0;
        for subscriber in &list {
            if subscriber.sink.send(&notification) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drops every subscription held by `id`; used on session disconnect.
    pub fn drain_for_handle(&self, id: SubscriberId) {
        let mut map = self.inner.write();
        for list in map.values_mut() {
            list.retain(|s| s.id != id && !s.sink.is_failed());
        }
    }

    /// Drops every subscription; used by the global client reset.
    pub fn drain_all(&self) {
        self.inner.write().clear();
    }

    /// Number of live subscribers for `key`; test and diagnostics helper.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.read().get(key).map_or(0, Vec::len)
    }

    fn evict_failed(list: &mut Vec<Subscriber>) {
        list.retain(|s| !s.sink.is_failed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::{self, Write};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sink(id: u64) -> (Arc<NotificationSink>, SharedBuf) {
        let buf = SharedBuf::default();
        let sink = Arc::new(NotificationSink::new(
            SubscriberId(id),
            Box::new(buf.clone()),
        ));
        (sink, buf)
    }

    fn registry_with(keys: &[&str], cap: usize) -> SubscriptionRegistry {
        let store = Arc::new(Store::new());
        for key in keys {
            store.put(key, "v").unwrap();
        }
        SubscriptionRegistry::new(store, cap)
    }

    #[test]
    fn subscribe_requires_a_live_key() {
        let registry = registry_with(&["apple"], 4);
        let (s, _) = sink(1);

        assert_eq!(
            registry.subscribe("apple", Arc::clone(&s)),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(registry.subscribe("pear", s), SubscribeOutcome::KeyAbsent);
    }

    #[test]
    fn duplicate_and_quota_outcomes() {
        let registry = registry_with(&["apple"], 2);
        let (s1, _) = sink(1);
        let (s2, _) = sink(2);
        let (s3, _) = sink(3);

        assert_eq!(
            registry.subscribe("apple", Arc::clone(&s1)),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(registry.subscribe("apple", s1), SubscribeOutcome::Duplicate);
        assert_eq!(registry.subscribe("apple", s2), SubscribeOutcome::Subscribed);
        assert_eq!(
            registry.subscribe("apple", s3),
            SubscribeOutcome::QuotaExceeded
        );
    }

    #[test]
    fn unsubscribe_outcomes() {
        let registry = registry_with(&["apple"], 4);
        let (s, _) = sink(1);
        registry.subscribe("apple", s);

        assert_eq!(
            registry.unsubscribe("apple", SubscriberId(2)),
            UnsubscribeOutcome::NotSubscribed
        );
        assert_eq!(
            registry.unsubscribe("apple", SubscriberId(1)),
            UnsubscribeOutcome::Removed
        );
        assert_eq!(
            registry.unsubscribe("pear", SubscriberId(1)),
            UnsubscribeOutcome::KeyAbsent
        );
    }

    #[test]
    fn delete_drains_and_notifies_each_subscriber_once() {
        let registry = registry_with(&["apple"], 4);
        let (s1, b1) = sink(1);
        let (s2, b2) = sink(2);
        registry.subscribe("apple", s1);
        registry.subscribe("apple", s2);

        assert_eq!(registry.notify_deleted_and_drain("apple"), 2);
        assert_eq!(registry.subscriber_count("apple"), 0);

        for buf in [b1, b2] {
            let bytes = buf.0.lock();
            let frame: &[u8; pipekv_proto::NOTIFICATION_FRAME_LEN] =
                bytes.as_slice().try_into().unwrap();
            assert_eq!(
                Notification::decode(frame).unwrap(),
                Notification::Deleted { key: "apple".into() }
            );
        }

        // A second delete of the same key notifies nobody.
        assert_eq!(registry.notify_deleted_and_drain("apple"), 0);
    }

    #[test]
    fn drain_for_handle_removes_across_keys() {
        let registry = registry_with(&["apple", "banana"], 4);
        let (s, _) = sink(7);
        registry.subscribe("apple", Arc::clone(&s));
        registry.subscribe("banana", s);

        registry.drain_for_handle(SubscriberId(7));
        assert_eq!(registry.subscriber_count("apple"), 0);
        assert_eq!(registry.subscriber_count("banana"), 0);
    }

    #[test]
    fn failed_sinks_are_evicted_on_next_touch() {
        let registry = registry_with(&["apple"], 4);
        let (s1, _) = sink(1);
        let (s2, _) = sink(2);
        registry.subscribe("apple", Arc::clone(&s1));
        registry.subscribe("apple", s2);

        s1.mark_failed();
        // The next write-locked operation on the key evicts the failed sink,
        // so a reconnected session with the same identity is not a duplicate.
        let (s1_again, _) = sink(1);
        assert_eq!(
            registry.subscribe("apple", s1_again),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(registry.subscriber_count("apple"), 2);
    }
}
