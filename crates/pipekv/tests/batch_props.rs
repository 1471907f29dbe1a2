//! Property tests for the batch executor's ordering contract.

use pipekv::{BatchExecutor, Store, SubscriptionRegistry};
use proptest::prelude::*;
use std::sync::Arc;

fn executor() -> BatchExecutor {
    let store = Arc::new(Store::new());
    let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&store), 8));
    BatchExecutor::new(store, registry)
}

/// Key order of a bracketed `[(k,v)...]` line.
fn keys_of(output: &[u8]) -> Vec<String> {
    let text = std::str::from_utf8(output).unwrap();
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix("]\n"))
        .unwrap();
    if inner.is_empty() {
        return vec![];
    }
    inner
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap()
        .split(")(")
        .map(|tuple| tuple.split_once(',').unwrap().0.to_owned())
        .collect()
}

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9]{0,7}"
}

proptest! {
    /// Read output lists keys exactly in stable case-insensitive order,
    /// regardless of input order.
    #[test]
    fn prop_read_output_is_case_insensitively_sorted(
        keys in proptest::collection::vec(key_strategy(), 1..20),
    ) {
        let exec = executor();

        let mut out = Vec::new();
        exec.read_batch(&keys, &mut out).unwrap();

        let mut expected = keys.clone();
        expected.sort_by(|a, b| {
            a.bytes()
                .map(|c| c.to_ascii_lowercase())
                .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
        });
        prop_assert_eq!(keys_of(&out), expected);
    }

    /// Whatever a batch wrote, a following read returns; the last write of
    /// a duplicated key wins.
    #[test]
    fn prop_write_batch_commits_last_value_per_key(
        pairs in proptest::collection::vec((key_strategy(), "[a-z]{1,8}"), 1..20),
    ) {
        let exec = executor();
        exec.write_batch(&pairs).unwrap();

        for (key, _) in &pairs {
            let expected = pairs
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone());
            prop_assert_eq!(exec.store().get(key).unwrap(), expected);
        }
    }
}
