//! Splitting a history into per-key subhistories.

use std::hash::Hash;

use ahash::{HashSet, HashSetExt};

use crate::history::History;
use crate::tuple::Tagged;

/// Every distinct key that tags some op in `history`.
pub fn keys_of<K, V>(history: &History<Tagged<K, V>>) -> HashSet<K>
where
    K: Clone + Eq + Hash,
{
    let mut keys = HashSet::new();
    for op in history {
        if let Some(k) = op.value.key() {
            if !keys.contains(k) {
                keys.insert(k.clone());
            }
        }
    }
    keys
}

/// The part of `history` that concerns `key`, in original order.
///
/// Ops tagged with `key` are kept with the tag stripped off. Global ops are
/// kept as they are. Ops tagged with any other key are dropped. Indices are
/// those of the full history.
pub fn subhistory<K, V>(key: &K, history: &History<Tagged<K, V>>) -> History<V>
where
    K: Eq,
    V: Clone,
{
    history
        .iter()
        .filter(|op| op.value.key().is_none_or(|k| k == key))
        .map(|op| op.with_value(op.value.value().clone()))
        .collect()
}
