//! Key-tagged operation payloads.
//!
//! Generators in this crate wrap every value a per-key sub-generator yields in
//! a [`Tuple`] carrying its key. Ops that no key owns (nemesis activity, for
//! instance) stay [`Tagged::Global`] and belong to every key's subhistory.

use std::fmt;

use serde::Serialize;

/// An immutable `(key, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tuple<K, V> {
    key: K,
    value: V,
}

impl<K, V> Tuple<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: fmt::Display, V: fmt::Debug> fmt::Display for Tuple<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {:?}]", self.key, self.value)
    }
}

/// An op payload that is either owned by a key or global.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Tagged<K, V> {
    Keyed(Tuple<K, V>),
    Global(V),
}

impl<K, V> Tagged<K, V> {
    pub fn keyed(key: K, value: V) -> Self {
        Self::Keyed(Tuple::new(key, value))
    }

    pub fn global(value: V) -> Self {
        Self::Global(value)
    }

    /// The owning key, or `None` for global payloads.
    pub fn key(&self) -> Option<&K> {
        match self {
            Tagged::Keyed(t) => Some(t.key()),
            Tagged::Global(_) => None,
        }
    }

    /// The payload, whether keyed or global.
    pub fn value(&self) -> &V {
        match self {
            Tagged::Keyed(t) => t.value(),
            Tagged::Global(v) => v,
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, Tagged::Keyed(_))
    }

    /// Drop the key, if any.
    pub fn into_value(self) -> V {
        match self {
            Tagged::Keyed(t) => t.value,
            Tagged::Global(v) => v,
        }
    }
}

impl<K, V> From<Tuple<K, V>> for Tagged<K, V> {
    fn from(t: Tuple<K, V>) -> Self {
        Self::Keyed(t)
    }
}
