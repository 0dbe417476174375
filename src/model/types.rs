// Core Types - Identifiers, stamped keys and digests
//
// Everything exchanged between members is built from these types:
// - MemberId / Key / KeyIdPair: addressing
// - StampedKey / StampedKeys: proof of existence and freshness of one item
// - Index / IndexMap: per-owner digests and a member's full knowledge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wall-clock instant used for item stamps and digest build times
pub type Timestamp = DateTime<Utc>;

/// The "no knowledge" timestamp, older than any real build time
pub fn never() -> Timestamp {
    DateTime::<Utc>::UNIX_EPOCH
}

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Identity of a member (a data owner)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Name of an item within its owner's namespace
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Addresses one item across the whole system
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyIdPair {
    pub id: MemberId,
    pub key: Key,
}

impl KeyIdPair {
    pub fn new(id: MemberId, key: Key) -> Self {
        Self { id, key }
    }
}

impl fmt::Display for KeyIdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.key)
    }
}

// ============================================================================
// STAMPED KEYS
// ============================================================================

/// Key plus the timestamp of the item it names, without the payload
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StampedKey {
    pub key: Key,
    pub timestamp: Timestamp,
}

impl StampedKey {
    pub fn new(key: Key, timestamp: Timestamp) -> Self {
        Self { key, timestamp }
    }
}

/// A listing of stamped keys kept in key-descending order
///
/// Equality compares the sorted key/timestamp sequence element by element,
/// so two listings are equal exactly when they name the same items at the
/// same stamps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedKeys(Vec<StampedKey>);

impl StampedKeys {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a listing and bring it into canonical order
    pub fn sorted(keys: Vec<StampedKey>) -> Self {
        let mut keys = Self(keys);
        keys.sort();
        keys
    }

    /// Order by key, descending
    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| b.key.cmp(&a.key));
    }

    pub fn push(&mut self, key: StampedKey) {
        self.0.push(key);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StampedKey> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[StampedKey] {
        &self.0
    }
}

impl From<Vec<StampedKey>> for StampedKeys {
    fn from(keys: Vec<StampedKey>) -> Self {
        Self(keys)
    }
}

impl FromIterator<StampedKey> for StampedKeys {
    fn from_iter<T: IntoIterator<Item = StampedKey>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a StampedKeys {
    type Item = &'a StampedKey;
    type IntoIter = std::slice::Iter<'a, StampedKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ============================================================================
// INDEX / INDEX MAP
// ============================================================================

/// One owner's complete key listing as last observed by the digest author
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// When the digest was (re)built, not when the items changed
    pub build_time: Timestamp,
    pub stamped_keys: StampedKeys,
}

impl Index {
    pub fn new(build_time: Timestamp, stamped_keys: StampedKeys) -> Self {
        Self {
            build_time,
            stamped_keys,
        }
    }

    /// An index with no known build time
    pub fn unstamped(stamped_keys: StampedKeys) -> Self {
        Self::new(never(), stamped_keys)
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::unstamped(StampedKeys::new())
    }
}

/// A member's complete knowledge digest: one index per known owner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMap {
    pub source: MemberId,
    pub indexes: BTreeMap<MemberId, Index>,
}

impl IndexMap {
    pub fn new(source: MemberId) -> Self {
        Self {
            source,
            indexes: BTreeMap::new(),
        }
    }

    pub fn with_index(mut self, owner: MemberId, index: Index) -> Self {
        self.indexes.insert(owner, index);
        self
    }

    pub fn get(&self, owner: &MemberId) -> Option<&Index> {
        self.indexes.get(owner)
    }

    /// Total number of stamped keys across all owners
    pub fn key_count(&self) -> usize {
        self.indexes.values().map(|i| i.stamped_keys.len()).sum()
    }
}
