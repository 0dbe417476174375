// Key diff - Pair two listings of one owner by key and classify each key

use crate::model::{Key, StampedKeys, Timestamp};
use std::collections::BTreeMap;

/// What the local side must do to match a remote listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyDiff {
    /// Listed remotely and missing or older locally
    pub fetch: Vec<Key>,
    /// Held locally but no longer listed remotely
    pub delete: Vec<Key>,
}

impl KeyDiff {
    pub fn is_empty(&self) -> bool {
        self.fetch.is_empty() && self.delete.is_empty()
    }
}

/// Compare a local listing against a remote one
///
/// Equal timestamps favour the local copy. Output keys are in ascending
/// order.
pub fn diff_keys(local: &StampedKeys, remote: &StampedKeys) -> KeyDiff {
    let local: BTreeMap<&Key, Timestamp> = local.iter().map(|s| (&s.key, s.timestamp)).collect();
    let remote: BTreeMap<&Key, Timestamp> =
        remote.iter().map(|s| (&s.key, s.timestamp)).collect();

    let mut diff = KeyDiff::default();

    for (key, remote_ts) in &remote {
        match local.get(key) {
            None => diff.fetch.push((*key).clone()),
            Some(local_ts) if remote_ts > local_ts => diff.fetch.push((*key).clone()),
            Some(_) => {}
        }
    }

    for key in local.keys() {
        if !remote.contains_key(key) {
            diff.delete.push((*key).clone());
        }
    }

    diff
}
