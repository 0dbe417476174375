// Items - The capability every synchronized value exposes
//
// The engine only ever talks to items through the Item trait. Applications
// bring their own item types; Record is the one shipped with the crate.

use crate::model::{Key, MemberId, StampedKey, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A timestamped, owned, key-addressed value
///
/// An item's owner never changes after creation.
pub trait Item: Clone + Debug + Send + Sync + 'static {
    /// Name within the owner's namespace
    fn key(&self) -> &Key;

    /// Member that owns (and alone may write) this item
    fn owned_by(&self) -> &MemberId;

    /// Last write time
    fn timestamp(&self) -> Timestamp;

    fn stamped_key(&self) -> StampedKey {
        StampedKey::new(self.key().clone(), self.timestamp())
    }

    /// Independent copy sharing nothing with `self`
    fn deep_copy(&self) -> Self {
        self.clone()
    }
}

/// A string value owned by one member
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    key: Key,
    value: String,
    timestamp: Timestamp,
    owner: MemberId,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(owner: MemberId, key: impl Into<Key>, value: impl Into<String>) -> Self {
        Self::with_timestamp(owner, key, value, Utc::now())
    }

    pub fn with_timestamp(
        owner: MemberId,
        key: impl Into<Key>,
        value: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
            owner,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Item for Record {
    fn key(&self) -> &Key {
        &self.key
    }

    fn owned_by(&self) -> &MemberId {
        &self.owner
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}
