// Storage Traits - The contract every store implementation honours

use crate::model::{Index, Item, KeyIdPair, MemberId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

/// Concurrent map from (owner, key) to item
///
/// Implementations serialize every mutation and snapshot read behind their
/// own lock. Items handed out are independent copies. An owner stays listed
/// by `members` (with an empty index) once its last key is deleted.
pub trait Store<I: Item>: Send + Sync {
    /// Every owner this store holds (or held) items for
    fn members(&self) -> Result<Vec<MemberId>, StoreError>;

    /// Unstamped digest of one owner's keys, in canonical order
    fn index(&self, id: &MemberId) -> Result<Index, StoreError>;

    /// Digests of every owner, taken as one consistent snapshot
    fn indexes(&self) -> Result<BTreeMap<MemberId, Index>, StoreError>;

    fn get(&self, pair: &KeyIdPair) -> Result<Option<I>, StoreError>;

    fn set(&self, item: I) -> Result<(), StoreError>;

    fn multi_set(&self, items: Vec<I>) -> Result<(), StoreError>;

    fn delete(&self, pair: &KeyIdPair) -> Result<(), StoreError>;

    fn multi_delete(&self, pairs: &[KeyIdPair]) -> Result<(), StoreError>;

    /// Every item, ordered by owner then key
    fn snapshot(&self) -> Result<Vec<I>, StoreError>;

    /// Number of items across all owners
    fn count(&self) -> Result<usize, StoreError>;
}
