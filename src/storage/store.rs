// SledStore - Persistent store using sled
//
// Layout:
// - "items" tree: <owner len:u32 BE><owner><key> -> postcard(item)
// - "owners" tree: <owner> -> empty, so an owner survives its last delete

use crate::model::{Index, Item, KeyIdPair, MemberId, StampedKeys};
use crate::storage::{Store, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Tree names
mod trees {
    pub const ITEMS: &[u8] = b"items";
    pub const OWNERS: &[u8] = b"owners";
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Embedded persistent store
///
/// sled is thread-safe on its own; the gate lock only exists so that digest
/// reads observe whole batches and never a half-applied multi_set.
pub struct SledStore<I> {
    db: sled::Db,
    items: sled::Tree,
    owners: sled::Tree,
    gate: RwLock<()>,
    _item: PhantomData<fn() -> I>,
}

impl<I> SledStore<I>
where
    I: Item + Serialize + DeserializeOwned,
{
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::from_db(db)
    }

    /// A throwaway store removed when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let items = db.open_tree(trees::ITEMS)?;
        let owners = db.open_tree(trees::OWNERS)?;
        Ok(Self {
            db,
            items,
            owners,
            gate: RwLock::new(()),
            _item: PhantomData,
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    // ========================================================================
    // KEY ENCODING
    // ========================================================================

    fn owner_prefix(owner: &MemberId) -> Vec<u8> {
        let owner = owner.as_str().as_bytes();
        let mut prefix = Vec::with_capacity(4 + owner.len());
        prefix.extend_from_slice(&(owner.len() as u32).to_be_bytes());
        prefix.extend_from_slice(owner);
        prefix
    }

    fn item_key(pair: &KeyIdPair) -> Vec<u8> {
        let mut key = Self::owner_prefix(&pair.id);
        key.extend_from_slice(pair.key.as_str().as_bytes());
        key
    }

    fn encode(item: &I) -> Result<Vec<u8>, StoreError> {
        postcard::to_allocvec(item).map_err(|e| StoreError::SerializationFailed(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<I, StoreError> {
        postcard::from_bytes(bytes).map_err(|e| StoreError::DeserializationFailed(e.to_string()))
    }

    fn decode_owner(bytes: &[u8]) -> Result<MemberId, StoreError> {
        String::from_utf8(bytes.to_vec())
            .map(MemberId::from)
            .map_err(|e| StoreError::DeserializationFailed(e.to_string()))
    }

    // ========================================================================
    // UNGATED READS
    // ========================================================================

    fn owners_unlocked(&self) -> Result<Vec<MemberId>, StoreError> {
        let mut owners = Vec::new();
        for result in self.owners.iter() {
            let (owner, _) = result?;
            owners.push(Self::decode_owner(&owner)?);
        }
        Ok(owners)
    }

    fn items_of(&self, owner: &MemberId) -> Result<Vec<I>, StoreError> {
        let mut items = Vec::new();
        for result in self.items.scan_prefix(Self::owner_prefix(owner)) {
            let (_, value) = result?;
            items.push(Self::decode(&value)?);
        }
        Ok(items)
    }

    fn index_unlocked(&self, owner: &MemberId) -> Result<Index, StoreError> {
        let keys = self.items_of(owner)?.iter().map(Item::stamped_key).collect();
        Ok(Index::unstamped(StampedKeys::sorted(keys)))
    }

    fn write_batch(&self, items: &[I]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for item in items {
            let pair = KeyIdPair::new(item.owned_by().clone(), item.key().clone());
            batch.insert(Self::item_key(&pair), Self::encode(item)?);
            self.owners.insert(item.owned_by().as_str().as_bytes(), &[])?;
        }
        self.items.apply_batch(batch)?;
        Ok(())
    }
}

impl<I> Store<I> for SledStore<I>
where
    I: Item + Serialize + DeserializeOwned,
{
    fn members(&self) -> Result<Vec<MemberId>, StoreError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.owners_unlocked()
    }

    fn index(&self, id: &MemberId) -> Result<Index, StoreError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.index_unlocked(id)
    }

    fn indexes(&self) -> Result<BTreeMap<MemberId, Index>, StoreError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let mut indexes = BTreeMap::new();
        for owner in self.owners_unlocked()? {
            let index = self.index_unlocked(&owner)?;
            indexes.insert(owner, index);
        }
        Ok(indexes)
    }

    fn get(&self, pair: &KeyIdPair) -> Result<Option<I>, StoreError> {
        match self.items.get(Self::item_key(pair))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, item: I) -> Result<(), StoreError> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.write_batch(std::slice::from_ref(&item))
    }

    fn multi_set(&self, items: Vec<I>) -> Result<(), StoreError> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.write_batch(&items)
    }

    fn delete(&self, pair: &KeyIdPair) -> Result<(), StoreError> {
        self.multi_delete(std::slice::from_ref(pair))
    }

    fn multi_delete(&self, pairs: &[KeyIdPair]) -> Result<(), StoreError> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let mut batch = sled::Batch::default();
        for pair in pairs {
            batch.remove(Self::item_key(pair));
        }
        self.items.apply_batch(batch)?;
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<I>, StoreError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let mut items = Vec::new();
        for owner in self.owners_unlocked()? {
            let mut owned = self.items_of(&owner)?;
            owned.sort_by(|a, b| a.key().cmp(b.key()));
            items.extend(owned);
        }
        Ok(items)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.items.len())
    }
}
