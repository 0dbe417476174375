// Member - The engine's view of "my data"
//
// Wraps a shared Store and knows which owner it speaks for. The engine only
// uses the id / indexes / get_data / put / delete surface; applications
// write their own items through write / remove.

use crate::model::{IndexMap, Item, Key, KeyIdPair, MemberId, Record};
use crate::storage::{Store, StoreError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Member-related errors
#[derive(Error, Debug)]
pub enum MemberError {
    #[error("Member {member} cannot write an item owned by {owner}")]
    NotOwner { member: MemberId, owner: MemberId },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// One data owner plus the store holding everything it knows
pub struct Member<I: Item> {
    id: MemberId,
    store: Arc<dyn Store<I>>,
}

impl<I: Item> Clone for Member<I> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<I: Item> fmt::Debug for Member<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member").field("id", &self.id).finish()
    }
}

impl<I: Item> Member<I> {
    pub fn new(id: impl Into<MemberId>, store: Arc<dyn Store<I>>) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn store(&self) -> &Arc<dyn Store<I>> {
        &self.store
    }

    // ========================================================================
    // ENGINE SURFACE
    // ========================================================================

    /// Unstamped digest of every owner, read as one snapshot
    pub fn indexes(&self) -> Result<IndexMap, StoreError> {
        Ok(IndexMap {
            source: self.id.clone(),
            indexes: self.store.indexes()?,
        })
    }

    /// Point lookups; absent keys are skipped
    pub fn get_data(&self, pairs: &[KeyIdPair]) -> Result<Vec<I>, StoreError> {
        let mut items = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(item) = self.store.get(pair)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Bulk upsert of remotely sourced items
    ///
    /// An incoming item only replaces the stored copy when its timestamp is
    /// strictly newer. Returns how many items were written.
    pub fn put(&self, items: Vec<I>) -> Result<usize, StoreError> {
        let mut fresh = Vec::with_capacity(items.len());
        for item in items {
            let pair = KeyIdPair::new(item.owned_by().clone(), item.key().clone());
            match self.store.get(&pair)? {
                Some(current) if current.timestamp() >= item.timestamp() => {}
                _ => fresh.push(item),
            }
        }
        let written = fresh.len();
        if written > 0 {
            self.store.multi_set(fresh)?;
        }
        Ok(written)
    }

    pub fn delete(&self, pairs: &[KeyIdPair]) -> Result<(), StoreError> {
        if pairs.is_empty() {
            return Ok(());
        }
        self.store.multi_delete(pairs)
    }

    // ========================================================================
    // OWNER SURFACE
    // ========================================================================

    /// Store an item this member owns
    pub fn write(&self, item: I) -> Result<(), MemberError> {
        if item.owned_by() != &self.id {
            return Err(MemberError::NotOwner {
                member: self.id.clone(),
                owner: item.owned_by().clone(),
            });
        }
        self.store.set(item)?;
        Ok(())
    }

    /// Remove one of this member's own keys
    pub fn remove(&self, key: impl Into<Key>) -> Result<(), MemberError> {
        self.store
            .delete(&KeyIdPair::new(self.id.clone(), key.into()))?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<I>, StoreError> {
        self.store.snapshot()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.store.count()
    }
}

impl Member<Record> {
    /// Write a string value under `key`, stamped now
    pub fn write_value(
        &self,
        key: impl Into<Key>,
        value: impl Into<String>,
    ) -> Result<(), MemberError> {
        self.write(Record::new(self.id.clone(), key, value))
    }
}
