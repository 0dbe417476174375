// MapStore - In-memory store backed by a lock-guarded nested map

use crate::model::{Index, Item, Key, KeyIdPair, MemberId, StampedKeys};
use crate::storage::{Store, StoreError};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type OwnerMap<I> = BTreeMap<MemberId, BTreeMap<Key, I>>;

/// The reference store: owner -> key -> item
pub struct MapStore<I> {
    internal: RwLock<OwnerMap<I>>,
    deletions: AtomicUsize,
}

impl<I: Item> MapStore<I> {
    pub fn new() -> Self {
        Self {
            internal: RwLock::new(BTreeMap::new()),
            deletions: AtomicUsize::new(0),
        }
    }

    /// Number of keys removed since creation
    ///
    /// Add-only workloads use this to prove nothing was ever deleted.
    pub fn deletions(&self) -> usize {
        self.deletions.load(Ordering::SeqCst)
    }

    /// Deterministic text rendering of every item
    pub fn dump(&self) -> String {
        let internal = self.read();
        let mut out = String::new();
        for (owner, items) in internal.iter() {
            let _ = writeln!(out, "{}:", owner);
            for (key, item) in items {
                let _ = writeln!(out, "  {} => {:?}", key, item);
            }
        }
        out
    }

    fn read(&self) -> RwLockReadGuard<'_, OwnerMap<I>> {
        self.internal.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, OwnerMap<I>> {
        self.internal.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_of(items: &BTreeMap<Key, I>) -> Index {
        Index::unstamped(StampedKeys::sorted(
            items.values().map(Item::stamped_key).collect(),
        ))
    }

    fn insert(internal: &mut OwnerMap<I>, item: I) {
        internal
            .entry(item.owned_by().clone())
            .or_default()
            .insert(item.key().clone(), item.deep_copy());
    }

    fn remove(&self, internal: &mut OwnerMap<I>, pair: &KeyIdPair) {
        if let Some(items) = internal.get_mut(&pair.id) {
            if items.remove(&pair.key).is_some() {
                self.deletions.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl<I: Item> Default for MapStore<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Item> Store<I> for MapStore<I> {
    fn members(&self) -> Result<Vec<MemberId>, StoreError> {
        Ok(self.read().keys().cloned().collect())
    }

    fn index(&self, id: &MemberId) -> Result<Index, StoreError> {
        Ok(self.read().get(id).map(Self::index_of).unwrap_or_default())
    }

    fn indexes(&self) -> Result<BTreeMap<MemberId, Index>, StoreError> {
        let internal = self.read();
        Ok(internal
            .iter()
            .map(|(owner, items)| (owner.clone(), Self::index_of(items)))
            .collect())
    }

    fn get(&self, pair: &KeyIdPair) -> Result<Option<I>, StoreError> {
        Ok(self
            .read()
            .get(&pair.id)
            .and_then(|items| items.get(&pair.key))
            .map(Item::deep_copy))
    }

    fn set(&self, item: I) -> Result<(), StoreError> {
        Self::insert(&mut self.write(), item);
        Ok(())
    }

    fn multi_set(&self, items: Vec<I>) -> Result<(), StoreError> {
        let mut internal = self.write();
        for item in items {
            Self::insert(&mut internal, item);
        }
        Ok(())
    }

    fn delete(&self, pair: &KeyIdPair) -> Result<(), StoreError> {
        let mut internal = self.write();
        self.remove(&mut internal, pair);
        Ok(())
    }

    fn multi_delete(&self, pairs: &[KeyIdPair]) -> Result<(), StoreError> {
        let mut internal = self.write();
        for pair in pairs {
            self.remove(&mut internal, pair);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<I>, StoreError> {
        Ok(self
            .read()
            .values()
            .flat_map(|items| items.values().map(Item::deep_copy))
            .collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read().values().map(BTreeMap::len).sum())
    }
}
