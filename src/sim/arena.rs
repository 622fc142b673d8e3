//! Dense keyed storage for entities
//!
//! Values live in one contiguous `Vec`. Two integer tables map keys to
//! slots and slots back to keys, so insert, lookup and remove are all O(1).
//! Removal swaps the last value into the freed slot: iteration order is not
//! stable across removals, and callers must not remove while iterating.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entity key assigned by the owning World, never reused while referenced
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Key(pub u32);

impl Key {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("entity {0} not found")]
    NotFound(Key),
}

/// Dense key → value store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arena<T> {
    values: Vec<T>,
    slot_to_key: Vec<Key>,
    key_to_slot: Vec<Option<usize>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            slot_to_key: Vec::new(),
            key_to_slot: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    fn slot(&self, key: Key) -> Option<usize> {
        self.key_to_slot.get(key.index()).copied().flatten()
    }

    /// Insert or replace the value stored under `key`
    pub fn set(&mut self, key: Key, value: T) {
        if let Some(slot) = self.slot(key) {
            self.values[slot] = value;
            return;
        }
        if key.index() >= self.key_to_slot.len() {
            self.key_to_slot.resize(key.index() + 1, None);
        }
        self.key_to_slot[key.index()] = Some(self.values.len());
        self.slot_to_key.push(key);
        self.values.push(value);
    }

    pub fn get(&self, key: Key) -> Result<&T, ArenaError> {
        self.slot(key)
            .map(|slot| &self.values[slot])
            .ok_or(ArenaError::NotFound(key))
    }

    pub fn get_mut(&mut self, key: Key) -> Result<&mut T, ArenaError> {
        match self.slot(key) {
            Some(slot) => Ok(&mut self.values[slot]),
            None => Err(ArenaError::NotFound(key)),
        }
    }

    #[inline]
    pub fn has(&self, key: Key) -> bool {
        self.slot(key).is_some()
    }

    /// Remove `key`, moving the last value into its slot
    pub fn del(&mut self, key: Key) -> Option<T> {
        let Some(slot) = self.slot(key) else {
            log::warn!("arena: tried to delete missing entity {}", key);
            return None;
        };
        let last = self.values.len() - 1;
        let moved = self.slot_to_key[last];

        let value = self.values.swap_remove(slot);
        self.slot_to_key.swap_remove(slot);
        self.key_to_slot[key.index()] = None;
        if slot != last {
            self.key_to_slot[moved.index()] = Some(slot);
        }
        Some(value)
    }

    /// Remove everything
    pub fn empty(&mut self) {
        for key in self.slot_to_key.drain(..) {
            self.key_to_slot[key.index()] = None;
        }
        self.values.clear();
    }

    /// Keys in slot order
    pub fn keys(&self) -> &[Key] {
        &self.slot_to_key
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slot_to_key.iter().copied().zip(self.values.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Key, &mut T)> {
        self.slot_to_key.iter().copied().zip(self.values.iter_mut())
    }
}
