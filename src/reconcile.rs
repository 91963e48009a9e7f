//! Keyed reconciliation of a batch against the persisted set.
//!
//! Given a batch of candidate records and the current contents of their
//! table, decide which candidates are new (insert) and which already exist
//! (update), matching on a caller-defined natural key. Existing candidates
//! receive the persisted identity of the row they match before being handed
//! back for update.
//!
//! Everything here is pure: the caller fetches the persisted set and applies
//! the result, normally inside one write transaction so both steps see the
//! same snapshot.
//!
//! If several persisted records share a natural key, the last one in
//! `persisted` order is the match.

use std::collections::HashMap;
use std::hash::Hash;

use crate::record::{copy_primary_key, PersistableRecord};

/// Outcome of reconciling a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation<T> {
    /// Records whose key is not persisted, unmodified, in batch order.
    pub to_insert: Vec<T>,
    /// Records whose key is persisted, carrying the matching identity, in
    /// batch order.
    pub to_update: Vec<T>,
}

impl<T> Default for Reconciliation<T> {
    fn default() -> Self {
        Self {
            to_insert: Vec::new(),
            to_update: Vec::new(),
        }
    }
}

impl<T> Reconciliation<T> {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_insert.len() + self.to_update.len()
    }
}

/// Strategy object form of the two reconciliation callbacks.
pub trait KeyStrategy<T> {
    type Key: Hash + Eq;

    /// Natural key used to match a batch record to a persisted one.
    fn key_of(&self, record: &T) -> Self::Key;

    /// Copy the persisted identity of `from` into `into`.
    fn transfer_identity(&self, from: &T, into: &mut T);
}

/// Reconcile using a [`KeyStrategy`].
pub fn reconcile_with<T, S>(
    strategy: &S,
    batch: impl IntoIterator<Item = T>,
    persisted: &[T],
) -> Reconciliation<T>
where
    S: KeyStrategy<T>,
{
    partition(
        batch,
        persisted,
        |record| strategy.key_of(record),
        |from, into| strategy.transfer_identity(from, into),
    )
}

/// Stateless reconciler built from a key extractor and an identity transfer.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<KF, TF> {
    key_of: KF,
    transfer: TF,
}

impl<KF, TF> Reconciler<KF, TF> {
    pub fn new(key_of: KF, transfer: TF) -> Self {
        Self { key_of, transfer }
    }

    /// Split `batch` into additions and updates relative to `persisted`.
    pub fn reconcile<T, K>(
        &self,
        batch: impl IntoIterator<Item = T>,
        persisted: &[T],
    ) -> Reconciliation<T>
    where
        KF: Fn(&T) -> K,
        TF: Fn(&T, &mut T),
        K: Hash + Eq,
    {
        partition(batch, persisted, &self.key_of, &self.transfer)
    }

    /// Batch records whose key is not persisted, in batch order.
    ///
    /// No identity transfer happens: these records are new.
    pub fn filter_new<T, K>(&self, batch: impl IntoIterator<Item = T>, persisted: &[T]) -> Vec<T>
    where
        KF: Fn(&T) -> K,
        K: Hash + Eq,
    {
        filter_new(batch, persisted, &self.key_of)
    }
}

impl<KF, T: PersistableRecord> Reconciler<KF, fn(&T, &mut T)> {
    /// Reconciler whose identity transfer copies the primary key.
    pub fn by_key(key_of: KF) -> Self {
        Self {
            key_of,
            transfer: copy_primary_key::<T>,
        }
    }
}

/// Insert-only dedup: batch records whose key is absent from `persisted`.
pub fn filter_new<T, K>(
    batch: impl IntoIterator<Item = T>,
    persisted: &[T],
    key_of: impl Fn(&T) -> K,
) -> Vec<T>
where
    K: Hash + Eq,
{
    let existing: std::collections::HashSet<K> = persisted.iter().map(&key_of).collect();
    batch
        .into_iter()
        .filter(|record| !existing.contains(&key_of(record)))
        .collect()
}

fn partition<T, K>(
    batch: impl IntoIterator<Item = T>,
    persisted: &[T],
    key_of: impl Fn(&T) -> K,
    transfer: impl Fn(&T, &mut T),
) -> Reconciliation<T>
where
    K: Hash + Eq,
{
    // Later duplicates overwrite earlier ones.
    let originals: HashMap<K, &T> = persisted.iter().map(|p| (key_of(p), p)).collect();

    let mut result = Reconciliation::default();
    for mut record in batch {
        match originals.get(&key_of(&record)) {
            Some(original) => {
                transfer(original, &mut record);
                result.to_update.push(record);
            }
            None => result.to_insert.push(record),
        }
    }
    result
}
