//! Generic repository keeping a primary record and its parent index in step.

use crate::error::{Result, StoreError};
use crate::kv::{Commit, KvStore, Transaction};
use crate::notify::Notifier;
use crate::repo::kind::EntityKind;
use crate::session::{CancelToken, Subscription};
use crate::types::{Stamp, Topic};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tries for a write whose stamp check keeps losing to concurrent writers.
const MAX_ATTEMPTS: usize = 64;

/// A record as written, with the stamp of its commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committed<T> {
    pub record: T,
    pub stamp: Stamp,
}

/// Repository for one entity kind.
///
/// Every write touches the primary key and the index key in a single
/// transaction, so an index entry exists exactly when its primary record
/// does. After each successful write the whole collection under the
/// affected parent is re-read and published to the notifier.
pub struct Repository<T> {
    kind: EntityKind<T>,
    kv: Arc<KvStore>,
    notifier: Arc<Notifier>,
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(kind: EntityKind<T>, kv: Arc<KvStore>, notifier: Arc<Notifier>) -> Self {
        Self { kind, kv, notifier }
    }

    pub fn kind(&self) -> &EntityKind<T> {
        &self.kind
    }

    /// Notification topic for the collection under `parent`.
    pub fn topic(&self, parent: &str) -> Topic {
        Topic::new(self.kind.name, parent)
    }

    // --- Writes ---

    /// Write a new record. The caller supplies a fresh id; collisions are
    /// not detected.
    pub fn create(&self, record: T) -> Result<Committed<T>> {
        let id = self.kind.id_of(&record).to_string();
        let parent = self.kind.parent_of(&record).to_string();
        Self::require_key("id", &id)?;
        Self::require_key("parent", &parent)?;

        let value = encode(&record)?;
        let tx = Transaction::new()
            .set(self.kind.primary_key(&id), value.clone())
            .set(self.kind.index_key(&parent, &id), value);
        let stamp = self.commit(tx, &id)?;

        debug!(kind = self.kind.name, %id, %stamp, "record created");
        self.notify(&parent, stamp);
        Ok(Committed { record, stamp })
    }

    /// Overwrite an existing record in full. Last writer wins.
    ///
    /// The write is checked against the stamp of the record it replaces. If
    /// another write lands in between, the stored record is read again and
    /// the replace retried, so the index entry always follows the parent key
    /// that is actually stored. A record deleted in the meantime is
    /// [`StoreError::NotFound`].
    pub fn replace(&self, record: T) -> Result<Committed<T>> {
        self.replace_inner(record, None)
    }

    /// Overwrite an existing record only if it still carries `expected`.
    pub fn replace_if(&self, record: T, expected: Stamp) -> Result<Committed<T>> {
        self.replace_inner(record, Some(expected))
    }

    fn replace_inner(&self, record: T, expected: Option<Stamp>) -> Result<Committed<T>> {
        let id = self.kind.id_of(&record).to_string();
        let parent = self.kind.parent_of(&record).to_string();
        Self::require_key("id", &id)?;
        Self::require_key("parent", &parent)?;
        let value = encode(&record)?;

        for attempt in 0..MAX_ATTEMPTS {
            let (prior, prior_stamp) = self
                .get_versioned(&id)?
                .ok_or_else(|| self.not_found(&id))?;
            let prior_parent = self.kind.parent_of(&prior).to_string();
            let moved = prior_parent != parent;

            let primary = self.kind.primary_key(&id);
            let checked = expected.unwrap_or(prior_stamp);
            let mut tx = Transaction::new().check(primary.clone(), Some(checked));
            if moved {
                tx = tx.delete(self.kind.index_key(&prior_parent, &id));
            }
            tx = tx
                .set(primary, value.clone())
                .set(self.kind.index_key(&parent, &id), value.clone());

            let stamp = match self.kv.transact(tx)? {
                Commit::Committed(stamp) => stamp,
                Commit::Rejected if expected.is_none() => {
                    debug!(kind = self.kind.name, %id, attempt, "replace raced another write, retrying");
                    continue;
                }
                Commit::Rejected => return Err(self.conflict(&id)),
            };

            debug!(kind = self.kind.name, %id, %stamp, moved, "record replaced");
            if moved {
                self.notify(&prior_parent, stamp);
            }
            self.notify(&parent, stamp);
            return Ok(Committed { record, stamp });
        }

        Err(self.conflict(&id))
    }

    /// Delete a record and its index entry. Returns the record as it was
    /// stored.
    pub fn delete(&self, record: &T) -> Result<Committed<T>> {
        self.delete_by_id(self.kind.id_of(record))
    }

    /// Delete by id, using the stored parent key to find the index entry.
    ///
    /// Retried like [`Self::replace`] if the record changes between the read
    /// and the commit.
    pub fn delete_by_id(&self, id: &str) -> Result<Committed<T>> {
        for attempt in 0..MAX_ATTEMPTS {
            let (prior, prior_stamp) = self
                .get_versioned(id)?
                .ok_or_else(|| self.not_found(id))?;
            let parent = self.kind.parent_of(&prior).to_string();

            let primary = self.kind.primary_key(id);
            let tx = Transaction::new()
                .check(primary.clone(), Some(prior_stamp))
                .delete(primary)
                .delete(self.kind.index_key(&parent, id));

            let stamp = match self.kv.transact(tx)? {
                Commit::Committed(stamp) => stamp,
                Commit::Rejected => {
                    debug!(kind = self.kind.name, %id, attempt, "delete raced another write, retrying");
                    continue;
                }
            };

            debug!(kind = self.kind.name, %id, %stamp, "record deleted");
            self.notify(&parent, stamp);
            return Ok(Committed {
                record: prior,
                stamp,
            });
        }

        Err(self.conflict(id))
    }

    // --- Reads ---

    pub fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        Ok(self.get_versioned(id)?.map(|(record, _)| record))
    }

    /// A record together with the stamp of the commit that last wrote it.
    pub fn get_versioned(&self, id: &str) -> Result<Option<(T, Stamp)>> {
        match self.kv.get(&self.kind.primary_key(id))? {
            Some(entry) => Ok(Some((decode(&entry.value)?, entry.stamp))),
            None => Ok(None),
        }
    }

    /// Every record under `parent`, in index key order.
    pub fn list_by_parent(&self, parent: &str) -> Result<Vec<T>> {
        self.kv
            .scan(self.kind.index_prefix(parent))
            .map(|entry| decode(&entry.value))
            .collect()
    }

    /// Every record under `parent` plus the store stamp they reflect.
    pub fn list_with_stamp(&self, parent: &str) -> Result<(Vec<T>, Option<Stamp>)> {
        let (entries, stamp) = self.kv.list_prefix(&self.kind.index_prefix(parent));
        let records = entries
            .iter()
            .map(|entry| decode(&entry.value))
            .collect::<Result<Vec<T>>>()?;
        Ok((records, stamp))
    }

    /// Open a live subscription to the collection under `parent`.
    pub fn subscribe(&self, parent: &str, cancel: CancelToken) -> Result<Subscription<T>> {
        Subscription::open(
            self.topic(parent),
            Arc::clone(&self.notifier),
            || self.list_with_stamp(parent),
            cancel,
        )
    }

    // --- Internals ---

    fn commit(&self, tx: Transaction, id: &str) -> Result<Stamp> {
        match self.kv.transact(tx)? {
            Commit::Committed(stamp) => Ok(stamp),
            Commit::Rejected => Err(self.conflict(id)),
        }
    }

    fn conflict(&self, id: &str) -> StoreError {
        StoreError::WriteConflict(format!("{} {} changed while processing", self.kind.name, id))
    }

    /// Re-read the collection and publish it. Failures are logged, never
    /// returned: the write has already committed.
    fn notify(&self, parent: &str, stamp: Stamp) {
        let topic = self.topic(parent);
        // One consistent read; a lazy scan could straddle a later commit.
        let snapshot = self
            .list_with_stamp(parent)
            .and_then(|(records, _)| serde_json::to_value(&records).map_err(StoreError::from));

        match snapshot {
            Ok(records) => {
                self.notifier.publish(&topic, stamp, records);
            }
            Err(e) => warn!(%topic, %stamp, error = %e, "failed to re-read collection for publish"),
        }
    }

    fn not_found(&self, id: &str) -> StoreError {
        StoreError::NotFound(format!("{} {}", self.kind.name, id))
    }

    fn require_key(field: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(StoreError::ValidationFailed(format!("record {} is empty", field)));
        }
        Ok(())
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(record)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
