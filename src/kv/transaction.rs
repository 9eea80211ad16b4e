//! Atomic multi-key transactions.

use crate::types::{Key, Stamp};
use serde::{Deserialize, Serialize};

/// A single write inside a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Set { key: Key, value: Vec<u8> },
    Delete { key: Key },
}

impl Mutation {
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Set { key, .. } | Mutation::Delete { key } => key,
        }
    }
}

/// Precondition on a key's current stamp.
///
/// `stamp: None` requires the key to be absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Check {
    pub key: Key,
    pub stamp: Option<Stamp>,
}

/// A set of checks and mutations applied as one all-or-nothing unit.
///
/// ```ignore
/// let tx = Transaction::new()
///     .set(Key::new(["lists", "l1"]), bytes.clone())
///     .set(Key::new(["lists_by_userId", "u1", "l1"]), bytes);
/// let commit = kv.transact(tx)?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct Transaction {
    checks: Vec<Check>,
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to currently carry `stamp` (or be absent for `None`).
    pub fn check(mut self, key: Key, stamp: Option<Stamp>) -> Self {
        self.checks.push(Check { key, stamp });
        self
    }

    pub fn set(mut self, key: Key, value: Vec<u8>) -> Self {
        self.mutations.push(Mutation::Set { key, value });
        self
    }

    pub fn delete(mut self, key: Key) -> Self {
        self.mutations.push(Mutation::Delete { key });
        self
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty() && self.mutations.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Check>, Vec<Mutation>) {
        (self.checks, self.mutations)
    }
}

/// Outcome of a transaction that reached the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    /// Every mutation was applied under this stamp.
    Committed(Stamp),
    /// A check failed; nothing was applied and no stamp was consumed.
    Rejected,
}

impl Commit {
    pub fn ok(&self) -> bool {
        matches!(self, Commit::Committed(_))
    }

    pub fn stamp(&self) -> Option<Stamp> {
        match self {
            Commit::Committed(stamp) => Some(*stamp),
            Commit::Rejected => None,
        }
    }
}
