//! Ordered key-value store with atomic multi-key transactions.

use crate::error::{Result, StoreError};
use crate::kv::journal::{FileJournal, Journal, JournalEntry, MemoryJournal, SnapshotEntry};
use crate::kv::transaction::{Commit, Mutation, Transaction};
use crate::types::{Key, Stamp, Timestamp};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"LKV\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Journal file name inside the store directory.
const JOURNAL_FILE: &str = "kv.journal";

/// Entries fetched per refill of a [`Scan`].
const SCAN_BATCH: usize = 128;

/// A value together with the stamp of the commit that wrote it.
#[derive(Clone, Debug)]
struct Versioned {
    value: Vec<u8>,
    stamp: Stamp,
}

/// A key, its value, and the stamp of the commit that wrote it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Vec<u8>,
    pub stamp: Stamp,
}

#[derive(Default)]
struct Tables {
    entries: BTreeMap<Key, Versioned>,
    last_stamp: Option<Stamp>,
}

impl Tables {
    fn apply(&mut self, stamp: Stamp, mutations: Vec<Mutation>) {
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    self.entries.insert(key, Versioned { value, stamp });
                }
                Mutation::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
        self.last_stamp = Some(stamp);
    }

    fn replay(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Commit {
                stamp, mutations, ..
            } => self.apply(stamp, mutations),
            JournalEntry::Snapshot {
                last_stamp,
                entries,
            } => {
                self.entries = entries
                    .into_iter()
                    .map(|e| {
                        (
                            e.key,
                            Versioned {
                                value: e.value,
                                stamp: e.stamp,
                            },
                        )
                    })
                    .collect();
                self.last_stamp = last_stamp;
            }
        }
    }
}

/// The record store.
///
/// Reads are served from an in-memory ordered map. Writes go through
/// [`KvStore::transact`], which serializes commits, appends them to the
/// journal and only then applies them, so readers never observe a partial
/// transaction and a failed append changes nothing.
pub struct KvStore {
    /// Store directory (None for in-memory stores).
    path: Option<PathBuf>,

    /// Lock file for exclusive access.
    _lock_file: Option<File>,

    /// Current contents.
    tables: RwLock<Tables>,

    /// Durable sink for commits.
    journal: Mutex<Box<dyn Journal>>,
}

impl KvStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_journal(Box::new(MemoryJournal), Vec::new())
    }

    /// Build a store over an arbitrary journal, replaying `recovered` first.
    pub fn with_journal(journal: Box<dyn Journal>, recovered: Vec<JournalEntry>) -> Self {
        let mut tables = Tables::default();
        for entry in recovered {
            tables.replay(entry);
        }

        Self {
            path: None,
            _lock_file: None,
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
        }
    }

    /// Open an existing store or create a new one.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        create_if_missing: bool,
        sync_on_commit: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.join("MANIFEST").exists() {
            Self::open(path, sync_on_commit)
        } else if create_if_missing {
            Self::create(path, sync_on_commit)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new on-disk store.
    pub fn create(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Self::write_manifest(&path)?;
        Self::open_dir(path, sync_on_commit)
    }

    /// Open an existing on-disk store.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::verify_manifest(&path)?;
        Self::open_dir(path, sync_on_commit)
    }

    fn open_dir(path: PathBuf, sync_on_commit: bool) -> Result<Self> {
        let lock_file = Self::acquire_lock(&path)?;
        let (journal, recovered) = FileJournal::open(path.join(JOURNAL_FILE), sync_on_commit)?;

        let mut store = Self::with_journal(Box::new(journal), recovered);
        store.path = Some(path);
        store._lock_file = Some(lock_file);

        info!(
            path = ?store.path,
            entries = store.len(),
            last_stamp = ?store.last_stamp(),
            "record store opened"
        );
        Ok(store)
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized);
        }

        let mut file = File::open(manifest_path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid manifest magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join("LOCK"))?;

        lock_file.try_lock_exclusive().map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }

    /// Store directory, if on disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // --- Reads ---

    /// Get the current value under `key`.
    pub fn get(&self, key: &Key) -> Result<Option<Entry>> {
        let tables = self.tables.read();
        Ok(tables.entries.get(key).map(|v| Entry {
            key: key.clone(),
            value: v.value.clone(),
            stamp: v.stamp,
        }))
    }

    /// Lazily iterate every entry whose key starts with `prefix`, in key order.
    ///
    /// The iterator refills in batches, each under a short read lock, so a
    /// long scan does not hold writers off. Commits landing mid-scan may or
    /// may not be visible to the remaining batches.
    pub fn scan(&self, prefix: Key) -> Scan<'_> {
        Scan {
            store: self,
            prefix,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Read every entry under `prefix` plus the latest stamp, under one lock.
    ///
    /// The returned entries reflect every commit up to and including the
    /// returned stamp and nothing after it.
    pub fn list_prefix(&self, prefix: &Key) -> (Vec<Entry>, Option<Stamp>) {
        let tables = self.tables.read();
        let entries = tables
            .entries
            .range::<Key, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, v)| Entry {
                key: key.clone(),
                value: v.value.clone(),
                stamp: v.stamp,
            })
            .collect();
        (entries, tables.last_stamp)
    }

    /// Stamp of the most recent commit, if any.
    pub fn last_stamp(&self) -> Option<Stamp> {
        self.tables.read().last_stamp
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.tables.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- Writes ---

    /// Apply a transaction atomically.
    ///
    /// Returns [`Commit::Rejected`] when a check fails, in which case nothing
    /// is written. A journal failure surfaces as an error, also with nothing
    /// written.
    pub fn transact(&self, tx: Transaction) -> Result<Commit> {
        let (checks, mutations) = tx.into_parts();
        let mut tables = self.tables.write();

        for check in &checks {
            let current = tables.entries.get(&check.key).map(|v| v.stamp);
            if current != check.stamp {
                debug!(
                    key = %check.key,
                    expected = ?check.stamp,
                    current = ?current,
                    "transaction check failed"
                );
                return Ok(Commit::Rejected);
            }
        }

        let stamp = tables.last_stamp.map_or(Stamp::first(), Stamp::next);
        let entry = JournalEntry::Commit {
            stamp,
            mutations,
            timestamp: Timestamp::now(),
        };
        self.journal.lock().append(&entry)?;

        if let JournalEntry::Commit { mutations, .. } = entry {
            debug!(%stamp, mutations = mutations.len(), "transaction committed");
            tables.apply(stamp, mutations);
        }

        Ok(Commit::Committed(stamp))
    }

    /// Rewrite the journal as a single snapshot of the current contents.
    pub fn compact(&self) -> Result<()> {
        let tables = self.tables.write();
        let entries: Vec<SnapshotEntry> = tables
            .entries
            .iter()
            .map(|(key, v)| SnapshotEntry {
                key: key.clone(),
                value: v.value.clone(),
                stamp: v.stamp,
            })
            .collect();
        let count = entries.len();

        self.journal.lock().rewrite(&JournalEntry::Snapshot {
            last_stamp: tables.last_stamp,
            entries,
        })?;

        info!(entries = count, last_stamp = ?tables.last_stamp, "journal compacted");
        Ok(())
    }
}

/// Lazy prefix scan over a [`KvStore`].
pub struct Scan<'a> {
    store: &'a KvStore,
    prefix: Key,
    after: Option<Key>,
    buffer: VecDeque<Entry>,
    exhausted: bool,
}

impl Scan<'_> {
    fn refill(&mut self) {
        let tables = self.store.tables.read();
        let lower = match &self.after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Included(&self.prefix),
        };

        let mut taken = 0;
        for (key, v) in tables.entries.range::<Key, _>((lower, Bound::Unbounded)) {
            if !key.starts_with(&self.prefix) {
                self.exhausted = true;
                break;
            }
            self.buffer.push_back(Entry {
                key: key.clone(),
                value: v.value.clone(),
                stamp: v.stamp,
            });
            taken += 1;
            if taken == SCAN_BATCH {
                break;
            }
        }

        if taken < SCAN_BATCH {
            self.exhausted = true;
        }
        if let Some(last) = self.buffer.back() {
            self.after = Some(last.key.clone());
        }
    }
}

impl Iterator for Scan<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front()
    }
}
