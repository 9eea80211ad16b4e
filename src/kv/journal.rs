//! Write-ahead journal for the record store.
//!
//! Every commit is appended as one checksummed frame before it is applied in
//! memory, so a failed append leaves the store exactly as it was. On open the
//! frames are replayed in order; a torn or corrupt tail is cut off.

use crate::error::{Result, StoreError};
use crate::kv::transaction::Mutation;
use crate::types::{Key, Stamp, Timestamp};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"LKJ\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 5;

/// Frame overhead (length prefix + trailing checksum).
const FRAME_OVERHEAD: u64 = 8;

/// Upper bound on a single frame payload.
const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// A stored value as captured by a compaction snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: Key,
    pub value: Vec<u8>,
    pub stamp: Stamp,
}

/// One journal frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A committed transaction.
    Commit {
        stamp: Stamp,
        mutations: Vec<Mutation>,
        timestamp: Timestamp,
    },
    /// Full contents of the store at compaction time.
    Snapshot {
        last_stamp: Option<Stamp>,
        entries: Vec<SnapshotEntry>,
    },
}

/// Durable sink for commits.
///
/// Implementations must either persist the whole entry or return an error
/// having persisted nothing that a later replay would pick up.
pub trait Journal: Send {
    /// Append one entry.
    fn append(&mut self, entry: &JournalEntry) -> Result<()>;

    /// Replace the whole journal with a single entry (compaction).
    fn rewrite(&mut self, entry: &JournalEntry) -> Result<()>;
}

/// Journal for stores that live only in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal;

impl Journal for MemoryJournal {
    fn append(&mut self, _entry: &JournalEntry) -> Result<()> {
        Ok(())
    }

    fn rewrite(&mut self, _entry: &JournalEntry) -> Result<()> {
        Ok(())
    }
}

/// Append-only journal file.
pub struct FileJournal {
    /// Path to the journal file.
    path: PathBuf,
    /// Append handle.
    file: File,
    /// Length of the valid prefix of the file.
    len: u64,
    /// fsync after every append.
    sync_on_commit: bool,
}

impl FileJournal {
    /// Create or open a journal file, returning the entries recovered from it.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let file = Self::create_file(&path)?;
            let journal = Self {
                path,
                file,
                len: HEADER_SIZE,
                sync_on_commit,
            };
            return Ok((journal, Vec::new()));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        let mut entries = Vec::new();
        let mut valid_len = HEADER_SIZE;
        while valid_len < file_len {
            match Self::read_frame(&mut reader) {
                Ok((entry, frame_len)) => {
                    entries.push(entry);
                    valid_len += frame_len;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset = valid_len,
                        error = %e,
                        "truncating torn journal tail"
                    );
                    break;
                }
            }
        }

        let mut file = reader.into_inner();
        if valid_len < file_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        debug!(path = %path.display(), frames = entries.len(), "journal replayed");

        let journal = Self {
            path,
            file,
            len: valid_len,
            sync_on_commit,
        };
        Ok((journal, entries))
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_file(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;
        Ok(file)
    }

    fn encode_frame(entry: &JournalEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;
        let mut frame = Vec::with_capacity(encoded.len() + FRAME_OVERHEAD as usize);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    fn read_frame(reader: &mut impl Read) -> Result<(JournalEntry, u64)> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_BYTES {
            return Err(StoreError::Corruption("journal frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        if expected != got {
            return Err(StoreError::ChecksumMismatch { expected, got });
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok((entry, len as u64 + FRAME_OVERHEAD))
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(frame)?;
        if self.sync_on_commit {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl Journal for FileJournal {
    fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let frame = Self::encode_frame(entry)?;

        if let Err(e) = self.write_frame(&frame) {
            // Cut back to the last whole frame so later appends stay readable.
            if let Err(trunc) = self.file.set_len(self.len) {
                warn!(
                    path = %self.path.display(),
                    len = self.len,
                    error = %trunc,
                    "failed to cut journal back after a failed append"
                );
            }
            return Err(e.into());
        }

        self.len += frame.len() as u64;
        Ok(())
    }

    fn rewrite(&mut self, entry: &JournalEntry) -> Result<()> {
        let frame = Self::encode_frame(entry)?;
        let tmp_path = self.path.with_extension("compact");

        {
            let mut tmp = Self::create_file(&tmp_path)?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.len = HEADER_SIZE + frame.len() as u64;
        self.file.seek(SeekFrom::Start(self.len))?;
        Ok(())
    }
}
