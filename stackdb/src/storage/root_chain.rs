//! Root chains.
//!
//! A root chain is the append-only history of a tree's root address. Each
//! entry pairs a stored root address with the time it was appended. A new
//! entry is only accepted if the caller names the current head as the root
//! it supersedes, which is the whole of the database's concurrency control.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::storage::addr::{Addr, InvalidAddr};
use crate::storage::time::{SystemTimeSource, TimeSource};
use crate::types::{VALUE128_SIZE, Value128};

/// One root chain entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootEntry {
    pub addr: Addr,
    /// Milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

/// Errors that can occur during root chain operations.
#[derive(Debug)]
pub enum RootChainError {
    /// The head is not the root the caller expected to supersede.
    Conflict {
        expected: Option<Addr>,
        actual: Option<Addr>,
    },
    /// Only stored addresses may be published.
    NotStored(Addr),
    /// I/O error.
    Io(std::io::Error),
    /// Corruption detected.
    Corruption(String),
}

impl std::fmt::Display for RootChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |a: &Option<Addr>| a.map_or_else(|| "<empty>".to_string(), |a| a.to_string());
        match self {
            Self::Conflict { expected, actual } => write!(
                f,
                "root chain conflict: expected head {}, found {}",
                show(expected),
                show(actual)
            ),
            Self::NotStored(addr) => write!(f, "cannot publish non-stored root {addr}"),
            Self::Io(e) => write!(f, "root chain I/O error: {e}"),
            Self::Corruption(msg) => write!(f, "root chain corruption: {msg}"),
        }
    }
}

impl std::error::Error for RootChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RootChainError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<InvalidAddr> for RootChainError {
    fn from(e: InvalidAddr) -> Self {
        Self::Corruption(e.to_string())
    }
}

/// Append-only log of root addresses with compare-and-append semantics.
pub trait RootChain: Send + Sync {
    /// Append `addr` if the current head is `supersede`.
    ///
    /// `supersede` is `None` only for the first entry of an empty chain.
    fn put_entry(&self, addr: Addr, supersede: Option<Addr>) -> Result<RootEntry, RootChainError>;

    /// The most recent entry, if any.
    fn last_entry(&self) -> Result<Option<RootEntry>, RootChainError>;

    /// Number of entries.
    fn len(&self) -> Result<usize, RootChainError>;

    fn is_empty(&self) -> Result<bool, RootChainError> {
        Ok(self.len()? == 0)
    }
}

/// Shared check for both implementations.
fn check_supersede(
    head: Option<RootEntry>,
    addr: Addr,
    supersede: Option<Addr>,
) -> Result<(), RootChainError> {
    if !addr.is_store() {
        return Err(RootChainError::NotStored(addr));
    }
    let actual = head.map(|e| e.addr);
    if actual != supersede {
        warn!(
            expected = ?supersede,
            ?actual,
            "rejected root chain append"
        );
        return Err(RootChainError::Conflict {
            expected: supersede,
            actual,
        });
    }
    Ok(())
}

/// A root chain held on the heap.
#[derive(Debug)]
pub struct HeapRootChain<T: TimeSource = SystemTimeSource> {
    entries: Mutex<Vec<RootEntry>>,
    time: T,
}

impl HeapRootChain<SystemTimeSource> {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_time_source(SystemTimeSource)
    }
}

impl Default for HeapRootChain<SystemTimeSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeSource> HeapRootChain<T> {
    #[must_use]
    pub const fn with_time_source(time: T) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            time,
        }
    }

    /// Copy of every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<RootEntry> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let entries = self.entries.lock().expect("root chain mutex poisoned");
        entries.clone()
    }
}

impl<T: TimeSource> RootChain for HeapRootChain<T> {
    fn put_entry(&self, addr: Addr, supersede: Option<Addr>) -> Result<RootEntry, RootChainError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let mut entries = self.entries.lock().expect("root chain mutex poisoned");
        check_supersede(entries.last().copied(), addr, supersede)?;
        let entry = RootEntry {
            addr,
            timestamp_ms: self.time.now_ms(),
        };
        entries.push(entry);
        Ok(entry)
    }

    fn last_entry(&self) -> Result<Option<RootEntry>, RootChainError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let entries = self.entries.lock().expect("root chain mutex poisoned");
        Ok(entries.last().copied())
    }

    fn len(&self) -> Result<usize, RootChainError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let entries = self.entries.lock().expect("root chain mutex poisoned");
        Ok(entries.len())
    }
}

/// Size of one on-disk record: addr (16) + timestamp (8) + CRC32 (4).
const RECORD_SIZE: usize = VALUE128_SIZE + 8 + 4;

fn encode_record(entry: &RootEntry) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    record[..VALUE128_SIZE].copy_from_slice(entry.addr.to_value().as_bytes());
    record[VALUE128_SIZE..VALUE128_SIZE + 8].copy_from_slice(&entry.timestamp_ms.to_le_bytes());
    let checksum = crc32fast::hash(&record[..VALUE128_SIZE + 8]);
    record[VALUE128_SIZE + 8..].copy_from_slice(&checksum.to_le_bytes());
    record
}

/// Decode a record, returning `None` if its checksum does not match.
fn decode_record(record: &[u8]) -> Result<Option<RootEntry>, RootChainError> {
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&record[VALUE128_SIZE + 8..RECORD_SIZE]);
    if crc32fast::hash(&record[..VALUE128_SIZE + 8]) != u32::from_le_bytes(crc) {
        return Ok(None);
    }
    let mut raw = [0u8; VALUE128_SIZE];
    raw.copy_from_slice(&record[..VALUE128_SIZE]);
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&record[VALUE128_SIZE..VALUE128_SIZE + 8]);
    Ok(Some(RootEntry {
        addr: Addr::from_value(Value128(raw))?,
        timestamp_ms: u64::from_le_bytes(ts),
    }))
}

struct FileRootChainInner {
    file: File,
    last: Option<RootEntry>,
    count: usize,
}

/// A root chain persisted as fixed-size checksummed records in one file.
pub struct FileRootChain<T: TimeSource = SystemTimeSource> {
    inner: Mutex<FileRootChainInner>,
    time: T,
}

impl FileRootChain<SystemTimeSource> {
    /// Create a new, empty root chain file.
    pub fn create(path: &Path) -> Result<Self, RootChainError> {
        Self::create_with_time_source(path, SystemTimeSource)
    }

    /// Open an existing root chain file.
    pub fn open(path: &Path) -> Result<Self, RootChainError> {
        Self::open_with_time_source(path, SystemTimeSource)
    }
}

impl<T: TimeSource> FileRootChain<T> {
    pub fn create_with_time_source(path: &Path, time: T) -> Result<Self, RootChainError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.sync_all()?;
        Ok(Self {
            inner: Mutex::new(FileRootChainInner {
                file,
                last: None,
                count: 0,
            }),
            time,
        })
    }

    /// Open a root chain file, dropping a torn or corrupt final record.
    pub fn open_with_time_source(path: &Path, time: T) -> Result<Self, RootChainError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut last = None;
        let mut count = 0;
        for record in bytes.chunks_exact(RECORD_SIZE) {
            match decode_record(record)? {
                Some(entry) => {
                    last = Some(entry);
                    count += 1;
                }
                None => break,
            }
        }

        let valid_len = (count * RECORD_SIZE) as u64;
        if valid_len < bytes.len() as u64 {
            warn!(
                path = %path.display(),
                valid_len,
                file_len = bytes.len(),
                "truncating torn tail of root chain"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        info!(path = %path.display(), entries = count, "opened root chain");

        Ok(Self {
            inner: Mutex::new(FileRootChainInner { file, last, count }),
            time,
        })
    }
}

impl<T: TimeSource> RootChain for FileRootChain<T> {
    fn put_entry(&self, addr: Addr, supersede: Option<Addr>) -> Result<RootEntry, RootChainError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let mut inner = self.inner.lock().expect("root chain mutex poisoned");
        check_supersede(inner.last, addr, supersede)?;
        let entry = RootEntry {
            addr,
            timestamp_ms: self.time.now_ms(),
        };
        let record = encode_record(&entry);
        let offset = (inner.count * RECORD_SIZE) as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&record)?;
        inner.file.sync_data()?;
        inner.last = Some(entry);
        inner.count += 1;
        Ok(entry)
    }

    fn last_entry(&self) -> Result<Option<RootEntry>, RootChainError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let inner = self.inner.lock().expect("root chain mutex poisoned");
        Ok(inner.last)
    }

    fn len(&self) -> Result<usize, RootChainError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let inner = self.inner.lock().expect("root chain mutex poisoned");
        Ok(inner.count)
    }
}

impl<T: TimeSource> std::fmt::Debug for FileRootChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRootChain").finish_non_exhaustive()
    }
}
