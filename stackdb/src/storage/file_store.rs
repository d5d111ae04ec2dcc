//! Append-only file store.
//!
//! All nodes live in a single file. Each `write_spans` call appends one
//! checksummed frame, so a batch is either fully present after a crash or
//! not at all.
//!
//! # File Format
//!
//! ```text
//! +----------+-----------------------------------------------+
//! | 0-7      | magic "STACKDB\0"                             |
//! | 8-11     | format version (u32)                          |
//! | 12-15    | node size limit (u32)                         |
//! +----------+-----------------------------------------------+
//! | frame    | body_length (u32)                             |
//! |          | body: span_count (u32), then per span:        |
//! |          |   addr (16) | data_length (u32) | data        |
//! |          | CRC32 of body (u32)                           |
//! +----------+-----------------------------------------------+
//! ```
//!
//! Integers are little-endian. On open the frames are scanned to rebuild
//! the address index; a torn or corrupt tail frame is truncated away.

// Frame and span lengths are bounded by the node size limit
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::storage::addr::Addr;
use crate::storage::io::{
    AllocationHint, FIRST_STORED_ID, StoreBackend, StoreError, validate_batch,
};
use crate::storage::span::DataSpan;
use crate::types::{VALUE128_SIZE, Value128};

const MAGIC: [u8; 8] = *b"STACKDB\0";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 16;
/// `body_length` + CRC32.
const FRAME_OVERHEAD: u64 = 8;
/// Per-span header inside a frame body: addr + `data_length`.
const SPAN_HEADER_SIZE: usize = VALUE128_SIZE + 4;

struct FileStoreInner {
    file: File,
    /// Stored address to (file offset of data, data length).
    index: HashMap<Addr, (u64, u32)>,
    end: u64,
    next_id: u64,
}

/// A durable store backed by one append-only file.
pub struct FileStore {
    inner: Mutex<FileStoreInner>,
    node_size_limit: usize,
}

impl FileStore {
    /// Create a new store file.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, node_size_limit: usize) -> Result<Self, StoreError> {
        let limit = u32::try_from(node_size_limit).map_err(|_| StoreError::LimitExceeded {
            requested: node_size_limit,
            limit: u32::MAX as usize,
        })?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        header.extend_from_slice(&limit.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        info!(path = %path.display(), node_size_limit, "created node store");

        Ok(Self {
            inner: Mutex::new(FileStoreInner {
                file,
                index: HashMap::new(),
                end: HEADER_SIZE,
                next_id: FIRST_STORED_ID,
            }),
            node_size_limit,
        })
    }

    /// Open an existing store file, recovering from a torn final frame.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();

        let mut header = [0u8; HEADER_SIZE as usize];
        if file_len < HEADER_SIZE {
            return Err(StoreError::Corruption("node store header truncated".to_string()));
        }
        file.read_exact(&mut header)?;
        if header[..8] != MAGIC {
            return Err(StoreError::Corruption("bad node store magic".to_string()));
        }
        let version = read_u32(&header, 8);
        if version != FORMAT_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported node store version {version}"
            )));
        }
        let node_size_limit = read_u32(&header, 12) as usize;

        let mut index = HashMap::new();
        let mut offset = HEADER_SIZE;
        let mut frames = 0usize;
        while let Some(body) = read_frame(&mut file, offset, file_len)? {
            let body_offset = offset + 4;
            index_frame_body(&body, body_offset, &mut index)?;
            offset = body_offset + body.len() as u64 + 4;
            frames += 1;
        }

        if offset < file_len {
            warn!(
                path = %path.display(),
                valid_len = offset,
                file_len,
                "truncating torn tail of node store"
            );
            file.set_len(offset)?;
            file.sync_all()?;
        }

        let next_id = index
            .keys()
            .filter_map(|addr| match addr {
                Addr::Stored { id, .. } => Some(id + 1),
                _ => None,
            })
            .max()
            .unwrap_or(FIRST_STORED_ID)
            .max(FIRST_STORED_ID);

        info!(path = %path.display(), frames, spans = index.len(), "opened node store");

        Ok(Self {
            inner: Mutex::new(FileStoreInner {
                file,
                index,
                end: offset,
                next_id,
            }),
            node_size_limit,
        })
    }

    /// Number of spans stored.
    #[must_use]
    pub fn span_count(&self) -> usize {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let inner = self.inner.lock().expect("file store mutex poisoned");
        inner.index.len()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(b)
}

/// Read the frame at `offset`. Returns `None` at end of file or if the
/// frame is incomplete or fails its checksum.
fn read_frame(file: &mut File, offset: u64, file_len: u64) -> Result<Option<Vec<u8>>, StoreError> {
    if offset + FRAME_OVERHEAD > file_len {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let body_len = u64::from(u32::from_le_bytes(len_bytes));
    if offset + FRAME_OVERHEAD + body_len > file_len {
        return Ok(None);
    }

    let mut body = vec![0u8; body_len as usize];
    file.read_exact(&mut body)?;
    let mut crc_bytes = [0u8; 4];
    file.read_exact(&mut crc_bytes)?;
    if crc32fast::hash(&body) != u32::from_le_bytes(crc_bytes) {
        return Ok(None);
    }
    Ok(Some(body))
}

/// Add every span of a checksummed frame body to the index.
fn index_frame_body(
    body: &[u8],
    body_offset: u64,
    index: &mut HashMap<Addr, (u64, u32)>,
) -> Result<(), StoreError> {
    let corrupt = || StoreError::Corruption(format!("malformed frame at offset {body_offset}"));
    if body.len() < 4 {
        return Err(corrupt());
    }
    let count = read_u32(body, 0);
    let mut pos = 4usize;
    for _ in 0..count {
        if pos + SPAN_HEADER_SIZE > body.len() {
            return Err(corrupt());
        }
        let mut raw = [0u8; VALUE128_SIZE];
        raw.copy_from_slice(&body[pos..pos + VALUE128_SIZE]);
        let addr = Addr::from_value(Value128(raw))?;
        let len = read_u32(body, pos + VALUE128_SIZE);
        pos += SPAN_HEADER_SIZE;
        if pos + len as usize > body.len() {
            return Err(corrupt());
        }
        index.insert(addr, (body_offset + pos as u64, len));
        pos += len as usize;
    }
    if pos != body.len() {
        return Err(corrupt());
    }
    Ok(())
}

/// Serialize a batch into one frame.
fn encode_frame(spans: &[(Addr, Arc<[u8]>)]) -> Vec<u8> {
    let body_len = 4 + spans
        .iter()
        .map(|(_, data)| SPAN_HEADER_SIZE + data.len())
        .sum::<usize>();
    let mut frame = Vec::with_capacity(body_len + FRAME_OVERHEAD as usize);
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    frame.extend_from_slice(&(spans.len() as u32).to_le_bytes());
    for (addr, data) in spans {
        frame.extend_from_slice(addr.to_value().as_bytes());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(data);
    }
    let checksum = crc32fast::hash(&frame[4..]);
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame
}

impl StoreBackend for FileStore {
    fn read_span(&self, addr: Addr) -> Result<DataSpan, StoreError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let mut inner = self.inner.lock().expect("file store mutex poisoned");
        let (offset, len) = *inner.index.get(&addr).ok_or(StoreError::NotFound(addr))?;
        let mut data = vec![0u8; len as usize];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut data)?;
        Ok(DataSpan::new(addr, data.into()))
    }

    fn allocate_store_addrs(&self, hints: &[AllocationHint]) -> Result<Vec<Addr>, StoreError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let mut inner = self.inner.lock().expect("file store mutex poisoned");
        let first = inner.next_id;
        inner.next_id += hints.len() as u64;
        Ok(hints
            .iter()
            .zip(first..)
            .map(|(hint, id)| Addr::Stored {
                kind: hint.kind,
                id,
            })
            .collect())
    }

    fn write_spans(&self, spans: &[(Addr, Arc<[u8]>)]) -> Result<(), StoreError> {
        validate_batch(spans, self.node_size_limit)?;
        let frame = encode_frame(spans);

        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let mut inner = self.inner.lock().expect("file store mutex poisoned");
        let frame_offset = inner.end;
        inner.file.seek(SeekFrom::Start(frame_offset))?;
        inner.file.write_all(&frame)?;
        inner.file.sync_data()?;

        // Index only after the frame is durable.
        let mut pos = frame_offset + 8;
        for (addr, data) in spans {
            pos += SPAN_HEADER_SIZE as u64;
            inner.index.insert(*addr, (pos, data.len() as u32));
            pos += data.len() as u64;
        }
        inner.end = frame_offset + frame.len() as u64;
        Ok(())
    }

    fn node_data_byte_size_limit(&self) -> usize {
        self.node_size_limit
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("node_size_limit", &self.node_size_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::addr::NodeKind;
    use tempfile::tempdir;

    fn hint(kind: NodeKind) -> AllocationHint {
        AllocationHint {
            kind,
            size: 0,
            size_diff: 0,
            origin: None,
            append_only: false,
        }
    }

    #[test]
    fn test_create_write_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("nodes.dat");

        let (a, b) = {
            let store = FileStore::create(&path, 1024).expect("create store");
            let addrs = store
                .allocate_store_addrs(&[hint(NodeKind::Leaf), hint(NodeKind::Branch)])
                .unwrap();
            store
                .write_spans(&[
                    (addrs[0], Arc::from(b"leaf bytes".as_slice())),
                    (addrs[1], Arc::from(vec![7u8; 24])),
                ])
                .unwrap();
            assert_eq!(store.read_span(addrs[0]).unwrap().as_bytes(), b"leaf bytes");
            (addrs[0], addrs[1])
        };

        let store = FileStore::open(&path).expect("reopen store");
        assert_eq!(store.node_data_byte_size_limit(), 1024);
        assert_eq!(store.span_count(), 2);
        assert_eq!(store.read_span(a).unwrap().as_bytes(), b"leaf bytes");
        assert_eq!(store.read_span(b).unwrap().as_bytes(), &[7u8; 24]);

        // Allocation resumes after the highest recovered id.
        let next = store.allocate_store_addrs(&[hint(NodeKind::Leaf)]).unwrap()[0];
        assert!(matches!(next, Addr::Stored { id, .. } if id == FIRST_STORED_ID + 2));
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("nodes.dat");
        FileStore::create(&path, 1024).expect("create store");
        assert!(matches!(FileStore::create(&path, 1024), Err(StoreError::Io(_))));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("nodes.dat");

        let first = {
            let store = FileStore::create(&path, 1024).expect("create store");
            let addrs = store
                .allocate_store_addrs(&[hint(NodeKind::Leaf), hint(NodeKind::Leaf)])
                .unwrap();
            store
                .write_spans(&[(addrs[0], Arc::from(b"first".as_slice()))])
                .unwrap();
            store
                .write_spans(&[(addrs[1], Arc::from(b"second".as_slice()))])
                .unwrap();
            addrs[0]
        };

        // Chop the last few bytes off the second frame.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let store = FileStore::open(&path).expect("reopen store");
        assert_eq!(store.span_count(), 1);
        assert_eq!(store.read_span(first).unwrap().as_bytes(), b"first");

        // The file now ends right after the first frame.
        let expected = HEADER_SIZE + FRAME_OVERHEAD + 4 + SPAN_HEADER_SIZE as u64 + 5;
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("nodes.dat");
        std::fs::write(&path, [0u8; 32]).unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Corruption(_))));
    }
}
